use crate::session::{CartSession, SESSION_ID_HEADER};
use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Resolves the cart session for every request and echoes it back, so a
/// client that arrives without one learns the id it was assigned.
pub async fn cart_session_middleware(mut request: Request, next: Next) -> Response {
    let session = match request
        .headers()
        .get(SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        Some(raw) => match CartSession::parse(raw) {
            Ok(session) => session,
            Err(err) => return err.into_response(),
        },
        None => CartSession::generate(),
    };

    request.extensions_mut().insert(session.clone());
    let mut response = next.run(request).await;

    if let Ok(value) = HeaderValue::from_str(session.as_str()) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(SESSION_ID_HEADER), value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::StatusCode, routing::get, Router};
    use tower::ServiceExt;

    async fn echo(session: CartSession) -> String {
        session.to_string()
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(echo))
            .layer(axum::middleware::from_fn(cart_session_middleware))
    }

    #[tokio::test]
    async fn assigns_session_when_header_missing() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let assigned = response.headers().get(SESSION_ID_HEADER).unwrap();
        assert!(!assigned.is_empty());
    }

    #[tokio::test]
    async fn rejects_malformed_session_header() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(SESSION_ID_HEADER, "bad id!")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
