use crate::{
    auth::AuthenticatedUser, errors::ServiceError, handlers::common::success_response, AppState,
};
use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post},
    Router,
};
use serde_json::json;
use uuid::Uuid;

pub fn favorites_routes() -> Router<AppState> {
    Router::new()
        .route("/favorites", get(list_favorites))
        .route("/favorites/:product_id/toggle", post(toggle_favorite))
}

async fn list_favorites(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.favorites.list(user.id).await?,
    ))
}

async fn toggle_favorite(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(product_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let favorited = state
        .services
        .favorites
        .toggle(user.id, product_id)
        .await?;
    Ok(success_response(json!({
        "product_id": product_id,
        "favorited": favorited
    })))
}
