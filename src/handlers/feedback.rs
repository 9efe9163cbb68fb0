use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    handlers::common::{created_response, no_content_response, success_response},
    services::feedback::{FeedbackInput, FeedbackUpdate},
    AppState,
};
use axum::{
    extract::{Path, State},
    response::Response,
    routing::get,
    Json, Router,
};
use uuid::Uuid;

pub fn feedback_routes() -> Router<AppState> {
    Router::new()
        .route("/feedback", get(list_feedback).post(create_feedback))
        .route("/feedback/reviewable", get(reviewable_orders))
        .route(
            "/feedback/:id",
            get(get_feedback).put(update_feedback).delete(delete_feedback),
        )
}

async fn list_feedback(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.services.feedback.list(user.id).await?))
}

async fn reviewable_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.feedback.reviewable_orders(user.id).await?,
    ))
}

async fn create_feedback(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<FeedbackInput>,
) -> Result<Response, ServiceError> {
    Ok(created_response(
        state.services.feedback.create(user.id, payload).await?,
    ))
}

async fn get_feedback(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.services.feedback.get(user.id, id).await?))
}

async fn update_feedback(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<FeedbackUpdate>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.feedback.update(user.id, id, payload).await?,
    ))
}

async fn delete_feedback(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.feedback.delete(user.id, id).await?;
    Ok(no_content_response())
}
