use crate::{
    auth::AdminUser,
    errors::ServiceError,
    handlers::common::{created_response, no_content_response, success_response},
    services::coupons::CouponInput,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, put},
    Json, Router,
};
use uuid::Uuid;

pub fn admin_coupons_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/coupons", get(list_coupons).post(create_coupon))
        .route(
            "/admin/coupons/:id",
            put(update_coupon).delete(delete_coupon),
        )
}

async fn list_coupons(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.services.coupons.list().await?))
}

async fn create_coupon(
    State(state): State<AppState>,
    _admin: AdminUser,
    Json(payload): Json<CouponInput>,
) -> Result<Response, ServiceError> {
    Ok(created_response(state.services.coupons.create(payload).await?))
}

async fn update_coupon(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<CouponInput>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.coupons.update(id, payload).await?,
    ))
}

async fn delete_coupon(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.coupons.delete(id).await?;
    Ok(no_content_response())
}
