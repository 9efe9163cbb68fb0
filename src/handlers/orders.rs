use crate::{
    auth::{AdminUser, AuthenticatedUser},
    entities::OrderStatus,
    errors::ServiceError,
    handlers::common::{no_content_response, success_response},
    services::orders::UpdateOrderInput,
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

pub fn orders_routes() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_my_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/cancel", post(cancel_order))
}

pub fn admin_orders_routes() -> Router<AppState> {
    Router::new()
        .route("/admin/orders", get(list_all_orders))
        .route(
            "/admin/orders/:id",
            put(update_order).delete(delete_order),
        )
        .route("/admin/orders/:id/status", put(change_status))
}

#[derive(Debug, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ChangeStatusRequest {
    pub status: OrderStatus,
}

async fn list_my_orders(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.orders.list_for_user(user.id).await?,
    ))
}

async fn get_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.orders.get_for_user(id, &user).await?,
    ))
}

async fn cancel_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    Ok(success_response(state.services.orders.cancel(id, &user).await?))
}

async fn list_all_orders(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<OrderFilter>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.orders.list_all(filter.status).await?,
    ))
}

async fn change_status(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<ChangeStatusRequest>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.orders.change_status(id, payload.status).await?,
    ))
}

async fn update_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateOrderInput>,
) -> Result<Response, ServiceError> {
    Ok(success_response(
        state.services.orders.update_details(id, payload).await?,
    ))
}

async fn delete_order(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    state.services.orders.delete(id).await?;
    Ok(no_content_response())
}
