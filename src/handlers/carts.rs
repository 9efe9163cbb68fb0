use crate::{
    errors::ServiceError,
    handlers::common::{no_content_response, success_response, validate_input},
    services::cart::Cart,
    session::CartSession,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::Response,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

pub fn carts_routes() -> Router<AppState> {
    Router::new()
        .route("/cart", get(get_cart).delete(clear_cart))
        .route("/cart/count", get(cart_count))
        .route("/cart/items", post(add_item))
        .route(
            "/cart/items/:product_id",
            put(update_item).delete(remove_item),
        )
        .route("/cart/coupon", post(apply_coupon).delete(remove_coupon))
}

#[derive(Debug, Deserialize, Validate)]
pub struct AddItemRequest {
    pub product_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be at least 1"))]
    #[serde(default = "default_quantity")]
    pub quantity: i32,
}

fn default_quantity() -> i32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub quantity: i32,
}

#[derive(Debug, Deserialize)]
pub struct ApplyCouponRequest {
    pub code: String,
}

fn summary_response(state: &AppState, session: &CartSession, cart: &Cart) -> Response {
    let applied = state.applied_discounts.get(session);
    success_response(cart.summary(applied.as_ref()))
}

async fn get_cart(
    State(state): State<AppState>,
    session: CartSession,
) -> Result<Response, ServiceError> {
    let cart = state.services.cart.load(session.as_str()).await?;
    Ok(summary_response(&state, &session, &cart))
}

async fn cart_count(
    State(state): State<AppState>,
    session: CartSession,
) -> Result<Response, ServiceError> {
    let cart = state.services.cart.load(session.as_str()).await?;
    Ok(success_response(json!({ "count": cart.item_count() })))
}

async fn add_item(
    State(state): State<AppState>,
    session: CartSession,
    Json(payload): Json<AddItemRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;
    let cart = state
        .services
        .cart
        .add_item(session.as_str(), payload.product_id, payload.quantity)
        .await?;
    Ok(summary_response(&state, &session, &cart))
}

async fn update_item(
    State(state): State<AppState>,
    session: CartSession,
    Path(product_id): Path<Uuid>,
    Json(payload): Json<UpdateItemRequest>,
) -> Result<Response, ServiceError> {
    let cart = state
        .services
        .cart
        .update_item(session.as_str(), product_id, payload.quantity)
        .await?;
    Ok(summary_response(&state, &session, &cart))
}

async fn remove_item(
    State(state): State<AppState>,
    session: CartSession,
    Path(product_id): Path<Uuid>,
) -> Result<Response, ServiceError> {
    let cart = state
        .services
        .cart
        .remove_item(session.as_str(), product_id)
        .await?;
    Ok(summary_response(&state, &session, &cart))
}

/// Empties the cart. An applied coupon stays until removed explicitly.
async fn clear_cart(
    State(state): State<AppState>,
    session: CartSession,
) -> Result<Response, ServiceError> {
    state.services.cart.clear(session.as_str()).await?;
    Ok(no_content_response())
}

async fn apply_coupon(
    State(state): State<AppState>,
    session: CartSession,
    Json(payload): Json<ApplyCouponRequest>,
) -> Result<Response, ServiceError> {
    let cart = state.services.cart.load(session.as_str()).await?;
    let (applied, _) = state
        .services
        .coupons
        .evaluate(session.as_str(), &payload.code, cart.total())
        .await?;
    state.applied_discounts.set(&session, applied);
    Ok(summary_response(&state, &session, &cart))
}

async fn remove_coupon(
    State(state): State<AppState>,
    session: CartSession,
) -> Result<Response, ServiceError> {
    state.applied_discounts.remove(&session);
    let cart = state.services.cart.load(session.as_str()).await?;
    Ok(summary_response(&state, &session, &cart))
}
