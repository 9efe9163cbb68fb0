use crate::{
    auth::AuthenticatedUser,
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    services::checkout::PlaceOrder,
    session::CartSession,
    AppState,
};
use axum::{
    extract::{Query, State},
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout", get(preview_checkout).post(place_order))
        .route("/checkout/success", get(payment_success))
        .route("/checkout/cancel", get(payment_cancelled))
}

#[derive(Debug, Deserialize, Validate)]
pub struct PlaceOrderRequest {
    #[validate(length(min = 1, max = 500, message = "Delivery address is required"))]
    pub delivery_address: String,
}

#[derive(Debug, Deserialize)]
pub struct ReturnQuery {
    pub order_id: Option<Uuid>,
}

#[derive(Debug, Serialize)]
struct PaymentResult<T: Serialize> {
    confirmed: bool,
    order: T,
}

async fn preview_checkout(
    State(state): State<AppState>,
    _user: AuthenticatedUser,
    session: CartSession,
) -> Result<Response, ServiceError> {
    let applied = state.applied_discounts.get(&session);
    let summary = state
        .services
        .checkout
        .preview(session.as_str(), applied.as_ref())
        .await?;
    Ok(success_response(summary))
}

async fn place_order(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    session: CartSession,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<Response, ServiceError> {
    validate_input(&payload)?;

    let outcome = state
        .services
        .checkout
        .place_order(PlaceOrder {
            session_id: session.as_str(),
            user: &user,
            delivery_address: &payload.delivery_address,
            applied_discount: state.applied_discounts.get(&session),
        })
        .await?;

    state.applied_discounts.remove(&session);
    Ok(created_response(outcome))
}

/// Return leg of the hosted payment page.
async fn payment_success(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(query): Query<ReturnQuery>,
) -> Result<Response, ServiceError> {
    let order_id = query
        .order_id
        .ok_or_else(|| ServiceError::BadRequest("order_id is required".into()))?;

    state.services.orders.get_for_user(order_id, &user).await?;
    let confirmed = state.services.orders.confirm_payment(order_id).await?;
    let order = state.services.orders.get_with_items(order_id).await?;

    Ok(success_response(PaymentResult { confirmed, order }))
}

/// The customer abandoned the payment page; the order stays pending.
async fn payment_cancelled(Query(query): Query<ReturnQuery>) -> Result<Response, ServiceError> {
    Ok(success_response(json!({
        "order_id": query.order_id,
        "message": "Payment was cancelled. Your order is still pending."
    })))
}
