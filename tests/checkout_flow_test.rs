//! Checkout: cart to order, stock decrement, hosted payment session and
//! payment confirmation.

mod common;

use axum::http::{Method, StatusCode};
use bakery_api::{
    entities::{coupon, order, OrderStatus, PaymentStatus},
    services::coupons::CouponInput,
};
use chrono::{Duration, Utc};
use common::{money, new_session, response_json, TestApp, TestUser};
use rust_decimal_macros::dec;
use sea_orm::{EntityTrait, PaginatorTrait};
use serde_json::json;
use uuid::Uuid;

async fn add_to_cart(app: &TestApp, session: &str, product_id: Uuid, quantity: i32) {
    let response = app
        .cart_request(
            Method::POST,
            "/api/v1/cart/items",
            Some(json!({ "product_id": product_id, "quantity": quantity })),
            session,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

async fn checkout(app: &TestApp, user: &TestUser, session: &str) -> axum::response::Response {
    app.user_request(
        Method::POST,
        "/api/v1/checkout",
        Some(json!({ "delivery_address": "12 Long Street, Cape Town" })),
        user,
        session,
    )
    .await
}

async fn order_count(app: &TestApp) -> u64 {
    order::Entity::find().count(&*app.state.db).await.unwrap()
}

#[tokio::test]
async fn discounted_checkout_then_payment_confirmation() {
    let app = TestApp::new().await;
    let cake_a = app.seed_product("Chocolate Cake", dec!(100.00), 5).await;
    let cake_b = app.seed_product("Lemon Tart", dec!(50.00), 1).await;
    app.seed_coupon("SAVE10", dec!(10), true).await;
    let user = app.customer();
    let session = new_session();

    add_to_cart(&app, &session, cake_a.id, 2).await;
    add_to_cart(&app, &session, cake_b.id, 1).await;
    let applied = response_json(
        app.cart_request(
            Method::POST,
            "/api/v1/cart/coupon",
            Some(json!({ "code": "SAVE10" })),
            &session,
        )
        .await,
    )
    .await;
    assert_eq!(money(&applied["data"]["subtotal"]), dec!(250.00));
    assert_eq!(money(&applied["data"]["discount"]), dec!(25.00));
    assert_eq!(money(&applied["data"]["grand_total"]), dec!(225.00));

    let response = checkout(&app, &user, &session).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = response_json(response).await;
    assert_eq!(money(&body["data"]["total"]), dec!(225.00));
    let order_id: Uuid = body["data"]["order_id"].as_str().unwrap().parse().unwrap();
    assert!(body["data"]["redirect_url"]
        .as_str()
        .unwrap()
        .starts_with("https://pay.example/"));

    assert_eq!(app.stock_of(cake_a.id).await, 3);
    assert_eq!(app.stock_of(cake_b.id).await, 0);
    assert!(app.state.services.cart.load(&session).await.unwrap().is_empty());

    let requests = app.gateway.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].order_id, order_id);
    assert_eq!(requests[0].amount_minor, 22_500);
    assert_eq!(requests[0].customer_email.as_deref(), Some(user.email.as_str()));
    assert!(requests[0]
        .success_url
        .ends_with(&format!("/api/v1/checkout/success?order_id={order_id}")));

    let placed = app.state.services.orders.get_with_items(order_id).await.unwrap();
    assert_eq!(placed.order.status, OrderStatus::Pending);
    assert_eq!(placed.order.payment_status, PaymentStatus::Pending);
    assert_eq!(placed.order.total_amount, dec!(225.00));
    assert_eq!(placed.order.user_id, user.id);
    assert_eq!(placed.items.len(), 2);
    assert_eq!(
        placed.order.payment_session_id.as_deref(),
        Some(format!("cs_test_{}", order_id.simple()).as_str())
    );

    let success_uri = format!("/api/v1/checkout/success?order_id={order_id}");
    let confirmed = response_json(
        app.user_request(Method::GET, &success_uri, None, &user, &session)
            .await,
    )
    .await;
    assert_eq!(confirmed["data"]["confirmed"], true);
    assert_eq!(confirmed["data"]["order"]["status"], "Baking");
    assert_eq!(confirmed["data"]["order"]["payment_status"], "Paid");

    // Revisiting the success page changes nothing.
    let again = response_json(
        app.user_request(Method::GET, &success_uri, None, &user, &session)
            .await,
    )
    .await;
    assert_eq!(again["data"]["confirmed"], false);
    assert_eq!(again["data"]["order"]["status"], "Baking");
    assert_eq!(app.stock_of(cake_a.id).await, 3);
}

#[tokio::test]
async fn checkout_fails_without_enough_stock_and_changes_nothing() {
    let app = TestApp::new().await;
    let cake = app.seed_product("Carrot Cake", dec!(60.00), 10).await;
    let user = app.customer();
    let session = new_session();
    add_to_cart(&app, &session, cake.id, 10).await;

    // Stock drops after the cart was filled.
    let admin = app.admin();
    let response = app
        .send(
            Method::PUT,
            &format!("/api/v1/admin/products/{}", cake.id),
            Some(json!({
                "name": "Carrot Cake",
                "price": "60.00",
                "stock": 4
            })),
            Some(&admin.token),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = checkout(&app, &user, &session).await;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = response_json(response).await;
    assert_eq!(body["details"]["available"], 4);

    assert_eq!(app.stock_of(cake.id).await, 4);
    assert_eq!(order_count(&app).await, 0);
    assert!(app.gateway.requests().is_empty());
    assert_eq!(app.state.services.cart.load(&session).await.unwrap().lines.len(), 1);
}

#[tokio::test]
async fn payment_provider_failure_rolls_back_the_order() {
    let app = TestApp::new().await;
    let cake = app.seed_product("Black Forest", dec!(90.00), 3).await;
    let user = app.customer();
    let session = new_session();
    add_to_cart(&app, &session, cake.id, 2).await;

    app.gateway.fail_next_sessions(true);
    let response = checkout(&app, &user, &session).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    assert_eq!(app.stock_of(cake.id).await, 3);
    assert_eq!(order_count(&app).await, 0);
    assert_eq!(app.state.services.cart.load(&session).await.unwrap().lines.len(), 1);

    // The shopper can simply try again.
    app.gateway.fail_next_sessions(false);
    let response = checkout(&app, &user, &session).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(app.stock_of(cake.id).await, 1);
}

#[tokio::test]
async fn empty_cart_cannot_be_checked_out() {
    let app = TestApp::new().await;
    let user = app.customer();
    let response = checkout(&app, &user, &new_session()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn checkout_requires_a_signed_in_customer() {
    let app = TestApp::new().await;
    let cake = app.seed_product("Cupcake", dec!(15.00), 5).await;
    let session = new_session();
    add_to_cart(&app, &session, cake.id, 1).await;

    let response = app
        .send(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "delivery_address": "1 Main Road" })),
            None,
            Some(&session),
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(app.stock_of(cake.id).await, 5);
}

#[tokio::test]
async fn blank_delivery_address_is_rejected() {
    let app = TestApp::new().await;
    let cake = app.seed_product("Cupcake", dec!(15.00), 5).await;
    let user = app.customer();
    let session = new_session();
    add_to_cart(&app, &session, cake.id, 1).await;

    let response = app
        .user_request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "delivery_address": "   " })),
            &user,
            &session,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.stock_of(cake.id).await, 5);
}

async fn cart_with_applied_coupon(app: &TestApp, session: &str) -> (Uuid, coupon::Model) {
    let cake = app.seed_product("Chocolate Cake", dec!(100.00), 5).await;
    let coupon = app.seed_coupon("FLASH20", dec!(20), true).await;
    add_to_cart(app, session, cake.id, 1).await;
    let response = app
        .cart_request(
            Method::POST,
            "/api/v1/cart/coupon",
            Some(json!({ "code": "FLASH20" })),
            session,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    (cake.id, coupon)
}

fn coupon_terms(coupon: &coupon::Model) -> CouponInput {
    CouponInput {
        code: coupon.code.clone(),
        discount_amount: coupon.discount_amount,
        is_percentage: coupon.is_percentage,
        valid_from: coupon.valid_from,
        valid_to: coupon.valid_to,
        active: coupon.active,
    }
}

#[tokio::test]
async fn coupon_deactivated_before_checkout_is_refused() {
    let app = TestApp::new().await;
    let user = app.customer();
    let session = new_session();
    let (cake_id, coupon) = cart_with_applied_coupon(&app, &session).await;

    let deactivated = CouponInput {
        active: false,
        ..coupon_terms(&coupon)
    };
    app.state.services.coupons.update(coupon.id, deactivated).await.unwrap();

    let response = checkout(&app, &user, &session).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.stock_of(cake_id).await, 5);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn coupon_expired_before_checkout_is_refused() {
    let app = TestApp::new().await;
    let user = app.customer();
    let session = new_session();
    let (cake_id, coupon) = cart_with_applied_coupon(&app, &session).await;

    let now = Utc::now();
    let expired = CouponInput {
        valid_from: now - Duration::days(10),
        valid_to: now - Duration::days(1),
        ..coupon_terms(&coupon)
    };
    app.state.services.coupons.update(coupon.id, expired).await.unwrap();

    let response = checkout(&app, &user, &session).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.stock_of(cake_id).await, 5);
    assert_eq!(order_count(&app).await, 0);
}

#[tokio::test]
async fn another_customer_cannot_confirm_someone_elses_order() {
    let app = TestApp::new().await;
    let cake = app.seed_product("Cheesecake", dec!(75.00), 5).await;
    let owner = app.customer();
    let stranger = app.customer();
    let session = new_session();
    add_to_cart(&app, &session, cake.id, 1).await;
    let body = response_json(checkout(&app, &owner, &session).await).await;
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    let response = app
        .user_request(
            Method::GET,
            &format!("/api/v1/checkout/success?order_id={order_id}"),
            None,
            &stranger,
            &new_session(),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let order = app
        .state
        .services
        .orders
        .get_with_items(order_id.parse().unwrap())
        .await
        .unwrap();
    assert_eq!(order.order.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn cancel_return_leaves_order_pending() {
    let app = TestApp::new().await;
    let order_id = Uuid::new_v4();
    let response = app
        .send(
            Method::GET,
            &format!("/api/v1/checkout/cancel?order_id={order_id}"),
            None,
            None,
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["order_id"], order_id.to_string());
}

#[tokio::test]
async fn concurrent_checkouts_never_oversell_the_last_cake() {
    let app = TestApp::new().await;
    let cake = app.seed_product("Last Wedding Cake", dec!(300.00), 1).await;

    let shoppers: Vec<(TestUser, String)> = (0..4).map(|_| (app.customer(), new_session())).collect();
    for (_, session) in &shoppers {
        add_to_cart(&app, session, cake.id, 1).await;
    }

    let results = futures::future::join_all(
        shoppers
            .iter()
            .map(|(user, session)| checkout(&app, user, session)),
    )
    .await;

    let created = results
        .iter()
        .filter(|r| r.status() == StatusCode::CREATED)
        .count();
    let refused = results
        .iter()
        .filter(|r| r.status() == StatusCode::UNPROCESSABLE_ENTITY)
        .count();
    assert_eq!(created, 1);
    assert_eq!(refused, 3);
    assert_eq!(app.stock_of(cake.id).await, 0);
    assert_eq!(order_count(&app).await, 1);
}
