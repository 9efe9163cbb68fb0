//! Payment confirmation through the provider webhook, and the Stripe
//! Checkout client against a stubbed provider.

mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use bakery_api::{
    entities::{OrderStatus, PaymentStatus},
    services::payments::{
        PaymentGateway, PaymentGatewayError, PaymentSessionRequest, StripeCheckoutGateway,
    },
};
use common::{new_session, response_json, TestApp, TestUser};
use hmac::{Hmac, Mac};
use rust_decimal_macros::dec;
use serde_json::json;
use sha2::Sha256;
use uuid::Uuid;
use wiremock::{
    matchers::{basic_auth, body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

const WEBHOOK_SECRET: &str = "whsec_bakery_test";

async fn webhook_app() -> TestApp {
    TestApp::with_config(|cfg| {
        cfg.payment.webhook_secret = Some(WEBHOOK_SECRET.to_string());
    })
    .await
}

async fn pending_order(app: &TestApp, user: &TestUser) -> (Uuid, Uuid) {
    let cake = app.seed_product("Chocolate Cake", dec!(100.00), 5).await;
    let session = new_session();
    app.cart_request(
        Method::POST,
        "/api/v1/cart/items",
        Some(json!({ "product_id": cake.id, "quantity": 1 })),
        &session,
    )
    .await;
    let body = response_json(
        app.user_request(
            Method::POST,
            "/api/v1/checkout",
            Some(json!({ "delivery_address": "7 Church Street" })),
            user,
            &session,
        )
        .await,
    )
    .await;
    (body["data"]["order_id"].as_str().unwrap().parse().unwrap(), cake.id)
}

fn completed_event(order_id: Uuid) -> Vec<u8> {
    serde_json::to_vec(&json!({
        "id": "evt_1",
        "type": "checkout.session.completed",
        "data": { "object": {
            "id": "cs_test_1",
            "client_reference_id": order_id.to_string(),
            "metadata": { "order_id": order_id.to_string() }
        }}
    }))
    .unwrap()
}

fn stripe_signature(payload: &[u8], timestamp: i64) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(WEBHOOK_SECRET.as_bytes()).unwrap();
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    let sig = hex::encode(mac.finalize().into_bytes());
    format!("t={timestamp},v1={sig}")
}

#[tokio::test]
async fn signed_webhook_confirms_payment_once() {
    let app = webhook_app().await;
    let user = app.customer();
    let (order_id, cake_id) = pending_order(&app, &user).await;
    let payload = completed_event(order_id);
    let signature = stripe_signature(&payload, chrono::Utc::now().timestamp());

    for _ in 0..2 {
        let response = app
            .post_raw(
                "/api/v1/payments/webhook",
                &payload,
                &[("stripe-signature", signature.clone())],
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    let order = app.state.services.orders.get_with_items(order_id).await.unwrap();
    assert_eq!(order.order.status, OrderStatus::Baking);
    assert_eq!(order.order.payment_status, PaymentStatus::Paid);
    assert_eq!(app.stock_of(cake_id).await, 4);
}

#[tokio::test]
async fn unsigned_or_stale_webhooks_are_rejected() {
    let app = webhook_app().await;
    let user = app.customer();
    let (order_id, _) = pending_order(&app, &user).await;
    let payload = completed_event(order_id);

    let unsigned = app.post_raw("/api/v1/payments/webhook", &payload, &[]).await;
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    let stale = stripe_signature(&payload, chrono::Utc::now().timestamp() - 3_600);
    let response = app
        .post_raw("/api/v1/payments/webhook", &payload, &[("stripe-signature", stale)])
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let order = app.state.services.orders.get_with_items(order_id).await.unwrap();
    assert_eq!(order.order.payment_status, PaymentStatus::Pending);
}

#[tokio::test]
async fn webhook_for_unknown_order_is_acknowledged() {
    let app = webhook_app().await;
    let payload = completed_event(Uuid::new_v4());
    let signature = stripe_signature(&payload, chrono::Utc::now().timestamp());

    let response = app
        .post_raw("/api/v1/payments/webhook", &payload, &[("stripe-signature", signature)])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn webhook_without_configured_secret_is_refused_outside_development() {
    let app = TestApp::new().await;
    let user = app.customer();
    let (order_id, cake_id) = pending_order(&app, &user).await;

    let response = app
        .post_raw("/api/v1/payments/webhook", &completed_event(order_id), &[])
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let order = app.state.services.orders.get_with_items(order_id).await.unwrap();
    assert_eq!(order.order.status, OrderStatus::Pending);
    assert_eq!(order.order.payment_status, PaymentStatus::Pending);
    assert_eq!(app.stock_of(cake_id).await, 4);
}

#[tokio::test]
async fn development_accepts_unsigned_webhooks_without_secret() {
    let app = TestApp::with_config(|cfg| cfg.environment = "development".into()).await;
    let user = app.customer();
    let (order_id, _) = pending_order(&app, &user).await;

    let response = app
        .post_raw("/api/v1/payments/webhook", &completed_event(order_id), &[])
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let order = app.state.services.orders.get_with_items(order_id).await.unwrap();
    assert_eq!(order.order.payment_status, PaymentStatus::Paid);
}

#[tokio::test]
async fn unrelated_event_types_are_ignored() {
    let app = webhook_app().await;
    let payload = serde_json::to_vec(&json!({ "type": "charge.refunded", "data": {} })).unwrap();
    let signature = stripe_signature(&payload, chrono::Utc::now().timestamp());
    let response = app
        .post_raw("/api/v1/payments/webhook", &payload, &[("stripe-signature", signature)])
        .await;
    assert_eq!(response.status(), StatusCode::OK);
}

fn session_request(order_id: Uuid) -> PaymentSessionRequest {
    PaymentSessionRequest {
        order_id,
        amount_minor: 22_500,
        currency: "ZAR".into(),
        description: "Bakery order".into(),
        customer_email: Some("baker@example.com".into()),
        success_url: format!("https://bakery.example/api/v1/checkout/success?order_id={order_id}"),
        cancel_url: format!("https://bakery.example/api/v1/checkout/cancel?order_id={order_id}"),
        allowed_countries: vec!["ZA".into()],
    }
}

#[tokio::test]
async fn stripe_gateway_opens_a_checkout_session() {
    let server = MockServer::start().await;
    let order_id = Uuid::new_v4();
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .and(basic_auth("sk_test_bakery", ""))
        .and(body_string_contains("unit_amount%5D=22500"))
        .and(body_string_contains(format!("client_reference_id={order_id}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "cs_test_abc",
            "url": "https://checkout.stripe.com/c/pay/cs_test_abc"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let gateway =
        StripeCheckoutGateway::new(&server.uri(), "sk_test_bakery", Duration::from_secs(5)).unwrap();
    let session = gateway.create_session(session_request(order_id)).await.unwrap();

    assert_eq!(session.id, "cs_test_abc");
    assert_eq!(session.redirect_url, "https://checkout.stripe.com/c/pay/cs_test_abc");
}

#[tokio::test]
async fn stripe_gateway_surfaces_provider_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(
            ResponseTemplate::new(402).set_body_json(json!({ "error": { "message": "card_declined" } })),
        )
        .mount(&server)
        .await;

    let gateway =
        StripeCheckoutGateway::new(&server.uri(), "sk_test_bakery", Duration::from_secs(5)).unwrap();
    let err = gateway
        .create_session(session_request(Uuid::new_v4()))
        .await
        .unwrap_err();

    match err {
        PaymentGatewayError::Rejected { status, body } => {
            assert_eq!(status, 402);
            assert!(body.contains("card_declined"));
        }
        other => panic!("expected a rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn stripe_gateway_requires_a_redirect_url() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/checkout/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "cs_test_nourl" })))
        .mount(&server)
        .await;

    let gateway =
        StripeCheckoutGateway::new(&server.uri(), "sk_test_bakery", Duration::from_secs(5)).unwrap();
    let err = gateway
        .create_session(session_request(Uuid::new_v4()))
        .await
        .unwrap_err();
    assert!(matches!(err, PaymentGatewayError::InvalidResponse(_)));
}
