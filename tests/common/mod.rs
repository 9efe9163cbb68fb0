#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::{
    body::{self, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use bakery_api::{
    app_router,
    config::AppConfig,
    db::{self, DbConfig},
    entities::{coupon, product},
    events::{self, EventSender},
    services::{
        catalog::ProductInput,
        coupons::CouponInput,
        payments::{PaymentGateway, PaymentGatewayError, PaymentSession, PaymentSessionRequest},
    },
    AppState,
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const JWT_SECRET: &str = "test_secret_key_for_testing_purposes_only_0123456789abcdef";
pub const SESSION_HEADER: &str = "x-session-id";

/// Payment provider double. Records every session request and can be told
/// to fail.
#[derive(Default)]
pub struct FakePaymentGateway {
    fail: AtomicBool,
    requests: Mutex<Vec<PaymentSessionRequest>>,
}

impl FakePaymentGateway {
    pub fn fail_next_sessions(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn requests(&self) -> Vec<PaymentSessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for FakePaymentGateway {
    async fn create_session(
        &self,
        request: PaymentSessionRequest,
    ) -> Result<PaymentSession, PaymentGatewayError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PaymentGatewayError::Transport("connection refused".into()));
        }
        let id = format!("cs_test_{}", request.order_id.simple());
        let redirect_url = format!("https://pay.example/{id}");
        self.requests.lock().unwrap().push(request);
        Ok(PaymentSession { id, redirect_url })
    }
}

/// A customer identity with a signed bearer token.
#[derive(Debug, Clone)]
pub struct TestUser {
    pub id: Uuid,
    pub email: String,
    pub token: String,
}

/// Application backed by a throwaway SQLite file and the fake gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<FakePaymentGateway>,
    _dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("bakery.db").display());

        let mut cfg = AppConfig::new(
            url.clone(),
            JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        customize(&mut cfg);

        let pool = db::establish_connection_with_config(&DbConfig {
            url,
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("test database");
        db::run_migrations(&pool).await.expect("migrations");

        let (event_tx, event_rx) = mpsc::channel(256);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(FakePaymentGateway::default());
        let state = AppState::new(
            Arc::new(pool),
            cfg,
            EventSender::new(event_tx),
            gateway.clone(),
        );

        Self {
            router: app_router(state.clone()),
            state,
            gateway,
            _dir: dir,
            _event_task: event_task,
        }
    }

    pub fn customer(&self) -> TestUser {
        self.user_with_roles(&[])
    }

    pub fn admin(&self) -> TestUser {
        self.user_with_roles(&["admin"])
    }

    fn user_with_roles(&self, roles: &[&str]) -> TestUser {
        let id = Uuid::new_v4();
        let email = format!("{}@example.com", &id.simple().to_string()[..8]);
        let token = self
            .state
            .auth
            .generate_token(id, Some(email.as_str()), roles, Duration::hours(1))
            .expect("token");
        TestUser { id, email, token }
    }

    /// Sends a request with an optional bearer token and cart session.
    pub async fn send(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        session: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        if let Some(sid) = session {
            builder = builder.header(SESSION_HEADER, sid);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("json body"))
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router error during test request")
    }

    /// Posts a raw body, for endpoints that verify the exact bytes.
    pub async fn post_raw(&self, uri: &str, payload: &[u8], headers: &[(&str, String)]) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(payload.to_vec())).expect("request"))
            .await
            .expect("router error during test request")
    }

    /// Cart requests for an anonymous shopper.
    pub async fn cart_request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        session: &str,
    ) -> Response {
        self.send(method, uri, body, None, Some(session)).await
    }

    /// Requests made by a signed-in customer on their cart session.
    pub async fn user_request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        user: &TestUser,
        session: &str,
    ) -> Response {
        self.send(method, uri, body, Some(&user.token), Some(session))
            .await
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> product::Model {
        self.state
            .services
            .catalog
            .create(ProductInput {
                name: name.to_string(),
                description: Some(format!("{name} seeded for tests")),
                category: "Birthday".to_string(),
                size: "8-inch".to_string(),
                price,
                stock,
                available: true,
            })
            .await
            .expect("seed product")
    }

    pub async fn seed_coupon(&self, code: &str, amount: Decimal, is_percentage: bool) -> coupon::Model {
        let now = Utc::now();
        self.state
            .services
            .coupons
            .create(CouponInput {
                code: code.to_string(),
                discount_amount: amount,
                is_percentage,
                valid_from: now - Duration::days(1),
                valid_to: now + Duration::days(30),
                active: true,
            })
            .await
            .expect("seed coupon")
    }

    pub async fn stock_of(&self, product_id: Uuid) -> i32 {
        self.state
            .services
            .catalog
            .get(product_id)
            .await
            .expect("product")
            .stock
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn new_session() -> String {
    format!("test-{}", Uuid::new_v4().simple())
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}

/// Money comes back as a JSON string; compare it numerically.
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("decimal string"),
        Value::Number(n) => Decimal::from_str(&n.to_string()).expect("decimal number"),
        other => panic!("expected a money value, got {other}"),
    }
}
