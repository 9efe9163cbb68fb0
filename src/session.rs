//! Anonymous cart sessions and the per-session applied coupon.

use crate::{errors::ServiceError, services::coupons::AppliedDiscount};
use axum::{extract::FromRequestParts, http::request::Parts};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Header carrying the anonymous cart session id.
pub const SESSION_ID_HEADER: &str = "x-session-id";

const MAX_SESSION_ID_LEN: usize = 128;

/// Identifies the cart a request operates on.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CartSession(String);

impl CartSession {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, ServiceError> {
        let value = raw.trim();
        if value.is_empty() || value.len() > MAX_SESSION_ID_LEN {
            return Err(ServiceError::BadRequest(format!(
                "{SESSION_ID_HEADER} must be 1-{MAX_SESSION_ID_LEN} characters"
            )));
        }
        if !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(ServiceError::BadRequest(format!(
                "{SESSION_ID_HEADER} contains invalid characters"
            )));
        }
        Ok(Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CartSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for CartSession
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(session) = parts.extensions.get::<CartSession>() {
            return Ok(session.clone());
        }

        match parts
            .headers
            .get(SESSION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            Some(raw) => CartSession::parse(raw),
            None => Ok(CartSession::generate()),
        }
    }
}

/// Coupon applied to each cart session. Lives in memory only; it is
/// re-validated against the current subtotal every time it is read.
#[derive(Debug, Clone, Default)]
pub struct AppliedDiscountStore {
    inner: Arc<DashMap<String, AppliedDiscount>>,
}

impl AppliedDiscountStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, session: &CartSession) -> Option<AppliedDiscount> {
        self.inner.get(session.as_str()).map(|d| d.value().clone())
    }

    pub fn set(&self, session: &CartSession, discount: AppliedDiscount) {
        self.inner.insert(session.as_str().to_string(), discount);
    }

    pub fn remove(&self, session: &CartSession) -> Option<AppliedDiscount> {
        self.inner.remove(session.as_str()).map(|(_, d)| d)
    }
}
