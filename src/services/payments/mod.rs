//! Hosted payment page clients.
//!
//! Checkout asks a [`PaymentGateway`] for a payment session and redirects the
//! customer to it. The provider later confirms payment through the success
//! redirect or the webhook.

use crate::{config::PaymentConfig, errors::ServiceError};
use anyhow::{bail, Context};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::{prelude::ToPrimitive, Decimal, RoundingStrategy};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Everything the provider needs to open a payment page for one order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSessionRequest {
    pub order_id: Uuid,
    /// Grand total in minor currency units (cents).
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub allowed_countries: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentSession {
    pub id: String,
    pub redirect_url: String,
}

#[derive(Debug, Error)]
pub enum PaymentGatewayError {
    #[error("payment provider unreachable: {0}")]
    Transport(String),

    #[error("payment provider rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("unexpected payment provider response: {0}")]
    InvalidResponse(String),
}

impl From<PaymentGatewayError> for ServiceError {
    fn from(err: PaymentGatewayError) -> Self {
        ServiceError::PaymentServiceUnavailable(err.to_string())
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(
        &self,
        request: PaymentSessionRequest,
    ) -> Result<PaymentSession, PaymentGatewayError>;
}

/// Rounds to the nearest cent, then converts to integer minor units.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    let cents = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
        * Decimal::ONE_HUNDRED;
    cents
        .to_i64()
        .filter(|c| *c >= 0)
        .ok_or_else(|| ServiceError::InternalError(format!("amount {amount} out of range")))
}

/// Stripe Checkout Sessions client.
pub struct StripeCheckoutGateway {
    client: Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct StripeSessionResponse {
    id: String,
    url: Option<String>,
}

impl StripeCheckoutGateway {
    pub fn new(base_url: &str, secret_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to construct reqwest client for payment gateway")?;
        Ok(Self::with_client(base_url, secret_key, client))
    }

    /// Build a gateway from an existing client (useful for testing).
    pub fn with_client(base_url: &str, secret_key: &str, client: Client) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key: secret_key.to_string(),
        }
    }

    fn form(request: &PaymentSessionRequest) -> Vec<(String, String)> {
        let order_id = request.order_id.to_string();
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            (
                "line_items[0][price_data][currency]".to_string(),
                request.currency.to_lowercase(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                request.description.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                request.amount_minor.to_string(),
            ),
            ("line_items[0][quantity]".to_string(), "1".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            ("metadata[order_id]".to_string(), order_id.clone()),
            ("client_reference_id".to_string(), order_id),
            (
                "billing_address_collection".to_string(),
                "required".to_string(),
            ),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        for (i, country) in request.allowed_countries.iter().enumerate() {
            form.push((
                format!("shipping_address_collection[allowed_countries][{i}]"),
                country.to_uppercase(),
            ));
        }
        form
    }
}

#[async_trait]
impl PaymentGateway for StripeCheckoutGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id, amount = request.amount_minor))]
    async fn create_session(
        &self,
        request: PaymentSessionRequest,
    ) -> Result<PaymentSession, PaymentGatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/checkout/sessions", self.base_url))
            .basic_auth(&self.secret_key, Some(""))
            .form(&Self::form(&request))
            .send()
            .await
            .map_err(|e| PaymentGatewayError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "payment session request rejected");
            return Err(PaymentGatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let session: StripeSessionResponse = response
            .json()
            .await
            .map_err(|e| PaymentGatewayError::InvalidResponse(e.to_string()))?;
        let redirect_url = session.url.ok_or_else(|| {
            PaymentGatewayError::InvalidResponse("session has no redirect url".into())
        })?;

        info!(session_id = %session.id, "payment session created");
        Ok(PaymentSession {
            id: session.id,
            redirect_url,
        })
    }
}

/// Local development gateway. Sends the customer straight to the success page.
#[derive(Debug, Default, Clone)]
pub struct MockPaymentGateway;

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_session(
        &self,
        request: PaymentSessionRequest,
    ) -> Result<PaymentSession, PaymentGatewayError> {
        Ok(PaymentSession {
            id: format!("mock_cs_{}", request.order_id.simple()),
            redirect_url: request.success_url,
        })
    }
}

/// Picks the gateway named by `payment.provider`.
pub fn build_gateway(config: &PaymentConfig) -> anyhow::Result<Arc<dyn PaymentGateway>> {
    match config.provider.as_str() {
        "stripe" => {
            let Some(secret) = config.secret_key.as_deref() else {
                bail!("payment.secret_key is required for the stripe provider");
            };
            Ok(Arc::new(StripeCheckoutGateway::new(
                &config.api_base_url,
                secret,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        "mock" => Ok(Arc::new(MockPaymentGateway)),
        other => bail!("unknown payment provider {other}"),
    }
}
