use crate::{errors::ServiceError, AppState};
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

// POST /api/v1/payments/webhook
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let secret = state
        .config
        .payment
        .webhook_secret
        .as_deref()
        .filter(|secret| !secret.trim().is_empty());
    if let Some(secret) = secret {
        let now = chrono::Utc::now().timestamp();
        if !verify_signature(
            &headers,
            &payload,
            secret,
            state.config.payment.webhook_tolerance_secs,
            now,
        ) {
            warn!("Payment webhook signature verification failed");
            return Err(ServiceError::Unauthorized(
                "invalid webhook signature".to_string(),
            ));
        }
    } else if !state.config.is_development() {
        warn!("Payment webhook rejected: no webhook secret configured");
        return Err(ServiceError::Unauthorized(
            "webhook signature required".to_string(),
        ));
    }

    let json: Value = serde_json::from_slice(&payload)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    let event_type = json.get("type").and_then(Value::as_str).unwrap_or("");
    match event_type {
        "checkout.session.completed" => {
            let order_id = order_reference(&json).ok_or_else(|| {
                ServiceError::BadRequest("checkout session carries no order reference".into())
            })?;
            match state.services.orders.confirm_payment(order_id).await {
                Ok(confirmed) => info!(%order_id, confirmed, "payment webhook processed"),
                Err(ServiceError::NotFound(_)) => {
                    warn!(%order_id, "payment webhook for unknown order")
                }
                Err(e) => return Err(e),
            }
        }
        _ => {
            info!("Unhandled payment webhook type: {}", event_type);
        }
    }

    Ok((StatusCode::OK, "ok"))
}

fn order_reference(event: &Value) -> Option<Uuid> {
    let object = event.get("data")?.get("object")?;
    object
        .get("metadata")
        .and_then(|m| m.get("order_id"))
        .or_else(|| object.get("client_reference_id"))
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn sign(secret: &str, timestamp: &str, payload: &[u8]) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    Some(hex::encode(mac.finalize().into_bytes()))
}

/// Accepts either `x-timestamp`/`x-signature` or a Stripe-style
/// `Stripe-Signature: t=...,v1=...` header.
fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: u64,
    now: i64,
) -> bool {
    let (ts, sig) = if let (Some(ts), Some(sig)) = (
        headers.get("x-timestamp").and_then(|h| h.to_str().ok()),
        headers.get("x-signature").and_then(|h| h.to_str().ok()),
    ) {
        (ts.to_string(), vec![sig.to_string()])
    } else if let Some(header) = headers.get("Stripe-Signature").and_then(|h| h.to_str().ok()) {
        let mut ts = String::new();
        let mut sigs = Vec::new();
        for part in header.split(',') {
            match part.trim().split_once('=') {
                Some(("t", val)) => ts = val.to_string(),
                Some(("v1", val)) => sigs.push(val.to_string()),
                _ => {}
            }
        }
        (ts, sigs)
    } else {
        return false;
    };

    let Ok(ts_i) = ts.parse::<i64>() else {
        return false;
    };
    if (now - ts_i).unsigned_abs() > tolerance_secs {
        return false;
    }

    let Some(expected) = sign(secret, &ts, payload) else {
        return false;
    };
    sig.iter().any(|candidate| constant_time_eq(&expected, candidate))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "whsec_test";

    #[test]
    fn stripe_signature_is_accepted_within_tolerance() {
        let body = br#"{"type":"checkout.session.completed"}"#;
        let sig = sign(SECRET, "1700000000", body).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            "Stripe-Signature",
            HeaderValue::from_str(&format!("t=1700000000,v1={sig}")).unwrap(),
        );

        assert!(verify_signature(&headers, body, SECRET, 300, 1_700_000_100));
        assert!(!verify_signature(&headers, body, SECRET, 300, 1_700_001_000));
        assert!(!verify_signature(&headers, b"tampered", SECRET, 300, 1_700_000_100));
    }

    #[test]
    fn generic_hmac_headers_are_accepted() {
        let body = b"{}";
        let sig = sign(SECRET, "42", body).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-timestamp", HeaderValue::from_static("42"));
        headers.insert("x-signature", HeaderValue::from_str(&sig).unwrap());
        assert!(verify_signature(&headers, body, SECRET, 10, 45));
        assert!(!verify_signature(&HeaderMap::new(), body, SECRET, 10, 45));
    }

    #[test]
    fn order_reference_prefers_metadata() {
        let id = Uuid::new_v4();
        let event = serde_json::json!({
            "type": "checkout.session.completed",
            "data": { "object": { "metadata": { "order_id": id.to_string() } } }
        });
        assert_eq!(order_reference(&event), Some(id));

        let fallback = serde_json::json!({
            "data": { "object": { "client_reference_id": id.to_string() } }
        });
        assert_eq!(order_reference(&fallback), Some(id));
    }
}
