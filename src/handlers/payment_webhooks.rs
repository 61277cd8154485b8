//! Inbound payment-provider webhook. Signature verification happens before
//! any business logic; a negative business outcome is still acknowledged
//! with 200 so the provider stops retrying an event we have already
//! resolved.

use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tracing::{error, info, warn};

use crate::{
    errors::ServiceError,
    services::orders::{CreateOrderCommand, OrderOutcome},
    AppState,
};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

// POST /api/v1/payments/webhook
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    let Some(secret) = state.config.payment_webhook_secret.as_deref() else {
        error!("payment webhook secret is not configured");
        return Err(ServiceError::BadRequest(
            "Webhook secret not configured".to_string(),
        ));
    };

    if !verify_signature(
        &headers,
        &body,
        secret,
        state.config.payment_webhook_tolerance_secs,
    ) {
        warn!("payment webhook signature verification failed");
        return Err(ServiceError::BadRequest(
            "Invalid webhook signature".to_string(),
        ));
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid json: {}", e)))?;

    let event_type = event.get("type").and_then(|v| v.as_str()).unwrap_or("");
    let intent_id = event
        .pointer("/data/object/id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    match event_type {
        "payment_intent.succeeded" => {
            let Some(intent_id) = intent_id else {
                return Err(ServiceError::BadRequest(
                    "Event carries no payment intent".to_string(),
                ));
            };
            info!(payment_intent_id = %intent_id, "processing payment_intent.succeeded");

            // Infrastructure failures propagate as 5xx so the provider
            // retries; business outcomes are all acknowledged.
            let outcome = state
                .orders
                .create_order_from_payment_intent(CreateOrderCommand {
                    payment_intent_id: intent_id.clone(),
                    ..Default::default()
                })
                .await?;

            match outcome {
                OrderOutcome::Created(created) => {
                    info!(order_id = created.id, payment_intent_id = %intent_id, "order created via webhook");
                }
                OrderOutcome::NotCreated(reason) => {
                    info!(
                        payment_intent_id = %intent_id,
                        reason = %reason.message(),
                        "webhook did not create an order"
                    );
                }
            }
        }
        "payment_intent.payment_failed" => {
            warn!(payment_intent_id = ?intent_id, "payment failed");
        }
        other => {
            info!(event_type = %other, "unhandled payment webhook event");
        }
    }

    Ok((StatusCode::OK, "ok"))
}

/// Stripe-style signature header: `t=<unix-ts>,v1=<hex hmac>` where the MAC
/// is HMAC-SHA256 over `"{t}.{raw body}"` with the shared secret.
fn verify_signature(headers: &HeaderMap, payload: &[u8], secret: &str, tolerance_secs: u64) -> bool {
    let Some(signature) = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
    else {
        return false;
    };

    let mut timestamp = "";
    let mut candidate = "";
    for part in signature.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => timestamp = value,
            (Some("v1"), Some(value)) => candidate = value,
            _ => {}
        }
    }

    if timestamp.is_empty() || candidate.is_empty() {
        return false;
    }

    if let Ok(ts) = timestamp.parse::<i64>() {
        let now = chrono::Utc::now().timestamp();
        if (now - ts).unsigned_abs() > tolerance_secs {
            return false;
        }
    } else {
        return false;
    }

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    constant_time_eq(&expected, candidate)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn sign(secret: &str, timestamp: i64, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.", timestamp).as_bytes());
        mac.update(payload);
        format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
    }

    fn headers_with(signature: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            SIGNATURE_HEADER,
            HeaderValue::from_str(signature).unwrap(),
        );
        headers
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"type":"payment_intent.succeeded"}"#;
        let now = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign("whsec_test", now, payload));
        assert!(verify_signature(&headers, payload, "whsec_test", 300));
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = b"{}";
        let now = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign("whsec_other", now, payload));
        assert!(!verify_signature(&headers, payload, "whsec_test", 300));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = b"{}";
        let stale = chrono::Utc::now().timestamp() - 3600;
        let headers = headers_with(&sign("whsec_test", stale, payload));
        assert!(!verify_signature(&headers, payload, "whsec_test", 300));
    }

    #[test]
    fn rejects_tampered_payload() {
        let now = chrono::Utc::now().timestamp();
        let headers = headers_with(&sign("whsec_test", now, b"{\"a\":1}"));
        assert!(!verify_signature(&headers, b"{\"a\":2}", "whsec_test", 300));
    }

    #[test]
    fn rejects_missing_header() {
        assert!(!verify_signature(&HeaderMap::new(), b"{}", "whsec_test", 300));
    }
}
