//! Buyer identity resolution. Bearer JWTs carry the authenticated buyer key
//! in `sub`; anonymous buyers identify their basket with the `x-buyer-id`
//! token the API hands out on first add-to-basket. Token issuance itself is
//! an external identity provider's job.

use async_trait::async_trait;
use axum::{extract::FromRequestParts, http::request::Parts};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::{errors::ServiceError, AppState};

pub const ANONYMOUS_BUYER_HEADER: &str = "x-buyer-id";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
}

/// The buyer key of a caller with a valid bearer token. Rejects the request
/// with 401 otherwise.
pub struct AuthenticatedBuyer(pub String);

/// Buyer key from either a bearer token or the anonymous header; the
/// authenticated key wins when both are present. `None` when the caller
/// carries no identity at all.
pub struct BuyerKey {
    pub buyer_id: Option<String>,
    pub authenticated: bool,
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
}

fn decode_buyer(token: &str, secret: &str) -> Result<String, ServiceError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ServiceError::Unauthorized(format!("invalid token: {}", e)))?;
    Ok(data.claims.sub)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedBuyer {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ServiceError::Unauthorized("missing bearer token".to_string()))?;
        let buyer = decode_buyer(token, &state.config.jwt_secret)?;
        Ok(AuthenticatedBuyer(buyer))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for BuyerKey {
    type Rejection = ServiceError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        // A presented token must be valid even though identity is optional
        // here; silently ignoring a bad token would mis-key the basket.
        if let Some(token) = bearer_token(parts) {
            let buyer = decode_buyer(token, &state.config.jwt_secret)?;
            return Ok(BuyerKey {
                buyer_id: Some(buyer),
                authenticated: true,
            });
        }

        let anonymous = parts
            .headers
            .get(ANONYMOUS_BUYER_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        Ok(BuyerKey {
            buyer_id: anonymous,
            authenticated: false,
        })
    }
}
