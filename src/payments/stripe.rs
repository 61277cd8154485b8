//! Stripe REST adapter. All calls carry a bounded timeout; transport and
//! non-2xx failures surface as infrastructure errors, never as business
//! outcomes.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{CardSummary, GatewayShipping, IntentStatus, PaymentGateway, PaymentIntent};
use crate::errors::ServiceError;

const DEFAULT_BASE_URL: &str = "https://api.stripe.com/v1";

#[derive(Clone)]
pub struct StripeGateway {
    http: reqwest::Client,
    secret_key: String,
    base_url: String,
}

impl StripeGateway {
    pub fn new(secret_key: impl Into<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        Ok(Self {
            http,
            secret_key: secret_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point the adapter at a different endpoint (stub servers in tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
    ) -> Result<T, ServiceError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .get(&url)
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("stripe: {}", e)))?;

        Self::decode(response).await
    }

    async fn post_form<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        form: &[(&str, String)],
    ) -> Result<T, ServiceError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.secret_key)
            .form(form)
            .send()
            .await
            .map_err(|e| ServiceError::ExternalServiceError(format!("stripe: {}", e)))?;

        Self::decode(response).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, ServiceError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::ExternalApiError(format!(
                "stripe returned {}: {}",
                status, body
            )));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ServiceError::ExternalApiError(format!("stripe response: {}", e)))
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn get_payment_intent(&self, id: &str) -> Result<PaymentIntent, ServiceError> {
        debug!(intent_id = %id, "fetching payment intent");
        let payload: IntentPayload = self.get_json(&format!("payment_intents/{}", id)).await?;
        Ok(payload.into())
    }

    async fn get_payment_method(&self, id: &str) -> Result<Option<CardSummary>, ServiceError> {
        debug!(payment_method = %id, "fetching payment method");
        let payload: MethodPayload = self.get_json(&format!("payment_methods/{}", id)).await?;
        Ok(payload.card.map(|card| CardSummary {
            brand: card.brand,
            last4: card.last4,
            exp_month: card.exp_month,
            exp_year: card.exp_year,
        }))
    }

    async fn create_payment_intent(&self, amount: i64) -> Result<PaymentIntent, ServiceError> {
        let form = [
            ("amount", amount.to_string()),
            ("currency", "usd".to_string()),
            ("payment_method_types[]", "card".to_string()),
        ];
        let payload: IntentPayload = self.post_form("payment_intents", &form).await?;
        Ok(payload.into())
    }

    async fn update_payment_intent(
        &self,
        id: &str,
        amount: i64,
    ) -> Result<PaymentIntent, ServiceError> {
        let form = [("amount", amount.to_string())];
        let payload: IntentPayload = self
            .post_form(&format!("payment_intents/{}", id), &form)
            .await?;
        Ok(payload.into())
    }
}

// Wire shapes, kept private to the adapter.

#[derive(Debug, Deserialize)]
struct IntentPayload {
    id: String,
    status: String,
    amount: i64,
    client_secret: Option<String>,
    payment_method: Option<String>,
    shipping: Option<ShippingPayload>,
}

#[derive(Debug, Deserialize)]
struct ShippingPayload {
    name: Option<String>,
    address: Option<AddressPayload>,
}

#[derive(Debug, Deserialize)]
struct AddressPayload {
    line1: Option<String>,
    line2: Option<String>,
    city: Option<String>,
    state: Option<String>,
    postal_code: Option<String>,
    country: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MethodPayload {
    card: Option<CardPayload>,
}

#[derive(Debug, Deserialize)]
struct CardPayload {
    brand: String,
    last4: String,
    exp_month: i32,
    exp_year: i32,
}

impl From<IntentPayload> for PaymentIntent {
    fn from(payload: IntentPayload) -> Self {
        let shipping = payload.shipping.map(|s| {
            let address = s.address.unwrap_or(AddressPayload {
                line1: None,
                line2: None,
                city: None,
                state: None,
                postal_code: None,
                country: None,
            });
            GatewayShipping {
                name: s.name,
                line1: address.line1,
                line2: address.line2,
                city: address.city,
                state: address.state,
                postal_code: address.postal_code,
                country: address.country,
            }
        });

        PaymentIntent {
            id: payload.id,
            status: IntentStatus::parse(&payload.status),
            amount: payload.amount,
            client_secret: payload.client_secret,
            payment_method: payload.payment_method,
            shipping,
        }
    }
}
