//! Payment gateway adapter. The provider's free-form status strings are
//! converted into a closed enum here, at the boundary, so nothing downstream
//! string-compares gateway state.

pub mod stripe;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

pub use stripe::StripeGateway;

/// Lifecycle status of a payment intent as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Succeeded,
    Processing,
    RequiresPaymentMethod,
    RequiresAction,
    Canceled,
    /// Any status this service has no business reacting to. Fail closed.
    Other,
}

impl IntentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "succeeded" => Self::Succeeded,
            "processing" => Self::Processing,
            "requires_payment_method" => Self::RequiresPaymentMethod,
            "requires_action" | "requires_confirmation" => Self::RequiresAction,
            "canceled" => Self::Canceled,
            _ => Self::Other,
        }
    }

    pub fn is_succeeded(self) -> bool {
        self == Self::Succeeded
    }
}

/// The gateway's record of an attempted charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentIntent {
    pub id: String,
    pub status: IntentStatus,
    pub amount: i64,
    pub client_secret: Option<String>,
    pub payment_method: Option<String>,
    pub shipping: Option<GatewayShipping>,
}

/// Shipping record attached to a payment intent on the provider side.
/// Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayShipping {
    pub name: Option<String>,
    pub line1: Option<String>,
    pub line2: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub postal_code: Option<String>,
    pub country: Option<String>,
}

/// Card details for a payment method, captured for display on the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSummary {
    pub brand: String,
    pub last4: String,
    pub exp_month: i32,
    pub exp_year: i32,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Fetch the authoritative state of a payment intent.
    async fn get_payment_intent(&self, id: &str) -> Result<PaymentIntent, ServiceError>;

    /// Fetch card details for a payment method reference. Returns `None`
    /// when the method carries no card data; that is not an error.
    async fn get_payment_method(&self, id: &str) -> Result<Option<CardSummary>, ServiceError>;

    /// Create a new payment intent for the given amount (minor units).
    async fn create_payment_intent(&self, amount: i64) -> Result<PaymentIntent, ServiceError>;

    /// Update an existing payment intent to a new amount.
    async fn update_payment_intent(
        &self,
        id: &str,
        amount: i64,
    ) -> Result<PaymentIntent, ServiceError>;
}
