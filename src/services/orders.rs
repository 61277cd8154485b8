//! Order creation service: converts a basket into an order once the payment
//! gateway confirms the intent succeeded.
//!
//! Two independent triggers invoke this for the same payment intent — the
//! client confirmation call and the provider webhook — concurrently or in
//! either order. The contract is at most one order per payment intent:
//! the loser of a race observes either no basket (the winner consumed it)
//! or a unique-constraint violation on insert, and both resolve to a
//! non-error `NotCreated` outcome.

use std::sync::Arc;

use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, NotSet,
    QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use tracing::{info, instrument, warn};

use crate::entities::{
    basket, basket_item, buyer_address, order,
    order::{OrderStatus, PaymentSummary, ShippingAddress},
    order_item, product,
};
use crate::errors::ServiceError;
use crate::payments::{GatewayShipping, PaymentGateway};

/// Orders at or above this subtotal (minor units) ship free.
const FREE_DELIVERY_THRESHOLD: i64 = 50_000;
const DELIVERY_FEE: i64 = 5_000;

/// Outcome of a creation attempt. Every `NotCreated` is a normal business
/// result; only infrastructure failures surface as `ServiceError`.
#[derive(Debug)]
pub enum OrderOutcome {
    Created(order::Model),
    NotCreated(NotCreatedReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotCreatedReason {
    BasketNotFound,
    PaymentNotConfirmed,
    BuyerUnresolved,
    InsufficientStock { product: String, available: i32 },
    EmptyOrder,
    AddressUnresolved,
    AlreadyExists,
}

impl NotCreatedReason {
    pub fn message(&self) -> String {
        match self {
            Self::BasketNotFound => "Could not locate basket".to_string(),
            Self::PaymentNotConfirmed => "Payment not successful".to_string(),
            Self::BuyerUnresolved => "Buyer could not be resolved".to_string(),
            Self::InsufficientStock { product, available } => format!(
                "Not enough stock for {}. Only {} available.",
                product, available
            ),
            Self::EmptyOrder => "Basket has no purchasable items".to_string(),
            Self::AddressUnresolved => "Shipping address could not be resolved".to_string(),
            Self::AlreadyExists => "An order already exists for this payment intent".to_string(),
        }
    }
}

/// Inputs to a creation attempt. The webhook path passes only the intent id;
/// the checkout controller adds the authenticated buyer and any
/// client-supplied address.
#[derive(Debug, Default, Clone)]
pub struct CreateOrderCommand {
    pub payment_intent_id: String,
    pub shipping_address: Option<ShippingAddress>,
    pub save_address: bool,
    /// Preferred over the basket's buyer key, which may still be the
    /// anonymous token stamped before login.
    pub buyer_override: Option<String>,
}

struct ValidatedLine {
    product: product::Model,
    quantity: i32,
}

#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
}

impl OrderService {
    pub fn new(db: Arc<DatabaseConnection>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { db, gateway }
    }

    /// Create the order for a payment intent, consuming the basket and
    /// decrementing stock in one transaction.
    #[instrument(skip(self, command), fields(payment_intent_id = %command.payment_intent_id))]
    pub async fn create_order_from_payment_intent(
        &self,
        command: CreateOrderCommand,
    ) -> Result<OrderOutcome, ServiceError> {
        // A missing basket is also the normal outcome for the second
        // trigger: the first creation deleted it.
        let Some(basket) = basket::Entity::find()
            .filter(basket::Column::PaymentIntentId.eq(command.payment_intent_id.as_str()))
            .one(&*self.db)
            .await?
        else {
            return Ok(OrderOutcome::NotCreated(NotCreatedReason::BasketNotFound));
        };

        // The gateway is the authoritative proof of payment; basket state
        // alone is never trusted.
        let intent = self
            .gateway
            .get_payment_intent(&command.payment_intent_id)
            .await?;
        if !intent.status.is_succeeded() {
            return Ok(OrderOutcome::NotCreated(
                NotCreatedReason::PaymentNotConfirmed,
            ));
        }

        let buyer_id = command
            .buyer_override
            .clone()
            .filter(|b| !b.is_empty())
            .unwrap_or_else(|| basket.buyer_id.clone());
        if buyer_id.is_empty() {
            return Ok(OrderOutcome::NotCreated(NotCreatedReason::BuyerUnresolved));
        }

        let items = basket
            .find_related(basket_item::Entity)
            .all(&*self.db)
            .await?;

        let mut lines = Vec::with_capacity(items.len());
        for item in &items {
            let Some(product) = product::Entity::find_by_id(item.product_id)
                .one(&*self.db)
                .await?
            else {
                // A vanished catalog product drops its line rather than
                // failing the order.
                warn!(product_id = item.product_id, "basket line skipped: product no longer exists");
                continue;
            };

            if product.quantity_in_stock < item.quantity {
                return Ok(OrderOutcome::NotCreated(NotCreatedReason::InsufficientStock {
                    product: product.name,
                    available: product.quantity_in_stock,
                }));
            }

            lines.push(ValidatedLine {
                product,
                quantity: item.quantity,
            });
        }

        if lines.is_empty() {
            return Ok(OrderOutcome::NotCreated(NotCreatedReason::EmptyOrder));
        }

        let subtotal: i64 = lines
            .iter()
            .map(|line| line.product.unit_price * line.quantity as i64)
            .sum();
        let delivery_fee = delivery_fee(subtotal);

        let payment_summary = match &intent.payment_method {
            Some(method_ref) => self
                .gateway
                .get_payment_method(method_ref)
                .await?
                .map(|card| PaymentSummary {
                    brand: card.brand,
                    last4: card.last4,
                    exp_month: card.exp_month,
                    exp_year: card.exp_year,
                }),
            None => None,
        };

        let Some(shipping_address) =
            resolve_shipping_address(command.shipping_address.clone(), intent.shipping.as_ref())
        else {
            return Ok(OrderOutcome::NotCreated(NotCreatedReason::AddressUnresolved));
        };

        // Everything from here is one unit of work: order insert, line
        // snapshots, stock decrements, basket deletion, address upsert.
        let txn = self.db.begin().await?;

        let new_order = order::ActiveModel {
            id: NotSet,
            buyer_id: Set(buyer_id.clone()),
            order_date: Set(chrono::Utc::now()),
            shipping_address: Set(shipping_address.clone()),
            subtotal: Set(subtotal),
            delivery_fee: Set(delivery_fee),
            status: Set(OrderStatus::PaymentReceived),
            payment_intent_id: Set(command.payment_intent_id.clone()),
            payment_summary: Set(payment_summary),
        };

        let created = match new_order.insert(&txn).await {
            Ok(model) => model,
            Err(err) => {
                if matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
                    // Lost the race against the other trigger. Not an error.
                    warn!(
                        payment_intent_id = %command.payment_intent_id,
                        "duplicate order insert prevented by uniqueness constraint"
                    );
                    txn.rollback().await?;
                    return Ok(OrderOutcome::NotCreated(NotCreatedReason::AlreadyExists));
                }
                return Err(err.into());
            }
        };

        for line in &lines {
            order_item::ActiveModel {
                id: NotSet,
                order_id: Set(created.id),
                product_id: Set(line.product.id),
                name: Set(line.product.name.clone()),
                picture_url: Set(line.product.picture_url.clone()),
                unit_price: Set(line.product.unit_price),
                quantity: Set(line.quantity),
            }
            .insert(&txn)
            .await?;

            // Guarded decrement: refuses to go negative even if stock moved
            // since validation, aborting the whole transaction.
            let updated = product::Entity::update_many()
                .col_expr(
                    product::Column::QuantityInStock,
                    Expr::col(product::Column::QuantityInStock).sub(line.quantity),
                )
                .filter(product::Column::Id.eq(line.product.id))
                .filter(product::Column::QuantityInStock.gte(line.quantity))
                .exec(&txn)
                .await?;

            if updated.rows_affected == 0 {
                txn.rollback().await?;
                return Ok(OrderOutcome::NotCreated(NotCreatedReason::InsufficientStock {
                    product: line.product.name.clone(),
                    available: 0,
                }));
            }
        }

        basket::Entity::delete_by_id(basket.id).exec(&txn).await?;

        if command.save_address {
            buyer_address::Entity::insert(buyer_address::ActiveModel {
                buyer_id: Set(buyer_id.clone()),
                address: Set(shipping_address),
            })
            .on_conflict(
                OnConflict::column(buyer_address::Column::BuyerId)
                    .update_column(buyer_address::Column::Address)
                    .to_owned(),
            )
            .exec(&txn)
            .await?;
        }

        txn.commit().await?;

        info!(
            order_id = created.id,
            buyer_id = %buyer_id,
            subtotal,
            delivery_fee,
            "order created"
        );

        Ok(OrderOutcome::Created(created))
    }

    /// The checkout controller's duplicate pre-check.
    pub async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<order::Model>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::PaymentIntentId.eq(payment_intent_id))
            .one(&*self.db)
            .await?)
    }

    /// A buyer's orders, newest first, with their line snapshots.
    pub async fn orders_for_buyer(
        &self,
        buyer_id: &str,
    ) -> Result<Vec<(order::Model, Vec<order_item::Model>)>, ServiceError> {
        Ok(order::Entity::find()
            .filter(order::Column::BuyerId.eq(buyer_id))
            .order_by_desc(order::Column::OrderDate)
            .find_with_related(order_item::Entity)
            .all(&*self.db)
            .await?)
    }

    /// One order, scoped to its buyer.
    pub async fn order_for_buyer(
        &self,
        id: i32,
        buyer_id: &str,
    ) -> Result<Option<(order::Model, Vec<order_item::Model>)>, ServiceError> {
        let Some(found) = order::Entity::find_by_id(id)
            .filter(order::Column::BuyerId.eq(buyer_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };

        let items = found
            .find_related(order_item::Entity)
            .all(&*self.db)
            .await?;
        Ok(Some((found, items)))
    }
}

/// Flat threshold/fee pair, minor units.
pub fn delivery_fee(subtotal: i64) -> i64 {
    if subtotal >= FREE_DELIVERY_THRESHOLD {
        0
    } else {
        DELIVERY_FEE
    }
}

/// Explicit address wins; otherwise fall back to the shipping record the
/// gateway attached to the intent.
fn resolve_shipping_address(
    explicit: Option<ShippingAddress>,
    gateway: Option<&GatewayShipping>,
) -> Option<ShippingAddress> {
    if let Some(address) = explicit {
        return Some(address);
    }

    gateway.map(|shipping| ShippingAddress {
        name: shipping
            .name
            .clone()
            .unwrap_or_else(|| "Unknown".to_string()),
        line1: shipping.line1.clone().unwrap_or_default(),
        line2: shipping.line2.clone(),
        city: shipping.city.clone().unwrap_or_default(),
        state: shipping.state.clone().unwrap_or_default(),
        postal_code: shipping.postal_code.clone().unwrap_or_default(),
        country: shipping.country.clone().unwrap_or_default(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_fee_threshold() {
        assert_eq!(delivery_fee(49_999), 5_000);
        assert_eq!(delivery_fee(50_000), 0);
        assert_eq!(delivery_fee(60_000), 0);
        assert_eq!(delivery_fee(0), 5_000);
    }

    #[test]
    fn explicit_address_wins_over_gateway() {
        let explicit = ShippingAddress {
            name: "A".into(),
            line1: "1 Road".into(),
            line2: None,
            city: "Town".into(),
            state: "TS".into(),
            postal_code: "12345".into(),
            country: "US".into(),
        };
        let gateway = GatewayShipping {
            name: Some("B".into()),
            ..Default::default()
        };

        let resolved = resolve_shipping_address(Some(explicit.clone()), Some(&gateway)).unwrap();
        assert_eq!(resolved, explicit);
    }

    #[test]
    fn gateway_fallback_fills_defaults() {
        let gateway = GatewayShipping {
            line1: Some("2 Lane".into()),
            city: Some("Ville".into()),
            ..Default::default()
        };

        let resolved = resolve_shipping_address(None, Some(&gateway)).unwrap();
        assert_eq!(resolved.name, "Unknown");
        assert_eq!(resolved.line1, "2 Lane");
        assert_eq!(resolved.country, "");
    }

    #[test]
    fn no_source_yields_none() {
        assert!(resolve_shipping_address(None, None).is_none());
    }
}
