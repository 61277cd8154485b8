//! Basket store: one cart per buyer key, merged into the authenticated
//! basket when an anonymous buyer logs in, consumed when its order is
//! created.

use std::sync::Arc;

use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, ModelTrait,
    NotSet, QueryFilter, Set, TransactionTrait,
};
use tracing::{info, instrument};

use crate::entities::{basket, basket_item, product};
use crate::errors::ServiceError;
use crate::services::orders::delivery_fee;

/// A basket with its lines joined to the live catalog rows. Lines whose
/// product has vanished carry `None`.
pub type BasketContents = (
    basket::Model,
    Vec<(basket_item::Model, Option<product::Model>)>,
);

#[derive(Clone)]
pub struct BasketService {
    db: Arc<DatabaseConnection>,
}

impl BasketService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn get_with_items(
        &self,
        buyer_id: &str,
    ) -> Result<Option<BasketContents>, ServiceError> {
        let Some(found) = basket::Entity::find()
            .filter(basket::Column::BuyerId.eq(buyer_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(None);
        };

        let items = basket_item::Entity::find()
            .filter(basket_item::Column::BasketId.eq(found.id))
            .find_also_related(product::Entity)
            .all(&*self.db)
            .await?;

        Ok(Some((found, items)))
    }

    /// Add quantity of a product, creating the basket on first use and
    /// merging quantities by product id.
    #[instrument(skip(self))]
    pub async fn add_item(
        &self,
        buyer_id: &str,
        product_id: i32,
        quantity: i32,
    ) -> Result<BasketContents, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be greater than zero".to_string(),
            ));
        }

        if product::Entity::find_by_id(product_id)
            .one(&*self.db)
            .await?
            .is_none()
        {
            return Err(ServiceError::NotFound(format!(
                "Product {} not found",
                product_id
            )));
        }

        let current = basket::Entity::find()
            .filter(basket::Column::BuyerId.eq(buyer_id))
            .one(&*self.db)
            .await?;

        let current = match current {
            Some(model) => model,
            None => {
                basket::ActiveModel {
                    id: NotSet,
                    buyer_id: Set(buyer_id.to_string()),
                    payment_intent_id: Set(None),
                    client_secret: Set(None),
                }
                .insert(&*self.db)
                .await?
            }
        };

        let existing = basket_item::Entity::find()
            .filter(basket_item::Column::BasketId.eq(current.id))
            .filter(basket_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?;

        match existing {
            Some(line) => {
                let new_quantity = line.quantity + quantity;
                let mut update = line.into_active_model();
                update.quantity = Set(new_quantity);
                update.update(&*self.db).await?;
            }
            None => {
                basket_item::ActiveModel {
                    id: NotSet,
                    basket_id: Set(current.id),
                    product_id: Set(product_id),
                    quantity: Set(quantity),
                }
                .insert(&*self.db)
                .await?;
            }
        }

        self.get_with_items(buyer_id)
            .await?
            .ok_or_else(|| ServiceError::InternalError("basket vanished after write".to_string()))
    }

    /// Remove quantity of a product; the line is deleted once it reaches
    /// zero. Removing an absent product is a no-op.
    #[instrument(skip(self))]
    pub async fn remove_item(
        &self,
        buyer_id: &str,
        product_id: i32,
        quantity: i32,
    ) -> Result<(), ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(
                "Quantity must be greater than zero".to_string(),
            ));
        }

        let Some(found) = basket::Entity::find()
            .filter(basket::Column::BuyerId.eq(buyer_id))
            .one(&*self.db)
            .await?
        else {
            return Err(ServiceError::NotFound("Basket not found".to_string()));
        };

        let Some(line) = basket_item::Entity::find()
            .filter(basket_item::Column::BasketId.eq(found.id))
            .filter(basket_item::Column::ProductId.eq(product_id))
            .one(&*self.db)
            .await?
        else {
            return Ok(());
        };

        if line.quantity <= quantity {
            line.delete(&*self.db).await?;
        } else {
            let new_quantity = line.quantity - quantity;
            let mut update = line.into_active_model();
            update.quantity = Set(new_quantity);
            update.update(&*self.db).await?;
        }

        Ok(())
    }

    /// Fold an anonymous buyer's basket into the authenticated buyer's,
    /// summing quantities by product id. The anonymous basket is deleted.
    #[instrument(skip(self))]
    pub async fn merge_baskets(
        &self,
        anonymous_buyer: &str,
        authenticated_buyer: &str,
    ) -> Result<(), ServiceError> {
        let Some(source) = basket::Entity::find()
            .filter(basket::Column::BuyerId.eq(anonymous_buyer))
            .one(&*self.db)
            .await?
        else {
            return Ok(());
        };

        let target = basket::Entity::find()
            .filter(basket::Column::BuyerId.eq(authenticated_buyer))
            .one(&*self.db)
            .await?;

        let txn = self.db.begin().await?;

        match target {
            None => {
                // No basket to merge into; the anonymous basket simply
                // changes hands.
                let mut rekey = source.into_active_model();
                rekey.buyer_id = Set(authenticated_buyer.to_string());
                rekey.update(&txn).await?;
            }
            Some(target) => {
                let source_items = basket_item::Entity::find()
                    .filter(basket_item::Column::BasketId.eq(source.id))
                    .all(&txn)
                    .await?;

                for item in source_items {
                    let existing = basket_item::Entity::find()
                        .filter(basket_item::Column::BasketId.eq(target.id))
                        .filter(basket_item::Column::ProductId.eq(item.product_id))
                        .one(&txn)
                        .await?;

                    match existing {
                        Some(line) => {
                            let new_quantity = line.quantity + item.quantity;
                            let mut update = line.into_active_model();
                            update.quantity = Set(new_quantity);
                            update.update(&txn).await?;
                        }
                        None => {
                            basket_item::ActiveModel {
                                id: NotSet,
                                basket_id: Set(target.id),
                                product_id: Set(item.product_id),
                                quantity: Set(item.quantity),
                            }
                            .insert(&txn)
                            .await?;
                        }
                    }
                }

                basket::Entity::delete_by_id(source.id).exec(&txn).await?;
            }
        }

        txn.commit().await?;
        info!(%anonymous_buyer, %authenticated_buyer, "baskets merged");
        Ok(())
    }

    /// Stamp the gateway's intent id and client secret onto the basket.
    /// First write wins so a retried payment setup cannot re-key the basket.
    pub async fn attach_payment_intent(
        &self,
        current: basket::Model,
        intent_id: &str,
        client_secret: Option<&str>,
    ) -> Result<basket::Model, ServiceError> {
        if current.payment_intent_id.is_some() {
            return Ok(current);
        }

        let mut update = current.into_active_model();
        update.payment_intent_id = Set(Some(intent_id.to_string()));
        update.client_secret = Set(client_secret.map(str::to_string));
        Ok(update.update(&*self.db).await?)
    }

    /// Amount the buyer owes for this basket: subtotal over live catalog
    /// prices plus the delivery fee. Vanished products contribute nothing.
    pub fn amount_due(items: &[(basket_item::Model, Option<product::Model>)]) -> i64 {
        let subtotal: i64 = items
            .iter()
            .filter_map(|(item, joined)| {
                joined
                    .as_ref()
                    .map(|p| p.unit_price * item.quantity as i64)
            })
            .sum();
        subtotal + delivery_fee(subtotal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(product_id: i32, quantity: i32, unit_price: i64) -> (basket_item::Model, Option<product::Model>) {
        (
            basket_item::Model {
                id: product_id,
                basket_id: 1,
                product_id,
                quantity,
            },
            Some(product::Model {
                id: product_id,
                name: format!("p{}", product_id),
                description: String::new(),
                unit_price,
                picture_url: String::new(),
                brand: String::new(),
                category: String::new(),
                quantity_in_stock: 100,
            }),
        )
    }

    #[test]
    fn amount_due_includes_fee_below_threshold() {
        let items = vec![line(1, 2, 10_000)];
        assert_eq!(BasketService::amount_due(&items), 25_000);
    }

    #[test]
    fn amount_due_free_delivery_at_threshold() {
        let items = vec![line(1, 1, 50_000)];
        assert_eq!(BasketService::amount_due(&items), 50_000);
    }

    #[test]
    fn amount_due_ignores_vanished_products() {
        let mut items = vec![line(1, 1, 30_000)];
        items.push((
            basket_item::Model {
                id: 2,
                basket_id: 1,
                product_id: 2,
                quantity: 5,
            },
            None,
        ));
        assert_eq!(BasketService::amount_due(&items), 35_000);
    }
}
