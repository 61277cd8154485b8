use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

/// Durable record of a completed purchase. Created exactly once per payment
/// intent; `payment_intent_id` carries a unique index as the de-duplication
/// guard. The total is always derived, never stored.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub buyer_id: String,
    pub order_date: DateTimeUtc,
    #[sea_orm(column_type = "Json")]
    pub shipping_address: ShippingAddress,
    pub subtotal: i64,
    pub delivery_fee: i64,
    pub status: OrderStatus,
    #[sea_orm(unique)]
    pub payment_intent_id: String,
    #[sea_orm(column_type = "Json", nullable)]
    pub payment_summary: Option<PaymentSummary>,
}

impl Model {
    pub fn total(&self) -> i64 {
        self.subtotal + self.delivery_fee
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    Items,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Items.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "payment_received")]
    PaymentReceived,
    #[sea_orm(string_value = "payment_failed")]
    PaymentFailed,
}

/// Shipping address snapshot stored on the order, not a live reference.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct ShippingAddress {
    pub name: String,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state: String,
    pub postal_code: String,
    pub country: String,
}

/// Card details captured for display at order time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct PaymentSummary {
    pub brand: String,
    pub last4: String,
    pub exp_month: i32,
    pub exp_year: i32,
}
