use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use super::order::ShippingAddress;

/// Saved shipping address on a buyer's profile, upserted at checkout when
/// the buyer opts in.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "buyer_addresses")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub buyer_id: String,
    #[sea_orm(column_type = "Json")]
    pub address: ShippingAddress,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
