//! `SeaORM` Entity, @generated manually

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "balances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: u64,
    /// (exchange, asset) carries a unique index
    pub exchange: String,
    pub asset: String,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub free: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub used: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub total: Decimal,
    pub updated_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
