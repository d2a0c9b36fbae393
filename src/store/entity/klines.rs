//! `SeaORM` Entity, @generated manually
//!
//! (exchange, symbol, timeframe, open_time) carries a unique index; writes
//! go through the coverage-policy aware repository.

use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "klines")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: u64,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
    /// Bar open time, epoch milliseconds
    pub open_time: i64,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub open: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub high: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub low: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub close: Decimal,
    #[sea_orm(column_type = "Decimal(Some((20, 8)))")]
    pub volume: Decimal,
    pub created_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
