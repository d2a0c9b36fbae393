//! `SeaORM` Entity, @generated manually

use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "strategy_instances")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: u64,
    pub name: String,
    pub exchange: String,
    pub symbol: String,
    pub timeframe: String,
    /// Combination mode: "weighted" or "vote"
    pub mode: String,
    /// Factor specs as a JSON array
    pub factors: Json,
    /// Factor name -> weight mapping
    pub weights: Json,
    /// Risk config forwarded to order placement
    pub risk: Json,
    pub status: String, // "stopped", "running"
    pub created_at: Option<DateTimeUtc>,
    pub updated_at: Option<DateTimeUtc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
