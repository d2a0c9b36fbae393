//! Account balance upserts

use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{ActiveValue, DatabaseConnection, EntityTrait};

use crate::market::AssetBalance;
use crate::store::entity::balances;

#[async_trait]
pub trait BalanceStore: Send + Sync {
    async fn upsert(&self, exchange: &str, asset: &str, balance: AssetBalance) -> Result<()>;
}

pub struct SeaBalanceStore {
    db: DatabaseConnection,
}

impl SeaBalanceStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_decimal(v: f64) -> Decimal {
    Decimal::from_str(&v.to_string()).unwrap_or_else(|_| Decimal::ZERO)
}

#[async_trait]
impl BalanceStore for SeaBalanceStore {
    async fn upsert(&self, exchange: &str, asset: &str, balance: AssetBalance) -> Result<()> {
        let model = balances::ActiveModel {
            exchange: ActiveValue::Set(exchange.to_string()),
            asset: ActiveValue::Set(asset.to_string()),
            free: ActiveValue::Set(to_decimal(balance.free)),
            used: ActiveValue::Set(to_decimal(balance.used)),
            total: ActiveValue::Set(to_decimal(balance.total)),
            updated_at: ActiveValue::Set(Some(Utc::now())),
            ..Default::default()
        };

        balances::Entity::insert(model)
            .on_conflict(
                OnConflict::columns([balances::Column::Exchange, balances::Column::Asset])
                    .update_columns([
                        balances::Column::Free,
                        balances::Column::Used,
                        balances::Column::Total,
                        balances::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }
}
