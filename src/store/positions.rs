//! Open-position reads and mark-price updates
//!
//! `mark_price` and `unrealized_pnl` are written only by the trading sync
//! job; `realized_pnl` only on close.

use std::str::FromStr;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};

use crate::store::entity::positions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    pub fn from_db(s: &str) -> Option<Self> {
        match s {
            "long" => Some(Self::Long),
            "short" => Some(Self::Short),
            _ => None,
        }
    }

    /// Sign applied to (mark - entry) when computing unrealized P&L.
    pub fn sign(self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

/// Open position as consumed by the trading sync job.
#[derive(Debug, Clone)]
pub struct PositionRow {
    pub id: u64,
    pub exchange: String,
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub entry_price: f64,
}

#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn open_positions(&self, exchange: &str) -> Result<Vec<PositionRow>>;

    async fn update_mark(&self, id: u64, mark_price: f64, unrealized_pnl: f64) -> Result<()>;
}

pub struct SeaPositionStore {
    db: DatabaseConnection,
}

impl SeaPositionStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_f64(d: &Decimal) -> f64 {
    f64::from_str(&d.to_string()).unwrap_or(0.0)
}

fn to_decimal(v: f64) -> Decimal {
    Decimal::from_str(&v.to_string()).unwrap_or_else(|_| Decimal::ZERO)
}

#[async_trait]
impl PositionStore for SeaPositionStore {
    async fn open_positions(&self, exchange: &str) -> Result<Vec<PositionRow>> {
        let rows = positions::Entity::find()
            .filter(positions::Column::Exchange.eq(exchange))
            .filter(positions::Column::Status.eq("open"))
            .all(&self.db)
            .await?;

        let mut result = Vec::with_capacity(rows.len());
        for row in rows {
            let side = PositionSide::from_db(&row.side)
                .ok_or_else(|| anyhow!("position {} has unknown side {:?}", row.id, row.side))?;
            result.push(PositionRow {
                id: row.id,
                exchange: row.exchange,
                symbol: row.symbol,
                side,
                quantity: to_f64(&row.quantity),
                entry_price: to_f64(&row.entry_price),
            });
        }
        Ok(result)
    }

    async fn update_mark(&self, id: u64, mark_price: f64, unrealized_pnl: f64) -> Result<()> {
        let update = positions::ActiveModel {
            id: ActiveValue::Unchanged(id),
            mark_price: ActiveValue::Set(Some(to_decimal(mark_price))),
            unrealized_pnl: ActiveValue::Set(to_decimal(unrealized_pnl)),
            updated_at: ActiveValue::Set(Some(Utc::now())),
            ..Default::default()
        };
        update.update(&self.db).await?;
        Ok(())
    }
}
