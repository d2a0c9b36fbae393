//! Kline persistence with coverage-policy writes

use std::str::FromStr;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect,
};

use crate::config::CoveragePolicy;
use crate::market::Kline;
use crate::store::entity::klines;

/// Kline reads and coverage-policy writes.
#[async_trait]
pub trait KlineStore: Send + Sync {
    /// Latest stored `open_time` for a triple, if any rows exist.
    async fn latest_open_time(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Option<i64>>;

    /// Persist rows under the given coverage policy; returns rows affected.
    async fn write(&self, policy: CoveragePolicy, rows: &[Kline]) -> Result<u64>;

    /// Most recent `limit` rows for a triple, ascending by open time.
    async fn recent(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        limit: u64,
    ) -> Result<Vec<Kline>>;

    /// Rows in `[start_ms, end_ms]`, ascending by open time.
    async fn range(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Kline>>;
}

pub struct SeaKlineStore {
    db: DatabaseConnection,
}

impl SeaKlineStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_decimal(v: f64) -> Decimal {
    Decimal::from_str(&v.to_string()).unwrap_or_else(|_| Decimal::ZERO)
}

fn to_f64(d: &Decimal) -> f64 {
    f64::from_str(&d.to_string()).unwrap_or(0.0)
}

fn to_domain(model: klines::Model) -> Kline {
    Kline {
        exchange: model.exchange,
        symbol: model.symbol,
        timeframe: model.timeframe,
        open_time: model.open_time,
        open: to_f64(&model.open),
        high: to_f64(&model.high),
        low: to_f64(&model.low),
        close: to_f64(&model.close),
        volume: to_f64(&model.volume),
    }
}

fn to_active(row: &Kline) -> klines::ActiveModel {
    klines::ActiveModel {
        exchange: ActiveValue::Set(row.exchange.clone()),
        symbol: ActiveValue::Set(row.symbol.clone()),
        timeframe: ActiveValue::Set(row.timeframe.clone()),
        open_time: ActiveValue::Set(row.open_time),
        open: ActiveValue::Set(to_decimal(row.open)),
        high: ActiveValue::Set(to_decimal(row.high)),
        low: ActiveValue::Set(to_decimal(row.low)),
        close: ActiveValue::Set(to_decimal(row.close)),
        volume: ActiveValue::Set(to_decimal(row.volume)),
        created_at: ActiveValue::Set(Some(Utc::now())),
        ..Default::default()
    }
}

fn key_columns() -> [klines::Column; 4] {
    [
        klines::Column::Exchange,
        klines::Column::Symbol,
        klines::Column::Timeframe,
        klines::Column::OpenTime,
    ]
}

#[async_trait]
impl KlineStore for SeaKlineStore {
    async fn latest_open_time(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
    ) -> Result<Option<i64>> {
        let row = klines::Entity::find()
            .filter(klines::Column::Exchange.eq(exchange))
            .filter(klines::Column::Symbol.eq(symbol))
            .filter(klines::Column::Timeframe.eq(timeframe))
            .order_by_desc(klines::Column::OpenTime)
            .one(&self.db)
            .await?;
        Ok(row.map(|r| r.open_time))
    }

    async fn write(&self, policy: CoveragePolicy, rows: &[Kline]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let models: Vec<klines::ActiveModel> = rows.iter().map(to_active).collect();
        let conflict = match policy {
            CoveragePolicy::WriteNew => OnConflict::columns(key_columns()).do_nothing().to_owned(),
            CoveragePolicy::Upsert => OnConflict::columns(key_columns())
                .update_columns([
                    klines::Column::Open,
                    klines::Column::High,
                    klines::Column::Low,
                    klines::Column::Close,
                    klines::Column::Volume,
                ])
                .to_owned(),
        };

        let affected = klines::Entity::insert_many(models)
            .on_conflict(conflict)
            .exec_without_returning(&self.db)
            .await?;
        Ok(affected)
    }

    async fn recent(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        limit: u64,
    ) -> Result<Vec<Kline>> {
        let mut rows: Vec<Kline> = klines::Entity::find()
            .filter(klines::Column::Exchange.eq(exchange))
            .filter(klines::Column::Symbol.eq(symbol))
            .filter(klines::Column::Timeframe.eq(timeframe))
            .order_by_desc(klines::Column::OpenTime)
            .limit(limit)
            .all(&self.db)
            .await?
            .into_iter()
            .map(to_domain)
            .collect();
        rows.reverse();
        Ok(rows)
    }

    async fn range(
        &self,
        exchange: &str,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Kline>> {
        let rows = klines::Entity::find()
            .filter(klines::Column::Exchange.eq(exchange))
            .filter(klines::Column::Symbol.eq(symbol))
            .filter(klines::Column::Timeframe.eq(timeframe))
            .filter(klines::Column::OpenTime.gte(start_ms))
            .filter(klines::Column::OpenTime.lte(end_ms))
            .order_by_asc(klines::Column::OpenTime)
            .all(&self.db)
            .await?;
        Ok(rows.into_iter().map(to_domain).collect())
    }
}
