//! Strategy instance configuration reads and status transitions

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};

use crate::store::entity::strategy_instances;
use crate::strategy::{InstanceConfig, InstanceStatus};

#[async_trait]
pub trait StrategyStore: Send + Sync {
    /// Instances currently marked running in the store.
    async fn running_instances(&self) -> Result<Vec<InstanceConfig>>;

    async fn set_status(&self, id: u64, status: InstanceStatus) -> Result<()>;
}

pub struct SeaStrategyStore {
    db: DatabaseConnection,
}

impl SeaStrategyStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

fn to_config(model: strategy_instances::Model) -> Result<InstanceConfig> {
    Ok(InstanceConfig {
        id: model.id,
        name: model.name,
        exchange: model.exchange,
        symbol: model.symbol,
        timeframe: model.timeframe,
        mode: model
            .mode
            .parse()
            .with_context(|| format!("strategy instance {}", model.id))?,
        factors: serde_json::from_value(model.factors)
            .with_context(|| format!("strategy instance {} factors", model.id))?,
        weights: serde_json::from_value(model.weights)
            .with_context(|| format!("strategy instance {} weights", model.id))?,
        risk: serde_json::from_value(model.risk)
            .with_context(|| format!("strategy instance {} risk config", model.id))?,
    })
}

#[async_trait]
impl StrategyStore for SeaStrategyStore {
    async fn running_instances(&self) -> Result<Vec<InstanceConfig>> {
        let rows = strategy_instances::Entity::find()
            .filter(strategy_instances::Column::Status.eq("running"))
            .all(&self.db)
            .await?;
        rows.into_iter().map(to_config).collect()
    }

    async fn set_status(&self, id: u64, status: InstanceStatus) -> Result<()> {
        let update = strategy_instances::ActiveModel {
            id: ActiveValue::Unchanged(id),
            status: ActiveValue::Set(status.as_str().to_string()),
            updated_at: ActiveValue::Set(Some(Utc::now())),
            ..Default::default()
        };
        update.update(&self.db).await?;
        Ok(())
    }
}
