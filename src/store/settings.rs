//! Job settings loaded from the system key/value table

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};

use crate::config::JobSettings;
use crate::store::entity::system_settings;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// Parse the current job settings once; call at the start of each run.
    async fn job_settings(&self) -> Result<JobSettings>;
}

pub struct SeaSettingsStore {
    db: DatabaseConnection,
}

impl SeaSettingsStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl SettingsStore for SeaSettingsStore {
    async fn job_settings(&self) -> Result<JobSettings> {
        let rows = system_settings::Entity::find().all(&self.db).await?;
        let values: HashMap<String, serde_json::Value> =
            rows.into_iter().map(|r| (r.key, r.value)).collect();
        Ok(JobSettings::from_values(&values)?)
    }
}
