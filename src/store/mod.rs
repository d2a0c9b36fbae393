//! Relational store access
//!
//! Repositories over the sea-orm entities. Each repository has a trait seam
//! so jobs can be exercised against in-memory fakes in tests.

pub mod balances;
pub mod credentials;
pub mod entity;
pub mod klines;
pub mod positions;
pub mod settings;
pub mod strategies;

pub use balances::{BalanceStore, SeaBalanceStore};
pub use credentials::load_credential_overrides;
pub use klines::{KlineStore, SeaKlineStore};
pub use positions::{PositionRow, PositionSide, PositionStore, SeaPositionStore};
pub use settings::{SeaSettingsStore, SettingsStore};
pub use strategies::{SeaStrategyStore, StrategyStore};

use anyhow::Result;
use sea_orm::{Database, DatabaseConnection};
use tracing::info;

pub async fn get_db_connection(database_url: &str) -> Result<DatabaseConnection> {
    info!("Connecting to database via Sea-ORM at: {}", database_url);
    let db = Database::connect(database_url).await?;
    Ok(db)
}
