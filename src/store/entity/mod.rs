//! `SeaORM` entities for the tables this core reads and writes

pub mod balances;
pub mod exchange_credentials;
pub mod klines;
pub mod positions;
pub mod strategy_instances;
pub mod system_settings;
