//! Runtime configuration
//!
//! Three layers, parsed once each:
//! - process environment (`Config::from_env`) for endpoints and file paths
//! - the TOML exchange config file (see [`file`])
//! - job tuning read from the store's key/value table into [`JobSettings`]

pub mod env;
pub mod file;
pub mod settings;

pub use env::Config;
pub use file::{load_exchange_configs, ExchangeFileEntry};
pub use settings::{CachePolicy, CoveragePolicy, JobSettings, SettingsError};
