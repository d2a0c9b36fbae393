//! Typed job settings backed by the store's key/value table
//!
//! Every interval and policy the jobs consult is parsed once per run into
//! [`JobSettings`]. Missing keys fall back to the documented default;
//! unrecognised values are a hard error so a typo in the store never
//! silently changes write semantics.

use std::collections::HashMap;
use std::str::FromStr;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },
}

/// Write semantics applied when persisting kline rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoveragePolicy {
    /// Insert-if-absent, never overwrite an existing bar
    WriteNew,
    /// Insert-or-update the OHLCV fields of an existing bar
    Upsert,
}

impl FromStr for CoveragePolicy {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write_new" => Ok(Self::WriteNew),
            "upsert" => Ok(Self::Upsert),
            other => Err(SettingsError::InvalidValue {
                key: keys::COVERAGE.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Read-cache refresh behaviour after a successful collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Overwrite the cache entry for the collected triple
    WriteThrough,
    /// Leave the cache alone
    None,
}

impl FromStr for CachePolicy {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write_through" => Ok(Self::WriteThrough),
            "none" => Ok(Self::None),
            other => Err(SettingsError::InvalidValue {
                key: keys::CACHE.to_string(),
                value: other.to_string(),
            }),
        }
    }
}

/// Recognised setting keys.
pub mod keys {
    pub const COLLECT_INTERVAL: &str = "market.collect.interval";
    pub const COLLECT_COOLDOWN: &str = "market.collect.cooldown";
    pub const COLLECT_BACKFILL: &str = "market.collect.backfill_limit";
    pub const COVERAGE: &str = "market.collect.coverage";
    pub const CACHE: &str = "market.collect.cache";
    pub const CACHE_LIMIT: &str = "market.cache.limit";
    pub const CACHE_TTL: &str = "market.cache.ttl";
    pub const SYNC_INTERVAL: &str = "trading.sync.interval";
    pub const STRATEGY_INTERVAL: &str = "strategy.tick.interval";
    pub const SCHEDULER_TICK: &str = "scheduler.tick";
}

/// All job tuning in one struct, with defaults for absent keys.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Seconds between market collection runs (default 300)
    pub collect_interval_secs: i64,
    /// Per-triple minimum re-fetch spacing in seconds (default 60)
    pub collect_cooldown_secs: i64,
    /// Bars fetched for a triple with no prior rows (default 300)
    pub backfill_limit: u32,
    pub coverage: CoveragePolicy,
    pub cache: CachePolicy,
    /// Rows kept in a cached kline slice (default 100)
    pub cache_limit: usize,
    /// Cache entry TTL in seconds (default 120)
    pub cache_ttl_secs: u64,
    /// Seconds between trading sync runs (default 60)
    pub sync_interval_secs: i64,
    /// Seconds between strategy evaluation ticks (default 60)
    pub strategy_interval_secs: i64,
    /// Heartbeat period in seconds (default 30)
    pub scheduler_tick_secs: u64,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            collect_interval_secs: 300,
            collect_cooldown_secs: 60,
            backfill_limit: 300,
            coverage: CoveragePolicy::Upsert,
            cache: CachePolicy::WriteThrough,
            cache_limit: 100,
            cache_ttl_secs: 120,
            sync_interval_secs: 60,
            strategy_interval_secs: 60,
            scheduler_tick_secs: 30,
        }
    }
}

impl JobSettings {
    /// Build settings from the raw key/value rows of the store.
    ///
    /// Unknown keys are ignored (the table serves other parts of the
    /// system); recognised keys with unparseable values are an error.
    pub fn from_values(values: &HashMap<String, Value>) -> Result<Self, SettingsError> {
        let mut settings = Self::default();

        if let Some(v) = int_value(values, keys::COLLECT_INTERVAL)? {
            settings.collect_interval_secs = v;
        }
        if let Some(v) = int_value(values, keys::COLLECT_COOLDOWN)? {
            settings.collect_cooldown_secs = v;
        }
        if let Some(v) = int_value(values, keys::COLLECT_BACKFILL)? {
            settings.backfill_limit = v as u32;
        }
        if let Some(v) = str_value(values, keys::COVERAGE)? {
            settings.coverage = v.parse()?;
        }
        if let Some(v) = str_value(values, keys::CACHE)? {
            settings.cache = v.parse()?;
        }
        if let Some(v) = int_value(values, keys::CACHE_LIMIT)? {
            settings.cache_limit = v as usize;
        }
        if let Some(v) = int_value(values, keys::CACHE_TTL)? {
            settings.cache_ttl_secs = v as u64;
        }
        if let Some(v) = int_value(values, keys::SYNC_INTERVAL)? {
            settings.sync_interval_secs = v;
        }
        if let Some(v) = int_value(values, keys::STRATEGY_INTERVAL)? {
            settings.strategy_interval_secs = v;
        }
        if let Some(v) = int_value(values, keys::SCHEDULER_TICK)? {
            settings.scheduler_tick_secs = v as u64;
        }

        Ok(settings)
    }

    /// Configured interval for a scheduler job, in seconds.
    pub fn interval_for(&self, job: crate::scheduler::JobName) -> i64 {
        use crate::scheduler::JobName;
        match job {
            JobName::MarketCollect => self.collect_interval_secs,
            JobName::TradingSync => self.sync_interval_secs,
            JobName::StrategyTick => self.strategy_interval_secs,
        }
    }
}

/// Intervals, limits and TTLs are all non-negative; a negative store value
/// is rejected rather than cast, which would wrap it into a huge unsigned.
fn int_value(values: &HashMap<String, Value>, key: &str) -> Result<Option<i64>, SettingsError> {
    let parsed = match values.get(key) {
        None => Ok(None),
        Some(v) => match v {
            Value::Number(n) => n.as_i64().map(Some).ok_or_else(|| SettingsError::InvalidValue {
                key: key.to_string(),
                value: v.to_string(),
            }),
            Value::String(s) => s.parse::<i64>().map(Some).map_err(|_| SettingsError::InvalidValue {
                key: key.to_string(),
                value: s.clone(),
            }),
            _ => Err(SettingsError::InvalidValue {
                key: key.to_string(),
                value: v.to_string(),
            }),
        },
    }?;

    match parsed {
        Some(v) if v < 0 => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: v.to_string(),
        }),
        other => Ok(other),
    }
}

fn str_value(values: &HashMap<String, Value>, key: &str) -> Result<Option<String>, SettingsError> {
    match values.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(v) => Err(SettingsError::InvalidValue {
            key: key.to_string(),
            value: v.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_when_empty() {
        let settings = JobSettings::from_values(&HashMap::new()).unwrap();
        assert_eq!(settings.collect_interval_secs, 300);
        assert_eq!(settings.sync_interval_secs, 60);
        assert_eq!(settings.coverage, CoveragePolicy::Upsert);
        assert_eq!(settings.cache, CachePolicy::WriteThrough);
    }

    #[test]
    fn test_overrides() {
        let mut values = HashMap::new();
        values.insert(keys::COLLECT_INTERVAL.to_string(), json!(120));
        values.insert(keys::COVERAGE.to_string(), json!("write_new"));
        values.insert(keys::CACHE.to_string(), json!("none"));

        let settings = JobSettings::from_values(&values).unwrap();
        assert_eq!(settings.collect_interval_secs, 120);
        assert_eq!(settings.coverage, CoveragePolicy::WriteNew);
        assert_eq!(settings.cache, CachePolicy::None);
    }

    #[test]
    fn test_string_encoded_int() {
        let mut values = HashMap::new();
        values.insert(keys::SYNC_INTERVAL.to_string(), json!("90"));
        let settings = JobSettings::from_values(&values).unwrap();
        assert_eq!(settings.sync_interval_secs, 90);
    }

    #[test]
    fn test_bad_coverage_is_hard_error() {
        let mut values = HashMap::new();
        values.insert(keys::COVERAGE.to_string(), json!("append"));
        assert!(JobSettings::from_values(&values).is_err());
    }

    #[test]
    fn test_bad_interval_is_hard_error() {
        let mut values = HashMap::new();
        values.insert(keys::COLLECT_INTERVAL.to_string(), json!("soon"));
        assert!(JobSettings::from_values(&values).is_err());
    }

    #[test]
    fn test_negative_int_is_hard_error() {
        let mut values = HashMap::new();
        values.insert(keys::CACHE_TTL.to_string(), json!(-5));
        assert!(JobSettings::from_values(&values).is_err());

        let mut values = HashMap::new();
        values.insert(keys::COLLECT_BACKFILL.to_string(), json!("-1"));
        assert!(JobSettings::from_values(&values).is_err());
    }
}
