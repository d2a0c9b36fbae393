//! Exchange registry
//!
//! Holds the active adapter set built from the exchange config file merged
//! with decrypted credential overrides from the store. `reload` swaps in a
//! fresh immutable snapshot; jobs holding an adapter `Arc` keep using it
//! until they finish.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{info, warn};

use crate::collector::CollectTarget;
use crate::config::ExchangeFileEntry;
use crate::exchange::{BinanceAdapter, Exchange, OkxAdapter};

/// Decrypted credentials taken from an active store row, overriding the
/// file-configured ones.
#[derive(Debug, Clone, Default)]
pub struct CredentialOverride {
    pub api_key: String,
    pub api_secret: String,
    pub passphrase: Option<String>,
}

struct Snapshot {
    adapters: HashMap<String, Arc<dyn Exchange>>,
    entries: HashMap<String, ExchangeFileEntry>,
}

pub struct ExchangeRegistry {
    snapshot: RwLock<Arc<Snapshot>>,
}

impl ExchangeRegistry {
    /// Build the active adapter set. Disabled entries and entries whose
    /// adapter cannot be constructed are excluded, never fatal.
    pub fn build(
        entries: Vec<ExchangeFileEntry>,
        overrides: &HashMap<String, CredentialOverride>,
    ) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Self::make_snapshot(entries, overrides))),
        }
    }

    /// Registry over an explicit adapter set, bypassing config and
    /// credential wiring. No collection targets are derived.
    pub fn from_adapters(adapters: HashMap<String, Arc<dyn Exchange>>) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(Snapshot {
                adapters,
                entries: HashMap::new(),
            })),
        }
    }

    /// Invalidate and rebuild the full set from fresh inputs.
    pub fn reload(
        &self,
        entries: Vec<ExchangeFileEntry>,
        overrides: &HashMap<String, CredentialOverride>,
    ) {
        let snapshot = Arc::new(Self::make_snapshot(entries, overrides));
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = snapshot;
        }
    }

    fn make_snapshot(
        entries: Vec<ExchangeFileEntry>,
        overrides: &HashMap<String, CredentialOverride>,
    ) -> Snapshot {
        let mut adapters: HashMap<String, Arc<dyn Exchange>> = HashMap::new();
        let mut kept = HashMap::new();

        for mut entry in entries {
            if !entry.enabled {
                continue;
            }
            if let Some(creds) = overrides.get(&entry.name) {
                entry.api_key = creds.api_key.clone();
                entry.api_secret = creds.api_secret.clone();
                if creds.passphrase.is_some() {
                    entry.passphrase = creds.passphrase.clone();
                }
            }

            match Self::make_adapter(&entry) {
                Ok(adapter) => {
                    info!(exchange = %entry.name, kind = %entry.kind, "exchange adapter registered");
                    adapters.insert(entry.name.clone(), adapter);
                    kept.insert(entry.name.clone(), entry);
                }
                Err(err) => {
                    warn!(exchange = %entry.name, error = %err, "excluding exchange entry");
                }
            }
        }

        Snapshot { adapters, entries: kept }
    }

    fn make_adapter(entry: &ExchangeFileEntry) -> anyhow::Result<Arc<dyn Exchange>> {
        let adapter: Arc<dyn Exchange> = match entry.kind.as_str() {
            "binance" => Arc::new(BinanceAdapter::new(
                &entry.name,
                &entry.api_key,
                &entry.api_secret,
            )?),
            "okx" => Arc::new(OkxAdapter::new(
                &entry.name,
                &entry.api_key,
                &entry.api_secret,
                entry.passphrase.as_deref().unwrap_or_default(),
            )?),
            other => anyhow::bail!("unknown exchange type: {other}"),
        };
        Ok(adapter)
    }

    /// Adapter for a configured exchange, if enabled.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Exchange>> {
        let snapshot = self.snapshot.read().ok()?.clone();
        snapshot.adapters.get(name).cloned()
    }

    /// Names of all active exchanges.
    pub fn names(&self) -> Vec<String> {
        match self.snapshot.read() {
            Ok(guard) => {
                let mut names: Vec<String> = guard.adapters.keys().cloned().collect();
                names.sort();
                names
            }
            Err(_) => Vec::new(),
        }
    }

    /// Collection targets for every configured (exchange, symbol, timeframe).
    pub fn collect_targets(&self) -> Vec<CollectTarget> {
        let Ok(guard) = self.snapshot.read() else {
            return Vec::new();
        };
        let mut targets = Vec::new();
        for entry in guard.entries.values() {
            for symbol in &entry.symbols {
                for timeframe in &entry.timeframes {
                    targets.push(CollectTarget {
                        exchange: entry.name.clone(),
                        symbol: symbol.clone(),
                        timeframe: timeframe.clone(),
                    });
                }
            }
        }
        targets.sort();
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, kind: &str, enabled: bool) -> ExchangeFileEntry {
        ExchangeFileEntry {
            name: name.to_string(),
            kind: kind.to_string(),
            enabled,
            api_key: "k".into(),
            api_secret: "s".into(),
            passphrase: None,
            symbols: vec!["BTCUSDT".into()],
            timeframes: vec!["1m".into(), "1h".into()],
        }
    }

    #[test]
    fn test_disabled_and_unknown_excluded() {
        let registry = ExchangeRegistry::build(
            vec![
                entry("binance", "binance", true),
                entry("okx", "okx", false),
                entry("weird", "ftx", true),
            ],
            &HashMap::new(),
        );
        assert_eq!(registry.names(), vec!["binance"]);
        assert!(registry.get("binance").is_some());
        assert!(registry.get("okx").is_none());
        assert!(registry.get("weird").is_none());
    }

    #[test]
    fn test_collect_targets() {
        let registry = ExchangeRegistry::build(
            vec![entry("binance", "binance", true)],
            &HashMap::new(),
        );
        let targets = registry.collect_targets();
        assert_eq!(targets.len(), 2);
        assert!(targets.iter().all(|t| t.exchange == "binance"));
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let registry =
            ExchangeRegistry::build(vec![entry("binance", "binance", true)], &HashMap::new());
        let held = registry.get("binance").unwrap();

        registry.reload(vec![entry("okx", "okx", true)], &HashMap::new());
        assert_eq!(registry.names(), vec!["okx"]);
        // in-flight holders keep their reference
        assert_eq!(held.name(), "binance");
    }
}
