//! Exchange config file parsing
//!
//! The file is TOML whose top-level tables are exchange names, plus the
//! reserved sections `common`, `risk_control` and `monitoring` which belong
//! to other parts of the system and are skipped here. String values of the
//! exact form `${NAME}` are replaced with the environment variable `NAME`
//! (empty string if unset) before use.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

/// Sections that are not exchange entries.
const RESERVED_SECTIONS: &[&str] = &["common", "risk_control", "monitoring"];

/// One exchange entry as read from the config file.
#[derive(Debug, Clone)]
pub struct ExchangeFileEntry {
    pub name: String,
    /// Adapter kind ("binance", "okx"); defaults to the section name
    pub kind: String,
    pub enabled: bool,
    pub api_key: String,
    pub api_secret: String,
    /// Extra passphrase some exchanges require (OKX)
    pub passphrase: Option<String>,
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
}

/// Parse the exchange config file into entries, skipping reserved sections.
///
/// Malformed sections are excluded with a warning rather than failing the
/// whole load; an unreadable or unparseable file is an error.
pub fn load_exchange_configs(path: &Path) -> Result<Vec<ExchangeFileEntry>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading exchange config {}", path.display()))?;
    let table: toml::Table = raw
        .parse()
        .with_context(|| format!("parsing exchange config {}", path.display()))?;

    let mut entries = Vec::new();
    for (name, value) in &table {
        if RESERVED_SECTIONS.contains(&name.as_str()) {
            continue;
        }
        let Some(section) = value.as_table() else {
            warn!(section = %name, "exchange config section is not a table, skipping");
            continue;
        };
        match parse_entry(name, section) {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                warn!(section = %name, error = %err, "invalid exchange config entry, skipping");
            }
        }
    }
    Ok(entries)
}

fn parse_entry(name: &str, section: &toml::Table) -> Result<ExchangeFileEntry> {
    let get_str = |key: &str| -> Option<String> {
        section.get(key).and_then(|v| v.as_str()).map(expand_env)
    };
    let get_list = |key: &str| -> Vec<String> {
        section
            .get(key)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .map(expand_env)
                    .collect()
            })
            .unwrap_or_default()
    };

    Ok(ExchangeFileEntry {
        name: name.to_string(),
        kind: get_str("type").unwrap_or_else(|| name.to_string()),
        enabled: section.get("enabled").and_then(|v| v.as_bool()).unwrap_or(false),
        api_key: get_str("api_key").unwrap_or_default(),
        api_secret: get_str("api_secret").unwrap_or_default(),
        passphrase: get_str("passphrase"),
        symbols: get_list("symbols"),
        timeframes: get_list("timeframes"),
    })
}

/// Replace a value of the exact form `${NAME}` with env var `NAME`.
///
/// Unset variables expand to the empty string. Values that merely contain
/// a placeholder are left untouched.
pub fn expand_env(value: &str) -> String {
    if let Some(name) = value.strip_prefix("${").and_then(|v| v.strip_suffix('}')) {
        std::env::var(name).unwrap_or_default()
    } else {
        value.to_string()
    }
}

/// Resolved exchange entries keyed by name, enabled ones only.
pub fn enabled_by_name(entries: Vec<ExchangeFileEntry>) -> HashMap<String, ExchangeFileEntry> {
    entries
        .into_iter()
        .filter(|e| e.enabled)
        .map(|e| (e.name.clone(), e))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_expand_env() {
        std::env::set_var("QC_TEST_KEY", "sekrit");
        assert_eq!(expand_env("${QC_TEST_KEY}"), "sekrit");
        assert_eq!(expand_env("${QC_TEST_UNSET_KEY}"), "");
        assert_eq!(expand_env("plain"), "plain");
        // only the exact form is substituted
        assert_eq!(expand_env("x${QC_TEST_KEY}y"), "x${QC_TEST_KEY}y");
    }

    #[test]
    fn test_load_skips_reserved_and_malformed() {
        std::env::set_var("QC_FILE_TEST_SECRET", "abc123");
        let file = tempfile_toml(
            r#"
[common]
log_level = "info"

[risk_control]
max_daily_loss = 0.05

[binance]
enabled = true
api_key = "k"
api_secret = "${QC_FILE_TEST_SECRET}"
symbols = ["BTCUSDT", "ETHUSDT"]
timeframes = ["1m", "1h"]

[okx]
enabled = false
api_key = "k2"
api_secret = "s2"
"#,
        );

        let entries = load_exchange_configs(file.path()).unwrap();
        assert_eq!(entries.len(), 2);

        let binance = entries.iter().find(|e| e.name == "binance").unwrap();
        assert!(binance.enabled);
        assert_eq!(binance.api_secret, "abc123");
        assert_eq!(binance.symbols, vec!["BTCUSDT", "ETHUSDT"]);

        let by_name = enabled_by_name(entries);
        assert!(by_name.contains_key("binance"));
        assert!(!by_name.contains_key("okx"));
        assert!(!by_name.contains_key("common"));
    }

    fn tempfile_toml(content: &str) -> NamedTempPath {
        let path = std::env::temp_dir().join(format!("qc-exchanges-{}.toml", uuid::Uuid::new_v4()));
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f.flush().unwrap();
        NamedTempPath { path }
    }

    struct NamedTempPath {
        path: std::path::PathBuf,
    }

    impl NamedTempPath {
        fn path(&self) -> &Path {
            &self.path
        }
    }

    impl Drop for NamedTempPath {
        fn drop(&mut self) {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}
