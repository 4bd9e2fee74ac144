//! Server configuration loaded from `SLOTBOOK_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{var} must be greater than zero")]
    Zero { var: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            _ => Err(()),
        }
    }
}

/// Reads from environment variables:
/// - `SLOTBOOK_BIND` (default `0.0.0.0`)
/// - `SLOTBOOK_PORT` (default `7878`)
/// - `SLOTBOOK_DATA_DIR` (default `./data`)
/// - `SLOTBOOK_MAX_CONNECTIONS` (default `256`)
/// - `SLOTBOOK_COMPACT_THRESHOLD`: WAL appends before a rewrite (default `1000`)
/// - `SLOTBOOK_METRICS_PORT`: Prometheus listener, off when unset
/// - `SLOTBOOK_LOG_FORMAT`: `compact` or `json` (default `compact`)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 7878,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            metrics_port: None,
            log_format: LogFormat::Compact,
        }
    }
}

fn parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Config::default();
        let max_connections = parsed(&lookup, "SLOTBOOK_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections);
        if max_connections == 0 {
            return Err(ConfigError::Zero {
                var: "SLOTBOOK_MAX_CONNECTIONS",
            });
        }
        let compact_threshold = parsed(&lookup, "SLOTBOOK_COMPACT_THRESHOLD")?.unwrap_or(defaults.compact_threshold);
        if compact_threshold == 0 {
            return Err(ConfigError::Zero {
                var: "SLOTBOOK_COMPACT_THRESHOLD",
            });
        }

        Ok(Self {
            bind: lookup("SLOTBOOK_BIND").unwrap_or(defaults.bind),
            port: parsed(&lookup, "SLOTBOOK_PORT")?.unwrap_or(defaults.port),
            data_dir: lookup("SLOTBOOK_DATA_DIR").map(PathBuf::from).unwrap_or(defaults.data_dir),
            max_connections,
            compact_threshold,
            metrics_port: parsed(&lookup, "SLOTBOOK_METRICS_PORT")?,
            log_format: parsed(&lookup, "SLOTBOOK_LOG_FORMAT")?.unwrap_or(defaults.log_format),
        })
    }

    /// Returns the `"bind:port"` listen address.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("slotbook.wal")
    }
}
