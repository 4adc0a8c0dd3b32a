use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server settings, read from `AIRSLOT_*` environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    /// Appends since the last compaction that trigger the next one.
    pub compact_threshold: u64,
    pub compact_interval: Duration,
    pub metrics_port: Option<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5480,
            data_dir: PathBuf::from("./data"),
            max_connections: 256,
            compact_threshold: 1000,
            compact_interval: Duration::from_secs(60),
            metrics_port: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
    Zero(&'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "{var}: cannot parse {value:?}"),
            ConfigError::Zero(var) => write!(f, "{var} must be greater than zero"),
        }
    }
}

impl std::error::Error for ConfigError {}

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

    /// Build from any variable source; unset variables keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let d = Config::default();
        let config = Config {
            bind: lookup("AIRSLOT_BIND").unwrap_or(d.bind),
            port: parsed(&lookup, "AIRSLOT_PORT")?.unwrap_or(d.port),
            data_dir: lookup("AIRSLOT_DATA_DIR").map_or(d.data_dir, PathBuf::from),
            max_connections: parsed(&lookup, "AIRSLOT_MAX_CONNECTIONS")?.unwrap_or(d.max_connections),
            compact_threshold: parsed(&lookup, "AIRSLOT_COMPACT_THRESHOLD")?
                .unwrap_or(d.compact_threshold),
            compact_interval: parsed(&lookup, "AIRSLOT_COMPACT_INTERVAL_SECS")?
                .map_or(d.compact_interval, Duration::from_secs),
            metrics_port: parsed(&lookup, "AIRSLOT_METRICS_PORT")?,
        };
        if config.max_connections == 0 {
            return Err(ConfigError::Zero("AIRSLOT_MAX_CONNECTIONS"));
        }
        if config.compact_interval.is_zero() {
            return Err(ConfigError::Zero("AIRSLOT_COMPACT_INTERVAL_SECS"));
        }
        Ok(config)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("airslot.wal")
    }
}
