use std::path::PathBuf;
use std::time::Duration;

use ulid::Ulid;

/// Password accepted when `PARKSPOT_PASSWORD` is unset.
pub const DEFAULT_PASSWORD: &str = "parkspot";

/// Server settings, read once at boot from `PARKSPOT_*` environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub bind: String,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    /// WAL appends between compactions.
    pub compact_threshold: u64,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<String>,
    pub tls_key: Option<String>,
    /// Bootstrap admin, registered at boot if missing.
    pub admin_id: Option<Ulid>,
    pub gateway_timeout: Duration,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ConfigError {
    Invalid { var: &'static str, value: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Invalid { var, value } => write!(f, "invalid value for {var}: {value:?}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn parsed<T: std::str::FromStr>(
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
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys take their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let admin_id = match lookup("PARKSPOT_ADMIN_ID") {
            None => None,
            Some(value) => Some(
                Ulid::from_string(value.trim())
                    .map_err(|_| ConfigError::Invalid { var: "PARKSPOT_ADMIN_ID", value })?,
            ),
        };
        let max_connections = parsed(&lookup, "PARKSPOT_MAX_CONNECTIONS")?.unwrap_or(256);
        if max_connections == 0 {
            return Err(ConfigError::Invalid { var: "PARKSPOT_MAX_CONNECTIONS", value: "0".into() });
        }
        Ok(Self {
            port: parsed(&lookup, "PARKSPOT_PORT")?.unwrap_or(5433),
            bind: lookup("PARKSPOT_BIND").unwrap_or_else(|| "0.0.0.0".into()),
            data_dir: PathBuf::from(lookup("PARKSPOT_DATA_DIR").unwrap_or_else(|| "./data".into())),
            password: lookup("PARKSPOT_PASSWORD").unwrap_or_else(|| DEFAULT_PASSWORD.into()),
            max_connections,
            compact_threshold: parsed(&lookup, "PARKSPOT_COMPACT_THRESHOLD")?.unwrap_or(1000),
            metrics_port: parsed(&lookup, "PARKSPOT_METRICS_PORT")?,
            tls_cert: lookup("PARKSPOT_TLS_CERT"),
            tls_key: lookup("PARKSPOT_TLS_KEY"),
            admin_id,
            gateway_timeout: Duration::from_millis(
                parsed(&lookup, "PARKSPOT_GATEWAY_TIMEOUT_MS")?.unwrap_or(5000),
            ),
        })
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("parkspot.wal")
    }

    /// The password gates every identity, so the stock one is worth a warning.
    pub fn uses_default_password(&self) -> bool {
        self.password == DEFAULT_PASSWORD
    }
}
