use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Server configuration loaded from `ROOMLEDGER_*` environment variables.
///
/// | Env Var                          | Default   |
/// |----------------------------------|-----------|
/// | `ROOMLEDGER_BIND`                | `0.0.0.0` |
/// | `ROOMLEDGER_PORT`                | `5433`    |
/// | `ROOMLEDGER_DATA_DIR`            | `./data`  |
/// | `ROOMLEDGER_PASSWORD`            | `roomledger` |
/// | `ROOMLEDGER_MAX_CONNECTIONS`     | `256`     |
/// | `ROOMLEDGER_METRICS_PORT`        | unset (metrics off) |
/// | `ROOMLEDGER_TLS_CERT` / `_KEY`   | unset (plaintext)   |
/// | `ROOMLEDGER_DRAIN_TIMEOUT_SECS`  | `10`      |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub password: String,
    pub max_connections: usize,
    pub metrics_port: Option<u16>,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    /// How long shutdown waits for open connections.
    pub drain_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: cannot parse {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("ROOMLEDGER_MAX_CONNECTIONS must be at least 1")]
    NoConnections,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 5433,
            data_dir: PathBuf::from("./data"),
            password: "roomledger".into(),
            max_connections: 256,
            metrics_port: None,
            tls_cert: None,
            tls_key: None,
            drain_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let config = Self {
            bind: lookup("ROOMLEDGER_BIND").unwrap_or(defaults.bind),
            port: parse_var(&lookup, "ROOMLEDGER_PORT")?.unwrap_or(defaults.port),
            data_dir: lookup("ROOMLEDGER_DATA_DIR").map_or(defaults.data_dir, PathBuf::from),
            password: lookup("ROOMLEDGER_PASSWORD").unwrap_or(defaults.password),
            max_connections: parse_var(&lookup, "ROOMLEDGER_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections),
            metrics_port: parse_var(&lookup, "ROOMLEDGER_METRICS_PORT")?,
            tls_cert: lookup("ROOMLEDGER_TLS_CERT").map(PathBuf::from),
            tls_key: lookup("ROOMLEDGER_TLS_KEY").map(PathBuf::from),
            drain_timeout: parse_var(&lookup, "ROOMLEDGER_DRAIN_TIMEOUT_SECS")?
                .map_or(defaults.drain_timeout, Duration::from_secs),
        };
        if config.max_connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { var, value }),
    }
}
