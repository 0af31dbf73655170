use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use nahcloud_chaos::{ChaosConfig, LatencyRange};

use crate::error::ConfigError;
use crate::raw::RawConfig;

pub const DEFAULT_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_SQLITE_PATH: &str = "nah.db";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq)]
pub enum StorageConfig {
    /// Lost on exit.
    Memory,
    Sqlite(PathBuf),
}

/// Fully resolved server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    /// `None` leaves the API open.
    pub token: Option<String>,
    pub storage: StorageConfig,
    pub request_timeout: Duration,
    pub chaos: ChaosConfig,
}

/// Values from command-line flags or `NAH_*` environment variables. Each
/// `Some` wins over the config file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub addr: Option<String>,
    pub token: Option<String>,
    pub sqlite_path: Option<String>,
    pub ephemeral: Option<bool>,
    pub request_timeout_secs: Option<u64>,

    pub chaos_enabled: Option<bool>,
    pub chaos_seed: Option<u64>,
    pub latency_global: Option<String>,
    pub latency_projects: Option<String>,
    pub latency_instances: Option<String>,
    pub latency_metadata: Option<String>,
    pub error_rate_projects: Option<f64>,
    pub error_rate_projects_get: Option<f64>,
    pub error_rate_instances: Option<f64>,
    pub error_rate_metadata: Option<f64>,
    pub error_types: Option<Vec<u16>>,
    pub error_weights: Option<Vec<u32>>,
}

impl ServerConfig {
    /// Merge overrides onto the file config onto the defaults, then validate.
    pub fn resolve(file: RawConfig, o: ConfigOverrides) -> Result<Self, ConfigError> {
        let addr = parse_addr(o.addr.or(file.addr).as_deref().unwrap_or(DEFAULT_ADDR))?;
        let token = o.token.or(file.token).filter(|t| !t.is_empty());

        let storage = if o.ephemeral.or(file.ephemeral).unwrap_or(false) {
            StorageConfig::Memory
        } else {
            let path = o
                .sqlite_path
                .or(file.sqlite_path)
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| DEFAULT_SQLITE_PATH.to_string());
            StorageConfig::Sqlite(PathBuf::from(path))
        };

        let request_timeout = Duration::from_secs(
            o.request_timeout_secs
                .or(file.request_timeout_secs)
                .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS),
        );

        let fc = file.chaos;
        let defaults = ChaosConfig::default();
        let chaos = ChaosConfig {
            enabled: o.chaos_enabled.or(fc.enabled).unwrap_or(defaults.enabled),
            seed: o.chaos_seed.or(fc.seed).unwrap_or(defaults.seed),
            global_latency: latency(o.latency_global.or(fc.latency.global_ms))?,
            projects_latency: latency(o.latency_projects.or(fc.latency.projects_ms))?,
            instances_latency: latency(o.latency_instances.or(fc.latency.instances_ms))?,
            metadata_latency: latency(o.latency_metadata.or(fc.latency.metadata_ms))?,
            projects_error_rate: o
                .error_rate_projects
                .or(fc.error_rate.projects)
                .unwrap_or(defaults.projects_error_rate),
            projects_get_error_rate: o.error_rate_projects_get.or(fc.error_rate.projects_get),
            instances_error_rate: o
                .error_rate_instances
                .or(fc.error_rate.instances)
                .unwrap_or(defaults.instances_error_rate),
            metadata_error_rate: o
                .error_rate_metadata
                .or(fc.error_rate.metadata)
                .unwrap_or(defaults.metadata_error_rate),
            error_types: o.error_types.or(fc.error_types).unwrap_or(defaults.error_types),
            error_weights: o.error_weights.or(fc.error_weights).unwrap_or(defaults.error_weights),
        };
        chaos.validate()?;

        Ok(ServerConfig { addr, token, storage, request_timeout, chaos })
    }
}

/// Accepts `host:port`, or `:port` for all interfaces.
fn parse_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    let full = match value.strip_prefix(':') {
        Some(port) => format!("0.0.0.0:{port}"),
        None => value.to_string(),
    };
    full.parse().map_err(|source| ConfigError::InvalidAddr { value: value.to_string(), source })
}

fn latency(value: Option<String>) -> Result<Option<LatencyRange>, ConfigError> {
    match value.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => Ok(Some(s.parse::<LatencyRange>()?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raw::{RawChaos, RawErrorRates, RawLatency};

    #[test]
    fn defaults() {
        let cfg = ServerConfig::resolve(RawConfig::default(), ConfigOverrides::default()).unwrap();
        assert_eq!(cfg.addr.to_string(), DEFAULT_ADDR);
        assert_eq!(cfg.token, None);
        assert_eq!(cfg.storage, StorageConfig::Sqlite(PathBuf::from("nah.db")));
        assert!(!cfg.chaos.enabled);
        assert_eq!(cfg.chaos.error_types, vec![503, 500, 429]);
        assert_eq!(cfg.chaos.error_weights, vec![3, 2, 1]);
        assert_eq!(cfg.chaos.projects_get_error_rate, None);
    }

    #[test]
    fn overrides_beat_file() {
        let file = RawConfig {
            addr: Some("127.0.0.1:9000".into()),
            token: Some("from-file".into()),
            chaos: RawChaos {
                enabled: Some(true),
                seed: Some(7),
                error_rate: RawErrorRates { projects: Some(0.1), ..Default::default() },
                ..Default::default()
            },
            ..Default::default()
        };
        let overrides = ConfigOverrides {
            token: Some("from-flag".into()),
            error_rate_projects: Some(0.5),
            ..Default::default()
        };
        let cfg = ServerConfig::resolve(file, overrides).unwrap();
        assert_eq!(cfg.addr.port(), 9000);
        assert_eq!(cfg.token.as_deref(), Some("from-flag"));
        assert!(cfg.chaos.enabled);
        assert_eq!(cfg.chaos.seed, 7);
        assert_eq!(cfg.chaos.projects_error_rate, 0.5);
    }

    #[test]
    fn port_only_addr() {
        let overrides = ConfigOverrides { addr: Some(":9090".into()), ..Default::default() };
        let cfg = ServerConfig::resolve(RawConfig::default(), overrides).unwrap();
        assert_eq!(cfg.addr.to_string(), "0.0.0.0:9090");
    }

    #[test]
    fn ephemeral_uses_memory() {
        let overrides = ConfigOverrides { ephemeral: Some(true), ..Default::default() };
        let cfg = ServerConfig::resolve(RawConfig::default(), overrides).unwrap();
        assert_eq!(cfg.storage, StorageConfig::Memory);
    }

    #[test]
    fn invalid_latency_is_an_error() {
        let file = RawConfig {
            chaos: RawChaos {
                latency: RawLatency { projects_ms: Some("500-100".into()), ..Default::default() },
                ..Default::default()
            },
            ..Default::default()
        };
        let err = ServerConfig::resolve(file, ConfigOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::Chaos(_)));
    }

    #[test]
    fn out_of_range_rate_is_an_error() {
        let overrides = ConfigOverrides { error_rate_metadata: Some(2.0), ..Default::default() };
        assert!(ServerConfig::resolve(RawConfig::default(), overrides).is_err());
    }

    #[test]
    fn empty_token_means_open() {
        let overrides = ConfigOverrides { token: Some(String::new()), ..Default::default() };
        let cfg = ServerConfig::resolve(RawConfig::default(), overrides).unwrap();
        assert_eq!(cfg.token, None);
    }
}
