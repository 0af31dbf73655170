use std::path::Path;

use tracing::debug;

use crate::error::ConfigError;
use crate::raw::RawConfig;
use crate::server::{ConfigOverrides, ServerConfig};

/// Read a config file. `.json` files are parsed as JSON, anything else as YAML.
pub fn load_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    debug!("Loading config from {}", path.display());
    if is_json {
        serde_json::from_str(&content).map_err(|e| ConfigError::JsonParse {
            path: path.display().to_string(),
            source: e,
        })
    } else if content.trim().is_empty() {
        Ok(RawConfig::default())
    } else {
        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.display().to_string(),
            source: e,
        })
    }
}

/// Resolve the effective server config: overrides, then the optional file,
/// then defaults.
pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<ServerConfig, ConfigError> {
    let file = match path {
        Some(p) => load_file(p)?,
        None => RawConfig::default(),
    };
    ServerConfig::resolve(file, overrides)
}
