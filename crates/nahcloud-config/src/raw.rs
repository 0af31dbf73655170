use serde::{Deserialize, Serialize};

/// On-disk server config (YAML or JSON). Every field is optional; absent
/// fields fall through to the built-in defaults.
///
/// ```yaml
/// addr: "0.0.0.0:8080"
/// token: s3cret
/// sqlite_path: /var/lib/nah/nah.db
/// chaos:
///   enabled: true
///   seed: 42
///   latency:
///     global_ms: "10-50"
///     projects_ms: "100-300"
///   error_rate:
///     projects: 0.1
///     projects_get: 0.3
///   error_types: [503, 500, 429]
///   error_weights: [3, 2, 1]
/// ```
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfig {
    pub addr: Option<String>,
    pub token: Option<String>,
    pub sqlite_path: Option<String>,
    pub ephemeral: Option<bool>,
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub chaos: RawChaos,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawChaos {
    pub enabled: Option<bool>,
    pub seed: Option<u64>,
    #[serde(default)]
    pub latency: RawLatency,
    #[serde(default)]
    pub error_rate: RawErrorRates,
    pub error_types: Option<Vec<u16>>,
    pub error_weights: Option<Vec<u32>>,
}

/// Ranges written `"min-max"` in milliseconds.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawLatency {
    pub global_ms: Option<String>,
    pub projects_ms: Option<String>,
    pub instances_ms: Option<String>,
    pub metadata_ms: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RawErrorRates {
    pub projects: Option<f64>,
    /// Absent means GETs use the `projects` rate.
    pub projects_get: Option<f64>,
    pub instances: Option<f64>,
    pub metadata: Option<f64>,
}
