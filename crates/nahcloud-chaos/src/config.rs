use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ChaosConfigError {
    #[error("invalid latency range '{0}': expected \"min-max\" in milliseconds with min <= max")]
    InvalidLatencyRange(String),

    #[error("{field} error rate must be within [0, 1], got {value}")]
    ErrorRateOutOfRange { field: &'static str, value: f64 },
}

/// API surface a request belongs to, for per-category latency and error rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceCategory {
    Projects,
    Instances,
    Metadata,
}

impl ResourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceCategory::Projects => "projects",
            ResourceCategory::Instances => "instances",
            ResourceCategory::Metadata => "metadata",
        }
    }
}

impl fmt::Display for ResourceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive latency range in milliseconds, written `"min-max"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyRange {
    pub min_ms: u64,
    pub max_ms: u64,
}

impl LatencyRange {
    pub fn new(min_ms: u64, max_ms: u64) -> Result<Self, ChaosConfigError> {
        if max_ms < min_ms {
            return Err(ChaosConfigError::InvalidLatencyRange(format!("{min_ms}-{max_ms}")));
        }
        Ok(Self { min_ms, max_ms })
    }
}

impl FromStr for LatencyRange {
    type Err = ChaosConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ChaosConfigError::InvalidLatencyRange(s.to_string());
        let (min, max) = s.split_once('-').ok_or_else(invalid)?;
        let min = min.trim().parse::<u64>().map_err(|_| invalid())?;
        let max = max.trim().parse::<u64>().map_err(|_| invalid())?;
        if max < min {
            return Err(invalid());
        }
        Ok(Self { min_ms: min, max_ms: max })
    }
}

impl fmt::Display for LatencyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.min_ms, self.max_ms)
    }
}

/// Process-wide chaos settings. Immutable once handed to [`crate::ChaosEngine`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChaosConfig {
    pub enabled: bool,
    /// `0` asks the engine for a time-derived seed.
    pub seed: u64,

    pub global_latency: Option<LatencyRange>,
    pub projects_latency: Option<LatencyRange>,
    pub instances_latency: Option<LatencyRange>,
    pub metadata_latency: Option<LatencyRange>,

    pub projects_error_rate: f64,
    /// Replaces `projects_error_rate` for GET requests when set.
    pub projects_get_error_rate: Option<f64>,
    pub instances_error_rate: f64,
    pub metadata_error_rate: f64,

    /// Candidate status codes for injected errors.
    pub error_types: Vec<u16>,
    /// Relative weights, parallel to `error_types`. A length mismatch
    /// falls back to a uniform choice.
    pub error_weights: Vec<u32>,
}

impl Default for ChaosConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            seed: 0,
            global_latency: None,
            projects_latency: None,
            instances_latency: None,
            metadata_latency: None,
            projects_error_rate: 0.0,
            projects_get_error_rate: None,
            instances_error_rate: 0.0,
            metadata_error_rate: 0.0,
            error_types: vec![503, 500, 429],
            error_weights: vec![3, 2, 1],
        }
    }
}

impl ChaosConfig {
    pub fn validate(&self) -> Result<(), ChaosConfigError> {
        let rates = [
            ("projects", Some(self.projects_error_rate)),
            ("projects_get", self.projects_get_error_rate),
            ("instances", Some(self.instances_error_rate)),
            ("metadata", Some(self.metadata_error_rate)),
        ];
        for (field, rate) in rates {
            if let Some(value) = rate {
                if !(0.0..=1.0).contains(&value) {
                    return Err(ChaosConfigError::ErrorRateOutOfRange { field, value });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn latency_for(&self, category: ResourceCategory) -> Option<LatencyRange> {
        let specific = match category {
            ResourceCategory::Projects => self.projects_latency,
            ResourceCategory::Instances => self.instances_latency,
            ResourceCategory::Metadata => self.metadata_latency,
        };
        specific.or(self.global_latency)
    }

    pub(crate) fn error_rate_for(&self, category: ResourceCategory, is_get: bool) -> f64 {
        match category {
            ResourceCategory::Projects => match self.projects_get_error_rate {
                Some(rate) if is_get => rate,
                _ => self.projects_error_rate,
            },
            ResourceCategory::Instances => self.instances_error_rate,
            ResourceCategory::Metadata => self.metadata_error_rate,
        }
    }
}
