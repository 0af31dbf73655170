use std::sync::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use http::Method;
use nahcloud_domain::DomainError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{ChaosConfig, ResourceCategory};
use crate::overrides::ChaosOverrides;

/// Applies configured latency and error injection to API calls.
///
/// All random draws come from one seeded generator in call order, so a fixed
/// seed and a fixed request sequence reproduce the same faults.
pub struct ChaosEngine {
    config: ChaosConfig,
    seed: u64,
    // `None` when disabled. Never held across an await.
    rng: Option<Mutex<ChaCha8Rng>>,
}

impl ChaosEngine {
    pub fn new(config: ChaosConfig) -> Self {
        let seed = if config.seed == 0 { time_seed() } else { config.seed };
        let rng = config
            .enabled
            .then(|| Mutex::new(ChaCha8Rng::seed_from_u64(seed)));
        Self { config, seed, rng }
    }

    /// A disabled engine; `apply` is always a no-op.
    pub fn disabled() -> Self {
        Self::new(ChaosConfig::default())
    }

    pub fn is_enabled(&self) -> bool {
        self.rng.is_some()
    }

    /// Effective seed, after resolving `0` to a time-derived value.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &ChaosConfig {
        &self.config
    }

    /// Sleep for the chosen latency, then possibly fail the request.
    ///
    /// The sleep ends early, without error, when `cancel` fires or the
    /// returned future is dropped.
    pub async fn apply(
        &self,
        category: ResourceCategory,
        overrides: &ChaosOverrides,
        method: &Method,
        cancel: &CancellationToken,
    ) -> Result<(), DomainError> {
        let Some(rng) = &self.rng else {
            return Ok(());
        };
        if overrides.bypass {
            debug!(%category, "chaos bypassed by request header");
            return Ok(());
        }

        let latency_ms = match overrides.forced_latency_ms {
            Some(ms) => Some(ms),
            None => self
                .config
                .latency_for(category)
                .map(|range| {
                    // Fixed ranges draw nothing from the generator.
                    if range.max_ms > range.min_ms {
                        self.with_rng(rng, |r| r.gen_range(range.min_ms..=range.max_ms))
                    } else {
                        range.min_ms
                    }
                }),
        };
        if let Some(ms) = latency_ms.filter(|ms| *ms > 0) {
            debug!(%category, latency_ms = ms, "injecting latency");
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(ms)) => {}
                _ = cancel.cancelled() => {
                    debug!(%category, "latency cut short by cancellation");
                }
            }
        }

        let rate = self.config.error_rate_for(category, method == Method::GET);
        self.maybe_inject(rng, category, rate)
    }

    fn maybe_inject(
        &self,
        rng: &Mutex<ChaCha8Rng>,
        category: ResourceCategory,
        rate: f64,
    ) -> Result<(), DomainError> {
        if rate <= 0.0 {
            return Ok(());
        }
        let status = self.with_rng(rng, |r| {
            let draw: f64 = r.gen();
            (draw < rate).then(|| select_status(&self.config, r))
        });
        let Some(status) = status else {
            return Ok(());
        };

        warn!(%category, status, "injecting error");
        Err(match status {
            429 => DomainError::TooManyRequests("chaos: rate limited".into()),
            503 => DomainError::ServiceUnavailable("chaos: service unavailable".into()),
            500 => DomainError::internal("chaos: internal server error"),
            _ => DomainError::internal("chaos: unknown error"),
        })
    }

    fn with_rng<T>(&self, rng: &Mutex<ChaCha8Rng>, f: impl FnOnce(&mut ChaCha8Rng) -> T) -> T {
        // A panic while holding the lock cannot leave the generator invalid.
        let mut guard = rng.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *guard)
    }
}

/// Weighted pick over `error_types`. Uniform when the weight list does not
/// line up, the first type when all weights are zero, 500 when there are no
/// types at all.
fn select_status(config: &ChaosConfig, rng: &mut ChaCha8Rng) -> u16 {
    let types = &config.error_types;
    let weights = &config.error_weights;
    let Some(&first) = types.first() else {
        return 500;
    };
    if weights.len() != types.len() {
        return types[rng.gen_range(0..types.len())];
    }

    let total: u64 = weights.iter().map(|w| u64::from(*w)).sum();
    if total == 0 {
        return first;
    }
    let target = rng.gen_range(0..total);
    let mut cumulative = 0u64;
    for (status, weight) in types.iter().zip(weights) {
        cumulative += u64::from(*weight);
        if target < cumulative {
            return *status;
        }
    }
    first
}

fn time_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Instant;

    use super::*;
    use crate::config::LatencyRange;

    fn enabled(config: ChaosConfig) -> ChaosEngine {
        ChaosEngine::new(ChaosConfig { enabled: true, seed: 42, ..config })
    }

    async fn outcome(engine: &ChaosEngine, category: ResourceCategory) -> Result<(), DomainError> {
        engine
            .apply(category, &ChaosOverrides::default(), &Method::POST, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn disabled_engine_never_injects() {
        let engine = ChaosEngine::new(ChaosConfig {
            enabled: false,
            metadata_error_rate: 1.0,
            ..ChaosConfig::default()
        });
        assert!(!engine.is_enabled());
        assert!(outcome(&engine, ResourceCategory::Metadata).await.is_ok());
    }

    #[tokio::test]
    async fn zero_rate_never_injects() {
        let engine = enabled(ChaosConfig::default());
        for _ in 0..1000 {
            assert!(outcome(&engine, ResourceCategory::Instances).await.is_ok());
        }
    }

    #[tokio::test]
    async fn full_rate_always_injects() {
        let engine = enabled(ChaosConfig { instances_error_rate: 1.0, ..ChaosConfig::default() });
        for _ in 0..200 {
            let err = outcome(&engine, ResourceCategory::Instances).await.unwrap_err();
            assert!(matches!(
                err,
                DomainError::TooManyRequests(_)
                    | DomainError::ServiceUnavailable(_)
                    | DomainError::Internal(_)
            ));
        }
    }

    #[tokio::test]
    async fn forced_latency_sleeps_at_least_that_long() {
        let engine = enabled(ChaosConfig::default());
        let overrides = ChaosOverrides { bypass: false, forced_latency_ms: Some(10) };
        let start = Instant::now();
        engine
            .apply(ResourceCategory::Projects, &overrides, &Method::GET, &CancellationToken::new())
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(10));
    }

    #[tokio::test]
    async fn bypass_skips_latency_and_errors() {
        let engine = enabled(ChaosConfig {
            projects_latency: Some(LatencyRange::new(5_000, 10_000).unwrap()),
            projects_error_rate: 1.0,
            ..ChaosConfig::default()
        });
        let overrides = ChaosOverrides { bypass: true, forced_latency_ms: None };
        let start = Instant::now();
        engine
            .apply(ResourceCategory::Projects, &overrides, &Method::GET, &CancellationToken::new())
            .await
            .unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn cancellation_ends_sleep_early() {
        let engine = enabled(ChaosConfig {
            metadata_latency: Some(LatencyRange::new(30_000, 30_000).unwrap()),
            ..ChaosConfig::default()
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = engine
            .apply(ResourceCategory::Metadata, &ChaosOverrides::default(), &Method::GET, &cancel)
            .await;
        assert!(result.is_ok());
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn equal_weights_yield_both_statuses() {
        let engine = enabled(ChaosConfig {
            metadata_error_rate: 1.0,
            error_types: vec![500, 503],
            error_weights: vec![1, 1],
            ..ChaosConfig::default()
        });
        let mut seen = HashSet::new();
        for _ in 0..200 {
            seen.insert(outcome(&engine, ResourceCategory::Metadata).await.unwrap_err().code());
        }
        assert!(seen.contains("INTERNAL_ERROR"));
        assert!(seen.contains("SERVICE_UNAVAILABLE"));
    }

    #[tokio::test]
    async fn mismatched_weights_pick_only_listed_codes() {
        let engine = enabled(ChaosConfig {
            metadata_error_rate: 1.0,
            error_types: vec![429],
            error_weights: vec![1, 5, 9],
            ..ChaosConfig::default()
        });
        for _ in 0..100 {
            let err = outcome(&engine, ResourceCategory::Metadata).await.unwrap_err();
            assert_eq!(err.code(), "TOO_MANY_REQUESTS");
        }
    }

    #[test]
    fn status_selection_edge_cases() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let empty = ChaosConfig { error_types: vec![], error_weights: vec![], ..ChaosConfig::default() };
        assert_eq!(select_status(&empty, &mut rng), 500);

        let zero = ChaosConfig {
            error_types: vec![503, 429],
            error_weights: vec![0, 0],
            ..ChaosConfig::default()
        };
        assert_eq!(select_status(&zero, &mut rng), 503);

        let skewed = ChaosConfig {
            error_types: vec![503, 429],
            error_weights: vec![0, 1],
            ..ChaosConfig::default()
        };
        for _ in 0..50 {
            assert_eq!(select_status(&skewed, &mut rng), 429);
        }
    }

    #[tokio::test]
    async fn same_seed_same_faults() {
        let config = ChaosConfig { instances_error_rate: 0.5, ..ChaosConfig::default() };
        let a = enabled(config.clone());
        let b = enabled(config);
        for _ in 0..100 {
            let ra = outcome(&a, ResourceCategory::Instances).await.map_err(|e| e.code());
            let rb = outcome(&b, ResourceCategory::Instances).await.map_err(|e| e.code());
            assert_eq!(ra, rb);
        }
    }

    #[tokio::test]
    async fn fixed_latency_leaves_fault_sequence_unchanged() {
        let base = ChaosConfig { projects_error_rate: 0.5, ..ChaosConfig::default() };
        let plain = enabled(base.clone());
        let fixed = enabled(ChaosConfig {
            projects_latency: Some(LatencyRange::new(0, 0).unwrap()),
            ..base
        });
        for _ in 0..200 {
            let a = outcome(&plain, ResourceCategory::Projects).await.map_err(|e| e.code());
            let b = outcome(&fixed, ResourceCategory::Projects).await.map_err(|e| e.code());
            assert_eq!(a, b);
        }
    }

    #[tokio::test]
    async fn projects_get_override() {
        let engine = enabled(ChaosConfig {
            projects_error_rate: 0.0,
            projects_get_error_rate: Some(1.0),
            ..ChaosConfig::default()
        });
        let none = ChaosOverrides::default();
        let token = CancellationToken::new();
        assert!(engine
            .apply(ResourceCategory::Projects, &none, &Method::GET, &token)
            .await
            .is_err());
        assert!(engine
            .apply(ResourceCategory::Projects, &none, &Method::POST, &token)
            .await
            .is_ok());
    }

    #[test]
    fn zero_seed_resolves_to_time_seed() {
        let engine = ChaosEngine::new(ChaosConfig { enabled: true, ..ChaosConfig::default() });
        assert_ne!(engine.seed(), 0);
    }
}
