use std::sync::Arc;
use std::time::{Duration, Instant};

use nahcloud_chaos::ChaosEngine;
use nahcloud_service::Service;
use nahcloud_store::Store;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    pub service: Service,
    pub chaos: Arc<ChaosEngine>,
    /// Bearer token required on `/v1` routes. `None` disables auth.
    pub auth_token: Option<Arc<String>>,
    /// Cancelled on graceful shutdown; cuts injected latency short.
    pub shutdown: CancellationToken,
    pub request_timeout: Duration,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>, chaos: ChaosEngine, auth_token: Option<String>) -> Self {
        Self {
            service: Service::new(store),
            chaos: Arc::new(chaos),
            auth_token: auth_token.map(Arc::new),
            shutdown: CancellationToken::new(),
            request_timeout: Duration::from_secs(60),
            started_at: Instant::now(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }
}
