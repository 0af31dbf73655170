use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::{Method, Response, StatusCode, Url};
use serde_json::Value;
use tracing::debug;

const DEFAULT_RETRY_MAX: u32 = 3;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(1000);

/// Thin HTTP client for a running server. Retries 429 and 5xx responses
/// (and transport errors) with exponential backoff.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    token: Option<String>,
    retry_max: u32,
    initial_backoff: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;
        let base_url =
            Url::parse(base_url).with_context(|| format!("Invalid server URL '{base_url}'"))?;
        Ok(Self {
            http,
            base_url,
            token: token.filter(|t| !t.is_empty()),
            retry_max: DEFAULT_RETRY_MAX,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
        })
    }

    pub fn with_retries(mut self, retry_max: u32, initial_backoff: Duration) -> Self {
        self.retry_max = retry_max;
        self.initial_backoff = initial_backoff;
        self
    }

    /// URL under the server base. Segments and query values are
    /// percent-encoded.
    pub fn endpoint(&self, segments: &[&str], query: &[(&str, &str)]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("'{}' cannot be used as a server URL", self.base_url))?
            .pop_if_empty()
            .extend(segments);
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    /// Send a request, retrying transient failures. Any final response is
    /// returned as is, including 4xx.
    pub async fn send(&self, method: Method, url: Url, body: Option<&str>) -> Result<Response> {
        let mut backoff = self.initial_backoff;
        let mut last_err = anyhow!("no request attempted");

        for attempt in 0..=self.retry_max {
            if attempt > 0 {
                debug!(attempt, ?backoff, %url, "retrying");
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }

            let mut req = self.http.request(method.clone(), url.clone());
            if let Some(token) = &self.token {
                req = req.header(AUTHORIZATION, format!("Bearer {token}"));
            }
            if let Some(body) = body {
                req = req.header(CONTENT_TYPE, "application/json").body(body.to_string());
            }

            let resp = match req.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_err = anyhow!(e).context(format!("Failed to reach server at {url}"));
                    continue;
                }
            };

            let status = resp.status();
            if !should_retry(status) {
                return Ok(resp);
            }
            if let Some(wait) = retry_after(&resp) {
                backoff = wait;
            }
            let text = resp.text().await.unwrap_or_default();
            last_err = anyhow!("HTTP {}: {}", status.as_u16(), text);
        }

        Err(last_err)
    }

    pub async fn get_json(&self, segments: &[&str]) -> Result<Value> {
        let url = self.endpoint(segments, &[])?;
        let resp = self.send(Method::GET, url, None).await?;
        let resp = error_for_status(resp).await?;
        resp.json().await.context("Failed to decode response")
    }
}

fn should_retry(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Whole seconds from a `Retry-After` header on a 429.
fn retry_after(resp: &Response) -> Option<Duration> {
    if resp.status() != StatusCode::TOO_MANY_REQUESTS {
        return None;
    }
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Turn a non-2xx response into an error, using the server's error body
/// when it has one.
pub async fn error_for_status(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    match serde_json::from_str::<Value>(&text) {
        Ok(v) if v["error"].is_string() => Err(anyhow!(
            "{} ({}): {}",
            v["error"].as_str().unwrap_or_default(),
            status.as_u16(),
            v["message"].as_str().unwrap_or_default()
        )),
        _ => Err(anyhow!("HTTP {}: {}", status.as_u16(), text)),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use nahcloud_api::{build_app, AppState};
    use nahcloud_chaos::{ChaosConfig, ChaosEngine};
    use nahcloud_store::InMemoryStore;

    async fn spawn_server(chaos: ChaosConfig, token: Option<&str>) -> String {
        let state = AppState::new(
            Arc::new(InMemoryStore::new()),
            ChaosEngine::new(chaos),
            token.map(str::to_string),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, build_app(state)).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn retryable_statuses() {
        assert!(should_retry(StatusCode::TOO_MANY_REQUESTS));
        assert!(should_retry(StatusCode::SERVICE_UNAVAILABLE));
        assert!(should_retry(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!should_retry(StatusCode::LOCKED));
        assert!(!should_retry(StatusCode::NOT_FOUND));
    }

    #[test]
    fn endpoint_encodes_segments_and_query() {
        let client = ApiClient::new("http://localhost:8080", None).unwrap();
        let url = client.endpoint(&["v1", "tfstate", "a b&c#d"], &[("ID", "x&y")]).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/v1/tfstate/a%20b&c%23d?ID=x%26y");

        let nested = ApiClient::new("http://proxy/nah/", None).unwrap();
        let url = nested.endpoint(&["buildz"], &[]).unwrap();
        assert_eq!(url.as_str(), "http://proxy/nah/buildz");
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(ApiClient::new("not a url", None).is_err());
        let client = ApiClient::new("mailto:ops@example.com", None).unwrap();
        assert!(client.endpoint(&["v1"], &[]).is_err());
    }

    #[tokio::test]
    async fn sends_bearer_token() {
        let url = spawn_server(ChaosConfig::default(), Some("secret")).await;

        let anonymous = ApiClient::new(&url, None).unwrap();
        let err = anonymous.get_json(&["v1", "projects"]).await.unwrap_err();
        assert!(err.to_string().contains("UNAUTHORIZED"), "{err}");

        let authed = ApiClient::new(&url, Some("secret".into())).unwrap();
        let projects = authed.get_json(&["v1", "projects"]).await.unwrap();
        assert_eq!(projects, serde_json::json!([]));
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let chaos = ChaosConfig {
            enabled: true,
            seed: 1,
            projects_error_rate: 1.0,
            ..Default::default()
        };
        let url = spawn_server(chaos, None).await;
        let client = ApiClient::new(&url, None)
            .unwrap()
            .with_retries(2, Duration::from_millis(1));

        let err = client.get_json(&["v1", "projects"]).await.unwrap_err();
        assert!(err.to_string().starts_with("HTTP "), "{err}");
    }

    #[tokio::test]
    async fn four_xx_is_not_retried() {
        let url = spawn_server(ChaosConfig::default(), None).await;
        let client = ApiClient::new(&url, None).unwrap();
        let url = client.endpoint(&["v1", "tfstate", "none"], &[]).unwrap();
        let resp = client.send(Method::GET, url, None).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
