use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use nahcloud_api::AppState;
use nahcloud_chaos::ChaosEngine;
use nahcloud_config::StorageConfig;
use nahcloud_domain::TfStateLock;
use nahcloud_store::{InMemoryStore, SqliteStore, Store};
use reqwest::{Method, StatusCode, Url};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::ServeArgs;
use crate::client::{error_for_status, ApiClient};

// ── Serve ─────────────────────────────────────────────────────────────────────

pub async fn serve(args: ServeArgs, token: Option<String>) -> Result<()> {
    let overrides = args.overrides(token);
    let config = nahcloud_config::load(args.config.as_deref(), overrides)
        .context("Failed to load configuration")?;

    let (store, store_desc): (Arc<dyn Store>, String) = match &config.storage {
        StorageConfig::Memory => (Arc::new(InMemoryStore::new()), "in-memory".into()),
        StorageConfig::Sqlite(path) => {
            let store = SqliteStore::open(path)
                .await
                .with_context(|| format!("Failed to open SQLite store at {}", path.display()))?;
            (Arc::new(store), format!("sqlite:{}", path.display()))
        }
    };

    let chaos = ChaosEngine::new(config.chaos.clone());
    info!(
        addr = %config.addr,
        store = %store_desc,
        chaos = chaos.is_enabled(),
        seed = chaos.seed(),
        "starting nahcloud"
    );
    if config.token.is_none() {
        warn!("no API token configured; /v1 is open to anyone");
    }

    let shutdown = CancellationToken::new();
    let state = AppState::new(store, chaos, config.token.clone())
        .with_request_timeout(config.request_timeout)
        .with_shutdown(shutdown.clone());
    let app = nahcloud_api::build_app(state);

    let listener = tokio::net::TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.addr))?;
    println!("Listening on http://{}", config.addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("Server error")?;

    info!("server stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM and cancels in-flight chaos sleeps.
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
    token.cancel();
}

// ── Status ────────────────────────────────────────────────────────────────────

pub async fn status(client: &ApiClient) -> Result<()> {
    let body = client.get_json(&["buildz"]).await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

// ── State ─────────────────────────────────────────────────────────────────────

/// `/v1/tfstate/<id>`, with `?ID=<lock_id>` when a lock ID is given.
fn state_url(client: &ApiClient, id: &str, lock_id: Option<&str>) -> Result<Url> {
    let query: Vec<(&str, &str)> = lock_id.map(|l| ("ID", l)).into_iter().collect();
    client.endpoint(&["v1", "tfstate", id], &query)
}

pub async fn state_pull(client: &ApiClient, id: &str) -> Result<()> {
    let resp = client.send(Method::GET, state_url(client, id, None)?, None).await?;
    let resp = error_for_status(resp).await?;
    println!("{}", resp.text().await?);
    Ok(())
}

pub async fn state_push(
    client: &ApiClient,
    id: &str,
    file: &Path,
    lock_id: Option<&str>,
) -> Result<()> {
    let body = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let url = state_url(client, id, lock_id)?;
    let resp = client.send(Method::POST, url, Some(&body)).await?;
    if resp.status() == StatusCode::LOCKED {
        anyhow::bail!("state '{id}' is locked: {}", resp.text().await?);
    }
    error_for_status(resp).await?;
    println!("Pushed state '{id}'");
    Ok(())
}

pub async fn state_lock(client: &ApiClient, id: &str, lock_id: Option<String>) -> Result<()> {
    let lock = TfStateLock {
        id: lock_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        operation: Some("OperationTypeInvalid".into()),
        info: Some("locked via nahcloud CLI".into()),
        who: std::env::var("USER").ok(),
        version: Some(env!("CARGO_PKG_VERSION").into()),
        created: Some(Utc::now()),
        path: Some(id.to_string()),
    };
    let body = serde_json::to_string(&lock)?;
    let method = Method::from_bytes(b"LOCK")?;
    let resp = client.send(method, state_url(client, id, None)?, Some(&body)).await?;
    if resp.status() == StatusCode::LOCKED {
        anyhow::bail!("state '{id}' is already locked: {}", resp.text().await?);
    }
    error_for_status(resp).await?;
    println!("{}", lock.id);
    Ok(())
}

pub async fn state_unlock(client: &ApiClient, id: &str, lock_id: &str) -> Result<()> {
    let method = Method::from_bytes(b"UNLOCK")?;
    let url = state_url(client, id, Some(lock_id))?;
    let resp = client.send(method, url, None).await?;
    if resp.status() == StatusCode::CONFLICT {
        anyhow::bail!("lock on '{id}' is held by someone else: {}", resp.text().await?);
    }
    error_for_status(resp).await?;
    println!("Unlocked state '{id}'");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_url_appends_lock_id() {
        let client = ApiClient::new("http://localhost:8080", None).unwrap();
        assert_eq!(
            state_url(&client, "a", Some("L1")).unwrap().as_str(),
            "http://localhost:8080/v1/tfstate/a?ID=L1"
        );
        assert_eq!(
            state_url(&client, "a", None).unwrap().as_str(),
            "http://localhost:8080/v1/tfstate/a"
        );
        assert_eq!(
            state_url(&client, "env/prod", Some("a b")).unwrap().as_str(),
            "http://localhost:8080/v1/tfstate/env%2Fprod?ID=a+b"
        );
    }
}
