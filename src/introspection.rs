//! Loading subgraph schemas, from disk or from the subgraphs themselves, and
//! keeping the registry current while the gateway runs.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::ErrorInfo;
use crate::config::{GatewayConfig, ServiceConfig};
use crate::error::ConfigError;
use crate::schema_registry::{SubgraphDescriptor, SubgraphRegistry};

/// Asks a federated subgraph for its own SDL.
pub const SERVICE_SDL_QUERY: &str = "query __GetServiceDefinition__ { _service { sdl } }";

#[derive(Deserialize)]
struct ServiceSdlResponse {
    data: Option<ServiceSdlData>,
    #[serde(default)]
    errors: Vec<ErrorInfo>,
}

#[derive(Deserialize)]
struct ServiceSdlData {
    #[serde(rename = "_service")]
    service: Option<ServiceSdl>,
}

#[derive(Deserialize)]
struct ServiceSdl {
    sdl: Option<String>,
}

/// Fetch the SDL of one subgraph. `headers` are the introspection headers,
/// which are never forwarded on query traffic.
pub async fn fetch_sdl(
    client: &reqwest::Client,
    service: &ServiceConfig,
    headers: &BTreeMap<String, String>,
) -> Result<String, ConfigError> {
    let failed = |reason: String| ConfigError::SchemaLoad {
        subgraph: service.name.clone(),
        reason,
    };

    let mut request = client
        .post(service.url.as_str())
        .header(CONTENT_TYPE, "application/json")
        .json(&json!({ "query": SERVICE_SDL_QUERY, "variables": {} }));
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    let response = request.send().await.map_err(|e| failed(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        return Err(failed(format!("introspection returned HTTP {status}")));
    }
    let body: ServiceSdlResponse = response.json().await.map_err(|e| failed(e.to_string()))?;

    if let Some(error) = body.errors.first() {
        return Err(failed(error.message.clone()));
    }
    body.data
        .and_then(|data| data.service)
        .and_then(|service| service.sdl)
        .ok_or_else(|| failed("response did not include _service.sdl".to_string()))
}

async fn load_sdl(
    config: &GatewayConfig,
    service: &ServiceConfig,
    client: &reqwest::Client,
) -> Result<String, ConfigError> {
    match config.schema_path(service) {
        Some(path) => {
            tracing::debug!(subgraph = %service.name, path = %path.display(), "reading schema file");
            tokio::fs::read_to_string(&path)
                .await
                .map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })
        }
        None => {
            tracing::debug!(subgraph = %service.name, url = %service.url, "introspecting subgraph");
            fetch_sdl(client, service, &config.introspection_headers).await
        }
    }
}

/// Build a descriptor for every configured subgraph, in configuration order.
pub async fn load_descriptors(
    config: &GatewayConfig,
    client: &reqwest::Client,
) -> Result<Vec<SubgraphDescriptor>, ConfigError> {
    let mut descriptors = Vec::with_capacity(config.service_list.len());
    for service in &config.service_list {
        let sdl = load_sdl(config, service, client).await?;
        let mut descriptor = SubgraphDescriptor::new(service.name.as_str(), &service.url, &sdl)?
            .with_headers(service.headers.clone());
        if let Some(owned_types) = &service.owned_types {
            descriptor = descriptor.with_owned_types(owned_types.iter().cloned());
        }
        descriptors.push(descriptor);
    }
    Ok(descriptors)
}

/// Reload every schema and swap the registry if anything changed. Returns
/// whether a new snapshot was installed.
pub async fn refresh(
    registry: &SubgraphRegistry,
    config: &GatewayConfig,
    client: &reqwest::Client,
) -> Result<bool, ConfigError> {
    let descriptors = load_descriptors(config, client).await?;
    let current = registry.all();
    let unchanged = current.len() == descriptors.len()
        && current
            .iter()
            .zip(&descriptors)
            .all(|(current, fresh)| **current == *fresh);
    if unchanged {
        return Ok(false);
    }
    registry.replace(descriptors)?;
    Ok(true)
}

/// Re-fetch schemas every `interval` until `cancel` fires. Failed refreshes
/// keep the current snapshot.
pub fn spawn_schema_polling(
    registry: Arc<SubgraphRegistry>,
    config: Arc<GatewayConfig>,
    client: reqwest::Client,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately; schemas were just loaded.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            match refresh(&registry, &config, &client).await {
                Ok(true) => tracing::info!("subgraph schemas changed, registry updated"),
                Ok(false) => tracing::trace!("subgraph schemas unchanged"),
                Err(error) => tracing::warn!(%error, "schema refresh failed, keeping current registry"),
            }
        }
        tracing::debug!("schema polling stopped");
    })
}
