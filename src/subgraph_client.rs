use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ErrorInfo;
use crate::error::FetchError;
use crate::schema_registry::SubgraphDescriptor;

/// Body posted to a subgraph.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SubgraphRequest {
    pub query: String,
    pub variables: Map<String, Value>,
}

/// A subgraph's GraphQL response. Either part may be missing.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct SubgraphResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<ErrorInfo>,
}

#[async_trait]
pub trait SubgraphClient {
    async fn fetch(
        &self,
        subgraph: &SubgraphDescriptor,
        request: SubgraphRequest,
    ) -> Result<SubgraphResponse, FetchError>;
}

/// Posts GraphQL-over-HTTP requests to the subgraph endpoint.
#[derive(Clone, Debug, Default)]
pub struct HttpSubgraphClient {
    client: reqwest::Client,
}

impl HttpSubgraphClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        HttpSubgraphClient { client }
    }
}

#[async_trait]
impl SubgraphClient for HttpSubgraphClient {
    async fn fetch(
        &self,
        subgraph: &SubgraphDescriptor,
        request: SubgraphRequest,
    ) -> Result<SubgraphResponse, FetchError> {
        let service = subgraph.name();
        let transport = |reason: String, status: Option<u16>| FetchError::Transport {
            service: service.to_string(),
            reason,
            status,
        };

        let mut builder = self
            .client
            .post(subgraph.endpoint().clone())
            .header(CONTENT_TYPE, "application/json")
            .json(&request);
        for (name, value) in subgraph.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        tracing::trace!(service, query = %request.query, "sending subgraph request");
        let response = builder
            .send()
            .await
            .map_err(|e| transport(e.to_string(), None))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| transport(e.to_string(), Some(status.as_u16())))?;

        if !status.is_success() {
            // An error status with an `errors` body is still a GraphQL response.
            return match serde_json::from_slice::<SubgraphResponse>(&body) {
                Ok(graphql) if !graphql.errors.is_empty() => {
                    tracing::debug!(service, %status, errors = graphql.errors.len(), "subgraph rejected request");
                    Ok(graphql)
                }
                _ => Err(transport(format!("subgraph returned HTTP {status}"), Some(status.as_u16()))),
            };
        }

        serde_json::from_slice(&body).map_err(|e| FetchError::MalformedResponse {
            service: service.to_string(),
            reason: e.to_string(),
        })
    }
}
