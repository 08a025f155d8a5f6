//! Error types for the dispatcher.
//!
//! Registry and plan errors abort a request before any subgraph is contacted.
//! Fetch errors are local to a single plan node and end up in the `errors`
//! array of the merged response.

use std::path::PathBuf;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::ErrorInfo;

/// Errors raised while registering or resolving subgraphs.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a subgraph named '{0}' is already registered")]
    DuplicateName(String),

    #[error("unknown subgraph '{0}'")]
    UnknownSubgraph(String),

    #[error("invalid schema for subgraph '{subgraph}': {reason}")]
    InvalidSchema { subgraph: String, reason: String },

    #[error("invalid endpoint '{url}' for subgraph '{subgraph}': {reason}")]
    InvalidEndpoint {
        subgraph: String,
        url: String,
        reason: String,
    },
}

/// Errors raised while turning a query into a plan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("failed to parse query: {0}")]
    Parse(String),

    #[error("unknown operation named '{0}'")]
    UnknownOperation(String),

    #[error("operation name is required when the document holds several operations")]
    OperationNameRequired,

    #[error("query cannot be planned: {0}")]
    Unplannable(String),

    #[error("type '{type_name}' is claimed by several subgraphs ({}) and no precedence is configured", subgraphs.join(", "))]
    AmbiguousOwnership {
        type_name: String,
        subgraphs: Vec<String>,
    },

    #[error("invalid query plan: {0}")]
    InvalidPlan(String),
}

/// Errors raised by a single subgraph fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Note that this relates to a transport error and not a GraphQL error.
    #[error("HTTP fetch failed from '{service}': {reason}")]
    Transport {
        service: String,
        reason: String,
        status: Option<u16>,
    },

    #[error("request to subgraph '{service}' timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("subgraph '{service}' response was malformed: {reason}")]
    MalformedResponse { service: String, reason: String },

    #[error("subgraph '{0}' is no longer registered")]
    UnknownSubgraph(String),
}

impl FetchError {
    pub fn service(&self) -> &str {
        match self {
            FetchError::Transport { service, .. }
            | FetchError::Timeout { service, .. }
            | FetchError::MalformedResponse { service, .. }
            | FetchError::UnknownSubgraph(service) => service,
        }
    }

    pub fn extension_code(&self) -> &'static str {
        match self {
            FetchError::Transport { .. } => "SUBREQUEST_HTTP_ERROR",
            FetchError::Timeout { .. } => "SUBREQUEST_TIMEOUT",
            FetchError::MalformedResponse { .. } => "SUBREQUEST_MALFORMED_RESPONSE",
            FetchError::UnknownSubgraph(_) => "UNKNOWN_SUBGRAPH",
        }
    }

    /// Only transport failures and timeouts are worth another attempt. Client
    /// errors repeat on retry, except 408 and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Transport {
                status: Some(status),
                ..
            } => !(400..500).contains(status) || matches!(*status, 408 | 429),
            FetchError::Transport { .. } | FetchError::Timeout { .. } => true,
            FetchError::MalformedResponse { .. } | FetchError::UnknownSubgraph(_) => false,
        }
    }

    /// Convert the fetch error to a GraphQL error entry.
    pub fn to_error_info(&self) -> ErrorInfo {
        let mut extensions = Map::new();
        extensions.insert("code".to_string(), Value::from(self.extension_code()));
        extensions.insert("service".to_string(), Value::from(self.service()));
        if let FetchError::Transport {
            status: Some(status),
            ..
        } = self
        {
            extensions.insert("http".to_string(), serde_json::json!({ "status": status }));
        }

        ErrorInfo {
            message: self.to_string(),
            path: None,
            extensions: Some(extensions),
        }
    }
}

/// Errors that abort a whole plan execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("request was cancelled")]
    Cancelled,

    #[error(transparent)]
    InvalidPlan(#[from] PlanError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("failed to load schema for subgraph '{subgraph}': {reason}")]
    SchemaLoad { subgraph: String, reason: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Errors surfaced to the caller of the gateway entry point.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Plan(#[from] PlanError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error("request timed out after {0}ms")]
    RequestTimeout(u64),
}

impl GatewayError {
    /// Plan failures are the caller's fault; everything else is ours.
    pub fn is_client_error(&self) -> bool {
        matches!(self, GatewayError::Plan(_))
    }

    pub fn extension_code(&self) -> &'static str {
        match self {
            GatewayError::Plan(PlanError::Parse(_)) => "GRAPHQL_PARSE_FAILED",
            GatewayError::Plan(PlanError::AmbiguousOwnership { .. }) => "AMBIGUOUS_OWNERSHIP",
            GatewayError::Plan(_) => "QUERY_PLANNING_FAILED",
            GatewayError::Dispatch(DispatchError::Cancelled) => "REQUEST_CANCELLED",
            GatewayError::Dispatch(DispatchError::InvalidPlan(_)) => "QUERY_PLANNING_FAILED",
            GatewayError::RequestTimeout(_) => "REQUEST_TIMEOUT",
        }
    }

    pub fn to_error_info(&self) -> ErrorInfo {
        let mut extensions = Map::new();
        extensions.insert("code".to_string(), Value::from(self.extension_code()));
        ErrorInfo {
            message: self.to_string(),
            path: None,
            extensions: Some(extensions),
        }
    }
}
