pub mod config;
pub mod dispatcher;
pub mod error;
pub mod federation_gateway;
pub mod introspection;
pub mod json_path;
pub mod query_plan;
pub mod query_planner;
pub mod result_merger;
pub mod retry;
pub mod schema_registry;
pub mod subgraph_client;
pub mod subgraph_schema;

pub use config::GatewayConfig;
pub use dispatcher::{Dispatcher, QueryExecutor};
pub use error::{ConfigError, DispatchError, FetchError, GatewayError, PlanError, RegistryError};
pub use federation_gateway::FederationGateway;
pub use query_plan::QueryPlan;
pub use query_planner::{FederatedQueryPlanner, QueryPlanner};
pub use result_merger::MergedResponse;
pub use schema_registry::{SubgraphDescriptor, SubgraphRegistry};
pub use subgraph_client::{HttpSubgraphClient, SubgraphClient};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::json_path::ResponsePath;

/// An incoming GraphQL request, as posted by clients.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphQLRequest {
    pub query: String,
    #[serde(default)]
    pub variables: Option<Value>,
    #[serde(default)]
    pub operation_name: Option<String>,
}

impl GraphQLRequest {
    pub fn new(query: impl Into<String>) -> Self {
        GraphQLRequest {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    pub fn with_variables(mut self, variables: Value) -> Self {
        self.variables = Some(variables);
        self
    }

    pub fn with_operation_name(mut self, operation_name: impl Into<String>) -> Self {
        self.operation_name = Some(operation_name.into());
        self
    }
}

/// A GraphQL error entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<ResponsePath>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        ErrorInfo {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Set an extension entry unless the error already carries one.
    pub fn with_extension(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.extensions
            .get_or_insert_with(Map::new)
            .entry(key)
            .or_insert_with(|| value.into());
        self
    }
}
