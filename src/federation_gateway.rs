use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::GraphQLRequest;
use crate::config::GatewayConfig;
use crate::dispatcher::{Dispatcher, QueryExecutor};
use crate::error::{ConfigError, GatewayError};
use crate::introspection;
use crate::query_planner::{FederatedQueryPlanner, QueryPlanner, unknown_precedence_targets};
use crate::result_merger::{self, MergedResponse};
use crate::schema_registry::SubgraphRegistry;
use crate::subgraph_client::HttpSubgraphClient;

/// Entry point for a request: plan against the current registry snapshot,
/// dispatch, then merge.
pub struct FederationGateway {
    registry: Arc<SubgraphRegistry>,
    query_planner: Box<dyn QueryPlanner + Send + Sync>,
    query_executor: Box<dyn QueryExecutor + Send + Sync>,
    request_timeout: Option<Duration>,
}

impl FederationGateway {
    pub fn new(
        registry: Arc<SubgraphRegistry>,
        query_planner: Box<dyn QueryPlanner + Send + Sync>,
        query_executor: Box<dyn QueryExecutor + Send + Sync>,
    ) -> Self {
        FederationGateway {
            registry,
            query_planner,
            query_executor,
            request_timeout: None,
        }
    }

    pub fn with_request_timeout(mut self, request_timeout: Option<Duration>) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    /// Load every subgraph schema named in `config` and wire the HTTP stack.
    pub async fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let client = reqwest::Client::new();
        let descriptors = introspection::load_descriptors(config, &client).await?;
        let registry = Arc::new(SubgraphRegistry::with_subgraphs(descriptors)?);

        for (coordinate, subgraph) in unknown_precedence_targets(&config.ownership, &registry.snapshot()) {
            tracing::warn!(%coordinate, %subgraph, "ownership precedence names an unknown subgraph");
        }

        let dispatcher = Dispatcher::new(
            Arc::clone(&registry),
            Arc::new(HttpSubgraphClient::with_client(client)),
        )
        .with_retry(config.retry.clone())
        .with_node_timeout(config.node_timeout());

        tracing::info!(
            subgraphs = registry.all().len(),
            node_timeout_ms = config.node_timeout_ms,
            "gateway ready"
        );
        Ok(Self::new(
            registry,
            Box::new(FederatedQueryPlanner::new(config.ownership.clone())),
            Box::new(dispatcher),
        )
        .with_request_timeout(config.request_timeout()))
    }

    pub fn registry(&self) -> &Arc<SubgraphRegistry> {
        &self.registry
    }

    pub async fn handle_request(&self, request: GraphQLRequest) -> Result<MergedResponse, GatewayError> {
        self.handle_request_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Like [`handle_request`](Self::handle_request), giving up with no
    /// response once `cancel` fires.
    pub async fn handle_request_with_cancellation(
        &self,
        request: GraphQLRequest,
        cancel: CancellationToken,
    ) -> Result<MergedResponse, GatewayError> {
        tracing::debug!(operation_name = ?request.operation_name, "processing request");

        let snapshot = self.registry.snapshot();
        let plan = self
            .query_planner
            .plan_query(&request, &snapshot)
            .await
            .inspect_err(|error| tracing::debug!(%error, "query planning failed"))?;
        drop(snapshot);

        let execution = async {
            let partials = self.query_executor.execute_plan(&plan, &cancel).await?;
            Ok::<_, GatewayError>(result_merger::merge(&plan, &partials))
        };

        match self.request_timeout {
            None => execution.await,
            Some(timeout) => match tokio::time::timeout(timeout, execution).await {
                Ok(result) => result,
                Err(_) => {
                    cancel.cancel();
                    tracing::warn!(timeout_ms = timeout.as_millis() as u64, "request timed out");
                    Err(GatewayError::RequestTimeout(timeout.as_millis() as u64))
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::PartialResult;
    use crate::error::{DispatchError, PlanError};
    use crate::query_plan::{NodeId, QueryPlan};
    use crate::schema_registry::SubgraphDescriptor;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers every root node with `{ "hello": "hello user" }`.
    #[derive(Default)]
    struct CountingExecutor {
        calls: Arc<AtomicUsize>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl QueryExecutor for CountingExecutor {
        async fn execute_plan(
            &self,
            plan: &QueryPlan,
            _cancel: &CancellationToken,
        ) -> Result<BTreeMap<NodeId, PartialResult>, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(plan
                .nodes
                .iter()
                .map(|node| {
                    let data = Some(json!({ "hello": "hello user" }));
                    (node.id, PartialResult::completed(node.id, data, Vec::new()))
                })
                .collect())
        }
    }

    fn gateway(executor: CountingExecutor) -> FederationGateway {
        let registry = SubgraphRegistry::with_subgraphs(vec![
            SubgraphDescriptor::new(
                "App 1",
                "http://127.0.0.1:8900/graphql",
                r#"type Query { hello: String }"#,
            )
            .unwrap(),
        ])
        .unwrap();
        FederationGateway::new(
            Arc::new(registry),
            Box::new(FederatedQueryPlanner::default()),
            Box::new(executor),
        )
    }

    #[tokio::test]
    async fn plans_dispatches_and_merges() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gateway = gateway(CountingExecutor {
            calls: calls.clone(),
            delay: None,
        });

        let response = gateway
            .handle_request(GraphQLRequest::new("{ hello __typename }"))
            .await
            .unwrap();
        assert_eq!(
            serde_json::to_value(&response).unwrap(),
            json!({ "data": { "hello": "hello user", "__typename": "Query" }, "errors": [] })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn plan_errors_abort_before_dispatch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gateway = gateway(CountingExecutor {
            calls: calls.clone(),
            delay: None,
        });

        let err = gateway
            .handle_request(GraphQLRequest::new("{ products { id } }"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Plan(PlanError::Unplannable(_))));
        assert!(err.is_client_error());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_returns_no_partial_response() {
        let gateway = gateway(CountingExecutor {
            calls: Arc::default(),
            delay: Some(Duration::from_secs(10)),
        })
        .with_request_timeout(Some(Duration::from_millis(50)));

        let err = gateway
            .handle_request(GraphQLRequest::new("{ hello }"))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::RequestTimeout(50)));
    }
}
