//! Executes a query plan against the subgraphs.
//!
//! Nodes run layer by layer: every node of a layer is fetched concurrently and
//! the next layer starts once the whole layer has produced results. A failed
//! node never aborts the request; nodes depending on it are skipped instead.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::ErrorInfo;
use crate::error::{DispatchError, FetchError, PlanError};
use crate::json_path::{PathElement, ResponsePath, visit_objects};
use crate::query_plan::{EntityLookup, FetchKind, NodeId, QueryPlan, QueryPlanNode, RenderedFetch};
use crate::retry::RetryPolicy;
use crate::schema_registry::SubgraphRegistry;
use crate::subgraph_client::{SubgraphClient, SubgraphRequest, SubgraphResponse};

const DEFAULT_NODE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeStatus {
    Completed,
    Failed,
    /// Not sent because a dependency did not complete.
    Skipped,
}

/// What one plan node produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialResult {
    pub node_id: NodeId,
    pub status: NodeStatus,
    pub data: Option<Value>,
    pub errors: Vec<ErrorInfo>,
    /// Entity nodes only: the absolute path of every entity this node
    /// resolved, mapped to the response key holding it in `data`.
    pub bindings: BTreeMap<ResponsePath, String>,
}

impl PartialResult {
    pub fn completed(node_id: NodeId, data: Option<Value>, errors: Vec<ErrorInfo>) -> Self {
        PartialResult {
            node_id,
            status: NodeStatus::Completed,
            data,
            errors,
            bindings: BTreeMap::new(),
        }
    }

    pub fn failed(node_id: NodeId, error: ErrorInfo) -> Self {
        PartialResult {
            node_id,
            status: NodeStatus::Failed,
            data: None,
            errors: vec![error],
            bindings: BTreeMap::new(),
        }
    }

    pub fn skipped(node_id: NodeId, error: ErrorInfo) -> Self {
        PartialResult {
            status: NodeStatus::Skipped,
            ..Self::failed(node_id, error)
        }
    }

    pub fn with_bindings(mut self, bindings: BTreeMap<ResponsePath, String>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn is_completed(&self) -> bool {
        self.status == NodeStatus::Completed
    }
}

#[async_trait]
pub trait QueryExecutor {
    /// Run every node of `plan`, returning one result per node.
    async fn execute_plan(
        &self,
        plan: &QueryPlan,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<NodeId, PartialResult>, DispatchError>;
}

pub struct Dispatcher {
    registry: Arc<SubgraphRegistry>,
    client: Arc<dyn SubgraphClient + Send + Sync>,
    retry: RetryPolicy,
    node_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<SubgraphRegistry>, client: Arc<dyn SubgraphClient + Send + Sync>) -> Self {
        Dispatcher {
            registry,
            client,
            retry: RetryPolicy::None,
            node_timeout: DEFAULT_NODE_TIMEOUT,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_node_timeout(mut self, node_timeout: Duration) -> Self {
        self.node_timeout = node_timeout;
        self
    }

    async fn execute_node(
        &self,
        plan: &QueryPlan,
        node: &QueryPlanNode,
        finished: &BTreeMap<NodeId, PartialResult>,
    ) -> PartialResult {
        let unavailable = node.depends_on.iter().find(|dependency| {
            finished
                .get(*dependency)
                .is_none_or(|result| !result.is_completed())
        });
        if let Some(dependency) = unavailable {
            tracing::debug!(node = %node.id, %dependency, "skipping node with unavailable dependency");
            let error = ErrorInfo::new(format!(
                "request to subgraph '{}' was skipped because node {dependency} did not complete",
                node.subgraph_name
            ))
            .with_extension("code", "DEPENDENCY_FAILED")
            .with_extension("service", node.subgraph_name.as_str());
            return PartialResult::skipped(node.id, error);
        }

        let (rendered, sites) = match &node.kind {
            FetchKind::Root { .. } => (plan.render_root(node), Vec::new()),
            FetchKind::Entity { parent, lookup } => {
                let (keys, sites) = match (plan.node(*parent), finished.get(parent)) {
                    (Some(parent_node), Some(parent_result)) => {
                        collect_keys(node, lookup, parent_node, parent_result)
                    }
                    _ => (Vec::new(), Vec::new()),
                };
                if keys.is_empty() {
                    tracing::debug!(node = %node.id, "no entities to resolve");
                    return PartialResult::completed(node.id, None, Vec::new());
                }
                (plan.render_entities(node, lookup, &keys), sites)
            }
        };
        let bindings: BTreeMap<ResponsePath, String> = sites
            .into_iter()
            .filter_map(|(path, index)| rendered.aliases.get(index).map(|alias| (path, alias.clone())))
            .collect();

        match self.fetch(node, rendered).await {
            Ok(response) => {
                let errors = response_errors(node, response.errors, &bindings);
                PartialResult::completed(node.id, response.data, errors).with_bindings(bindings)
            }
            Err(error) => {
                tracing::warn!(node = %node.id, service = error.service(), %error, "subgraph fetch failed");
                PartialResult::failed(node.id, error.to_error_info()).with_bindings(bindings)
            }
        }
    }

    async fn fetch(&self, node: &QueryPlanNode, rendered: RenderedFetch) -> Result<SubgraphResponse, FetchError> {
        let subgraph = self
            .registry
            .resolve(&node.subgraph_name)
            .map_err(|_| FetchError::UnknownSubgraph(node.subgraph_name.clone()))?;
        let request = SubgraphRequest {
            query: rendered.query,
            variables: rendered.variables,
        };

        let client = &self.client;
        let subgraph = &subgraph;
        let request = &request;
        let service = node.subgraph_name.as_str();
        let timeout = self.node_timeout;
        self.retry
            .run(move || async move {
                match tokio::time::timeout(timeout, client.fetch(subgraph, request.clone())).await {
                    Ok(result) => result,
                    Err(_) => Err(FetchError::Timeout {
                        service: service.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    }),
                }
            })
            .await
    }
}

#[async_trait]
impl QueryExecutor for Dispatcher {
    async fn execute_plan(
        &self,
        plan: &QueryPlan,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<NodeId, PartialResult>, DispatchError> {
        let layers = plan.layers()?;
        let mut finished = BTreeMap::new();

        for (depth, layer) in layers.iter().enumerate() {
            let nodes = layer
                .iter()
                .map(|id| {
                    plan.node(*id)
                        .ok_or_else(|| PlanError::InvalidPlan(format!("node {id} is out of place")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            tracing::debug!(depth, nodes = nodes.len(), "executing plan layer");

            let results = {
                let executions = join_all(nodes.into_iter().map(|node| {
                    let span = tracing::info_span!(
                        "fetch_node",
                        node = %node.id,
                        service = node.subgraph_name.as_str()
                    );
                    self.execute_node(plan, node, &finished).instrument(span)
                }));
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::info!(depth, "request cancelled, dropping outstanding fetches");
                        return Err(DispatchError::Cancelled);
                    }
                    results = executions => results,
                }
            };
            for result in results {
                finished.insert(result.node_id, result);
            }
        }

        Ok(finished)
    }
}

/// Gather the entity keys an entity node needs from its parent's result, with
/// the absolute path of every entity and the index of its key.
fn collect_keys(
    node: &QueryPlanNode,
    lookup: &EntityLookup,
    parent: &QueryPlanNode,
    parent_result: &PartialResult,
) -> (Vec<Value>, Vec<(ResponsePath, usize)>) {
    let Some(data) = &parent_result.data else {
        return (Vec::new(), Vec::new());
    };
    let relative = node.output_path.get(parent.output_path.len()..).unwrap_or_default();

    let anchors: Vec<(ResponsePath, &Value)> = if parent.is_root() {
        vec![(ResponsePath::empty(), data)]
    } else {
        parent_result
            .bindings
            .iter()
            .filter_map(|(path, alias)| data.get(alias).map(|value| (path.clone(), value)))
            .collect()
    };

    let mut keys: Vec<Value> = Vec::new();
    let mut sites = Vec::new();
    for (path, value) in anchors {
        visit_objects(value, &path, relative, &mut |site, object| {
            let Some(key) = object.get(&lookup.key_field).filter(|key| !key.is_null()) else {
                return;
            };
            let index = match keys.iter().position(|known| known == key) {
                Some(index) => index,
                None => {
                    keys.push(key.clone());
                    keys.len() - 1
                }
            };
            sites.push((site, index));
        });
    }
    (keys, sites)
}

/// Tag subgraph errors with the service and, for entity fetches, move their
/// paths from the batched lookup into the merged response. A lookup shared by
/// several sites reports its errors once per site.
fn response_errors(
    node: &QueryPlanNode,
    errors: Vec<ErrorInfo>,
    bindings: &BTreeMap<ResponsePath, String>,
) -> Vec<ErrorInfo> {
    let mut rewritten = Vec::with_capacity(errors.len());
    for error in errors {
        let error = error.with_extension("service", node.subgraph_name.as_str());
        let target = match (node.is_root(), error.path.as_ref().map(ResponsePath::elements)) {
            (false, Some([PathElement::Key(alias), rest @ ..])) => Some((alias.clone(), rest.to_vec())),
            _ => None,
        };
        let Some((alias, rest)) = target else {
            rewritten.push(error);
            continue;
        };

        let sites: Vec<&ResponsePath> = bindings
            .iter()
            .filter(|(_, bound)| **bound == alias)
            .map(|(site, _)| site)
            .collect();
        if sites.is_empty() {
            rewritten.push(error);
            continue;
        }
        for site in sites {
            let mut path = site.clone();
            path.extend(&rest);
            rewritten.push(ErrorInfo {
                path: Some(path),
                ..error.clone()
            });
        }
    }
    rewritten
}
