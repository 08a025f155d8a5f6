//! Query plans: a DAG of subgraph fetches plus the response shape the merger
//! rebuilds from their results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Write};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PlanError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// GraphQL operation type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    #[default]
    Query,
    Mutation,
}

impl OperationKind {
    pub const fn keyword(&self) -> &'static str {
        match self {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
        }
    }

    pub const fn default_type_name(&self) -> &'static str {
        match self {
            OperationKind::Query => "Query",
            OperationKind::Mutation => "Mutation",
        }
    }
}

/// A field selection forwarded to a subgraph. Argument values are kept in
/// their GraphQL spelling.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub alias: Option<String>,
    pub name: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub arguments: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub selections: Vec<Selection>,
}

impl Selection {
    pub fn leaf(name: impl Into<String>) -> Self {
        Selection {
            alias: None,
            name: name.into(),
            arguments: Vec::new(),
            selections: Vec::new(),
        }
    }

    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    fn render(&self, out: &mut String) {
        if let Some(alias) = &self.alias {
            let _ = write!(out, "{alias}: ");
        }
        out.push_str(&self.name);
        if !self.arguments.is_empty() {
            out.push('(');
            for (index, (name, value)) in self.arguments.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "{name}: {value}");
            }
            out.push(')');
        }
        if !self.selections.is_empty() {
            out.push(' ');
            render_selection_set(&self.selections, out);
        }
    }
}

fn render_selection_set(selections: &[Selection], out: &mut String) {
    out.push_str("{ ");
    for selection in selections {
        selection.render(out);
        out.push(' ');
    }
    out.push('}');
}

/// How the dispatcher reaches the owning subgraph of an entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityLookup {
    pub type_name: String,
    pub key_field: String,
    /// Root query field of the owning subgraph, e.g. `user`.
    pub field: String,
    /// Argument of `field` that receives the key, e.g. `id`.
    pub argument: String,
    /// GraphQL type of that argument, e.g. `ID!`.
    pub argument_type: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum FetchKind {
    /// Selections at the operation root.
    Root { operation: OperationKind },
    /// Selections on entities produced by `parent`.
    Entity { parent: NodeId, lookup: EntityLookup },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlanNode {
    pub id: NodeId,
    pub subgraph_name: String,
    pub kind: FetchKind,
    pub selections: Vec<Selection>,
    /// Operation variables referenced by `selections`.
    pub variables: BTreeSet<String>,
    pub depends_on: BTreeSet<NodeId>,
    /// Response keys from the root to the objects this node resolves fields on.
    pub output_path: Vec<String>,
}

impl QueryPlanNode {
    pub fn is_root(&self) -> bool {
        matches!(self.kind, FetchKind::Root { .. })
    }
}

/// The original query's shape, annotated with the node that supplies each value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ShapeField {
    Field {
        response_key: String,
        owner: NodeId,
        children: Vec<ShapeField>,
    },
    Typename {
        response_key: String,
        value: String,
    },
}

impl ShapeField {
    pub fn response_key(&self) -> &str {
        match self {
            ShapeField::Field { response_key, .. } | ShapeField::Typename { response_key, .. } => {
                response_key
            }
        }
    }
}

/// A rendered subgraph call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderedFetch {
    pub query: String,
    pub variables: Map<String, Value>,
    /// Response key under which each key's entity comes back, in key order.
    pub aliases: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlan {
    pub operation: OperationKind,
    pub nodes: Vec<QueryPlanNode>,
    pub shape: Vec<ShapeField>,
    /// Variable definitions of the operation in GraphQL spelling, by name.
    #[serde(skip)]
    pub variable_definitions: BTreeMap<String, String>,
    #[serde(skip)]
    pub variables: Map<String, Value>,
}

impl QueryPlan {
    pub fn node(&self, id: NodeId) -> Option<&QueryPlanNode> {
        self.nodes.get(id.0).filter(|node| node.id == id)
    }

    /// Group nodes into topological layers: every node's dependencies sit in an
    /// earlier layer. Fails on unknown dependencies and cycles.
    pub fn layers(&self) -> Result<Vec<Vec<NodeId>>, PlanError> {
        for node in &self.nodes {
            if let Some(missing) = node.depends_on.iter().find(|dep| self.node(**dep).is_none()) {
                return Err(PlanError::InvalidPlan(format!(
                    "node {} depends on unknown node {}",
                    node.id, missing
                )));
            }
        }

        let mut done = BTreeSet::new();
        let mut layers = Vec::new();
        while done.len() < self.nodes.len() {
            let layer: Vec<NodeId> = self
                .nodes
                .iter()
                .filter(|node| !done.contains(&node.id))
                .filter(|node| node.depends_on.iter().all(|dep| done.contains(dep)))
                .map(|node| node.id)
                .collect();
            if layer.is_empty() {
                return Err(PlanError::InvalidPlan("dependency cycle between nodes".to_string()));
            }
            done.extend(layer.iter().copied());
            layers.push(layer);
        }
        Ok(layers)
    }

    /// The query and variables a root node sends.
    pub fn render_root(&self, node: &QueryPlanNode) -> RenderedFetch {
        let operation = match node.kind {
            FetchKind::Root { operation } => operation,
            FetchKind::Entity { .. } => OperationKind::Query,
        };
        let mut query = String::from(operation.keyword());
        let definitions = self.definitions_for(node, Vec::new());
        render_definitions(&definitions, &mut query);
        query.push(' ');
        render_selection_set(&node.selections, &mut query);

        RenderedFetch {
            query,
            variables: self.values_for(node),
            aliases: Vec::new(),
        }
    }

    /// The batched lookup an entity node sends for `keys`. One key is fetched
    /// through the bare lookup field; several are aliased `_0`, `_1`, ...
    pub fn render_entities(&self, node: &QueryPlanNode, lookup: &EntityLookup, keys: &[Value]) -> RenderedFetch {
        let prefix = self.key_variable_prefix();
        let key_variables: Vec<String> = (0..keys.len()).map(|i| format!("{prefix}{i}")).collect();
        let extra = key_variables
            .iter()
            .map(|name| format!("${name}: {}", lookup.argument_type))
            .collect();

        let mut query = String::from("query");
        render_definitions(&self.definitions_for(node, extra), &mut query);
        query.push_str(" { ");

        let mut aliases = Vec::with_capacity(keys.len());
        for (index, variable) in key_variables.iter().enumerate() {
            let alias = if keys.len() == 1 {
                None
            } else {
                Some(format!("_{index}"))
            };
            let selection = Selection {
                alias: alias.clone(),
                name: lookup.field.clone(),
                arguments: vec![(lookup.argument.clone(), format!("${variable}"))],
                selections: node.selections.clone(),
            };
            selection.render(&mut query);
            query.push(' ');
            aliases.push(alias.unwrap_or_else(|| lookup.field.clone()));
        }
        query.push('}');

        let mut variables = self.values_for(node);
        for (name, key) in key_variables.into_iter().zip(keys) {
            variables.insert(name, key.clone());
        }

        RenderedFetch {
            query,
            variables,
            aliases,
        }
    }

    /// `_k`, or `__k`, `___k`, ... when the operation already declares a
    /// variable of the form `<prefix><digits>`.
    fn key_variable_prefix(&self) -> String {
        let mut prefix = String::from("_k");
        while self.variable_definitions.keys().any(|name| {
            name.strip_prefix(prefix.as_str())
                .is_some_and(|rest| !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()))
        }) {
            prefix.insert(0, '_');
        }
        prefix
    }

    fn definitions_for(&self, node: &QueryPlanNode, mut extra: Vec<String>) -> Vec<String> {
        let mut definitions: Vec<String> = node
            .variables
            .iter()
            .filter_map(|name| self.variable_definitions.get(name).cloned())
            .collect();
        definitions.append(&mut extra);
        definitions
    }

    fn values_for(&self, node: &QueryPlanNode) -> Map<String, Value> {
        node.variables
            .iter()
            .filter_map(|name| {
                self.variables
                    .get(name)
                    .map(|value| (name.clone(), value.clone()))
            })
            .collect()
    }
}

fn render_definitions(definitions: &[String], out: &mut String) {
    if !definitions.is_empty() {
        let _ = write!(out, "({})", definitions.join(", "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn node(id: usize, depends_on: &[usize]) -> QueryPlanNode {
        QueryPlanNode {
            id: NodeId(id),
            subgraph_name: format!("s{id}"),
            kind: FetchKind::Root {
                operation: OperationKind::Query,
            },
            selections: vec![Selection::leaf("f")],
            variables: BTreeSet::new(),
            depends_on: depends_on.iter().map(|&d| NodeId(d)).collect(),
            output_path: Vec::new(),
        }
    }

    fn plan(nodes: Vec<QueryPlanNode>) -> QueryPlan {
        QueryPlan {
            operation: OperationKind::Query,
            nodes,
            shape: Vec::new(),
            variable_definitions: BTreeMap::new(),
            variables: Map::new(),
        }
    }

    #[test]
    fn layers_follow_dependencies() {
        let plan = plan(vec![node(0, &[]), node(1, &[0]), node(2, &[]), node(3, &[1, 2])]);
        assert_eq!(
            plan.layers().unwrap(),
            vec![
                vec![NodeId(0), NodeId(2)],
                vec![NodeId(1)],
                vec![NodeId(3)]
            ]
        );
    }

    #[test]
    fn cycles_are_rejected() {
        let plan = plan(vec![node(0, &[1]), node(1, &[0])]);
        assert!(matches!(plan.layers(), Err(PlanError::InvalidPlan(_))));
    }

    #[test]
    fn root_fetch_declares_only_used_variables() {
        let mut root = node(0, &[]);
        root.selections = vec![Selection {
            alias: None,
            name: "user".to_string(),
            arguments: vec![("id".to_string(), "$id".to_string())],
            selections: vec![Selection::leaf("name")],
        }];
        root.variables.insert("id".to_string());
        let mut plan = plan(vec![root]);
        plan.variable_definitions.insert("id".to_string(), "$id: ID!".to_string());
        plan.variable_definitions.insert("other".to_string(), "$other: Int".to_string());
        plan.variables.insert("id".to_string(), json!("1"));
        plan.variables.insert("other".to_string(), json!(2));

        let rendered = plan.render_root(&plan.nodes[0]);
        assert_eq!(rendered.query, "query($id: ID!) { user(id: $id) { name } }");
        assert_eq!(Value::Object(rendered.variables), json!({ "id": "1" }));
    }

    #[test]
    fn entity_fetch_aliases_only_batches() {
        let lookup = EntityLookup {
            type_name: "User".to_string(),
            key_field: "id".to_string(),
            field: "user".to_string(),
            argument: "id".to_string(),
            argument_type: "ID!".to_string(),
        };
        let mut entity = node(1, &[0]);
        entity.selections = vec![Selection::leaf("name")];
        let plan = plan(vec![node(0, &[]), entity]);

        let single = plan.render_entities(&plan.nodes[1], &lookup, &[json!("1")]);
        assert_eq!(single.query, "query($_k0: ID!) { user(id: $_k0) { name } }");
        assert_eq!(single.aliases, vec!["user"]);

        let batch = plan.render_entities(&plan.nodes[1], &lookup, &[json!("1"), json!("2")]);
        assert_eq!(
            batch.query,
            "query($_k0: ID!, $_k1: ID!) { _0: user(id: $_k0) { name } _1: user(id: $_k1) { name } }"
        );
        assert_eq!(batch.aliases, vec!["_0", "_1"]);
        assert_eq!(Value::Object(batch.variables), json!({ "_k0": "1", "_k1": "2" }));
    }

    #[test]
    fn key_variables_avoid_operation_variables() {
        let lookup = EntityLookup {
            type_name: "User".to_string(),
            key_field: "id".to_string(),
            field: "user".to_string(),
            argument: "id".to_string(),
            argument_type: "ID!".to_string(),
        };
        let mut entity = node(1, &[0]);
        entity.selections = vec![Selection {
            alias: None,
            name: "avatar".to_string(),
            arguments: vec![("size".to_string(), "$_k0".to_string())],
            selections: Vec::new(),
        }];
        entity.variables.insert("_k0".to_string());
        let mut plan = plan(vec![node(0, &[]), entity]);
        plan.variable_definitions.insert("_k0".to_string(), "$_k0: Int".to_string());
        plan.variables.insert("_k0".to_string(), json!(64));

        let rendered = plan.render_entities(&plan.nodes[1], &lookup, &[json!("1")]);
        assert_eq!(
            rendered.query,
            "query($_k0: Int, $__k0: ID!) { user(id: $__k0) { avatar(size: $_k0) } }"
        );
        assert_eq!(Value::Object(rendered.variables), json!({ "_k0": 64, "__k0": "1" }));
    }
}
