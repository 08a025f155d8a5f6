//! Folds the partial results of a plan back into the shape of the original query.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ErrorInfo;
use crate::dispatcher::PartialResult;
use crate::json_path::{PathElement, ResponsePath, get_path};
use crate::query_plan::{FetchKind, NodeId, QueryPlan, ShapeField};

/// The response returned to the client. Both members are always present.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergedResponse {
    pub data: Value,
    pub errors: Vec<ErrorInfo>,
}

impl MergedResponse {
    /// A response that carries only errors.
    pub fn from_errors(errors: Vec<ErrorInfo>) -> Self {
        MergedResponse {
            data: Value::Null,
            errors,
        }
    }
}

/// Build the client response. The output depends only on `plan` and the
/// contents of `partials`, never on the order they were produced in.
pub fn merge(plan: &QueryPlan, partials: &BTreeMap<NodeId, PartialResult>) -> MergedResponse {
    let errors = plan
        .nodes
        .iter()
        .filter_map(|node| partials.get(&node.id))
        .flat_map(|partial| partial.errors.iter().cloned())
        .collect();

    let mut roots = plan.nodes.iter().filter(|node| node.is_root()).peekable();
    let all_roots_failed = roots.peek().is_some()
        && roots.all(|node| !partials.get(&node.id).is_some_and(PartialResult::is_completed));
    if all_roots_failed {
        return MergedResponse {
            data: Value::Null,
            errors,
        };
    }

    let merger = Merger { plan, partials };
    let data = merger.merge_object(&plan.shape, &ResponsePath::empty());
    MergedResponse {
        data: Value::Object(data),
        errors,
    }
}

struct Merger<'a> {
    plan: &'a QueryPlan,
    partials: &'a BTreeMap<NodeId, PartialResult>,
}

impl Merger<'_> {
    fn merge_object(&self, fields: &[ShapeField], path: &ResponsePath) -> Map<String, Value> {
        let mut object = Map::with_capacity(fields.len());
        for field in fields {
            let value = match field {
                ShapeField::Typename { value, .. } => Value::String(value.clone()),
                ShapeField::Field {
                    response_key,
                    owner,
                    children,
                } => {
                    let path = path.join_key(response_key.clone());
                    let value = self.lookup(*owner, &path);
                    if children.is_empty() {
                        value.cloned().unwrap_or(Value::Null)
                    } else {
                        self.merge_value(children, value, &path)
                    }
                }
            };
            object.insert(field.response_key().to_string(), value);
        }
        object
    }

    fn merge_value(&self, children: &[ShapeField], value: Option<&Value>, path: &ResponsePath) -> Value {
        match value {
            Some(Value::Array(items)) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(index, item)| self.merge_value(children, Some(item), &path.join_index(index)))
                    .collect(),
            ),
            Some(Value::Object(_)) if self.entity_unavailable(children, path) => Value::Null,
            Some(Value::Object(_)) => Value::Object(self.merge_object(children, path)),
            Some(other) => other.clone(),
            None => Value::Null,
        }
    }

    /// An object whose entity fetch failed or was skipped is nulled as a whole.
    fn entity_unavailable(&self, children: &[ShapeField], path: &ResponsePath) -> bool {
        let keys: Vec<&str> = path
            .elements()
            .iter()
            .filter_map(|element| match element {
                PathElement::Key(key) => Some(key.as_str()),
                PathElement::Index(_) => None,
            })
            .collect();

        children.iter().any(|child| match child {
            ShapeField::Field { owner, .. } => self.plan.node(*owner).is_some_and(|node| {
                !node.is_root()
                    && node.output_path.iter().map(String::as_str).eq(keys.iter().copied())
                    && !self.partials.get(owner).is_some_and(PartialResult::is_completed)
            }),
            ShapeField::Typename { .. } => false,
        })
    }

    /// The value `owner` produced for the field at `path`.
    fn lookup(&self, owner: NodeId, path: &ResponsePath) -> Option<&Value> {
        let node = self.plan.node(owner)?;
        let partial = self.partials.get(&owner).filter(|p| p.is_completed())?;
        let data = partial.data.as_ref()?;

        match node.kind {
            FetchKind::Root { .. } => get_path(data, path.elements()),
            FetchKind::Entity { .. } => (0..path.len()).rev().find_map(|len| {
                let alias = partial.bindings.get(&path.prefix(len))?;
                get_path(data.get(alias)?, path.suffix(len))
            }),
        }
    }
}
