use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A response path element: an object key or a list index.
/// e.g `/orders/3/user`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathElement {
    Index(usize),
    Key(String),
}

/// Absolute path into a response tree.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResponsePath(Vec<PathElement>);

impl ResponsePath {
    pub fn empty() -> Self {
        ResponsePath(Vec::new())
    }

    pub fn elements(&self) -> &[PathElement] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join_key(&self, key: impl Into<String>) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::Key(key.into()));
        ResponsePath(elements)
    }

    pub fn join_index(&self, index: usize) -> Self {
        let mut elements = self.0.clone();
        elements.push(PathElement::Index(index));
        ResponsePath(elements)
    }

    pub fn prefix(&self, len: usize) -> ResponsePath {
        ResponsePath(self.0[..len.min(self.0.len())].to_vec())
    }

    pub fn suffix(&self, from: usize) -> &[PathElement] {
        &self.0[from.min(self.0.len())..]
    }

    pub fn extend(&mut self, elements: &[PathElement]) {
        self.0.extend_from_slice(elements);
    }
}

impl From<Vec<PathElement>> for ResponsePath {
    fn from(elements: Vec<PathElement>) -> Self {
        ResponsePath(elements)
    }
}

impl fmt::Display for ResponsePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for element in &self.0 {
            match element {
                PathElement::Index(index) => write!(f, "/{index}")?,
                PathElement::Key(key) => write!(f, "/{key}")?,
            }
        }
        Ok(())
    }
}

/// Follow `elements` from `value`. Returns `None` as soon as a step does not exist.
pub fn get_path<'a>(value: &'a Value, elements: &[PathElement]) -> Option<&'a Value> {
    elements
        .iter()
        .try_fold(value, |current, element| match (element, current) {
            (PathElement::Key(key), Value::Object(map)) => map.get(key),
            (PathElement::Index(index), Value::Array(items)) => items.get(*index),
            _ => None,
        })
}

/// Walk `keys` (response keys, no indices) from `value`, descending into every
/// list element on the way, and call `visit` with the absolute path and value of
/// each non-null object reached.
pub fn visit_objects<'a>(
    value: &'a Value,
    base: &ResponsePath,
    keys: &[String],
    visit: &mut dyn FnMut(ResponsePath, &'a Value),
) {
    match value {
        Value::Null => {}
        Value::Array(items) => {
            for (index, item) in items.iter().enumerate() {
                visit_objects(item, &base.join_index(index), keys, visit);
            }
        }
        Value::Object(map) => match keys.split_first() {
            None => visit(base.clone(), value),
            Some((key, rest)) => {
                if let Some(child) = map.get(key) {
                    visit_objects(child, &base.join_key(key.clone()), rest, visit);
                }
            }
        },
        _ => {}
    }
}
