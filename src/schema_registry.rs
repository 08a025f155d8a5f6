use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use reqwest::Url;

use crate::error::RegistryError;
use crate::subgraph_schema::{FieldDef, SubgraphSchema};

/// One downstream service. Immutable once built: a refresh replaces descriptors
/// wholesale instead of editing them.
#[derive(Clone, Debug, PartialEq)]
pub struct SubgraphDescriptor {
    name: String,
    endpoint: Url,
    owned_types: BTreeSet<String>,
    headers: BTreeMap<String, String>,
    schema: SubgraphSchema,
}

impl SubgraphDescriptor {
    /// Build a descriptor from the subgraph's SDL. Owned types default to the
    /// object types the SDL defines.
    pub fn new(name: impl Into<String>, endpoint: &str, sdl: &str) -> Result<Self, RegistryError> {
        let name = name.into();
        let endpoint = Url::parse(endpoint).map_err(|e| RegistryError::InvalidEndpoint {
            subgraph: name.clone(),
            url: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        let schema = SubgraphSchema::parse(&name, sdl)?;

        Ok(SubgraphDescriptor {
            owned_types: schema.defined_types(),
            name,
            endpoint,
            headers: BTreeMap::new(),
            schema,
        })
    }

    /// Replace the derived owned types with an explicit list.
    pub fn with_owned_types<I, S>(mut self, owned_types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.owned_types = owned_types.into_iter().map(Into::into).collect();
        self
    }

    /// Static headers sent with every request to this subgraph.
    pub fn with_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn owned_types(&self) -> &BTreeSet<String> {
        &self.owned_types
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub fn schema(&self) -> &SubgraphSchema {
        &self.schema
    }

    pub fn owns(&self, type_name: &str) -> bool {
        self.owned_types.contains(type_name)
    }
}

/// Immutable view of the registry shared by every request planned against it.
#[derive(Debug, Default)]
pub struct RegistrySnapshot {
    subgraphs: Vec<Arc<SubgraphDescriptor>>,
    positions: HashMap<String, usize>,
    owners: HashMap<String, Vec<usize>>,
    composite_types: BTreeSet<String>,
}

impl RegistrySnapshot {
    fn build(subgraphs: Vec<Arc<SubgraphDescriptor>>) -> Result<Self, RegistryError> {
        let mut positions = HashMap::new();
        let mut owners: HashMap<String, Vec<usize>> = HashMap::new();
        let mut composite_types = BTreeSet::new();

        for (position, subgraph) in subgraphs.iter().enumerate() {
            if positions.insert(subgraph.name.clone(), position).is_some() {
                return Err(RegistryError::DuplicateName(subgraph.name.clone()));
            }
            for type_name in &subgraph.owned_types {
                owners.entry(type_name.clone()).or_default().push(position);
            }
            composite_types.extend(subgraph.schema.objects().map(|object| object.name.clone()));
        }

        tracing::debug!(
            subgraphs = subgraphs.len(),
            owned_types = owners.len(),
            "built registry snapshot"
        );

        Ok(RegistrySnapshot {
            subgraphs,
            positions,
            owners,
            composite_types,
        })
    }

    /// Descriptors in registration order.
    pub fn subgraphs(&self) -> &[Arc<SubgraphDescriptor>] {
        &self.subgraphs
    }

    pub fn get(&self, name: &str) -> Option<&Arc<SubgraphDescriptor>> {
        self.positions.get(name).map(|&position| &self.subgraphs[position])
    }

    /// Names of the subgraphs owning `type_name`, in registration order.
    pub fn owners(&self, type_name: &str) -> Vec<&str> {
        self.owners
            .get(type_name)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&position| self.subgraphs[position].name())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Whether any subgraph declares `type_name` as an object type.
    pub fn is_composite(&self, type_name: &str) -> bool {
        self.composite_types.contains(type_name)
    }

    /// Subgraphs whose root type (`Query` or `Mutation`) resolves `field`.
    pub fn root_field_definers(&self, mutation: bool, field: &str) -> Vec<(&str, &FieldDef)> {
        self.subgraphs
            .iter()
            .filter_map(|subgraph| {
                let schema = subgraph.schema();
                let root = if mutation {
                    schema.mutation_type()
                } else {
                    schema.query_type()
                };
                schema
                    .resolvable_field(root, field)
                    .map(|definition| (subgraph.name(), definition))
            })
            .collect()
    }

    /// Key fields of an entity type, preferring what its owners declare.
    pub fn entity_key(&self, type_name: &str) -> Option<&[String]> {
        let from_owners = self.owners.get(type_name).into_iter().flatten().map(|&p| &self.subgraphs[p]);
        from_owners
            .chain(self.subgraphs.iter())
            .filter_map(|subgraph| subgraph.schema().object(type_name))
            .map(|object| object.key_fields.as_slice())
            .find(|key| !key.is_empty())
    }
}

/// Registry of subgraphs. Reads are lock-free loads of the current snapshot;
/// writers build a new snapshot and swap it in.
pub struct SubgraphRegistry {
    snapshot: ArcSwap<RegistrySnapshot>,
    writer: Mutex<()>,
}

impl Default for SubgraphRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubgraphRegistry {
    pub fn new() -> Self {
        SubgraphRegistry {
            snapshot: ArcSwap::from_pointee(RegistrySnapshot::default()),
            writer: Mutex::new(()),
        }
    }

    /// Build a registry from descriptors, failing fast on duplicate names.
    pub fn with_subgraphs(descriptors: Vec<SubgraphDescriptor>) -> Result<Self, RegistryError> {
        let registry = Self::new();
        registry.replace(descriptors)?;
        Ok(registry)
    }

    pub fn register(&self, descriptor: SubgraphDescriptor) -> Result<(), RegistryError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot.load();
        if current.positions.contains_key(descriptor.name()) {
            return Err(RegistryError::DuplicateName(descriptor.name().to_string()));
        }

        tracing::info!(subgraph = descriptor.name(), endpoint = %descriptor.endpoint(), "registering subgraph");
        let mut subgraphs = current.subgraphs.clone();
        subgraphs.push(Arc::new(descriptor));
        self.snapshot.store(Arc::new(RegistrySnapshot::build(subgraphs)?));
        Ok(())
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<SubgraphDescriptor>, RegistryError> {
        self.snapshot
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownSubgraph(name.to_string()))
    }

    /// Every descriptor, in registration order.
    pub fn all(&self) -> Vec<Arc<SubgraphDescriptor>> {
        self.snapshot.load().subgraphs.clone()
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.load_full()
    }

    /// Swap in a whole new set of descriptors. The previous snapshot stays in
    /// place if validation fails.
    pub fn replace(&self, descriptors: Vec<SubgraphDescriptor>) -> Result<(), RegistryError> {
        let _guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let snapshot = RegistrySnapshot::build(descriptors.into_iter().map(Arc::new).collect())?;
        tracing::info!(subgraphs = snapshot.subgraphs.len(), "replacing registry snapshot");
        self.snapshot.store(Arc::new(snapshot));
        Ok(())
    }
}
