use std::collections::{BTreeMap, BTreeSet, HashMap};

use async_trait::async_trait;
use graphql_parser::query::{
    Definition, Directive, Field, FragmentDefinition, OperationDefinition, Selection as QuerySelection,
    SelectionSet, TypeCondition, Value as QueryValue, VariableDefinition, parse_query,
};
use serde_json::{Map, Value};

use crate::GraphQLRequest;
use crate::config::{OwnershipConfig, OwnershipPolicy};
use crate::error::PlanError;
use crate::query_plan::{
    EntityLookup, FetchKind, NodeId, OperationKind, QueryPlan, QueryPlanNode, Selection, ShapeField,
};
use crate::schema_registry::RegistrySnapshot;
use crate::subgraph_schema::{FieldDef, type_text};

#[async_trait]
pub trait QueryPlanner {
    async fn plan_query(
        &self,
        request: &GraphQLRequest,
        snapshot: &RegistrySnapshot,
    ) -> Result<QueryPlan, PlanError>;
}

/// Plans queries by walking the selection tree against the registry snapshot.
#[derive(Clone, Debug, Default)]
pub struct FederatedQueryPlanner {
    ownership: OwnershipConfig,
}

impl FederatedQueryPlanner {
    pub fn new(ownership: OwnershipConfig) -> Self {
        FederatedQueryPlanner { ownership }
    }

    pub fn plan(
        &self,
        request: &GraphQLRequest,
        snapshot: &RegistrySnapshot,
    ) -> Result<QueryPlan, PlanError> {
        let document =
            parse_query::<String>(&request.query).map_err(|e| PlanError::Parse(e.to_string()))?;

        let mut operations = Vec::new();
        let mut fragments = HashMap::new();
        for definition in &document.definitions {
            match definition {
                Definition::Operation(operation) => operations.push(operation),
                Definition::Fragment(fragment) => {
                    fragments.insert(fragment.name.clone(), fragment);
                }
            }
        }

        let operation = select_operation(&operations, request.operation_name.as_deref())?;
        let (kind, variable_definitions, selection_set) = match operation {
            OperationDefinition::SelectionSet(selection_set) => {
                (OperationKind::Query, &[][..], selection_set)
            }
            OperationDefinition::Query(query) => (
                OperationKind::Query,
                query.variable_definitions.as_slice(),
                &query.selection_set,
            ),
            OperationDefinition::Mutation(mutation) => (
                OperationKind::Mutation,
                mutation.variable_definitions.as_slice(),
                &mutation.selection_set,
            ),
            OperationDefinition::Subscription(_) => {
                return Err(PlanError::Unplannable(
                    "subscriptions are not supported".to_string(),
                ));
            }
        };

        let variables = match &request.variables {
            Some(Value::Object(variables)) => variables.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(PlanError::Unplannable(
                    "variables must be a JSON object".to_string(),
                ));
            }
        };

        let mut builder = PlanBuilder {
            snapshot,
            ownership: &self.ownership,
            fragments,
            variables: &variables,
            boolean_defaults: boolean_defaults(variable_definitions),
            operation: kind,
            nodes: Vec::new(),
        };
        let shape = builder.plan_root(selection_set)?;

        let plan = QueryPlan {
            operation: kind,
            nodes: builder.nodes,
            shape,
            variable_definitions: variable_definitions
                .iter()
                .map(|definition| (definition.name.clone(), render_variable_definition(definition)))
                .collect(),
            variables,
        };

        tracing::debug!(
            operation = kind.keyword(),
            nodes = plan.nodes.len(),
            subgraphs = ?plan.nodes.iter().map(|n| n.subgraph_name.as_str()).collect::<Vec<_>>(),
            "planned query"
        );
        Ok(plan)
    }
}

#[async_trait]
impl QueryPlanner for FederatedQueryPlanner {
    async fn plan_query(
        &self,
        request: &GraphQLRequest,
        snapshot: &RegistrySnapshot,
    ) -> Result<QueryPlan, PlanError> {
        self.plan(request, snapshot)
    }
}

fn select_operation<'d, 'q>(
    operations: &[&'d OperationDefinition<'q, String>],
    name: Option<&str>,
) -> Result<&'d OperationDefinition<'q, String>, PlanError> {
    match name {
        Some(name) => operations
            .iter()
            .find(|operation| operation_name(operation) == Some(name))
            .copied()
            .ok_or_else(|| PlanError::UnknownOperation(name.to_string())),
        None => match operations {
            [operation] => Ok(*operation),
            [] => Err(PlanError::Unplannable(
                "document contains no operation".to_string(),
            )),
            _ => Err(PlanError::OperationNameRequired),
        },
    }
}

fn operation_name<'d>(operation: &'d OperationDefinition<'_, String>) -> Option<&'d str> {
    match operation {
        OperationDefinition::SelectionSet(_) => None,
        OperationDefinition::Query(query) => query.name.as_deref(),
        OperationDefinition::Mutation(mutation) => mutation.name.as_deref(),
        OperationDefinition::Subscription(subscription) => subscription.name.as_deref(),
    }
}

fn boolean_defaults(definitions: &[VariableDefinition<'_, String>]) -> HashMap<String, bool> {
    definitions
        .iter()
        .filter_map(|definition| match definition.default_value {
            Some(QueryValue::Boolean(value)) => Some((definition.name.clone(), value)),
            _ => None,
        })
        .collect()
}

fn render_variable_definition(definition: &VariableDefinition<'_, String>) -> String {
    let mut text = format!("${}: {}", definition.name, type_text(&definition.var_type));
    if let Some(default) = &definition.default_value {
        text.push_str(" = ");
        text.push_str(&render_value(default, &mut BTreeSet::new()));
    }
    text
}

/// Print an argument value back in GraphQL syntax, recording variables it uses.
fn render_value(value: &QueryValue<'_, String>, used: &mut BTreeSet<String>) -> String {
    match value {
        QueryValue::Variable(name) => {
            used.insert(name.clone());
            format!("${name}")
        }
        QueryValue::Int(number) => number.as_i64().map(|n| n.to_string()).unwrap_or_default(),
        QueryValue::Float(float) => float.to_string(),
        QueryValue::String(string) => serde_json::to_string(string).unwrap_or_default(),
        QueryValue::Boolean(boolean) => boolean.to_string(),
        QueryValue::Null => "null".to_string(),
        QueryValue::Enum(name) => name.clone(),
        QueryValue::List(items) => {
            let items: Vec<String> = items.iter().map(|item| render_value(item, used)).collect();
            format!("[{}]", items.join(", "))
        }
        QueryValue::Object(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(name, value)| format!("{name}: {}", render_value(value, used)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}

/// A field after fragment flattening, with every selection set merged under
/// its response key.
struct CollectedField<'d, 'q> {
    response_key: String,
    field: &'d Field<'q, String>,
    selection_sets: Vec<&'d SelectionSet<'q, String>>,
}

impl CollectedField<'_, '_> {
    fn name(&self) -> &str {
        &self.field.name
    }

    fn is_leaf(&self) -> bool {
        self.selection_sets.iter().all(|set| set.items.is_empty())
    }
}

struct PlanBuilder<'p, 'd, 'q> {
    snapshot: &'p RegistrySnapshot,
    ownership: &'p OwnershipConfig,
    fragments: HashMap<String, &'d FragmentDefinition<'q, String>>,
    variables: &'p Map<String, Value>,
    boolean_defaults: HashMap<String, bool>,
    operation: OperationKind,
    nodes: Vec<QueryPlanNode>,
}

impl<'p, 'd, 'q> PlanBuilder<'p, 'd, 'q> {
    fn plan_root(
        &mut self,
        selection_set: &'d SelectionSet<'q, String>,
    ) -> Result<Vec<ShapeField>, PlanError> {
        let root_type = self.operation.default_type_name();
        let fields = self.collect_fields(root_type, &[selection_set])?;

        let mut shape = Vec::with_capacity(fields.len());
        let mut current: Option<NodeId> = None;
        for field in fields {
            if field.name() == "__typename" {
                shape.push(ShapeField::Typename {
                    response_key: field.response_key.clone(),
                    value: root_type.to_string(),
                });
                continue;
            }
            if field.name().starts_with("__") {
                return Err(PlanError::Unplannable(format!(
                    "introspection field '{}' is not supported",
                    field.name()
                )));
            }

            let (subgraph, definition) = self.root_owner(&field)?;
            let node = match current {
                Some(id) if self.nodes[id.0].subgraph_name == subgraph => id,
                previous => {
                    // Mutation fields run one after another.
                    let depends_on = match (self.operation, previous) {
                        (OperationKind::Mutation, Some(previous)) => BTreeSet::from([previous]),
                        _ => BTreeSet::new(),
                    };
                    self.add_node(
                        subgraph,
                        FetchKind::Root {
                            operation: self.operation,
                        },
                        depends_on,
                        Vec::new(),
                    )
                }
            };
            current = Some(node);

            let (selection, shape_field) = self.plan_field(node, definition, &field, &[])?;
            self.nodes[node.0].selections.push(selection);
            shape.push(shape_field);
        }
        Ok(shape)
    }

    fn plan_field(
        &mut self,
        node: NodeId,
        definition: &'p FieldDef,
        field: &CollectedField<'d, 'q>,
        path: &[String],
    ) -> Result<(Selection, ShapeField), PlanError> {
        let mut used = BTreeSet::new();
        let arguments = field
            .field
            .arguments
            .iter()
            .map(|(name, value)| (name.clone(), render_value(value, &mut used)))
            .collect();
        self.nodes[node.0].variables.extend(used);

        let composite = self.snapshot.is_composite(&definition.type_name);
        let (selections, children) = match (field.is_leaf(), composite) {
            (true, false) => (Vec::new(), Vec::new()),
            (false, true) => {
                let mut path = path.to_vec();
                path.push(field.response_key.clone());
                self.plan_selection_set(node, &definition.type_name, &field.selection_sets, &path)?
            }
            (true, true) => {
                return Err(PlanError::Unplannable(format!(
                    "field '{}' of type '{}' must have a selection of subfields",
                    field.name(),
                    definition.type_name
                )));
            }
            (false, false) => {
                return Err(PlanError::Unplannable(format!(
                    "field '{}' of type '{}' is not an object type known to any subgraph",
                    field.name(),
                    definition.type_name
                )));
            }
        };

        let selection = Selection {
            alias: field.field.alias.clone(),
            name: field.name().to_string(),
            arguments,
            selections,
        };
        let shape_field = ShapeField::Field {
            response_key: field.response_key.clone(),
            owner: node,
            children,
        };
        Ok((selection, shape_field))
    }

    fn plan_selection_set(
        &mut self,
        node: NodeId,
        type_name: &str,
        selection_sets: &[&'d SelectionSet<'q, String>],
        path: &[String],
    ) -> Result<(Vec<Selection>, Vec<ShapeField>), PlanError> {
        let snapshot = self.snapshot;
        let subgraph = self.nodes[node.0].subgraph_name.clone();
        let schema = snapshot
            .get(&subgraph)
            .map(|descriptor| descriptor.schema())
            .ok_or_else(|| PlanError::InvalidPlan(format!("unknown subgraph '{subgraph}'")))?;
        let fields = self.collect_fields(type_name, selection_sets)?;

        let owners = snapshot.owners(type_name);
        if owners.is_empty() {
            return Err(PlanError::Unplannable(format!(
                "type '{type_name}' is not owned by any registered subgraph"
            )));
        }
        let owns_type = owners.contains(&subgraph.as_str());
        let entity_key = match snapshot.entity_key(type_name) {
            Some([key]) => Some(key.as_str()),
            _ => None,
        };

        let mut selections = Vec::new();
        let mut shape = Vec::new();
        let mut current_join: Option<NodeId> = None;
        let mut key_field: Option<String> = None;

        for field in fields {
            if field.name() == "__typename" {
                selections.push(Selection {
                    alias: field.field.alias.clone(),
                    ..Selection::leaf("__typename")
                });
                shape.push(ShapeField::Field {
                    response_key: field.response_key.clone(),
                    owner: node,
                    children: Vec::new(),
                });
                continue;
            }

            // The key is already in this subgraph's response; anything else stays
            // local only when this subgraph owns the type or no owner serves it.
            let local = if entity_key == Some(field.name()) {
                schema.declared_field(type_name, field.name())
            } else {
                schema
                    .resolvable_field(type_name, field.name())
                    .filter(|_| owns_type || !self.owner_resolves(&owners, type_name, field.name()))
            };
            if let Some(definition) = local {
                let (selection, shape_field) = self.plan_field(node, definition, &field, path)?;
                selections.push(selection);
                shape.push(shape_field);
                continue;
            }

            // Entity join: another subgraph resolves this field from the key.
            let (target, definition, lookup) = self.entity_owner(&subgraph, type_name, &field)?;
            let join = match current_join {
                Some(id) if self.nodes[id.0].subgraph_name == target => id,
                _ => {
                    key_field = Some(lookup.key_field.clone());
                    self.add_node(
                        target,
                        FetchKind::Entity {
                            parent: node,
                            lookup,
                        },
                        BTreeSet::from([node]),
                        path.to_vec(),
                    )
                }
            };
            current_join = Some(join);

            let (selection, shape_field) = self.plan_field(join, definition, &field, path)?;
            self.nodes[join.0].selections.push(selection);
            shape.push(shape_field);
        }

        if let Some(key_field) = key_field {
            let present = selections
                .iter()
                .find(|selection| selection.response_key() == key_field);
            match present {
                Some(selection) if selection.name == key_field && selection.arguments.is_empty() => {}
                Some(_) => {
                    return Err(PlanError::Unplannable(format!(
                        "response key '{key_field}' on '{type_name}' clashes with the entity key"
                    )));
                }
                None => selections.push(Selection::leaf(key_field)),
            }
        }

        Ok((selections, shape))
    }

    fn owner_resolves(&self, owners: &[&str], type_name: &str, field: &str) -> bool {
        owners.iter().any(|owner| {
            self.snapshot
                .get(owner)
                .and_then(|subgraph| subgraph.schema().resolvable_field(type_name, field))
                .is_some()
        })
    }

    /// Pick the subgraph serving a root field. Subgraphs owning the field's
    /// type are preferred over ones merely exposing it.
    fn root_owner(&self, field: &CollectedField<'d, 'q>) -> Result<(&'p str, &'p FieldDef), PlanError> {
        let snapshot = self.snapshot;
        let root_type = self.operation.default_type_name();
        let mut candidates =
            snapshot.root_field_definers(self.operation == OperationKind::Mutation, field.name());
        let Some((_, first)) = candidates.first() else {
            return Err(PlanError::Unplannable(format!(
                "no subgraph serves field '{root_type}.{}'",
                field.name()
            )));
        };

        let return_type = first.type_name.clone();
        if snapshot.is_composite(&return_type) {
            let owners = snapshot.owners(&return_type);
            if owners.is_empty() {
                return Err(PlanError::Unplannable(format!(
                    "type '{return_type}' is not owned by any registered subgraph"
                )));
            }
            let owning: Vec<_> = candidates
                .iter()
                .filter(|(name, _)| owners.contains(name))
                .copied()
                .collect();
            if !owning.is_empty() {
                candidates = owning;
            }
        }

        let names: Vec<&'p str> = candidates.iter().map(|(name, _)| *name).collect();
        let coordinate = format!("{root_type}.{}", field.name());
        let chosen = self.choose(&[coordinate.as_str(), return_type.as_str()], &return_type, &names)?;
        candidates
            .into_iter()
            .find(|(name, _)| *name == chosen)
            .ok_or_else(|| PlanError::InvalidPlan(format!("lost candidate '{chosen}'")))
    }

    /// Find the subgraph that resolves `type_name.field` for an entity reached
    /// from `current`, and how to look the entity up there.
    fn entity_owner(
        &self,
        current: &str,
        type_name: &str,
        field: &CollectedField<'d, 'q>,
    ) -> Result<(&'p str, &'p FieldDef, EntityLookup), PlanError> {
        let snapshot = self.snapshot;
        let name = field.name();

        let mut candidates: Vec<(&'p str, &'p FieldDef)> = snapshot
            .subgraphs()
            .iter()
            .filter(|subgraph| subgraph.name() != current)
            .filter_map(|subgraph| {
                subgraph
                    .schema()
                    .resolvable_field(type_name, name)
                    .map(|definition| (subgraph.name(), definition))
            })
            .collect();
        if candidates.is_empty() {
            return Err(PlanError::Unplannable(format!(
                "no subgraph resolves field '{type_name}.{name}'"
            )));
        }
        let owners = snapshot.owners(type_name);
        let owning: Vec<_> = candidates
            .iter()
            .filter(|(subgraph, _)| owners.contains(subgraph))
            .copied()
            .collect();
        if !owning.is_empty() {
            candidates = owning;
        }

        let key = snapshot.entity_key(type_name).ok_or_else(|| {
            PlanError::Unplannable(format!(
                "field '{type_name}.{name}' is not resolvable by '{current}' and '{type_name}' declares no @key"
            ))
        })?;
        let [key_field] = key else {
            return Err(PlanError::Unplannable(format!(
                "compound key '{}' of '{type_name}' is not supported",
                key.join(" ")
            )));
        };

        let provides_key = snapshot
            .get(current)
            .and_then(|subgraph| subgraph.schema().declared_field(type_name, key_field))
            .is_some();
        if !provides_key {
            return Err(PlanError::Unplannable(format!(
                "subgraph '{current}' cannot provide key '{key_field}' of '{type_name}'"
            )));
        }

        let names: Vec<&'p str> = candidates.iter().map(|(subgraph, _)| *subgraph).collect();
        let coordinate = format!("{type_name}.{name}");
        let chosen = self.choose(&[coordinate.as_str(), type_name], type_name, &names)?;
        let (target, definition) = candidates
            .into_iter()
            .find(|(subgraph, _)| *subgraph == chosen)
            .ok_or_else(|| PlanError::InvalidPlan(format!("lost candidate '{chosen}'")))?;

        let lookup_field = snapshot
            .get(target)
            .and_then(|subgraph| subgraph.schema().lookup_field(type_name, key_field))
            .ok_or_else(|| {
                PlanError::Unplannable(format!(
                    "subgraph '{target}' has no root field to look up '{type_name}' by '{key_field}'"
                ))
            })?;
        let argument_type = lookup_field
            .arguments
            .iter()
            .find(|argument| &argument.name == key_field)
            .map(|argument| argument.type_text.clone())
            .unwrap_or_else(|| "ID!".to_string());

        Ok((
            target,
            definition,
            EntityLookup {
                type_name: type_name.to_string(),
                key_field: key_field.clone(),
                field: lookup_field.name.clone(),
                argument: key_field.clone(),
                argument_type,
            },
        ))
    }

    /// Tie-break between subgraphs claiming the same type or field: explicit
    /// precedence first, then the configured policy.
    fn choose(
        &self,
        coordinates: &[&str],
        type_name: &str,
        candidates: &[&'p str],
    ) -> Result<&'p str, PlanError> {
        if let [only] = candidates {
            return Ok(*only);
        }
        for coordinate in coordinates {
            if let Some(preferred) = self.ownership.precedence.get(*coordinate) {
                if let Some(chosen) = candidates.iter().find(|name| **name == preferred.as_str()) {
                    return Ok(*chosen);
                }
            }
        }

        match (self.ownership.policy, candidates.first()) {
            (OwnershipPolicy::FirstRegistered, Some(first)) => {
                tracing::debug!(type_name, chosen = *first, ?candidates, "ownership resolved by registration order");
                Ok(*first)
            }
            _ => Err(PlanError::AmbiguousOwnership {
                type_name: type_name.to_string(),
                subgraphs: candidates.iter().map(|name| name.to_string()).collect(),
            }),
        }
    }

    fn add_node(
        &mut self,
        subgraph: &str,
        kind: FetchKind,
        depends_on: BTreeSet<NodeId>,
        output_path: Vec<String>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(QueryPlanNode {
            id,
            subgraph_name: subgraph.to_string(),
            kind,
            selections: Vec::new(),
            variables: BTreeSet::new(),
            depends_on,
            output_path,
        });
        id
    }

    fn collect_fields(
        &self,
        type_name: &str,
        selection_sets: &[&'d SelectionSet<'q, String>],
    ) -> Result<Vec<CollectedField<'d, 'q>>, PlanError> {
        let mut fields: Vec<CollectedField<'d, 'q>> = Vec::new();
        let mut visiting = Vec::new();
        for selection_set in selection_sets {
            self.collect_into(type_name, selection_set, &mut fields, &mut visiting)?;
        }
        Ok(fields)
    }

    fn collect_into(
        &self,
        type_name: &str,
        selection_set: &'d SelectionSet<'q, String>,
        fields: &mut Vec<CollectedField<'d, 'q>>,
        visiting: &mut Vec<String>,
    ) -> Result<(), PlanError> {
        for item in &selection_set.items {
            match item {
                QuerySelection::Field(field) => {
                    if !self.included(&field.directives)? {
                        continue;
                    }
                    let response_key = field.alias.as_ref().unwrap_or(&field.name);
                    match fields.iter_mut().find(|f| &f.response_key == response_key) {
                        Some(existing) if existing.name() == field.name => {
                            existing.selection_sets.push(&field.selection_set);
                        }
                        Some(_) => {
                            return Err(PlanError::Unplannable(format!(
                                "response key '{response_key}' selects different fields"
                            )));
                        }
                        None => fields.push(CollectedField {
                            response_key: response_key.clone(),
                            field,
                            selection_sets: vec![&field.selection_set],
                        }),
                    }
                }
                QuerySelection::FragmentSpread(spread) => {
                    if !self.included(&spread.directives)? {
                        continue;
                    }
                    let fragment = self
                        .fragments
                        .get(&spread.fragment_name)
                        .copied()
                        .ok_or_else(|| {
                            PlanError::Unplannable(format!(
                                "unknown fragment '{}'",
                                spread.fragment_name
                            ))
                        })?;
                    if visiting.contains(&spread.fragment_name) {
                        return Err(PlanError::Unplannable(format!(
                            "fragment '{}' spreads itself",
                            spread.fragment_name
                        )));
                    }
                    let TypeCondition::On(condition) = &fragment.type_condition;
                    check_type_condition(type_name, condition)?;
                    visiting.push(spread.fragment_name.clone());
                    self.collect_into(type_name, &fragment.selection_set, fields, visiting)?;
                    visiting.pop();
                }
                QuerySelection::InlineFragment(inline) => {
                    if !self.included(&inline.directives)? {
                        continue;
                    }
                    if let Some(TypeCondition::On(condition)) = &inline.type_condition {
                        check_type_condition(type_name, condition)?;
                    }
                    self.collect_into(type_name, &inline.selection_set, fields, visiting)?;
                }
            }
        }
        Ok(())
    }

    /// Evaluate `@skip` and `@include`.
    fn included(&self, directives: &[Directive<'q, String>]) -> Result<bool, PlanError> {
        for directive in directives {
            let expected = match directive.name.as_str() {
                "skip" => false,
                "include" => true,
                _ => continue,
            };
            let condition = directive
                .arguments
                .iter()
                .find(|(name, _)| name == "if")
                .map(|(_, value)| self.condition(value))
                .transpose()?
                .ok_or_else(|| {
                    PlanError::Unplannable(format!("@{} requires an 'if' argument", directive.name))
                })?;
            if condition != expected {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn condition(&self, value: &QueryValue<'q, String>) -> Result<bool, PlanError> {
        match value {
            QueryValue::Boolean(value) => Ok(*value),
            QueryValue::Variable(name) => self
                .variables
                .get(name)
                .and_then(Value::as_bool)
                .or_else(|| self.boolean_defaults.get(name).copied())
                .ok_or_else(|| {
                    PlanError::Unplannable(format!("variable '${name}' must be a boolean"))
                }),
            _ => Err(PlanError::Unplannable(
                "@skip/@include condition must be a boolean".to_string(),
            )),
        }
    }
}

fn check_type_condition(type_name: &str, condition: &str) -> Result<(), PlanError> {
    if condition == type_name {
        Ok(())
    } else {
        Err(PlanError::Unplannable(format!(
            "type condition '{condition}' on '{type_name}' needs abstract types, which are not supported"
        )))
    }
}

/// Precedence entries that name a subgraph missing from the snapshot.
pub fn unknown_precedence_targets(
    ownership: &OwnershipConfig,
    snapshot: &RegistrySnapshot,
) -> BTreeMap<String, String> {
    ownership
        .precedence
        .iter()
        .filter(|(_, subgraph)| snapshot.get(subgraph).is_none())
        .map(|(coordinate, subgraph)| (coordinate.clone(), subgraph.clone()))
        .collect()
}
