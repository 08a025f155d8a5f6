use std::collections::{BTreeMap, BTreeSet};

use graphql_parser::schema::{
    Definition, Directive, Field, ObjectType, ObjectTypeExtension, Type, TypeDefinition,
    TypeExtension, Value, parse_schema,
};

use crate::error::RegistryError;

/// The part of a subgraph's SDL the planner needs: object types, their fields
/// and the federation directives that turn them into entities.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubgraphSchema {
    query_type: String,
    mutation_type: String,
    types: BTreeMap<String, ObjectTypeDef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObjectTypeDef {
    pub name: String,
    /// Only declared through `extend type`, `@extends` or a non-resolvable `@key`.
    pub extension: bool,
    /// Fields of the first `@key` directive, in declaration order.
    pub key_fields: Vec<String>,
    pub fields: Vec<FieldDef>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub type_name: String,
    pub is_list: bool,
    pub arguments: Vec<ArgumentDef>,
    pub external: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArgumentDef {
    pub name: String,
    /// GraphQL spelling of the argument type, e.g. `ID!`.
    pub type_text: String,
    pub required: bool,
}

impl Default for SubgraphSchema {
    fn default() -> Self {
        SubgraphSchema {
            query_type: "Query".to_string(),
            mutation_type: "Mutation".to_string(),
            types: BTreeMap::new(),
        }
    }
}

impl SubgraphSchema {
    pub fn parse(subgraph: &str, sdl: &str) -> Result<Self, RegistryError> {
        let document = parse_schema::<String>(sdl).map_err(|e| RegistryError::InvalidSchema {
            subgraph: subgraph.to_string(),
            reason: e.to_string(),
        })?;

        let mut schema = SubgraphSchema::default();

        for definition in &document.definitions {
            match definition {
                Definition::SchemaDefinition(root) => {
                    if let Some(query) = &root.query {
                        schema.query_type = query.clone();
                    }
                    if let Some(mutation) = &root.mutation {
                        schema.mutation_type = mutation.clone();
                    }
                }
                Definition::TypeDefinition(TypeDefinition::Object(object)) => {
                    schema.add_object(object);
                }
                Definition::TypeExtension(TypeExtension::Object(extension)) => {
                    schema.add_extension(extension);
                }
                _ => {}
            }
        }

        Ok(schema)
    }

    pub fn query_type(&self) -> &str {
        &self.query_type
    }

    pub fn mutation_type(&self) -> &str {
        &self.mutation_type
    }

    pub fn object(&self, name: &str) -> Option<&ObjectTypeDef> {
        self.types.get(name)
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectTypeDef> {
        self.types.values()
    }

    pub fn is_root_type(&self, name: &str) -> bool {
        name == self.query_type || name == self.mutation_type
    }

    /// Object types this subgraph defines itself, excluding root types and stubs.
    pub fn defined_types(&self) -> BTreeSet<String> {
        self.types
            .values()
            .filter(|object| !object.extension && !self.is_root_type(&object.name))
            .map(|object| object.name.clone())
            .collect()
    }

    /// The field definition if this subgraph can resolve `type_name.field` itself.
    pub fn resolvable_field(&self, type_name: &str, field: &str) -> Option<&FieldDef> {
        self.types
            .get(type_name)?
            .field(field)
            .filter(|definition| !definition.external)
    }

    /// Any declaration of the field, `@external` ones included.
    pub fn declared_field(&self, type_name: &str, field: &str) -> Option<&FieldDef> {
        self.types.get(type_name)?.field(field)
    }

    /// First root query field that returns `type_name` and takes `key` as its only
    /// required argument.
    pub fn lookup_field(&self, type_name: &str, key: &str) -> Option<&FieldDef> {
        self.types.get(&self.query_type)?.fields.iter().find(|field| {
            field.type_name == type_name
                && !field.is_list
                && field.arguments.iter().any(|arg| arg.name == key)
                && field
                    .arguments
                    .iter()
                    .all(|arg| arg.name == key || !arg.required)
        })
    }

    fn add_object(&mut self, object: &ObjectType<'_, String>) {
        let stub = has_directive(&object.directives, "extends") || !key_resolvable(&object.directives);
        let entry = self.entry(&object.name, stub);
        if !stub {
            entry.extension = false;
        }
        entry.merge_directives(&object.directives);
        entry.merge_fields(&object.fields);
    }

    fn add_extension(&mut self, extension: &ObjectTypeExtension<'_, String>) {
        let entry = self.entry(&extension.name, true);
        entry.merge_directives(&extension.directives);
        entry.merge_fields(&extension.fields);
    }

    fn entry(&mut self, name: &str, extension: bool) -> &mut ObjectTypeDef {
        self.types
            .entry(name.to_string())
            .or_insert_with(|| ObjectTypeDef {
                name: name.to_string(),
                extension,
                key_fields: Vec::new(),
                fields: Vec::new(),
            })
    }
}

impl ObjectTypeDef {
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|field| field.name == name)
    }

    fn merge_directives(&mut self, directives: &[Directive<'_, String>]) {
        if !self.key_fields.is_empty() {
            return;
        }
        if let Some(Value::String(fields)) = directive_argument(directives, "key", "fields") {
            self.key_fields = fields.split_whitespace().map(str::to_string).collect();
        }
    }

    fn merge_fields(&mut self, fields: &[Field<'_, String>]) {
        for field in fields {
            let definition = field_def(field);
            match self.fields.iter_mut().find(|f| f.name == definition.name) {
                Some(existing) if existing.external && !definition.external => *existing = definition,
                Some(_) => {}
                None => self.fields.push(definition),
            }
        }
    }
}

fn field_def(field: &Field<'_, String>) -> FieldDef {
    let (type_name, is_list) = named_type(&field.field_type);
    FieldDef {
        name: field.name.clone(),
        type_name,
        is_list,
        arguments: field
            .arguments
            .iter()
            .map(|arg| ArgumentDef {
                name: arg.name.clone(),
                type_text: type_text(&arg.value_type),
                required: matches!(arg.value_type, Type::NonNullType(_))
                    && arg.default_value.is_none(),
            })
            .collect(),
        external: has_directive(&field.directives, "external"),
    }
}

fn named_type(field_type: &Type<'_, String>) -> (String, bool) {
    match field_type {
        Type::NamedType(name) => (name.clone(), false),
        Type::ListType(inner) => (named_type(inner).0, true),
        Type::NonNullType(inner) => named_type(inner),
    }
}

pub(crate) fn type_text(field_type: &Type<'_, String>) -> String {
    match field_type {
        Type::NamedType(name) => name.clone(),
        Type::ListType(inner) => format!("[{}]", type_text(inner)),
        Type::NonNullType(inner) => format!("{}!", type_text(inner)),
    }
}

fn has_directive(directives: &[Directive<'_, String>], name: &str) -> bool {
    directives.iter().any(|directive| directive.name == name)
}

fn directive_argument<'d, 'a>(
    directives: &'d [Directive<'a, String>],
    directive: &str,
    argument: &str,
) -> Option<&'d Value<'a, String>> {
    directives
        .iter()
        .find(|d| d.name == directive)?
        .arguments
        .iter()
        .find(|(name, _)| name == argument)
        .map(|(_, value)| value)
}

fn key_resolvable(directives: &[Directive<'_, String>]) -> bool {
    !matches!(
        directive_argument(directives, "key", "resolvable"),
        Some(Value::Boolean(false))
    )
}
