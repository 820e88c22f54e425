use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::property::FieldPath;

/// Top-level configuration as loaded from YAML/JSON (analogous to the
/// artifact an indexing pipeline would produce; schema-view only reads it).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaConfig {
    pub types: Vec<TypeDef>,

    #[serde(rename = "indexDefinitions")]
    #[serde(default)]
    pub index_definitions: HashMap<String, IndexDefinition>,
}

/// Kind of a GraphQL-visible type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeKind {
    Object,
    Interface,
    Union,
    Enum,
    Scalar,
    Input,
}

/// A type in the schema view: name, kind, and (for object/interface) fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypeDef {
    pub name: String,
    pub kind: TypeKind,

    #[serde(default)]
    pub fields: Vec<FieldDef>,

    /// For enum types: the index-side value each GraphQL enum value maps to,
    /// when it differs from the GraphQL name (spec §9, snake/camel duality).
    #[serde(default)]
    #[serde(rename = "enumValueOverrides")]
    pub enum_value_overrides: Vec<EnumValueOverride>,

    /// Logical index this type is backed by, if any. Types with no backing
    /// index (e.g. pure computed/GraphQL-only types) are never hidden by
    /// the Hidden-Type Gate on that basis alone.
    #[serde(default)]
    #[serde(rename = "backingIndex")]
    pub backing_index: Option<String>,
}

impl TypeDef {
    pub fn get_field(&self, public_name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.public_name == public_name)
    }

    pub fn to_index_value(&self, graphql_value: &str) -> String {
        self.enum_value_overrides
            .iter()
            .find(|o| o.graphql_value == graphql_value)
            .map(|o| o.index_value.clone())
            .unwrap_or_else(|| graphql_value.to_string())
    }

    pub fn to_graphql_value(&self, index_value: &str) -> String {
        self.enum_value_overrides
            .iter()
            .find(|o| o.index_value == index_value)
            .map(|o| o.graphql_value.clone())
            .unwrap_or_else(|| index_value.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumValueOverride {
    #[serde(rename = "indexValue")]
    pub index_value: String,
    #[serde(rename = "graphqlValue")]
    pub graphql_value: String,
}

/// A field on an object/interface type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub public_name: String,

    #[serde(default)]
    #[serde(rename = "nameInIndex")]
    pub name_in_index: Option<String>,

    #[serde(rename = "type")]
    pub declared_type: String,

    #[serde(default)]
    pub relationship: Option<Relationship>,

    /// Computed purely at the GraphQL layer; never sent to the datastore
    /// and never usable as a filter/sort/grouping field.
    #[serde(default)]
    #[serde(rename = "graphqlOnly")]
    pub graphql_only: bool,

    /// Alternate subfield mappings, e.g. a `.keyword` analyzed variant used
    /// for exact-match filters on an otherwise full-text field.
    #[serde(default)]
    #[serde(rename = "alternateSubfields")]
    pub alternate_subfields: HashMap<String, String>,

    /// Whether this field (and its declared_type, if a list) is stored as a
    /// datastore "nested" document rather than flattened into the parent.
    #[serde(default)]
    #[serde(rename = "listElementKind")]
    pub list_element_kind: Option<ListElementKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListElementKind {
    /// A list of scalars, e.g. `tags: [String]`.
    Scalar,
    /// A list of flattened objects: conjunction happens at field level.
    Object,
    /// A list of nested documents: the datastore "nested" query type is
    /// required to get same-element semantics for `any_satisfy`.
    Nested,
}

impl FieldDef {
    /// Name this field is addressed by inside the datastore query DSL.
    pub fn index_name(&self) -> &str {
        self.name_in_index.as_deref().unwrap_or(&self.public_name)
    }

    pub fn path(&self) -> FieldPath {
        FieldPath::single(self.index_name())
    }

    pub fn is_list(&self) -> bool {
        self.list_element_kind.is_some()
    }
}

/// Direction of a foreign-key relationship relative to the declaring type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipDirection {
    /// The declaring type holds the foreign key, pointing out to the target.
    Out,
    /// The target type holds a foreign key pointing back at the declaring type.
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    One,
    Many,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(rename = "foreignKeyPath")]
    pub foreign_key_path: FieldPath,
    pub direction: RelationshipDirection,
    pub cardinality: Cardinality,
    #[serde(rename = "targetType")]
    pub target_type: String,
    /// A static filter ANDed with any caller-supplied filter when resolving
    /// this edge (e.g. `dollar_widget` = cost equal_to_any_of [1.00]).
    /// AND semantics: see DESIGN.md open-question decision.
    #[serde(default)]
    #[serde(rename = "additionalFilter")]
    pub additional_filter: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloverGranularity {
    Day,
    Month,
    Year,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloverConfig {
    #[serde(rename = "timeField")]
    pub time_field: FieldPath,
    pub granularity: RolloverGranularity,
}

/// Everything schema-view knows about one logical index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub logical_name: String,

    #[serde(default)]
    pub rollover: Option<RolloverConfig>,

    #[serde(default)]
    #[serde(rename = "routingField")]
    pub routing_field: Option<FieldPath>,

    /// `None` means this index is unreachable for the current configuration
    /// (hidden — see Hidden-Type Gate).
    #[serde(default)]
    #[serde(rename = "queryCluster")]
    pub query_cluster: Option<String>,
}

impl IndexDefinition {
    /// The glob used to address this index's concrete shards, pruned by
    /// rollover slices matched against a time-range predicate elsewhere.
    pub fn index_pattern(&self) -> String {
        if self.rollover.is_some() {
            format!("{}_rollover__*", self.logical_name)
        } else {
            self.logical_name.clone()
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("type '{0}' has no field '{1}'")]
    UnknownField(String, String),
    #[error("type '{0}' declares relationship field '{1}' targeting unknown type '{2}'")]
    UnknownRelationshipTarget(String, String, String),
    #[error("failed to parse schema config: {0}")]
    Parse(String),
}

/// Read-only projection of the schema: types, fields, index definitions,
/// relationship directions. Constructed once per process and shared via
/// `Arc` across requests (§5: it is the process's cached, read-mostly
/// state alongside the rollover-index cache).
pub struct SchemaView {
    types: HashMap<String, TypeDef>,
    index_definitions: HashMap<String, IndexDefinition>,
}

impl SchemaView {
    pub fn from_config(config: SchemaConfig) -> Result<Self, SchemaError> {
        let types: HashMap<String, TypeDef> = config
            .types
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();

        for type_def in types.values() {
            for field in &type_def.fields {
                if let Some(rel) = &field.relationship {
                    if !types.contains_key(&rel.target_type) {
                        return Err(SchemaError::UnknownRelationshipTarget(
                            type_def.name.clone(),
                            field.public_name.clone(),
                            rel.target_type.clone(),
                        ));
                    }
                }
            }
        }

        Ok(Self {
            types,
            index_definitions: config.index_definitions,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, SchemaError> {
        let config: SchemaConfig =
            serde_yaml::from_str(content).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::from_config(config)
    }

    pub fn from_json(content: &str) -> Result<Self, SchemaError> {
        let config: SchemaConfig =
            serde_json::from_str(content).map_err(|e| SchemaError::Parse(e.to_string()))?;
        Self::from_config(config)
    }

    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.values()
    }

    pub fn get_index_definition(&self, logical_name: &str) -> Option<&IndexDefinition> {
        self.index_definitions.get(logical_name)
    }

    pub fn index_definitions(&self) -> impl Iterator<Item = &IndexDefinition> {
        self.index_definitions.values()
    }

    pub fn field(&self, type_name: &str, field_name: &str) -> Result<&FieldDef, SchemaError> {
        self.get_type(type_name)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))?
            .get_field(field_name)
            .ok_or_else(|| SchemaError::UnknownField(type_name.to_string(), field_name.to_string()))
    }
}
