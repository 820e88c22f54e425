use std::collections::HashSet;

use crate::meta_model::{SchemaView, TypeDef};

/// A type is hidden when every index backing it has no reachable query
/// cluster, or when it only ever appears as a derived wrapper around
/// already-hidden types. Computed once per `SchemaView` and cheap to
/// recompute, since schema projection happens once per process startup.
pub struct HiddenTypeGate {
    hidden: HashSet<String>,
}

impl HiddenTypeGate {
    pub fn compute(view: &SchemaView) -> Self {
        let mut hidden = HashSet::new();

        for type_def in view.types() {
            if is_directly_hidden(view, type_def) {
                hidden.insert(type_def.name.clone());
            }
        }

        // Hiding is transitive: a type whose every relationship field (and
        // every other field with a user-defined return type) points only at
        // already-hidden types is itself unreachable from any visible root,
        // so it too is hidden. Iterate to a fixed point since hiding one
        // type can newly hide another that referenced only it.
        loop {
            let mut changed = false;
            for type_def in view.types() {
                if hidden.contains(&type_def.name) {
                    continue;
                }
                if !type_def.fields.is_empty()
                    && type_def
                        .fields
                        .iter()
                        .filter_map(|f| f.relationship.as_ref())
                        .all(|rel| hidden.contains(&rel.target_type))
                    && type_def.fields.iter().any(|f| f.relationship.is_some())
                    && type_def
                        .fields
                        .iter()
                        .filter(|f| f.relationship.is_none())
                        .all(|f| hidden.contains(&f.declared_type))
                {
                    hidden.insert(type_def.name.clone());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        Self { hidden }
    }

    pub fn is_hidden(&self, type_name: &str) -> bool {
        self.hidden.contains(type_name)
    }

    pub fn is_visible(&self, type_name: &str) -> bool {
        !self.is_hidden(type_name)
    }

    pub fn hidden_types(&self) -> impl Iterator<Item = &str> {
        self.hidden.iter().map(|s| s.as_str())
    }
}

fn is_directly_hidden(view: &SchemaView, type_def: &TypeDef) -> bool {
    match &type_def.backing_index {
        None => false,
        Some(index_name) => match view.get_index_definition(index_name) {
            None => true,
            Some(index_def) => index_def.query_cluster.is_none(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta_model::{
        FieldDef, IndexDefinition, SchemaConfig, TypeKind,
    };
    use std::collections::HashMap;

    fn type_with_index(name: &str, backing_index: Option<&str>) -> TypeDef {
        TypeDef {
            name: name.to_string(),
            kind: TypeKind::Object,
            fields: vec![],
            enum_value_overrides: vec![],
            backing_index: backing_index.map(str::to_string),
        }
    }

    #[test]
    fn hides_types_whose_index_has_no_query_cluster() {
        let config = SchemaConfig {
            types: vec![type_with_index("Widget", Some("widgets"))],
            index_definitions: HashMap::from([(
                "widgets".to_string(),
                IndexDefinition {
                    logical_name: "widgets".to_string(),
                    rollover: None,
                    routing_field: None,
                    query_cluster: None,
                },
            )]),
        };
        let view = SchemaView::from_config(config).unwrap();
        let gate = HiddenTypeGate::compute(&view);
        assert!(gate.is_hidden("Widget"));
    }

    #[test]
    fn keeps_types_with_a_reachable_query_cluster_visible() {
        let config = SchemaConfig {
            types: vec![type_with_index("Widget", Some("widgets"))],
            index_definitions: HashMap::from([(
                "widgets".to_string(),
                IndexDefinition {
                    logical_name: "widgets".to_string(),
                    rollover: None,
                    routing_field: None,
                    query_cluster: Some("main".to_string()),
                },
            )]),
        };
        let view = SchemaView::from_config(config).unwrap();
        let gate = HiddenTypeGate::compute(&view);
        assert!(gate.is_visible("Widget"));
    }

    #[test]
    fn types_with_no_backing_index_are_never_hidden_by_that_rule_alone() {
        let config = SchemaConfig {
            types: vec![type_with_index("ComputedSummary", None)],
            index_definitions: HashMap::new(),
        };
        let view = SchemaView::from_config(config).unwrap();
        let gate = HiddenTypeGate::compute(&view);
        assert!(gate.is_visible("ComputedSummary"));
    }

    #[test]
    fn hiding_is_transitive_through_relationship_fields() {
        let hidden_index = IndexDefinition {
            logical_name: "manufacturers".to_string(),
            rollover: None,
            routing_field: None,
            query_cluster: None,
        };
        let visible_widget_index = IndexDefinition {
            logical_name: "widgets".to_string(),
            rollover: None,
            routing_field: None,
            query_cluster: None,
        };
        let mut manufacturer = type_with_index("Manufacturer", Some("manufacturers"));
        let mut widget = type_with_index("Widget", Some("widgets"));
        widget.fields.push(FieldDef {
            public_name: "manufacturer".to_string(),
            name_in_index: None,
            declared_type: "Manufacturer".to_string(),
            relationship: Some(crate::meta_model::Relationship {
                foreign_key_path: crate::property::FieldPath::single("manufacturer_id"),
                direction: crate::meta_model::RelationshipDirection::Out,
                cardinality: crate::meta_model::Cardinality::One,
                target_type: "Manufacturer".to_string(),
                additional_filter: None,
            }),
            graphql_only: false,
            alternate_subfields: HashMap::new(),
            list_element_kind: None,
        });
        manufacturer.fields = vec![];

        let config = SchemaConfig {
            types: vec![manufacturer, widget],
            index_definitions: HashMap::from([
                ("manufacturers".to_string(), hidden_index),
                ("widgets".to_string(), visible_widget_index),
            ]),
        };
        let view = SchemaView::from_config(config).unwrap();
        let gate = HiddenTypeGate::compute(&view);
        assert!(gate.is_hidden("Manufacturer"));
        assert!(gate.is_hidden("Widget"));
    }
}
