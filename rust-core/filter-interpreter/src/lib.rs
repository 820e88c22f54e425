mod compile;
mod error;
mod hooks;
mod tree;

pub use compile::compile;
pub use error::FilterError;
pub use hooks::{extract_range_bounds, extract_routing_values, RangeBounds};
pub use tree::{FilterOutcome, FilterTree, LeafOp, LeafPredicate};

#[cfg(test)]
mod tests {
    use super::*;
    use schema_view::{
        Cardinality, FieldDef, FieldPath, IndexDefinition, ListElementKind, Relationship,
        RelationshipDirection, SchemaConfig, SchemaView, TypeDef, TypeKind,
    };
    use serde_json::{json, Value};
    use std::collections::HashMap;

    fn scalar_field(name: &str) -> FieldDef {
        FieldDef {
            public_name: name.to_string(),
            name_in_index: None,
            declared_type: "String".to_string(),
            relationship: None,
            graphql_only: false,
            alternate_subfields: HashMap::new(),
            list_element_kind: None,
        }
    }

    fn list_field(name: &str, declared_type: &str, kind: ListElementKind) -> FieldDef {
        FieldDef {
            public_name: name.to_string(),
            name_in_index: None,
            declared_type: declared_type.to_string(),
            relationship: None,
            graphql_only: false,
            alternate_subfields: HashMap::new(),
            list_element_kind: Some(kind),
        }
    }

    fn widget_schema() -> SchemaView {
        let nickname = list_field("nicknames", "String", ListElementKind::Scalar);
        let player = TypeDef {
            name: "Player".to_string(),
            kind: TypeKind::Object,
            fields: vec![
                scalar_field("name"),
                scalar_field("score"),
                list_field("nicknames", "String", ListElementKind::Scalar),
            ],
            enum_value_overrides: vec![],
            backing_index: None,
        };
        let players_nested = list_field("current_players_nested", "Player", ListElementKind::Nested);
        let manufacturer_rel = FieldDef {
            public_name: "manufacturer".to_string(),
            name_in_index: None,
            declared_type: "Manufacturer".to_string(),
            relationship: Some(Relationship {
                foreign_key_path: FieldPath::single("manufacturer_id"),
                direction: RelationshipDirection::Out,
                cardinality: Cardinality::One,
                target_type: "Manufacturer".to_string(),
                additional_filter: None,
            }),
            graphql_only: false,
            alternate_subfields: HashMap::new(),
            list_element_kind: None,
        };
        let widget = TypeDef {
            name: "Widget".to_string(),
            kind: TypeKind::Object,
            fields: vec![
                scalar_field("name"),
                scalar_field("cost"),
                scalar_field("created_at"),
                scalar_field("region"),
                nickname,
                players_nested,
                manufacturer_rel,
            ],
            enum_value_overrides: vec![],
            backing_index: Some("widgets".to_string()),
        };
        let manufacturer = TypeDef {
            name: "Manufacturer".to_string(),
            kind: TypeKind::Object,
            fields: vec![scalar_field("id")],
            enum_value_overrides: vec![],
            backing_index: None,
        };

        SchemaView::from_config(SchemaConfig {
            types: vec![widget, player, manufacturer],
            index_definitions: HashMap::from([(
                "widgets".to_string(),
                IndexDefinition {
                    logical_name: "widgets".to_string(),
                    rollover: None,
                    routing_field: Some(FieldPath::single("region")),
                    query_cluster: Some("main".to_string()),
                },
            )]),
        })
        .unwrap()
    }

    #[test]
    fn empty_filter_is_true() {
        let schema = widget_schema();
        let outcome = compile(&schema, "Widget", &json!(null)).unwrap();
        assert_eq!(outcome, FilterOutcome::True);

        let outcome = compile(&schema, "Widget", &json!({})).unwrap();
        assert_eq!(outcome, FilterOutcome::True);
    }

    #[test]
    fn simple_equal_to_any_of_compiles_to_a_leaf() {
        let schema = widget_schema();
        let outcome = compile(
            &schema,
            "Widget",
            &json!({"name": {"equal_to_any_of": ["Acme"]}}),
        )
        .unwrap();
        match outcome {
            FilterOutcome::Node(FilterTree::Leaf(leaf)) => {
                assert_eq!(leaf.path, FieldPath::single("name"));
                assert_eq!(leaf.op, LeafOp::EqualToAnyOf(vec![json!("Acme")]));
            }
            other => panic!("expected a single leaf, got {other:?}"),
        }
    }

    #[test]
    fn sibling_keys_are_anded_implicitly() {
        let schema = widget_schema();
        let outcome = compile(
            &schema,
            "Widget",
            &json!({
                "name": {"equal_to_any_of": ["Acme"]},
                "cost": {"gt": 1},
            }),
        )
        .unwrap();
        match outcome {
            FilterOutcome::Node(FilterTree::AllOf(children)) => assert_eq!(children.len(), 2),
            other => panic!("expected AllOf, got {other:?}"),
        }
    }

    #[test]
    fn not_of_true_is_false_and_not_of_false_is_true() {
        let schema = widget_schema();
        assert_eq!(
            compile(&schema, "Widget", &json!({"not": {}})).unwrap(),
            FilterOutcome::False
        );
        assert_eq!(
            compile(&schema, "Widget", &json!({"not": {"any_of": []}})).unwrap(),
            FilterOutcome::True
        );
    }

    #[test]
    fn any_of_empty_is_false_all_of_empty_is_true() {
        let schema = widget_schema();
        assert_eq!(
            compile(&schema, "Widget", &json!({"any_of": []})).unwrap(),
            FilterOutcome::False
        );
        assert_eq!(
            compile(&schema, "Widget", &json!({"all_of": []})).unwrap(),
            FilterOutcome::True
        );
    }

    #[test]
    fn equal_to_any_of_with_null_matches_null_or_values() {
        let schema = widget_schema();
        let outcome = compile(
            &schema,
            "Widget",
            &json!({"name": {"equal_to_any_of": [null, "Acme"]}}),
        )
        .unwrap();
        match outcome {
            FilterOutcome::Node(FilterTree::Leaf(leaf)) => {
                assert_eq!(
                    leaf.op,
                    LeafOp::EqualToAnyOf(vec![Value::Null, json!("Acme")])
                );
            }
            other => panic!("expected a leaf, got {other:?}"),
        }
    }

    #[test]
    fn not_equal_to_any_of_null_means_non_null() {
        let schema = widget_schema();
        let outcome = compile(
            &schema,
            "Widget",
            &json!({"name": {"not": {"equal_to_any_of": [null]}}}),
        )
        .unwrap();
        assert!(matches!(
            outcome,
            FilterOutcome::Node(FilterTree::Not(_))
        ));
    }

    #[test]
    fn any_satisfy_on_nested_list_wraps_in_nested_node() {
        let schema = widget_schema();
        let outcome = compile(
            &schema,
            "Widget",
            &json!({
                "current_players_nested": {
                    "any_satisfy": {"name": {"equal_to_any_of": ["Ada"]}}
                }
            }),
        )
        .unwrap();
        match outcome {
            FilterOutcome::Node(FilterTree::Nested { path, body }) => {
                assert_eq!(path, FieldPath::single("current_players_nested"));
                assert!(matches!(*body, FilterTree::Leaf(_)));
            }
            other => panic!("expected Nested, got {other:?}"),
        }
    }

    /// Scenario 4 (spec §8): `any_satisfy`'s "single datastore clause"
    /// requirement means the `nested` wrapper is the one clause, not that
    /// the body itself must be a single leaf — `all_of`/`any_of` siblings
    /// inside the body still render within that one `nested` query, giving
    /// same-element semantics across every sibling predicate.
    #[test]
    fn any_satisfy_on_nested_list_allows_multi_clause_body() {
        let schema = widget_schema();
        let outcome = compile(
            &schema,
            "Widget",
            &json!({
                "current_players_nested": {
                    "any_satisfy": {
                        "name": {"equal_to_any_of": ["Babe Truth"]},
                        "nicknames": {"any_satisfy": {"equal_to_any_of": ["Bambino"]}},
                    }
                }
            }),
        )
        .unwrap();
        match outcome {
            FilterOutcome::Node(FilterTree::Nested { path, body }) => {
                assert_eq!(path, FieldPath::single("current_players_nested"));
                assert!(matches!(*body, FilterTree::AllOf(ref children) if children.len() == 2));
            }
            other => panic!("expected Nested wrapping an AllOf, got {other:?}"),
        }
    }

    #[test]
    fn any_satisfy_on_nested_list_rejects_not() {
        let schema = widget_schema();
        let result = compile(
            &schema,
            "Widget",
            &json!({
                "current_players_nested": {
                    "any_satisfy": {"not": {"name": {"equal_to_any_of": ["Ada"]}}}
                }
            }),
        );
        assert!(matches!(
            result,
            Err(FilterError::DisallowedAnySatisfyShape(_))
        ));
    }

    #[test]
    fn any_satisfy_on_scalar_list_needs_no_nested_wrapper() {
        let schema = widget_schema();
        let outcome = compile(
            &schema,
            "Widget",
            &json!({"nicknames": {"any_satisfy": {"equal_to_any_of": ["Red"]}}}),
        )
        .unwrap();
        assert!(matches!(outcome, FilterOutcome::Node(FilterTree::Leaf(_))));
    }

    #[test]
    fn count_compiles_to_a_length_predicate() {
        let schema = widget_schema();
        let outcome = compile(
            &schema,
            "Widget",
            &json!({"nicknames": {"count": {"gt": 0}}}),
        )
        .unwrap();
        match outcome {
            FilterOutcome::Node(FilterTree::LengthPredicate { path, .. }) => {
                assert_eq!(path, FieldPath::single("nicknames"));
            }
            other => panic!("expected LengthPredicate, got {other:?}"),
        }
    }

    #[test]
    fn unknown_field_is_an_error() {
        let schema = widget_schema();
        let result = compile(&schema, "Widget", &json!({"not_a_field": {"equal_to_any_of": [1]}}));
        assert!(result.is_err());
    }

    #[test]
    fn routing_hook_extracts_equal_to_any_of_on_routing_field() {
        let schema = widget_schema();
        let outcome = compile(
            &schema,
            "Widget",
            &json!({
                "region": {"equal_to_any_of": ["us-east"]},
                "name": {"equal_to_any_of": ["Acme"]},
            }),
        )
        .unwrap();
        let tree = outcome.into_tree().unwrap();
        let values = extract_routing_values(&tree, &FieldPath::single("region")).unwrap();
        assert_eq!(values, vec![json!("us-east")]);
    }

    #[test]
    fn rollover_hook_extracts_range_bounds_on_time_field() {
        let schema = widget_schema();
        let outcome = compile(
            &schema,
            "Widget",
            &json!({"created_at": {"gte": "2024-01-01", "lt": "2024-02-01"}}),
        )
        .unwrap();
        let tree = outcome.into_tree().unwrap();
        let bounds = extract_range_bounds(&tree, &FieldPath::single("created_at")).unwrap();
        assert_eq!(bounds.gte, Some(json!("2024-01-01")));
        assert_eq!(bounds.lt, Some(json!("2024-02-01")));
    }
}
