//! Schema-level tests that don't need a live request cycle: what the
//! Hidden-Type Gate (spec §8 scenario 7) does to the assembled SDL, and
//! that every visible object type gets both root fields.

use std::collections::HashMap;
use std::sync::Arc;

use graphql_engine::config::{GraphqlEngineConfig, GroupingAdapterKind};
use graphql_engine::schema_builder::build_schema;
use schema_view::{
    Cardinality, FieldDef, FieldPath, HiddenTypeGate, IndexDefinition, Relationship,
    RelationshipDirection, SchemaConfig, SchemaView, TypeDef, TypeKind,
};

fn scalar_field(public_name: &str, declared_type: &str) -> FieldDef {
    FieldDef {
        public_name: public_name.to_string(),
        name_in_index: None,
        declared_type: declared_type.to_string(),
        relationship: None,
        graphql_only: false,
        alternate_subfields: HashMap::new(),
        list_element_kind: None,
    }
}

fn config() -> Arc<GraphqlEngineConfig> {
    Arc::new(GraphqlEngineConfig {
        timeout_in_ms: 60_000,
        default_page_size: 10,
        max_page_size: 100,
        index_definitions: HashMap::new(),
        sub_aggregation_grouping_adapter: GroupingAdapterKind::Composite,
        enforce_msearch_read_only: true,
        cluster_urls: HashMap::new(),
    })
}

fn widget_with_manufacturer_relationship() -> TypeDef {
    TypeDef {
        name: "Widget".to_string(),
        kind: TypeKind::Object,
        fields: vec![
            scalar_field("id", "ID"),
            scalar_field("name", "String"),
            FieldDef {
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
            },
        ],
        enum_value_overrides: vec![],
        backing_index: Some("widgets".to_string()),
    }
}

fn manufacturer() -> TypeDef {
    TypeDef {
        name: "Manufacturer".to_string(),
        kind: TypeKind::Object,
        fields: vec![scalar_field("id", "ID"), scalar_field("name", "String")],
        enum_value_overrides: vec![],
        backing_index: Some("manufacturers".to_string()),
    }
}

/// A `Manufacturer` index with no reachable query cluster hides the type
/// entirely: no `Manufacturer` object, no `manufacturers`/
/// `manufacturer_aggregations` root fields, and the `manufacturer` field on
/// `Widget` disappears along with it (spec §8 scenario 7, §4.4's
/// transitive-hiding rule).
#[test]
fn hidden_types_disappear_from_the_schema_entirely() {
    let schema_view = SchemaView::from_config(SchemaConfig {
        types: vec![widget_with_manufacturer_relationship(), manufacturer()],
        index_definitions: HashMap::from([
            (
                "widgets".to_string(),
                IndexDefinition { logical_name: "widgets".to_string(), rollover: None, routing_field: None, query_cluster: Some("main".to_string()) },
            ),
            (
                "manufacturers".to_string(),
                IndexDefinition { logical_name: "manufacturers".to_string(), rollover: None, routing_field: None, query_cluster: None },
            ),
        ]),
    })
    .unwrap();
    let hidden = HiddenTypeGate::compute(&schema_view);
    assert!(hidden.is_hidden("Manufacturer"), "sanity: index with no query cluster must be hidden");

    let schema = build_schema(Arc::new(schema_view), Arc::new(hidden), config()).unwrap();
    let sdl = schema.sdl();

    assert!(!sdl.contains("type Manufacturer "), "hidden type must not be registered:\n{sdl}");
    assert!(!sdl.contains("manufacturers("), "root connection field for a hidden type must not exist");
    assert!(!sdl.contains("manufacturer_aggregations"), "root aggregation field for a hidden type must not exist");
    assert!(!sdl.contains("manufacturer:"), "relationship field pointing at a hidden type must not exist");
    assert!(sdl.contains("type Widget "), "the referencing type itself stays visible");
}

/// With both indexes reachable, every visible object type gets a node
/// object, a relay connection/edge pair, and both root fields.
#[test]
fn visible_types_expose_connection_and_aggregation_root_fields() {
    let schema_view = SchemaView::from_config(SchemaConfig {
        types: vec![widget_with_manufacturer_relationship(), manufacturer()],
        index_definitions: HashMap::from([
            (
                "widgets".to_string(),
                IndexDefinition { logical_name: "widgets".to_string(), rollover: None, routing_field: None, query_cluster: Some("main".to_string()) },
            ),
            (
                "manufacturers".to_string(),
                IndexDefinition { logical_name: "manufacturers".to_string(), rollover: None, routing_field: None, query_cluster: Some("main".to_string()) },
            ),
        ]),
    })
    .unwrap();
    let hidden = HiddenTypeGate::compute(&schema_view);
    assert!(hidden.is_visible("Manufacturer"));

    let schema = build_schema(Arc::new(schema_view), Arc::new(hidden), config()).unwrap();
    let sdl = schema.sdl();

    for expected in [
        "type Widget ",
        "type Manufacturer ",
        "type WidgetConnection ",
        "type ManufacturerConnection ",
        "widgets(",
        "manufacturers(",
        "widget_aggregations",
        "manufacturer_aggregations",
        "manufacturer:",
    ] {
        assert!(sdl.contains(expected), "expected SDL to contain '{expected}':\n{sdl}");
    }
}
