use std::collections::BTreeSet;

use filter_interpreter::{compile, FilterOutcome, FilterTree, LeafOp, LeafPredicate};
use query_planner::{DatastoreQuery, IndexTarget, Pagination, RoutingSet};
use schema_view::{FieldPath, IndexDefinition, Relationship, RelationshipDirection, SchemaView};
use serde_json::Value;

use crate::error::EngineError;

/// Implicit AND of already-compiled outcomes — the relationship resolver
/// composes the base id/fk filter with `additional_filter` and the
/// caller's own filter the same way the interpreter composes sibling
/// predicates (spec §4.1 step 2), just one layer up, over outcomes that
/// are already compiled rather than raw JSON.
pub(crate) fn and_all(outcomes: Vec<FilterOutcome>) -> FilterOutcome {
    let mut children = Vec::new();
    for outcome in outcomes {
        match outcome {
            FilterOutcome::False => return FilterOutcome::False,
            FilterOutcome::True => continue,
            FilterOutcome::Node(tree) => children.push(tree),
        }
    }
    match children.len() {
        0 => FilterOutcome::True,
        1 => FilterOutcome::Node(children.into_iter().next().unwrap()),
        _ => FilterOutcome::Node(FilterTree::AllOf(children)),
    }
}

fn scalar_at(document: &Value, path: &FieldPath) -> Option<Value> {
    let mut current = document;
    for segment in path.segments() {
        current = current.get(segment)?;
    }
    if current.is_null() {
        None
    } else {
        Some(current.clone())
    }
}

/// Collects the distinct, non-null values at `path` across every parent
/// document, in first-seen order (stable for pagination/logging).
fn collect_distinct(parents: &[Value], path: &FieldPath) -> Vec<Value> {
    let mut seen = BTreeSet::new();
    let mut ordered = Vec::new();
    for parent in parents {
        if let Some(value) = scalar_at(parent, path) {
            let key = value.to_string();
            if seen.insert(key) {
                ordered.push(value);
            }
        }
    }
    ordered
}

/// Filters out stub documents created by a different source stream (spec
/// §4.6: validate the primary-source sentinel `__self` on every returned
/// document before handing it to the caller).
pub fn retain_primary_source(documents: Vec<Value>) -> Vec<Value> {
    documents
        .into_iter()
        .filter(|doc| doc.get("__self").and_then(Value::as_bool).unwrap_or(true))
        .collect()
}

/// Builds the one follow-up `DatastoreQuery` for a relationship hop across
/// a batch of sibling parent documents (spec §4.6). The fan-out bound
/// (distinct target index / routing signature / filter shape) falls out
/// naturally here: every parent sharing this field-resolution instance and
/// caller-supplied filter collapses into this single query, regardless of
/// how many parent documents there are.
pub fn plan_relationship_query(
    schema: &SchemaView,
    relationship: &Relationship,
    target_index: &IndexDefinition,
    parent_documents: &[Value],
    caller_filter: &Value,
    page_size: u32,
) -> Result<DatastoreQuery, EngineError> {
    let (key_field, collected) = match relationship.direction {
        RelationshipDirection::Out => {
            (FieldPath::single("id"), collect_distinct(parent_documents, &relationship.foreign_key_path))
        }
        RelationshipDirection::In => {
            (relationship.foreign_key_path.clone(), collect_distinct(parent_documents, &FieldPath::single("id")))
        }
    };

    let key_filter = if collected.is_empty() {
        FilterOutcome::False
    } else {
        FilterOutcome::Node(FilterTree::Leaf(LeafPredicate {
            path: key_field,
            op: LeafOp::EqualToAnyOf(collected.clone()),
        }))
    };

    let mut clauses = vec![key_filter];
    if let Some(additional) = &relationship.additional_filter {
        clauses.push(compile(schema, &relationship.target_type, additional)?);
    }
    clauses.push(compile(schema, &relationship.target_type, caller_filter)?);

    let routing = match relationship.direction {
        // `out` FK hops can route on the collected target ids directly.
        RelationshipDirection::Out => RoutingSet::Values(collected),
        // `in` FK hops address an unbounded fan of owners; no routing key
        // is knowable from the parent batch alone (spec §4.6).
        RelationshipDirection::In => RoutingSet::All,
    };

    Ok(DatastoreQuery {
        index_target: IndexTarget::Glob(target_index.index_pattern()),
        routing,
        filter: and_all(clauses),
        sort: vec![],
        pagination: Pagination::default(),
        aggregations: vec![],
        document_source: true,
        size: page_size,
        timeout_ms_share: u64::MAX,
        search_preference: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_view::Cardinality;
    use serde_json::json;

    fn manufacturer_relationship_out() -> Relationship {
        Relationship {
            foreign_key_path: FieldPath::single("manufacturer_id"),
            direction: RelationshipDirection::Out,
            cardinality: Cardinality::One,
            target_type: "Manufacturer".to_string(),
            additional_filter: None,
        }
    }

    fn components_relationship_in() -> Relationship {
        Relationship {
            foreign_key_path: FieldPath::single("widget_id"),
            direction: RelationshipDirection::In,
            cardinality: Cardinality::Many,
            target_type: "Component".to_string(),
            additional_filter: None,
        }
    }

    fn index() -> IndexDefinition {
        IndexDefinition { logical_name: "manufacturers".to_string(), rollover: None, routing_field: None, query_cluster: Some("main".to_string()) }
    }

    fn schema() -> SchemaView {
        use schema_view::{SchemaConfig, TypeDef, TypeKind};
        SchemaView::from_config(SchemaConfig {
            types: vec![
                TypeDef { name: "Manufacturer".to_string(), kind: TypeKind::Object, fields: vec![], enum_value_overrides: vec![], backing_index: Some("manufacturers".to_string()) },
                TypeDef { name: "Component".to_string(), kind: TypeKind::Object, fields: vec![], enum_value_overrides: vec![], backing_index: Some("components".to_string()) },
            ],
            index_definitions: Default::default(),
        })
        .unwrap()
    }

    #[test]
    fn out_direction_filters_on_id_and_routes_by_collected_values() {
        let parents = vec![json!({"manufacturer_id": "m1"}), json!({"manufacturer_id": "m2"}), json!({"manufacturer_id": "m1"})];
        let query = plan_relationship_query(&schema(), &manufacturer_relationship_out(), &index(), &parents, &Value::Null, 10).unwrap();

        assert_eq!(query.routing, RoutingSet::Values(vec![json!("m1"), json!("m2")]));
        match query.filter {
            FilterOutcome::Node(FilterTree::Leaf(LeafPredicate { path, op: LeafOp::EqualToAnyOf(values) })) => {
                assert_eq!(path, FieldPath::single("id"));
                assert_eq!(values, vec![json!("m1"), json!("m2")]);
            }
            other => panic!("expected a single equal_to_any_of leaf, got {other:?}"),
        }
    }

    #[test]
    fn in_direction_filters_on_fk_field_and_cannot_route() {
        let parents = vec![json!({"id": "w1"}), json!({"id": "w2"})];
        let query = plan_relationship_query(&schema(), &components_relationship_in(), &index(), &parents, &Value::Null, 10).unwrap();

        assert_eq!(query.routing, RoutingSet::All);
        match query.filter {
            FilterOutcome::Node(FilterTree::Leaf(LeafPredicate { path, .. })) => {
                assert_eq!(path, FieldPath::single("widget_id"));
            }
            other => panic!("expected a leaf on widget_id, got {other:?}"),
        }
    }

    #[test]
    fn no_usable_keys_short_circuits_the_whole_query() {
        let parents = vec![json!({"other_field": "x"})];
        let query = plan_relationship_query(&schema(), &manufacturer_relationship_out(), &index(), &parents, &Value::Null, 10).unwrap();
        assert!(query.short_circuit());
    }

    #[test]
    fn additional_filter_is_anded_with_the_collected_key_filter() {
        let mut relationship = manufacturer_relationship_out();
        relationship.additional_filter = Some(json!({"cost": {"equal_to_any_of": [1.0]}}));
        let parents = vec![json!({"manufacturer_id": "m1"})];
        let query = plan_relationship_query(&schema(), &relationship, &index(), &parents, &Value::Null, 10).unwrap();

        match query.filter {
            FilterOutcome::Node(FilterTree::AllOf(children)) => assert_eq!(children.len(), 2),
            other => panic!("expected both the id filter and additional_filter ANDed, got {other:?}"),
        }
    }

    #[test]
    fn retain_primary_source_drops_stub_documents_from_other_streams() {
        let docs = vec![json!({"__self": true, "id": "a"}), json!({"__self": false, "id": "b"}), json!({"id": "c"})];
        let kept = retain_primary_source(docs);
        assert_eq!(kept.len(), 2, "docs with __self:true or no sentinel at all are kept");
    }
}
