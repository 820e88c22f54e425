//! End-to-end tests of the GraphQL Executor Bridge (spec §8 scenarios 1-3):
//! a built `Schema` executed against a scripted datastore client, asserting
//! on how many msearch calls actually reach the client rather than just on
//! the decoded GraphQL response.

use std::collections::HashMap;
use std::sync::Arc;

use async_graphql::dataloader::DataLoader;
use datastore_client::{Deadline, MsearchDispatcher, MsearchResponse, ScriptedDatastoreClient};
use graphql_engine::config::{GraphqlEngineConfig, GroupingAdapterKind};
use graphql_engine::plan_registry::PlanRegistry;
use graphql_engine::schema_builder::{build_schema, RelationshipLoader};
use query_planner::CompositeAdapter;
use schema_view::{
    Cardinality, FieldDef, FieldPath, HiddenTypeGate, IndexDefinition, Relationship,
    RelationshipDirection, SchemaConfig, SchemaView, TypeDef, TypeKind,
};
use serde_json::json;

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

fn index(logical_name: &str, routing_field: Option<&str>) -> IndexDefinition {
    IndexDefinition {
        logical_name: logical_name.to_string(),
        rollover: None,
        routing_field: routing_field.map(|f| FieldPath::single(f)),
        query_cluster: Some("main".to_string()),
    }
}

fn config() -> GraphqlEngineConfig {
    GraphqlEngineConfig {
        timeout_in_ms: 60_000,
        default_page_size: 10,
        max_page_size: 100,
        index_definitions: HashMap::new(),
        sub_aggregation_grouping_adapter: GroupingAdapterKind::Composite,
        enforce_msearch_read_only: true,
        cluster_urls: HashMap::from([("main".to_string(), "http://localhost:9200".to_string())]),
    }
}

/// Builds a schema with a single `Widget` type rooted at the `widgets`
/// index, optionally adding a `manufacturer` relationship field.
fn schema_view(with_relationship: bool) -> Arc<SchemaView> {
    let mut widget = TypeDef {
        name: "Widget".to_string(),
        kind: TypeKind::Object,
        fields: vec![
            scalar_field("id", "ID"),
            scalar_field("name", "String"),
            scalar_field("region", "String"),
        ],
        enum_value_overrides: vec![],
        backing_index: Some("widgets".to_string()),
    };
    let mut types = vec![];
    if with_relationship {
        widget.fields.push(FieldDef {
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
        });
        types.push(TypeDef {
            name: "Manufacturer".to_string(),
            kind: TypeKind::Object,
            fields: vec![scalar_field("id", "ID"), scalar_field("name", "String")],
            enum_value_overrides: vec![],
            backing_index: Some("manufacturers".to_string()),
        });
    }
    types.push(widget);

    let mut index_definitions = HashMap::from([("widgets".to_string(), index("widgets", Some("region")))]);
    if with_relationship {
        index_definitions.insert("manufacturers".to_string(), index("manufacturers", None));
    }

    Arc::new(SchemaView::from_config(SchemaConfig { types, index_definitions }).unwrap())
}

/// Wires up everything a request needs: the dynamic `Schema`, a
/// `PlanRegistry` backed by a `ScriptedDatastoreClient`, and a
/// `RelationshipLoader` data loader, mirroring `bin/server.rs`'s
/// per-request setup.
fn build_request(
    schema_view: Arc<SchemaView>,
    client: Arc<ScriptedDatastoreClient>,
    config: Arc<GraphqlEngineConfig>,
    query: &str,
) -> async_graphql::Request {
    let dispatcher = Arc::new(MsearchDispatcher::new(client, config.cluster_urls.clone(), Arc::new(CompositeAdapter)));
    let registry = Arc::new(PlanRegistry::new(dispatcher, Deadline::starting_now(config.timeout_in_ms)));
    let loader = Arc::new(DataLoader::new(
        RelationshipLoader::new(schema_view.clone(), registry.clone(), config.clone()),
        tokio::spawn,
    ));
    async_graphql::Request::new(query).data(registry).data(loader)
}

/// Spec §8 scenario 1: a plain root connection query dispatches exactly
/// one msearch call, and the decoded hits come back as GraphQL nodes.
#[tokio::test]
async fn root_connection_query_dispatches_a_single_msearch_call() {
    let schema_view = schema_view(false);
    let hidden = Arc::new(HiddenTypeGate::compute(&schema_view));
    let config = Arc::new(config());
    let schema = build_schema(schema_view.clone(), hidden, config.clone()).unwrap();

    let client = Arc::new(ScriptedDatastoreClient::new(vec![vec![MsearchResponse::Ok(json!({
        "hits": {"hits": [
            {"_source": {"id": "w1", "name": "Anvil"}},
            {"_source": {"id": "w2", "name": "Crowbar"}},
        ]}
    }))]]));

    let request = build_request(
        schema_view,
        client.clone(),
        config,
        "{ widgets(first: 2) { edges { node { id name } } pageInfo { hasNextPage } } }",
    );
    let response = schema.execute(request).await;

    assert!(response.errors.is_empty(), "unexpected errors: {:?}", response.errors);
    assert_eq!(client.calls.lock().unwrap().len(), 1, "exactly one msearch call for one wave");
    let data = response.data.into_json().unwrap();
    let edges = data["widgets"]["edges"].as_array().unwrap();
    assert_eq!(edges.len(), 2);
    assert_eq!(edges[0]["node"]["name"], json!("Anvil"));
}

/// Spec §8 scenario 2: a one-to-one relationship resolved off every parent
/// in the page batches into a single additional msearch call (the second
/// wave), regardless of how many parents requested it.
#[tokio::test]
async fn sibling_relationship_lookups_batch_into_one_additional_wave() {
    let schema_view = schema_view(true);
    let hidden = Arc::new(HiddenTypeGate::compute(&schema_view));
    let config = Arc::new(config());
    let schema = build_schema(schema_view.clone(), hidden, config.clone()).unwrap();

    let client = Arc::new(ScriptedDatastoreClient::new(vec![
        vec![MsearchResponse::Ok(json!({
            "hits": {"hits": [
                {"_source": {"id": "w1", "name": "Anvil", "manufacturer_id": "m1"}},
                {"_source": {"id": "w2", "name": "Crowbar", "manufacturer_id": "m2"}},
            ]}
        }))],
        vec![MsearchResponse::Ok(json!({
            "hits": {"hits": [
                {"_source": {"id": "m1", "name": "Acme"}},
                {"_source": {"id": "m2", "name": "Globex"}},
            ]}
        }))],
    ]));

    let request = build_request(
        schema_view,
        client.clone(),
        config,
        "{ widgets(first: 2) { edges { node { name manufacturer { name } } } } }",
    );
    let response = schema.execute(request).await;

    assert!(response.errors.is_empty(), "unexpected errors: {:?}", response.errors);
    let calls = client.calls.lock().unwrap();
    assert_eq!(calls.len(), 2, "one wave for the root page, one batched wave for every sibling's relationship");
    assert_eq!(calls[1].1, 1, "both widgets' manufacturer lookups collapsed into a single envelope");
    drop(calls);

    let data = response.data.into_json().unwrap();
    let edges = data["widgets"]["edges"].as_array().unwrap();
    assert_eq!(edges[0]["node"]["manufacturer"]["name"], json!("Acme"));
    assert_eq!(edges[1]["node"]["manufacturer"]["name"], json!("Globex"));
}

/// Spec §4.7: `has_next_page` must be true when the composite adapter
/// signals more buckets exist upstream (`after_key` present in the
/// response), even when every returned bucket fit within the requested
/// page and nothing was truncated locally.
#[tokio::test]
async fn root_aggregation_has_next_page_when_composite_after_key_is_present() {
    let schema_view = schema_view(false);
    let hidden = Arc::new(HiddenTypeGate::compute(&schema_view));
    let config = Arc::new(config());
    let schema = build_schema(schema_view.clone(), hidden, config.clone()).unwrap();

    let client = Arc::new(ScriptedDatastoreClient::new(vec![vec![MsearchResponse::Ok(json!({
        "aggregations": {
            "root": {
                "doc_count": 2,
                "bucketed": {
                    "buckets": [
                        {"key": {"g0": "red"}, "doc_count": 5},
                    ],
                    "after_key": {"g0": "red"},
                },
            }
        }
    }))]]));

    let request = build_request(
        schema_view,
        client.clone(),
        config,
        "{ widget_aggregations(groupedBy: { name: {} }) { edges { count } pageInfo { hasNextPage } } }",
    );
    let response = schema.execute(request).await;

    assert!(response.errors.is_empty(), "unexpected errors: {:?}", response.errors);
    let data = response.data.into_json().unwrap();
    assert_eq!(data["widget_aggregations"]["edges"].as_array().unwrap().len(), 1);
    assert_eq!(
        data["widget_aggregations"]["pageInfo"]["hasNextPage"],
        json!(true),
        "composite after_key must force has_next_page even without local truncation"
    );
}

/// Spec §8 scenario 3: a filter that pins the routing field to an empty
/// `equal_to_any_of` list short-circuits before any dispatch, never
/// reaching the scripted client.
#[tokio::test]
async fn routing_short_circuit_never_reaches_the_datastore() {
    let schema_view = schema_view(false);
    let hidden = Arc::new(HiddenTypeGate::compute(&schema_view));
    let config = Arc::new(config());
    let schema = build_schema(schema_view.clone(), hidden, config.clone()).unwrap();

    let client = Arc::new(ScriptedDatastoreClient::new(vec![]));
    let request = build_request(
        schema_view,
        client.clone(),
        config,
        r#"{ widgets(first: 2, filter: { region: { equal_to_any_of: [] } }) { edges { node { id } } } }"#,
    );
    let response = schema.execute(request).await;

    assert!(response.errors.is_empty(), "unexpected errors: {:?}", response.errors);
    assert!(client.calls.lock().unwrap().is_empty(), "an empty routing set must never dispatch");
    let data = response.data.into_json().unwrap();
    assert_eq!(data["widgets"]["edges"].as_array().unwrap().len(), 0);
}
