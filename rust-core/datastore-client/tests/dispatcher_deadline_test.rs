use std::collections::HashMap;
use std::sync::Arc;

use datastore_client::{ClusterTagged, Deadline, MsearchDispatcher, MsearchResponse, QueryResult, ScriptedDatastoreClient};
use filter_interpreter::FilterOutcome;
use query_planner::{CompositeAdapter, DatastoreQuery, IndexTarget, Pagination, RoutingSet};
use serde_json::json;

fn widget_query() -> DatastoreQuery {
    DatastoreQuery {
        index_target: IndexTarget::Glob("widgets".to_string()),
        routing: RoutingSet::All,
        filter: FilterOutcome::True,
        sort: vec![],
        pagination: Pagination::default(),
        aggregations: vec![],
        document_source: true,
        size: 10,
        timeout_ms_share: 600_000,
        search_preference: None,
    }
}

/// Spec §8 scenario 2: a two-hop relationship query with
/// `timeout_in_ms: 600_000` shows two msearch calls whose `timeout` values
/// strictly decrease across waves.
#[tokio::test]
async fn deadline_shrinks_strictly_across_sequential_waves() {
    let client = Arc::new(ScriptedDatastoreClient::new(vec![
        vec![MsearchResponse::Ok(json!({"hits": {"total": {"value": 3}}}))],
        vec![MsearchResponse::Ok(json!({"hits": {"total": {"value": 1}}}))],
    ]));
    let dispatcher = MsearchDispatcher::new(
        client.clone(),
        HashMap::from([("main".to_string(), "http://localhost:9200".to_string())]),
        Arc::new(CompositeAdapter),
    );
    let deadline = Deadline::starting_now(600_000);

    let first_remaining_before = deadline.remaining_ms();
    let first = dispatcher
        .dispatch(&deadline, vec![ClusterTagged { cluster: "main".to_string(), query: widget_query() }])
        .await
        .unwrap();
    assert!(matches!(first[0], QueryResult::Response(_)));

    tokio::time::sleep(std::time::Duration::from_millis(15)).await;

    let second_remaining_before = deadline.remaining_ms();
    let second = dispatcher
        .dispatch(&deadline, vec![ClusterTagged { cluster: "main".to_string(), query: widget_query() }])
        .await
        .unwrap();
    assert!(matches!(second[0], QueryResult::Response(_)));

    assert!(second_remaining_before < first_remaining_before);
    assert!(first_remaining_before < 600_000);
}

#[tokio::test]
async fn a_request_that_has_already_missed_its_deadline_never_dispatches() {
    let client = Arc::new(ScriptedDatastoreClient::new(vec![]));
    let dispatcher = MsearchDispatcher::new(
        client.clone(),
        HashMap::from([("main".to_string(), "http://localhost:9200".to_string())]),
        Arc::new(CompositeAdapter),
    );
    let deadline = Deadline::starting_now(1);
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;

    let result = dispatcher
        .dispatch(&deadline, vec![ClusterTagged { cluster: "main".to_string(), query: widget_query() }])
        .await;

    assert!(result.is_err());
    assert!(client.calls.lock().unwrap().is_empty());
}
