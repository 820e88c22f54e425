//! Process entrypoint (spec §6, §9): loads the schema artifact and the
//! `GraphqlEngineConfig` from disk, builds the dynamic schema once at
//! startup, and serves it over HTTP. Everything per-request (the
//! `PlanRegistry`, its `Deadline`, the relationship `DataLoader`) is built
//! fresh inside `graphql_handler` — the only state this binary holds
//! across requests is the schema itself, the dispatcher, and the
//! rollover-index cache (spec §5 "Shared resource policy").

use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use async_graphql::dataloader::DataLoader;
use async_graphql::dynamic::Schema as DynamicSchema;
use async_graphql::http::{playground_source, GraphQLPlaygroundConfig};
use async_graphql_axum::{GraphQLRequest, GraphQLResponse};
use axum::extract::State;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::Router;

use datastore_client::{
    CatIndicesRolloverSource, Deadline, DatastoreClient, ElasticsearchDatastoreClient,
    MsearchDispatcher, ReqwestDatastoreClient, RolloverCache,
};
use graphql_engine::config::{GraphqlEngineConfig, GroupingAdapterKind};
use graphql_engine::plan_registry::PlanRegistry;
use graphql_engine::schema_builder::{build_schema, RelationshipLoader};
use query_planner::{CompositeAdapter, GroupingAdapter, NonCompositeAdapter};
use schema_view::{HiddenTypeGate, SchemaConfig, SchemaView};

/// Everything the handler needs to start a request's wave of plans. Built
/// once at startup and cloned (cheaply, via `Arc`) into every connection.
#[derive(Clone)]
struct AppState {
    schema: DynamicSchema,
    schema_view: Arc<SchemaView>,
    config: Arc<GraphqlEngineConfig>,
    dispatcher: Arc<MsearchDispatcher>,
    rollover_cache: Option<Arc<RolloverCache>>,
}

fn load_config_file(path: &str) -> String {
    fs::read_to_string(path).unwrap_or_else(|e| panic!("failed to read config file '{path}': {e}"))
}

fn parse_schema_config(path: &str, contents: &str) -> SchemaConfig {
    if path.ends_with(".json") {
        serde_json::from_str(contents).expect("invalid schema config JSON")
    } else {
        serde_yaml::from_str(contents).expect("invalid schema config YAML")
    }
}

fn build_datastore_client(enforce_read_only: bool) -> Arc<dyn DatastoreClient> {
    // Spec's "Elasticsearch- or OpenSearch-compatible" framing: default to
    // the `elasticsearch` crate's transport, falling back to the plain
    // `reqwest` client for OpenSearch-flavored clusters that reject its
    // Content-Type negotiation (spec §6, datastore-client's client.rs).
    match std::env::var("DATASTORE_TRANSPORT").as_deref() {
        Ok("opensearch") => Arc::new(ReqwestDatastoreClient::new(enforce_read_only)),
        _ => Arc::new(ElasticsearchDatastoreClient::new(enforce_read_only)),
    }
}

fn build_sub_aggregation_adapter(config: &GraphqlEngineConfig) -> Arc<dyn GroupingAdapter + Send + Sync> {
    match config.sub_aggregation_grouping_adapter {
        GroupingAdapterKind::Composite => Arc::new(CompositeAdapter),
        GroupingAdapterKind::NonComposite => Arc::new(NonCompositeAdapter),
    }
}

/// Builds the rollover-index cache by watching every index definition that
/// both declares a rollover config and has a concrete cluster URL to ask
/// (spec §4.1 step 8's pruning hook needs somewhere to read slices from;
/// indexes the engine can't reach are simply left unwatched).
fn build_rollover_cache(schema: &SchemaView, config: &GraphqlEngineConfig) -> Option<Arc<RolloverCache>> {
    let mut watched = HashMap::new();
    for index in schema.index_definitions() {
        let (Some(rollover), Some(cluster)) = (&index.rollover, &index.query_cluster) else { continue };
        let Some(cluster_url) = config.cluster_urls.get(cluster) else { continue };
        watched.insert(index.logical_name.clone(), (cluster_url.clone(), rollover.granularity));
    }
    if watched.is_empty() {
        return None;
    }
    let source = Arc::new(CatIndicesRolloverSource::new(watched));
    let cache = Arc::new(RolloverCache::new(source));
    cache.spawn_refresh_loop(std::time::Duration::from_secs(300));
    Some(cache)
}

async fn graphql_handler(State(state): State<AppState>, req: GraphQLRequest) -> GraphQLResponse {
    let deadline = Deadline::starting_now(state.config.timeout_in_ms);
    let registry = Arc::new(PlanRegistry::new(state.dispatcher.clone(), deadline));
    let loader = Arc::new(DataLoader::new(
        RelationshipLoader::new(state.schema_view.clone(), registry.clone(), state.config.clone()),
        tokio::spawn,
    ));

    let mut request = req.into_inner().data(registry).data(loader);
    if let Some(cache) = &state.rollover_cache {
        request = request.data(cache.clone());
    }

    state.schema.execute(request).await.into()
}

async fn graphql_playground() -> impl IntoResponse {
    Html(playground_source(GraphQLPlaygroundConfig::new("/graphql")))
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let schema_config_path = std::env::var("SCHEMA_CONFIG_PATH").unwrap_or_else(|_| "schema.yaml".to_string());
    let engine_config_path = std::env::var("ENGINE_CONFIG_PATH").unwrap_or_else(|_| "engine_config.yaml".to_string());

    let schema_config = parse_schema_config(&schema_config_path, &load_config_file(&schema_config_path));
    let engine_config_contents = load_config_file(&engine_config_path);
    let config = if engine_config_path.ends_with(".json") {
        GraphqlEngineConfig::from_json(&engine_config_contents)
    } else {
        GraphqlEngineConfig::from_yaml(&engine_config_contents)
    }
    .expect("invalid engine config");

    let schema_view = Arc::new(SchemaView::from_config(schema_config).expect("invalid schema config"));
    let hidden = Arc::new(HiddenTypeGate::compute(&schema_view));
    let config = Arc::new(config);

    tracing::info!(
        visible_types = schema_view.types().filter(|t| hidden.is_visible(&t.name)).count(),
        "loaded schema view"
    );

    let rollover_cache = build_rollover_cache(&schema_view, &config);
    let client = build_datastore_client(config.enforce_msearch_read_only);
    let sub_aggregation_adapter = build_sub_aggregation_adapter(&config);
    let dispatcher = Arc::new(MsearchDispatcher::new(client, config.cluster_urls.clone(), sub_aggregation_adapter));

    let schema = build_schema(schema_view.clone(), hidden, config.clone()).expect("failed to build schema");

    let state = AppState { schema, schema_view, config: config.clone(), dispatcher, rollover_cache };

    let app = Router::new()
        .route("/graphql", get(graphql_playground).post(graphql_handler))
        .route("/", get(|| async { "GraphQL query engine\n\nGraphQL endpoint: /graphql" }))
        .layer(
            tower_http::cors::CorsLayer::new()
                .allow_origin(tower_http::cors::Any)
                .allow_methods(tower_http::cors::Any)
                .allow_headers(tower_http::cors::Any),
        )
        .with_state(state);

    let port = std::env::var("PORT").unwrap_or_else(|_| "8080".to_string()).parse::<u16>().expect("invalid PORT");
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await.expect("failed to bind to port");

    tracing::info!(port, "starting GraphQL query engine");
    axum::serve(listener, app).await.expect("server failed");
}
