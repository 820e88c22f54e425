use chrono::{DateTime, Utc};
use datastore_client::RolloverCache;
use filter_interpreter::{compile, extract_range_bounds, extract_routing_values, FilterOutcome};
use query_planner::{DatastoreQuery, IndexTarget, Pagination, RoutingSet, SortKey, SortOrder};
use schema_view::{IndexDefinition, SchemaView};
use serde_json::Value;

use crate::connection::{seek_past_filter, with_tiebreak, DocumentCursor};
use crate::error::EngineError;
use crate::relationship::and_all;

/// Raw GraphQL arguments for a root `<type>s` connection field, before
/// they're compiled into a `DatastoreQuery`.
#[derive(Debug, Clone, Default)]
pub struct DocumentQueryArgs {
    pub filter: Value,
    pub sort: Vec<SortKey>,
    pub first: Option<i64>,
    pub after: Option<String>,
    pub last: Option<i64>,
    pub before: Option<String>,
}

/// Everything the connection builder needs once the query has come back:
/// whether the query ran against a flipped sort (backward pagination) and
/// whether a previous page is already known to exist from cursor presence
/// alone.
pub struct BuildPlan {
    pub query: DatastoreQuery,
    pub sort: Vec<SortKey>,
    pub page_size: usize,
    pub reverse: bool,
    pub has_previous_page_hint: bool,
}

fn parse_date_time(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|dt| dt.with_timezone(&Utc))
}

pub(crate) async fn prune_rollover(
    index: &IndexDefinition,
    filter: &FilterOutcome,
    rollover_cache: Option<&RolloverCache>,
) -> Result<Option<IndexTarget>, EngineError> {
    let (rollover, cache) = match (&index.rollover, rollover_cache) {
        (Some(rollover), Some(cache)) => (rollover, cache),
        _ => return Ok(None),
    };
    let tree = match filter {
        FilterOutcome::Node(tree) => tree,
        _ => return Ok(None),
    };
    let Some(bounds) = extract_range_bounds(tree, &rollover.time_field) else {
        return Ok(None);
    };

    let gte = bounds.gte.as_ref().or(bounds.gt.as_ref()).and_then(parse_date_time);
    let lt = bounds.lt.as_ref().or(bounds.lte.as_ref()).and_then(parse_date_time);

    let slices = cache.slices_for(&index.logical_name).await.map_err(EngineError::from)?;
    let matching: Vec<String> = slices
        .into_iter()
        .filter(|slice| slice.overlaps(gte, lt))
        .map(|slice| slice.index_name)
        .collect();
    Ok(Some(IndexTarget::ConcreteSet(matching)))
}

/// Compiles a root connection field's arguments into a `DatastoreQuery`
/// plan, applying the routing hook, rollover pruning, and the keyset seek
/// predicate for whichever pagination direction the caller used (spec
/// §4.1 steps 8-9, §4.2).
pub async fn build_document_query(
    schema: &SchemaView,
    type_name: &str,
    index: &IndexDefinition,
    rollover_cache: Option<&RolloverCache>,
    timeout_in_ms: u64,
    default_page_size: u32,
    max_page_size: u32,
    args: DocumentQueryArgs,
) -> Result<BuildPlan, EngineError> {
    if args.first.is_some() && args.last.is_some() {
        return Err(EngineError::Validation("cannot supply both 'first' and 'last'".to_string()));
    }
    for n in [args.first, args.last].into_iter().flatten() {
        if n < 0 {
            return Err(EngineError::Validation(format!("page size must be >= 0, got {n}")));
        }
    }

    let reverse = args.last.is_some() || args.before.is_some();
    let requested = args.first.or(args.last).map(|n| n as u32);
    let page_size = requested.unwrap_or(default_page_size).min(max_page_size) as usize;

    let base_filter = compile(schema, type_name, &args.filter)?;
    let sort = with_tiebreak(args.sort);
    let query_sort: Vec<SortKey> = if reverse {
        sort.iter()
            .map(|key| SortKey {
                field: key.field.clone(),
                order: match key.order {
                    SortOrder::Asc => SortOrder::Desc,
                    SortOrder::Desc => SortOrder::Asc,
                },
            })
            .collect()
    } else {
        sort.clone()
    };

    let cursor = match (&args.after, &args.before) {
        (Some(c), _) => Some(DocumentCursor::decode(c)?),
        (None, Some(c)) => Some(DocumentCursor::decode(c)?),
        (None, None) => None,
    };
    let has_previous_page_hint = reverse && args.before.is_some();

    let filter = match cursor {
        Some(cursor) => and_all(vec![base_filter, seek_past_filter(&query_sort, &cursor)]),
        None => base_filter,
    };

    let index_target = match prune_rollover(index, &filter, rollover_cache).await? {
        Some(target) => target,
        None => IndexTarget::Glob(index.index_pattern()),
    };

    let routing = filter
        .clone()
        .into_tree()
        .and_then(|tree| index.routing_field.as_ref().and_then(|field| extract_routing_values(&tree, field)))
        .map(RoutingSet::Values)
        .unwrap_or(RoutingSet::All);

    let query = DatastoreQuery {
        index_target,
        routing,
        filter,
        sort: query_sort,
        pagination: Pagination { after: args.after, before: args.before, first: args.first.map(|n| n as u32), last: args.last.map(|n| n as u32) },
        aggregations: vec![],
        document_source: true,
        size: page_size as u32 + 1,
        timeout_ms_share: timeout_in_ms,
        search_preference: None,
    };

    Ok(BuildPlan { query, sort, page_size, reverse, has_previous_page_hint })
}
