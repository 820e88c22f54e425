use query_planner::{decode_grouping_cursor, encode_grouping_cursor, singleton_cursor, CountDetail, DecodedBucket, PlanError};
use serde_json::Value;

use crate::error::EngineError;

/// One relay edge over an aggregation bucket (spec §4.7): grouped buckets
/// carry the grouping key as `node.grouped_by`; the ungrouped synthetic
/// bucket carries none.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationEdge {
    pub cursor: String,
    pub grouped_by: Vec<Value>,
    pub count: u64,
    pub count_detail: CountDetail,
    pub aggregated_values: Vec<(String, Value)>,
    pub sub_buckets: Vec<DecodedBucket>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregationConnection {
    pub edges: Vec<AggregationEdge>,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
}

fn validated_first(first: Option<i64>) -> Result<Option<usize>, EngineError> {
    match first {
        Some(n) if n < 0 => Err(PlanError::NegativeFirst(n).into()),
        Some(n) => Ok(Some(n as usize)),
        None => Ok(None),
    }
}

/// Builds the ungrouped aggregation connection: exactly one synthetic
/// bucket, cursor `SINGLETON_CURSOR`, `has_next_page` always false (spec
/// §4.7). `first: 0` returns an empty connection with both cursors null.
pub fn build_ungrouped_connection(bucket: DecodedBucket, first: Option<i64>) -> Result<AggregationConnection, EngineError> {
    if validated_first(first)? == Some(0) {
        return Ok(AggregationConnection { edges: vec![], start_cursor: None, end_cursor: None, has_next_page: false, has_previous_page: false });
    }

    let cursor = singleton_cursor();
    let edge = AggregationEdge {
        cursor: cursor.clone(),
        grouped_by: vec![],
        count: bucket.count_detail.approximate_value,
        count_detail: bucket.count_detail,
        aggregated_values: bucket.aggregated_values,
        sub_buckets: bucket.sub_buckets,
    };

    Ok(AggregationConnection { start_cursor: Some(cursor.clone()), end_cursor: Some(cursor), has_next_page: false, has_previous_page: false, edges: vec![edge] })
}

/// Builds a grouped aggregation connection from the adapter's decoded,
/// already-sorted bucket list (spec §4.3 sort contract: count desc, key
/// asc null-first). `after` seeks to the bucket whose grouping key it
/// names; `more_buckets_upstream` is the composite adapter's
/// `after_key`-present signal (always false for the non-composite
/// adapter, which has no server-side pagination cursor of its own).
pub fn build_grouped_connection(
    buckets: Vec<DecodedBucket>,
    first: Option<i64>,
    after: Option<&str>,
    more_buckets_upstream: bool,
) -> Result<AggregationConnection, EngineError> {
    let first = validated_first(first)?;

    let start_index = match after {
        None => 0,
        Some(cursor) => {
            let key = decode_grouping_cursor(cursor).map_err(EngineError::from)?;
            buckets
                .iter()
                .position(|bucket| bucket.grouping_key == key)
                .map(|i| i + 1)
                .ok_or(EngineError::from(PlanError::CursorOutsideBucketSpace))?
        }
    };

    let remaining = &buckets[start_index.min(buckets.len())..];
    let page_len = first.unwrap_or(remaining.len()).min(remaining.len());
    let page = &remaining[..page_len];
    let truncated_locally = page_len < remaining.len();

    let edges: Vec<AggregationEdge> = page
        .iter()
        .map(|bucket| AggregationEdge {
            cursor: encode_grouping_cursor(&bucket.grouping_key),
            grouped_by: bucket.grouping_key.clone(),
            count: bucket.count_detail.approximate_value,
            count_detail: bucket.count_detail,
            aggregated_values: bucket.aggregated_values.clone(),
            sub_buckets: bucket.sub_buckets.clone(),
        })
        .collect();

    Ok(AggregationConnection {
        start_cursor: edges.first().map(|e| e.cursor.clone()),
        end_cursor: edges.last().map(|e| e.cursor.clone()),
        has_next_page: truncated_locally || more_buckets_upstream,
        has_previous_page: start_index > 0,
        edges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn bucket(key: Value, count: u64) -> DecodedBucket {
        DecodedBucket { grouping_key: vec![key], count_detail: CountDetail::term(count, 0), aggregated_values: vec![], sub_buckets: vec![] }
    }

    #[test]
    fn ungrouped_connection_has_the_constant_singleton_cursor_and_never_has_a_next_page() {
        let bucket = DecodedBucket { grouping_key: vec![], count_detail: CountDetail::exact(42), aggregated_values: vec![], sub_buckets: vec![] };
        let connection = build_ungrouped_connection(bucket, None).unwrap();
        assert_eq!(connection.edges.len(), 1);
        assert_eq!(connection.edges[0].cursor, singleton_cursor());
        assert!(!connection.has_next_page);
        assert_eq!(connection.edges[0].count, 42);
    }

    #[test]
    fn ungrouped_first_zero_returns_an_empty_connection_with_null_cursors() {
        let bucket = DecodedBucket { grouping_key: vec![], count_detail: CountDetail::exact(1), aggregated_values: vec![], sub_buckets: vec![] };
        let connection = build_ungrouped_connection(bucket, Some(0)).unwrap();
        assert!(connection.edges.is_empty());
        assert!(connection.start_cursor.is_none());
        assert!(connection.end_cursor.is_none());
    }

    #[test]
    fn negative_first_is_rejected_as_a_validation_error() {
        let bucket = DecodedBucket { grouping_key: vec![], count_detail: CountDetail::exact(1), aggregated_values: vec![], sub_buckets: vec![] };
        let result = build_ungrouped_connection(bucket, Some(-1));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn grouped_connection_paginates_forward_with_first() {
        let buckets = vec![bucket(json!("red"), 5), bucket(json!("blue"), 3), bucket(json!("green"), 1)];
        let page = build_grouped_connection(buckets, Some(2), None, false).unwrap();
        assert_eq!(page.edges.len(), 2);
        assert!(page.has_next_page);
        assert!(!page.has_previous_page);
    }

    #[test]
    fn grouped_connection_seeks_past_the_after_cursor() {
        let buckets = vec![bucket(json!("red"), 5), bucket(json!("blue"), 3), bucket(json!("green"), 1)];
        let after = encode_grouping_cursor(&[json!("red")]);
        let page = build_grouped_connection(buckets, None, Some(&after), false).unwrap();
        assert_eq!(page.edges.len(), 2);
        assert_eq!(page.edges[0].grouped_by, vec![json!("blue")]);
        assert!(page.has_previous_page);
        assert!(!page.has_next_page);
    }

    #[test]
    fn malformed_after_cursor_reports_cursor_outside_bucket_space() {
        let buckets = vec![bucket(json!("red"), 5)];
        let after = encode_grouping_cursor(&[json!("not-a-real-key")]);
        let result = build_grouped_connection(buckets, None, Some(&after), false);
        assert!(matches!(result, Err(EngineError::Invariant(_))));
    }

    #[test]
    fn composite_after_key_signal_forces_has_next_page_even_without_local_truncation() {
        let buckets = vec![bucket(json!("red"), 5)];
        let page = build_grouped_connection(buckets, None, None, true).unwrap();
        assert!(page.has_next_page);
    }
}
