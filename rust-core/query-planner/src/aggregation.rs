use chrono::{DateTime, Datelike, Utc};
use filter_interpreter::FilterTree;
use schema_view::FieldPath;
use serde_json::{json, Value};

use crate::error::PlanError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationUnit {
    Year,
    Quarter,
    Month,
    Week,
    Day,
    Hour,
    Minute,
    Second,
}

impl TruncationUnit {
    /// Calendar-interval string understood by `date_histogram`.
    fn as_calendar_interval(self) -> &'static str {
        match self {
            TruncationUnit::Year => "year",
            TruncationUnit::Quarter => "quarter",
            TruncationUnit::Month => "month",
            TruncationUnit::Week => "week",
            TruncationUnit::Day => "day",
            TruncationUnit::Hour => "hour",
            TruncationUnit::Minute => "minute",
            TruncationUnit::Second => "second",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateGroupingOutput {
    AsDateTime,
    AsDate,
    AsDayOfWeek,
    AsTimeOfDay,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DateOffset {
    pub amount: i64,
    pub unit: TruncationUnit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Grouping {
    Term {
        field: FieldPath,
        missing_bucket: bool,
    },
    DateHistogram {
        field: FieldPath,
        output: DateGroupingOutput,
        truncation_unit: TruncationUnit,
        /// Week-start-day is asserted Monday, observationally (open
        /// question in the source material; not configurable here).
        time_zone: Option<String>,
        offset: Option<DateOffset>,
        missing_bucket: bool,
    },
}

impl Grouping {
    pub fn field(&self) -> &FieldPath {
        match self {
            Grouping::Term { field, .. } => field,
            Grouping::DateHistogram { field, .. } => field,
        }
    }

    fn missing_bucket(&self) -> bool {
        match self {
            Grouping::Term { missing_bucket, .. } => *missing_bucket,
            Grouping::DateHistogram { missing_bucket, .. } => *missing_bucket,
        }
    }

    fn alias(&self, index: usize) -> String {
        format!("g{index}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exactness {
    Exact,
    Approximate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatedValueFunction {
    Sum,
    Avg,
    Min,
    Max,
    DistinctCount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedValueSpec {
    pub alias: String,
    pub field: FieldPath,
    pub function: AggregatedValueFunction,
    pub exactness: Exactness,
}

/// One node of the aggregation tree (spec §3 "Aggregation Tree").
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationNode {
    pub alias: String,
    pub path: FieldPath,
    pub filter: Option<FilterTree>,
    pub groupings: Vec<Grouping>,
    pub aggregated_values: Vec<AggregatedValueSpec>,
    pub sub_aggregations: Vec<AggregationNode>,
}

impl AggregationNode {
    /// An ungrouped, valueless node — the minimal shape used for merge
    /// bookkeeping tests and for plain `total_edge_count` aggregations.
    pub fn leaf(alias: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            path: FieldPath::root(),
            filter: None,
            groupings: vec![],
            aggregated_values: vec![],
            sub_aggregations: vec![],
        }
    }

    pub fn is_grouped(&self) -> bool {
        !self.groupings.is_empty()
    }
}

/// `count_detail = {approximate_value, exact_value, upper_bound}` (spec
/// §4.3): exact for date-only/ungrouped buckets, approximate (with a
/// datastore-reported error bound) for term groupings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CountDetail {
    pub approximate_value: u64,
    pub exact_value: Option<u64>,
    pub upper_bound: u64,
}

impl CountDetail {
    pub fn exact(doc_count: u64) -> Self {
        Self {
            approximate_value: doc_count,
            exact_value: Some(doc_count),
            upper_bound: doc_count,
        }
    }

    pub fn term(doc_count: u64, doc_count_error_upper_bound: u64) -> Self {
        Self {
            approximate_value: doc_count,
            exact_value: None,
            upper_bound: doc_count + doc_count_error_upper_bound,
        }
    }
}

/// A decoded bucket: the grouping key tuple (one entry per grouping,
/// `null` for a missing-value bucket), this bucket's `count_detail`, and
/// any decoded sub-aggregation buckets beneath it.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedBucket {
    pub grouping_key: Vec<Value>,
    pub count_detail: CountDetail,
    pub aggregated_values: Vec<(String, Value)>,
    pub sub_buckets: Vec<DecodedBucket>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    Composite,
    NonComposite,
}

/// Shared contract for the two grouping strategies (spec §9 "Polymorphism
/// over adapters"). `decode_response` takes the adapter used for this
/// node's own `sub_aggregations` (always a single configured adapter for
/// the whole tree below the root) so it can recurse into nested buckets.
pub trait GroupingAdapter {
    fn kind(&self) -> AdapterKind;
    /// `extra_leaf_aggs` holds the already-encoded `sub_aggregations` of
    /// `node`, keyed by child alias — folded into the same per-bucket
    /// `aggs` map this adapter installs for its own aggregated values, so
    /// each child is evaluated scoped to its parent's buckets rather than
    /// globally across the whole filtered set.
    fn encode_request(&self, node: &AggregationNode, extra_leaf_aggs: &serde_json::Map<String, Value>) -> Value;
    fn decode_response(
        &self,
        node: &AggregationNode,
        raw: &Value,
        sub_adapter: &dyn GroupingAdapter,
    ) -> Result<Vec<DecodedBucket>, PlanError>;
    fn supports_nesting_under(&self, parent: AdapterKind) -> bool;
}

/// Decodes every `sub_aggregations` child of `node` out of `raw_parent`
/// (the same object that held `node`'s own bucket/doc_count), each child
/// addressed by its own alias key — the sibling namespace `encode_node`
/// gives it when building the request.
fn decode_children(
    sub_adapter: &dyn GroupingAdapter,
    children: &[AggregationNode],
    raw_parent: &Value,
) -> Result<Vec<DecodedBucket>, PlanError> {
    let mut out = Vec::new();
    for child in children {
        let raw_child = raw_parent.get(&child.alias).ok_or_else(|| {
            PlanError::MalformedAggregationResponse(
                child.alias.clone(),
                "missing sub-aggregation".to_string(),
            )
        })?;
        out.extend(decode_node(sub_adapter, sub_adapter, child, raw_child)?);
    }
    Ok(out)
}

/// Decodes one aggregation node, grouped or not, including its nested
/// `sub_aggregations`. `adapter` is the strategy this node's own buckets
/// were encoded with (`CompositeAdapter` at the root, the configured
/// sub-aggregation adapter everywhere below it); `sub_adapter` is the
/// strategy this node's children use.
pub fn decode_node(
    adapter: &dyn GroupingAdapter,
    sub_adapter: &dyn GroupingAdapter,
    node: &AggregationNode,
    raw: &Value,
) -> Result<Vec<DecodedBucket>, PlanError> {
    if node.is_grouped() {
        let bucket_source = match adapter.kind() {
            AdapterKind::Composite => raw.get("bucketed").ok_or_else(|| {
                PlanError::MalformedAggregationResponse(
                    node.alias.clone(),
                    "missing 'bucketed' aggregation".to_string(),
                )
            })?,
            AdapterKind::NonComposite => raw,
        };
        adapter.decode_response(node, bucket_source, sub_adapter)
    } else {
        let doc_count = raw.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
        let values_source = if !node.aggregated_values.is_empty()
            && adapter.kind() == AdapterKind::Composite
        {
            raw.get("bucketed").unwrap_or(raw)
        } else {
            raw
        };
        Ok(vec![DecodedBucket {
            grouping_key: vec![],
            count_detail: CountDetail::exact(doc_count),
            aggregated_values: decode_aggregated_values(node, values_source),
            sub_buckets: decode_children(sub_adapter, &node.sub_aggregations, raw)?,
        }])
    }
}

/// Encodes the full sibling list of top-level aggregation nodes into the
/// `"aggs"` fragment of an msearch request body (spec §3 "Aggregation
/// Tree", §4.3). Every node — root or nested — is wrapped in its own
/// `filter` aggregation so distinct aliases never collide and each
/// node's own optional `filter` is applied. The root always uses
/// `CompositeAdapter`; every node beneath it uses `sub_adapter`, the
/// single per-process strategy selected by configuration.
pub fn encode_aggregations(
    nodes: &[AggregationNode],
    sub_adapter: &dyn GroupingAdapter,
) -> Result<Value, PlanError> {
    let root_adapter = CompositeAdapter;
    let mut top = serde_json::Map::new();
    for node in nodes {
        top.insert(
            node.alias.clone(),
            encode_node(&root_adapter, sub_adapter, node, root_adapter.kind(), true)?,
        );
    }
    Ok(Value::Object(top))
}

/// Decodes the `"aggregations"` object of an msearch response, paired
/// one-to-one with the nodes passed to `encode_aggregations`.
pub fn decode_aggregations(
    nodes: &[AggregationNode],
    sub_adapter: &dyn GroupingAdapter,
    raw_aggregations: &Value,
) -> Result<Vec<(String, Vec<DecodedBucket>)>, PlanError> {
    let root_adapter = CompositeAdapter;
    let mut out = Vec::with_capacity(nodes.len());
    for node in nodes {
        let raw = raw_aggregations.get(&node.alias).ok_or_else(|| {
            PlanError::MalformedAggregationResponse(
                node.alias.clone(),
                "missing top-level aggregation".to_string(),
            )
        })?;
        out.push((node.alias.clone(), decode_node(&root_adapter, sub_adapter, node, raw)?));
    }
    Ok(out)
}

/// Whether the composite adapter's `after_key` is present for `alias` in a
/// decoded `"aggregations"` object (spec §4.7: `has_next_page` must be true
/// "when the datastore signaled more buckets (composite `after_key`
/// present)"). The root of every aggregation tree always uses
/// `CompositeAdapter` (see `encode_aggregations`/`decode_aggregations`), so
/// this applies regardless of the configured sub-aggregation adapter.
pub fn composite_after_key_present(raw_aggregations: &Value, alias: &str) -> bool {
    raw_aggregations
        .get(alias)
        .and_then(|node| node.get("bucketed"))
        .and_then(|bucketed| bucketed.get("after_key"))
        .is_some()
}

fn encode_node(
    root_adapter: &dyn GroupingAdapter,
    sub_adapter: &dyn GroupingAdapter,
    node: &AggregationNode,
    parent_kind: AdapterKind,
    is_root: bool,
) -> Result<Value, PlanError> {
    let adapter: &dyn GroupingAdapter = if is_root { root_adapter } else { sub_adapter };
    if !is_root && node.is_grouped() && !adapter.supports_nesting_under(parent_kind) {
        return Err(PlanError::CompositeNestingUnsupported("composite"));
    }

    let mut filter_agg = serde_json::Map::new();
    filter_agg.insert(
        "filter".to_string(),
        node.filter
            .as_ref()
            .map(crate::query::render_tree)
            .unwrap_or_else(|| json!({"match_all": {}})),
    );

    let mut extra_leaf_aggs = serde_json::Map::new();
    for child in &node.sub_aggregations {
        extra_leaf_aggs.insert(
            child.alias.clone(),
            encode_node(root_adapter, sub_adapter, child, adapter.kind(), false)?,
        );
    }

    let mut inner_aggs = serde_json::Map::new();
    if node.is_grouped() || !node.aggregated_values.is_empty() {
        let encoded = adapter.encode_request(node, &extra_leaf_aggs);
        match adapter.kind() {
            AdapterKind::Composite => {
                inner_aggs.insert("bucketed".to_string(), encoded);
            }
            AdapterKind::NonComposite => {
                let map = encoded
                    .get("aggs")
                    .and_then(Value::as_object)
                    .or_else(|| encoded.as_object())
                    .cloned()
                    .unwrap_or_default();
                for (key, value) in map {
                    inner_aggs.insert(key, value);
                }
            }
        }
    } else {
        // No grouping and no metric of its own: this node is a pure
        // filter scope, so its children's aggregations sit directly
        // inside it rather than nested under a non-existent bucket.
        for (key, value) in extra_leaf_aggs {
            inner_aggs.insert(key, value);
        }
    }

    if !inner_aggs.is_empty() {
        filter_agg.insert("aggs".to_string(), Value::Object(inner_aggs));
    }

    Ok(Value::Object(filter_agg))
}

fn aggregated_value_request(spec: &AggregatedValueSpec) -> (String, Value) {
    let metric = match spec.function {
        AggregatedValueFunction::Sum => "sum",
        AggregatedValueFunction::Avg => "avg",
        AggregatedValueFunction::Min => "min",
        AggregatedValueFunction::Max => "max",
        AggregatedValueFunction::DistinctCount => "cardinality",
    };
    (
        spec.alias.clone(),
        json!({ metric: { "field": spec.field.dotted() } }),
    )
}

/// Renders a decoded bucket key for `grouping`. `date_histogram` buckets
/// key by epoch millis regardless of the GraphQL-level output shape the
/// caller asked for (`as_date_time`/`as_date`/`as_day_of_week`/
/// `as_time_of_day`); this is the one place that turns the raw millis back
/// into the requested shape, in the grouping's own `time_zone` (spec §6
/// "Date/time groupings", concrete scenario 6).
fn format_grouping_value(grouping: &Grouping, raw: &Value) -> Value {
    match grouping {
        Grouping::Term { .. } => raw.clone(),
        Grouping::DateHistogram { output, time_zone, .. } => {
            format_date_bucket_key(raw, *output, time_zone.as_deref())
        }
    }
}

fn format_date_bucket_key(raw: &Value, output: DateGroupingOutput, time_zone: Option<&str>) -> Value {
    if raw.is_null() {
        return Value::Null;
    }
    let Some(millis) = raw.as_i64().or_else(|| raw.as_f64().map(|f| f as i64)) else {
        return raw.clone();
    };
    let Some(utc) = DateTime::<Utc>::from_timestamp_millis(millis) else {
        return raw.clone();
    };
    let tz: chrono_tz::Tz = time_zone.and_then(|z| z.parse().ok()).unwrap_or(chrono_tz::UTC);
    let local = utc.with_timezone(&tz);

    let rendered = match output {
        DateGroupingOutput::AsDateTime => local.format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string(),
        DateGroupingOutput::AsDate => local.format("%Y-%m-%d").to_string(),
        DateGroupingOutput::AsDayOfWeek => weekday_name(local.weekday()).to_string(),
        DateGroupingOutput::AsTimeOfDay => local.format("%H:%M:%S%.3f").to_string(),
    };
    Value::String(rendered)
}

fn weekday_name(day: chrono::Weekday) -> &'static str {
    match day {
        chrono::Weekday::Mon => "MONDAY",
        chrono::Weekday::Tue => "TUESDAY",
        chrono::Weekday::Wed => "WEDNESDAY",
        chrono::Weekday::Thu => "THURSDAY",
        chrono::Weekday::Fri => "FRIDAY",
        chrono::Weekday::Sat => "SATURDAY",
        chrono::Weekday::Sun => "SUNDAY",
    }
}

/// `include_missing_bucket` is only set by the composite adapter: ES/
/// OpenSearch composite sources exclude documents lacking the source field
/// unless `missing_bucket` is set inside the `terms`/`date_histogram`
/// object itself (spec §4.3 missing-value bucket). The non-composite
/// adapter instead emits a sibling `missing` aggregation
/// (`encode_groupings`), so it always passes `false` here.
fn grouping_agg_fragment(grouping: &Grouping, include_missing_bucket: bool) -> Value {
    let emit_missing_bucket = include_missing_bucket && grouping.missing_bucket();
    match grouping {
        Grouping::Term { field, .. } => {
            let mut terms = serde_json::Map::new();
            terms.insert("field".to_string(), json!(field.dotted()));
            terms.insert("size".to_string(), json!(10_000));
            if emit_missing_bucket {
                terms.insert("missing_bucket".to_string(), json!(true));
            }
            json!({ "terms": terms })
        }
        Grouping::DateHistogram {
            field,
            truncation_unit,
            time_zone,
            offset,
            ..
        } => {
            let mut histogram = serde_json::Map::new();
            histogram.insert("field".to_string(), json!(field.dotted()));
            histogram.insert(
                "calendar_interval".to_string(),
                json!(truncation_unit.as_calendar_interval()),
            );
            if let Some(tz) = time_zone {
                histogram.insert("time_zone".to_string(), json!(tz));
            }
            if let Some(offset) = offset {
                histogram.insert(
                    "offset".to_string(),
                    json!(format!("{}{}", offset.amount, offset.unit.as_calendar_interval())),
                );
            }
            if emit_missing_bucket {
                histogram.insert("missing_bucket".to_string(), json!(true));
            }
            json!({ "date_histogram": histogram })
        }
    }
}

/// Encodes all groupings of a node as one `composite` aggregation whose
/// `sources` list preserves grouping order (spec §4.3).
pub struct CompositeAdapter;

impl GroupingAdapter for CompositeAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::Composite
    }

    fn encode_request(&self, node: &AggregationNode, extra_leaf_aggs: &serde_json::Map<String, Value>) -> Value {
        let sources: Vec<Value> = node
            .groupings
            .iter()
            .enumerate()
            .map(|(i, grouping)| json!({ grouping.alias(i): grouping_agg_fragment(grouping, true) }))
            .collect();

        let mut aggs = serde_json::Map::new();
        for spec in &node.aggregated_values {
            let (alias, fragment) = aggregated_value_request(spec);
            aggs.insert(alias, fragment);
        }
        for (alias, fragment) in extra_leaf_aggs {
            aggs.insert(alias.clone(), fragment.clone());
        }

        json!({
            "composite": { "sources": sources, "size": 10_000 },
            "aggs": aggs,
        })
    }

    fn decode_response(
        &self,
        node: &AggregationNode,
        raw: &Value,
        sub_adapter: &dyn GroupingAdapter,
    ) -> Result<Vec<DecodedBucket>, PlanError> {
        let buckets = raw
            .get("buckets")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                PlanError::MalformedAggregationResponse(
                    node.alias.clone(),
                    "missing 'buckets' array".to_string(),
                )
            })?;

        let mut decoded = Vec::with_capacity(buckets.len());
        for bucket in buckets {
            let key_obj = bucket.get("key").and_then(Value::as_object).ok_or_else(|| {
                PlanError::MalformedAggregationResponse(
                    node.alias.clone(),
                    "bucket missing 'key' object".to_string(),
                )
            })?;
            let doc_count = bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0);

            let grouping_key = node
                .groupings
                .iter()
                .enumerate()
                .map(|(i, grouping)| {
                    let raw = key_obj.get(&grouping.alias(i)).cloned().unwrap_or(Value::Null);
                    format_grouping_value(grouping, &raw)
                })
                .collect();

            decoded.push(DecodedBucket {
                grouping_key,
                count_detail: CountDetail::exact(doc_count),
                aggregated_values: decode_aggregated_values(node, bucket),
                sub_buckets: decode_children(sub_adapter, &node.sub_aggregations, bucket)?,
            });
        }
        Ok(decoded)
    }

    fn supports_nesting_under(&self, parent: AdapterKind) -> bool {
        // Known ES/OpenSearch limitation: composite cannot nest under
        // another composite or under certain filter aggregations.
        parent != AdapterKind::Composite
    }
}

/// Encodes groupings as nested `terms`/`date_histogram` aggregations, with
/// a sibling `missing` bucket per grouping (spec §4.3).
pub struct NonCompositeAdapter;

impl NonCompositeAdapter {
    fn encode_groupings(&self, groupings: &[Grouping], index: usize, leaf_aggs: Value) -> Value {
        match groupings.split_first() {
            None => leaf_aggs,
            Some((grouping, rest)) => {
                let alias = grouping.alias(index);
                let inner = self.encode_groupings(rest, index + 1, leaf_aggs.clone());
                let mut aggs = serde_json::Map::new();
                aggs.insert(alias.clone(), {
                    let mut fragment = grouping_agg_fragment(grouping, false)
                        .as_object()
                        .cloned()
                        .unwrap_or_default();
                    fragment.insert("aggs".to_string(), inner);
                    Value::Object(fragment)
                });
                if grouping.missing_bucket() {
                    aggs.insert(
                        format!("{alias}__missing"),
                        json!({ "missing": { "field": grouping.field().dotted() }, "aggs": leaf_aggs }),
                    );
                }
                json!({ "aggs": aggs })
            }
        }
    }
}

impl GroupingAdapter for NonCompositeAdapter {
    fn kind(&self) -> AdapterKind {
        AdapterKind::NonComposite
    }

    fn encode_request(&self, node: &AggregationNode, extra_leaf_aggs: &serde_json::Map<String, Value>) -> Value {
        let mut leaf_aggs = serde_json::Map::new();
        for spec in &node.aggregated_values {
            let (alias, fragment) = aggregated_value_request(spec);
            leaf_aggs.insert(alias, fragment);
        }
        for (alias, fragment) in extra_leaf_aggs {
            leaf_aggs.insert(alias.clone(), fragment.clone());
        }
        self.encode_groupings(&node.groupings, 0, json!(leaf_aggs))
    }

    fn decode_response(
        &self,
        node: &AggregationNode,
        raw: &Value,
        sub_adapter: &dyn GroupingAdapter,
    ) -> Result<Vec<DecodedBucket>, PlanError> {
        let mut rows = Vec::new();
        decode_grouping_level(node, &node.groupings, 0, raw, &mut Vec::new(), &mut rows, sub_adapter)?;
        rows.sort_by(|a: &DecodedBucket, b: &DecodedBucket| {
            b.count_detail
                .approximate_value
                .cmp(&a.count_detail.approximate_value)
                .then_with(|| compare_keys_null_aware(&a.grouping_key, &b.grouping_key))
        });

        // Truncation to the requested `first: N` is applied by the
        // aggregation resolver after decoding, once it has the GraphQL
        // connection arguments in hand; the adapter's job ends at
        // producing a fully sorted, un-truncated sequence.
        Ok(rows)
    }

    fn supports_nesting_under(&self, _parent: AdapterKind) -> bool {
        true
    }
}

fn decode_grouping_level(
    node: &AggregationNode,
    groupings: &[Grouping],
    index: usize,
    raw: &Value,
    key_prefix: &mut Vec<Value>,
    out: &mut Vec<DecodedBucket>,
    sub_adapter: &dyn GroupingAdapter,
) -> Result<(), PlanError> {
    match groupings.split_first() {
        None => {
            let doc_count = raw.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
            out.push(DecodedBucket {
                grouping_key: key_prefix.clone(),
                count_detail: CountDetail::exact(doc_count),
                aggregated_values: decode_aggregated_values(node, raw),
                sub_buckets: decode_children(sub_adapter, &node.sub_aggregations, raw)?,
            });
            Ok(())
        }
        Some((grouping, rest)) => {
            let alias = grouping.alias(index);
            let agg = raw.get(&alias).ok_or_else(|| {
                PlanError::MalformedAggregationResponse(
                    node.alias.clone(),
                    format!("missing grouping aggregation '{alias}'"),
                )
            })?;
            let buckets = agg.get("buckets").and_then(Value::as_array).ok_or_else(|| {
                PlanError::MalformedAggregationResponse(
                    node.alias.clone(),
                    format!("grouping '{alias}' missing buckets"),
                )
            })?;

            let is_term = matches!(grouping, Grouping::Term { .. });
            for bucket in buckets {
                let key = bucket.get("key").cloned().unwrap_or(Value::Null);
                key_prefix.push(format_grouping_value(grouping, &key));
                if is_term {
                    decode_term_leaf(node, bucket, key_prefix, out, sub_adapter)?;
                } else {
                    decode_grouping_level(node, rest, index + 1, bucket, key_prefix, out, sub_adapter)?;
                }
                key_prefix.pop();
            }

            if grouping.missing_bucket() {
                let missing_key = format!("{alias}__missing");
                if let Some(missing_agg) = raw.get(&missing_key) {
                    let doc_count = missing_agg
                        .get("doc_count")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    if doc_count > 0 {
                        key_prefix.push(Value::Null);
                        decode_grouping_level(
                            node, rest, index + 1, missing_agg, key_prefix, out, sub_adapter,
                        )?;
                        key_prefix.pop();
                    }
                }
            }
            Ok(())
        }
    }
}

fn decode_term_leaf(
    node: &AggregationNode,
    bucket: &Value,
    key_prefix: &[Value],
    out: &mut Vec<DecodedBucket>,
    sub_adapter: &dyn GroupingAdapter,
) -> Result<(), PlanError> {
    let doc_count = bucket.get("doc_count").and_then(Value::as_u64).unwrap_or(0);
    let error_upper_bound = bucket
        .get("doc_count_error_upper_bound")
        .and_then(Value::as_u64)
        .unwrap_or(0);
    out.push(DecodedBucket {
        grouping_key: key_prefix.to_vec(),
        count_detail: CountDetail::term(doc_count, error_upper_bound),
        aggregated_values: decode_aggregated_values(node, bucket),
        sub_buckets: decode_children(sub_adapter, &node.sub_aggregations, bucket)?,
    });
    Ok(())
}

fn decode_aggregated_values(node: &AggregationNode, raw: &Value) -> Vec<(String, Value)> {
    node.aggregated_values
        .iter()
        .filter_map(|spec| {
            raw.get(&spec.alias)
                .and_then(|v| v.get("value"))
                .cloned()
                .map(|v| (spec.alias.clone(), v))
        })
        .collect()
}

/// Null-aware ascending key comparison (spec §4.3: "key ascending, with
/// null-aware comparison"): `null` sorts before any concrete value.
fn compare_keys_null_aware(a: &[Value], b: &[Value]) -> std::cmp::Ordering {
    for (x, y) in a.iter().zip(b.iter()) {
        let ordering = match (x, y) {
            (Value::Null, Value::Null) => std::cmp::Ordering::Equal,
            (Value::Null, _) => std::cmp::Ordering::Less,
            (_, Value::Null) => std::cmp::Ordering::Greater,
            _ => compare_json_scalars(x, y),
        };
        if ordering != std::cmp::Ordering::Equal {
            return ordering;
        }
    }
    std::cmp::Ordering::Equal
}

fn compare_json_scalars(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.to_string().cmp(&b.to_string()),
    }
}
