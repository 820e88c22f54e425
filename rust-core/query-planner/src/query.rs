use filter_interpreter::{FilterOutcome, FilterTree, LeafOp, LeafPredicate};
use schema_view::FieldPath;
use serde_json::{json, Value};

use crate::aggregation::AggregationNode;
use crate::error::PlanError;

#[derive(Debug, Clone, PartialEq)]
pub enum IndexTarget {
    /// A non-rollover index, or a rollover glob that pruning did not narrow.
    Glob(String),
    /// The concrete rollover slices a time-range predicate selected.
    /// An empty set is one of the three short-circuit conditions.
    ConcreteSet(Vec<String>),
}

impl IndexTarget {
    pub fn pattern(&self) -> String {
        match self {
            IndexTarget::Glob(pattern) => pattern.clone(),
            IndexTarget::ConcreteSet(names) => names.join(","),
        }
    }

    fn is_empty_concrete_set(&self) -> bool {
        matches!(self, IndexTarget::ConcreteSet(names) if names.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RoutingSet {
    All,
    Values(Vec<Value>),
}

impl RoutingSet {
    fn is_empty_values(&self) -> bool {
        matches!(self, RoutingSet::Values(values) if values.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: FieldPath,
    pub order: SortOrder,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pagination {
    pub after: Option<String>,
    pub before: Option<String>,
    pub first: Option<u32>,
    pub last: Option<u32>,
}

/// An immutable datastore query plan (spec §3, §4.2). Constructed once per
/// resolved GraphQL field and either merged with siblings by the optimizer
/// or dispatched as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct DatastoreQuery {
    pub index_target: IndexTarget,
    pub routing: RoutingSet,
    pub filter: FilterOutcome,
    pub sort: Vec<SortKey>,
    pub pagination: Pagination,
    pub aggregations: Vec<AggregationNode>,
    /// `_source` toggle: false for aggregation-only queries.
    pub document_source: bool,
    pub size: u32,
    pub timeout_ms_share: u64,
    pub search_preference: Option<String>,
}

impl DatastoreQuery {
    /// True when the filter compiled to *false*, the routing set is empty,
    /// or rollover pruning emptied the index set (spec §4.2 invariant: a
    /// query is never materialized for the datastore in any of these).
    pub fn short_circuit(&self) -> bool {
        self.filter.is_false() || self.routing.is_empty_values() || self.index_target.is_empty_concrete_set()
    }

    fn is_aggregation_only(&self) -> bool {
        !self.aggregations.is_empty() && self.sort.is_empty() && !self.document_source
    }

    /// Merges two plans that agree on everything except their aggregation
    /// trees, unioning the aggregations (spec §4.2 `merge`).
    pub fn merge(&self, other: &DatastoreQuery) -> Result<DatastoreQuery, PlanError> {
        if self.index_target != other.index_target {
            return Err(PlanError::Incompatible("index pattern"));
        }
        if self.routing != other.routing {
            return Err(PlanError::Incompatible("routing"));
        }
        if self.filter != other.filter {
            return Err(PlanError::Incompatible("filter"));
        }
        if self.sort != other.sort {
            return Err(PlanError::Incompatible("sort"));
        }
        if self.pagination != other.pagination || self.size != other.size {
            return Err(PlanError::Incompatible("size/pagination"));
        }
        if self.search_preference != other.search_preference {
            return Err(PlanError::Incompatible("search preference"));
        }

        let mut aggregations = self.aggregations.clone();
        for agg in &other.aggregations {
            if aggregations.iter().any(|existing| existing.alias == agg.alias) {
                return Err(PlanError::DuplicateAggregationAlias(agg.alias.clone()));
            }
            aggregations.push(agg.clone());
        }

        Ok(DatastoreQuery {
            index_target: self.index_target.clone(),
            routing: self.routing.clone(),
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            pagination: self.pagination.clone(),
            aggregations,
            document_source: self.document_source || other.document_source,
            size: self.size,
            timeout_ms_share: self.timeout_ms_share.min(other.timeout_ms_share),
            search_preference: self.search_preference.clone(),
        })
    }

    /// Produces the msearch header/body pair (spec §4.2). `deadline_ms` is
    /// the remaining budget for this wave; `timeout` in the body is
    /// `min(configured, remaining)` and monotonically shrinks across waves.
    pub fn to_header_body(&self, deadline_ms: u64) -> (Value, Value) {
        let header = json!({
            "index": self.index_target.pattern(),
            "preference": self.search_preference,
        });

        let timeout = self.timeout_ms_share.min(deadline_ms);
        let aggregation_only = self.is_aggregation_only();

        let mut body = serde_json::Map::new();
        body.insert("query".to_string(), render_filter(&self.filter));
        body.insert(
            "size".to_string(),
            json!(if aggregation_only { 0 } else { self.size }),
        );
        body.insert("timeout".to_string(), json!(format!("{timeout}ms")));
        body.insert(
            "_source".to_string(),
            json!(aggregation_only || self.document_source),
        );

        if !aggregation_only && !self.sort.is_empty() {
            body.insert(
                "sort".to_string(),
                Value::Array(
                    self.sort
                        .iter()
                        .map(|key| {
                            let order = match key.order {
                                SortOrder::Asc => "asc",
                                SortOrder::Desc => "desc",
                            };
                            json!({ key.field.dotted(): { "order": order } })
                        })
                        .collect(),
                ),
            );
        }

        (header, Value::Object(body))
    }

    /// Like `to_header_body`, but also renders `self.aggregations` into the
    /// body's `"aggs"` key (spec §3 "Aggregation Tree", §4.3) using
    /// `CompositeAdapter` at the root and `sub_adapter` for every nested
    /// level, per the engine's per-process grouping-strategy configuration.
    pub fn to_header_body_with_aggs(
        &self,
        deadline_ms: u64,
        sub_adapter: &dyn crate::aggregation::GroupingAdapter,
    ) -> Result<(Value, Value), PlanError> {
        let (header, mut body) = self.to_header_body(deadline_ms);
        if !self.aggregations.is_empty() {
            let aggs = crate::aggregation::encode_aggregations(&self.aggregations, sub_adapter)?;
            body.as_object_mut()
                .expect("to_header_body always returns an object")
                .insert("aggs".to_string(), aggs);
        }
        Ok((header, body))
    }
}

pub fn render_filter(outcome: &FilterOutcome) -> Value {
    match outcome {
        FilterOutcome::True => json!({"match_all": {}}),
        FilterOutcome::False => json!({"bool": {"must_not": [{"match_all": {}}]}}),
        FilterOutcome::Node(tree) => render_tree(tree),
    }
}

pub(crate) fn render_tree(tree: &FilterTree) -> Value {
    match tree {
        FilterTree::Leaf(leaf) => render_leaf(leaf),
        FilterTree::Not(inner) => json!({"bool": {"must_not": [render_tree(inner)]}}),
        FilterTree::AnyOf(children) => json!({
            "bool": {
                "should": children.iter().map(render_tree).collect::<Vec<_>>(),
                "minimum_should_match": 1,
            }
        }),
        FilterTree::AllOf(children) => json!({
            "bool": {"must": children.iter().map(render_tree).collect::<Vec<_>>()}
        }),
        FilterTree::Nested { path, body } => json!({
            "nested": {"path": path.dotted(), "query": render_tree(body)}
        }),
        FilterTree::LengthPredicate { path, predicate } => {
            let count_path = path.with_suffix("__count");
            render_tree(&rewrite_path(predicate, &count_path))
        }
    }
}

fn rewrite_path(tree: &FilterTree, new_path: &FieldPath) -> FilterTree {
    match tree {
        FilterTree::Leaf(leaf) => FilterTree::Leaf(LeafPredicate {
            path: new_path.clone(),
            op: leaf.op.clone(),
        }),
        FilterTree::Not(inner) => FilterTree::Not(Box::new(rewrite_path(inner, new_path))),
        FilterTree::AnyOf(children) => {
            FilterTree::AnyOf(children.iter().map(|c| rewrite_path(c, new_path)).collect())
        }
        FilterTree::AllOf(children) => {
            FilterTree::AllOf(children.iter().map(|c| rewrite_path(c, new_path)).collect())
        }
        FilterTree::Nested { path, body } => FilterTree::Nested {
            path: path.clone(),
            body: Box::new(rewrite_path(body, new_path)),
        },
        FilterTree::LengthPredicate { path, predicate } => FilterTree::LengthPredicate {
            path: path.clone(),
            predicate: Box::new(rewrite_path(predicate, new_path)),
        },
    }
}

fn render_leaf(leaf: &LeafPredicate) -> Value {
    let path = leaf.path.dotted();
    match &leaf.op {
        LeafOp::EqualToAnyOf(values) => render_equal_to_any_of(&path, values),
        LeafOp::Gt(v) => json!({"range": {path: {"gt": v}}}),
        LeafOp::Gte(v) => json!({"range": {path: {"gte": v}}}),
        LeafOp::Lt(v) => json!({"range": {path: {"lt": v}}}),
        LeafOp::Lte(v) => json!({"range": {path: {"lte": v}}}),
        LeafOp::Matches(text) => json!({"match": {path: text}}),
        LeafOp::MatchesQuery { query, allowed_edits_per_term } => json!({
            "match": {path: {"query": query, "fuzziness": allowed_edits_per_term}}
        }),
        LeafOp::MatchesPhrase { phrase } => json!({"match_phrase": {path: phrase}}),
        LeafOp::Near { lat, lon, max_distance, unit } => json!({
            "geo_distance": {
                "distance": format!("{max_distance}{unit}"),
                path: {"lat": lat, "lon": lon},
            }
        }),
        LeafOp::TimeOfDay { gt, gte, lt, lte, time_zone } => json!({
            "range": {
                path: {"gt": gt, "gte": gte, "lt": lt, "lte": lte, "time_zone": time_zone}
            }
        }),
    }
}

/// `terms` silently drops a `null` element, so a plain `{"terms": {path:
/// values}}` would never match a null field — breaking both
/// `equal_to_any_of: [null, v…]` (must match null-or-vᵢ) and, through
/// `Not`, `not: {equal_to_any_of: [null]}` (must match non-null; double
/// negation of `exists` gives exactly that once this leaf alone handles
/// the null). Split the null element out into its own `exists` clause.
fn render_equal_to_any_of(path: &str, values: &[Value]) -> Value {
    let non_null: Vec<&Value> = values.iter().filter(|v| !v.is_null()).collect();
    let has_null = non_null.len() != values.len();

    if !has_null {
        return json!({"terms": {path: non_null}});
    }

    let is_null_clause = json!({"bool": {"must_not": [{"exists": {"field": path}}]}});
    if non_null.is_empty() {
        return is_null_clause;
    }

    json!({
        "bool": {
            "should": [{"terms": {path: non_null}}, is_null_clause],
            "minimum_should_match": 1,
        }
    })
}
