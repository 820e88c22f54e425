use filter_interpreter::{FilterOutcome, FilterTree, LeafOp, LeafPredicate};
use query_planner::{decode_cursor, encode_cursor, SortKey, SortOrder};
use schema_view::FieldPath;
use serde_json::{json, Value};

use crate::error::EngineError;

/// The tiebreak field every document connection sorts by last, so cursors
/// stay stable across retries (spec §5 ordering guarantee) even when the
/// caller's own sort has ties.
pub fn id_tiebreak() -> SortKey {
    SortKey { field: FieldPath::single("id"), order: SortOrder::Asc }
}

/// Appends the id tiebreak to a caller-supplied sort unless it's already
/// present, so every document connection has a unique total order.
pub fn with_tiebreak(mut sort: Vec<SortKey>) -> Vec<SortKey> {
    if !sort.iter().any(|key| key.field == FieldPath::single("id")) {
        sort.push(id_tiebreak());
    }
    sort
}

/// A relay cursor over a plain document edge: the document's full sort-key
/// tuple, so seeking past it is just a keyset comparison against the next
/// page (spec §4 "encode the sort key, not the offset").
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentCursor {
    pub sort_values: Vec<Value>,
}

impl DocumentCursor {
    pub fn from_document(document: &Value, sort: &[SortKey]) -> Self {
        let sort_values = sort
            .iter()
            .map(|key| value_at(document, &key.field))
            .collect();
        Self { sort_values }
    }

    pub fn encode(&self) -> String {
        encode_cursor(&json!({ "sort_values": self.sort_values }))
    }

    pub fn decode(cursor: &str) -> Result<Self, EngineError> {
        let payload = decode_cursor(cursor).map_err(EngineError::from)?;
        let sort_values = payload
            .get("sort_values")
            .and_then(Value::as_array)
            .ok_or_else(|| EngineError::Validation(format!("malformed cursor: {cursor}")))?
            .clone();
        Ok(Self { sort_values })
    }
}

pub(crate) fn value_at(document: &Value, path: &FieldPath) -> Value {
    let mut current = document;
    for segment in path.segments() {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// The standard keyset-pagination predicate: "strictly after the cursor's
/// sort-key tuple", respecting each key's direction. For sort keys
/// `(s1 asc, s2 desc, ...)` this is the usual disjunction-of-conjunctions:
/// `s1 > v1 OR (s1 == v1 AND s2 < v2) OR (s1 == v1 AND s2 == v2 AND ...)`.
pub fn seek_past_filter(sort: &[SortKey], cursor: &DocumentCursor) -> FilterOutcome {
    if sort.is_empty() || cursor.sort_values.len() != sort.len() {
        return FilterOutcome::True;
    }

    let mut branches = Vec::new();
    for i in 0..sort.len() {
        let mut clauses = Vec::with_capacity(i + 1);
        for j in 0..i {
            clauses.push(FilterTree::Leaf(LeafPredicate {
                path: sort[j].field.clone(),
                op: LeafOp::EqualToAnyOf(vec![cursor.sort_values[j].clone()]),
            }));
        }
        let strict_op = match sort[i].order {
            SortOrder::Asc => LeafOp::Gt(cursor.sort_values[i].clone()),
            SortOrder::Desc => LeafOp::Lt(cursor.sort_values[i].clone()),
        };
        clauses.push(FilterTree::Leaf(LeafPredicate { path: sort[i].field.clone(), op: strict_op }));
        branches.push(if clauses.len() == 1 { clauses.into_iter().next().unwrap() } else { FilterTree::AllOf(clauses) });
    }

    match branches.len() {
        1 => FilterOutcome::Node(branches.into_iter().next().unwrap()),
        _ => FilterOutcome::Node(FilterTree::AnyOf(branches)),
    }
}

/// One relay edge over a plain document.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentEdge {
    pub cursor: String,
    pub node: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DocumentConnection {
    pub edges: Vec<DocumentEdge>,
    pub start_cursor: Option<String>,
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
    pub has_previous_page: bool,
    pub total_edge_count: Option<u64>,
}

/// Builds the relay page from a batch of documents fetched with
/// `page_size + 1` rows (the standard over-fetch-by-one trick for
/// `has_next_page` without a second round trip). `reverse` is set when the
/// caller paginated backward (`last`/`before`): the query was issued
/// against a flipped sort, so the fetched rows arrive in reverse display
/// order and are flipped back here.
pub fn build_document_connection(
    mut documents: Vec<Value>,
    sort: &[SortKey],
    page_size: usize,
    reverse: bool,
    has_previous_page: bool,
    total_edge_count: Option<u64>,
) -> DocumentConnection {
    let has_next_page = documents.len() > page_size;
    documents.truncate(page_size);
    if reverse {
        documents.reverse();
    }

    let edges: Vec<DocumentEdge> = documents
        .into_iter()
        .map(|doc| {
            let cursor = DocumentCursor::from_document(&doc, sort).encode();
            DocumentEdge { cursor, node: doc }
        })
        .collect();

    let (has_next_page, has_previous_page) = if reverse {
        (has_previous_page, has_next_page)
    } else {
        (has_next_page, has_previous_page)
    };

    DocumentConnection {
        start_cursor: edges.first().map(|e| e.cursor.clone()),
        end_cursor: edges.last().map(|e| e.cursor.clone()),
        has_next_page,
        has_previous_page,
        total_edge_count,
        edges,
    }
}
