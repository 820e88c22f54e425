use schema_view::FieldPath;
use serde_json::Value;

/// A compiled datastore query-DSL node. Never constructed directly with a
/// `true`/`false` leaf — those are pruned at compile time and represented
/// by `FilterOutcome` instead (spec invariant: a predicate whose entire
/// subtree is *true* is pruned before it reaches the tree).
#[derive(Debug, Clone, PartialEq)]
pub enum FilterTree {
    Leaf(LeafPredicate),
    Not(Box<FilterTree>),
    AnyOf(Vec<FilterTree>),
    AllOf(Vec<FilterTree>),
    /// `any_satisfy` on a list-of-nested field: the body must be satisfied
    /// by a single element of the list at `path`.
    Nested {
        path: FieldPath,
        body: Box<FilterTree>,
    },
    /// `count` on a list field: a numeric predicate against the list's
    /// precomputed length field.
    LengthPredicate {
        path: FieldPath,
        predicate: Box<FilterTree>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct LeafPredicate {
    pub path: FieldPath,
    pub op: LeafOp,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LeafOp {
    EqualToAnyOf(Vec<Value>),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    Matches(String),
    MatchesQuery {
        query: String,
        allowed_edits_per_term: Option<u32>,
    },
    MatchesPhrase {
        phrase: String,
    },
    Near {
        lat: f64,
        lon: f64,
        max_distance: f64,
        unit: String,
    },
    TimeOfDay {
        gt: Option<String>,
        gte: Option<String>,
        lt: Option<String>,
        lte: Option<String>,
        time_zone: Option<String>,
    },
}

/// The three-valued result of compiling a filter subtree: a concrete DSL
/// node, or one of the two constant outcomes the algorithm prunes eagerly
/// (an absent predicate is *true*; `not: {}` and empty `any_of` are *false*).
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    True,
    False,
    Node(FilterTree),
}

impl FilterOutcome {
    pub fn into_tree(self) -> Option<FilterTree> {
        match self {
            FilterOutcome::Node(tree) => Some(tree),
            FilterOutcome::True | FilterOutcome::False => None,
        }
    }

    pub fn is_true(&self) -> bool {
        matches!(self, FilterOutcome::True)
    }

    pub fn is_false(&self) -> bool {
        matches!(self, FilterOutcome::False)
    }
}

pub(crate) fn negate(outcome: FilterOutcome) -> FilterOutcome {
    match outcome {
        FilterOutcome::True => FilterOutcome::False,
        FilterOutcome::False => FilterOutcome::True,
        FilterOutcome::Node(tree) => FilterOutcome::Node(FilterTree::Not(Box::new(tree))),
    }
}

/// Implicit `all_of`: drop `True` children, short-circuit on any `False`.
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

/// `any_of`: drop `False` children, short-circuit True on any `True`.
pub(crate) fn or_all(outcomes: Vec<FilterOutcome>) -> FilterOutcome {
    let mut children = Vec::new();
    for outcome in outcomes {
        match outcome {
            FilterOutcome::True => return FilterOutcome::True,
            FilterOutcome::False => continue,
            FilterOutcome::Node(tree) => children.push(tree),
        }
    }
    match children.len() {
        0 => FilterOutcome::False,
        1 => FilterOutcome::Node(children.into_iter().next().unwrap()),
        _ => FilterOutcome::Node(FilterTree::AnyOf(children)),
    }
}

/// Structural check used by `any_satisfy` (spec step 6): the compiled body
/// must produce a single `nested` clause with no `not` anywhere in it and
/// no `equal_to_any_of: [null, ...]` leaf. `all_of`/`any_of` siblings are
/// fine — they still render inside the one `nested` wrapper — only `not`
/// and null-equality are disallowed.
pub(crate) fn is_single_clause_without_not_or_null_equality(tree: &FilterTree) -> bool {
    match tree {
        FilterTree::Leaf(leaf) => match &leaf.op {
            LeafOp::EqualToAnyOf(values) => !values.iter().any(Value::is_null),
            _ => true,
        },
        FilterTree::Nested { body, .. } => {
            is_single_clause_without_not_or_null_equality(body)
        }
        FilterTree::LengthPredicate { predicate, .. } => {
            is_single_clause_without_not_or_null_equality(predicate)
        }
        FilterTree::AllOf(children) | FilterTree::AnyOf(children) => {
            children.iter().all(is_single_clause_without_not_or_null_equality)
        }
        FilterTree::Not(_) => false,
    }
}
