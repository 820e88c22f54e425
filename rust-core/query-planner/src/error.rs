#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("cannot merge incompatible queries: differ on {0}")]
    Incompatible(&'static str),
    #[error("cannot merge queries: aggregation alias '{0}' is used by both")]
    DuplicateAggregationAlias(String),
    #[error("composite aggregation cannot be used with parent aggregation of type {0}")]
    CompositeNestingUnsupported(&'static str),
    #[error("malformed cursor: {0}")]
    MalformedCursor(String),
    #[error("cursor does not address a valid bucket position")]
    CursorOutsideBucketSpace,
    #[error("'first' must be >= 0, got {0}")]
    NegativeFirst(i64),
    #[error("unexpected aggregation response shape for alias '{0}': {1}")]
    MalformedAggregationResponse(String, String),
}
