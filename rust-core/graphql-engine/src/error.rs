use datastore_client::DispatchError;
use filter_interpreter::FilterError;
use query_planner::PlanError;
use schema_view::{ScalarError, SchemaError};

/// The five error kinds spec §7 distinguishes, each with its own
/// client-visibility rule (following the teacher's `StoreError` pattern
/// in `indexing/src/store.rs`, generalized to the GraphQL boundary).
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Client-visible validation failure: bad cursor, negative `first`,
    /// malformed scalar, unsupported filter combination. Reported verbatim
    /// and logged at warn level.
    #[error("{0}")]
    Validation(String),
    /// Aborts the whole request; logged with wave durations by the caller.
    #[error("request exceeded its deadline ({remaining_ms}ms remaining)")]
    DeadlineExceeded { remaining_ms: i64 },
    /// Upstream datastore failure. Isolated to the aggregation/relationship
    /// alias it occurred on unless it was a whole-wave dispatch failure.
    #[error("datastore search failed: {0}")]
    SearchFailed(String),
    /// Schema/indexing inconsistency recovered locally (spec §7: this is
    /// the only class of error absorbed rather than surfaced) — never
    /// constructed as a client-visible error; kept here only so resolvers
    /// have a typed value to log before recovering to null/zero.
    #[error("missing mapping, recovered as null: {0}")]
    MissingMapping(String),
    /// A programming invariant was violated (plan merged with an
    /// incompatible plan, cursor outside bucket space). Logged at error
    /// level; never reveals its message to the client.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}

impl EngineError {
    fn extension_code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION",
            EngineError::DeadlineExceeded { .. } => "DEADLINE_EXCEEDED",
            EngineError::SearchFailed(_) => "SEARCH_FAILED",
            EngineError::MissingMapping(_) => "MISSING_MAPPING",
            EngineError::Invariant(_) => "INTERNAL",
        }
    }

    /// The message shown to the client: every kind except `Invariant`
    /// surfaces its own text; invariants are logged in full server-side
    /// but never echoed, to avoid leaking internals (spec §7).
    fn client_message(&self) -> String {
        match self {
            EngineError::Invariant(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<EngineError> for async_graphql::Error {
    fn from(error: EngineError) -> Self {
        match &error {
            EngineError::Validation(message) => tracing::warn!(%message, "validation error"),
            EngineError::DeadlineExceeded { remaining_ms } => {
                tracing::error!(remaining_ms, "request exceeded its deadline")
            }
            EngineError::SearchFailed(message) => tracing::warn!(%message, "datastore search failed"),
            EngineError::MissingMapping(message) => tracing::debug!(%message, "recovered missing mapping"),
            EngineError::Invariant(message) => tracing::error!(%message, "internal invariant violated"),
        }

        async_graphql::Error::new(error.client_message())
            .extend_with(|_, extensions| extensions.set("code", error.extension_code()))
    }
}

impl From<SchemaError> for EngineError {
    fn from(error: SchemaError) -> Self {
        EngineError::Validation(error.to_string())
    }
}

impl From<FilterError> for EngineError {
    fn from(error: FilterError) -> Self {
        EngineError::Validation(error.to_string())
    }
}

impl From<PlanError> for EngineError {
    fn from(error: PlanError) -> Self {
        match error {
            PlanError::MalformedCursor(_) | PlanError::NegativeFirst(_) => {
                EngineError::Validation(error.to_string())
            }
            PlanError::CursorOutsideBucketSpace
            | PlanError::Incompatible(_)
            | PlanError::DuplicateAggregationAlias(_)
            | PlanError::CompositeNestingUnsupported(_)
            | PlanError::MalformedAggregationResponse(_, _) => EngineError::Invariant(error.to_string()),
        }
    }
}

impl From<ScalarError> for EngineError {
    fn from(error: ScalarError) -> Self {
        EngineError::Validation(error.to_string())
    }
}

impl From<DispatchError> for EngineError {
    fn from(error: DispatchError) -> Self {
        match error {
            DispatchError::RequestExceededDeadline(remaining_ms) => {
                EngineError::DeadlineExceeded { remaining_ms }
            }
            other => EngineError::SearchFailed(other.to_string()),
        }
    }
}
