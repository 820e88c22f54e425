/// Errors surfaced by the msearch dispatcher and its supporting machinery
/// (spec §4.5, §7). `RequestExceededDeadline` and `SearchFailed` are the
/// two variants that ever reach a GraphQL client; the rest are invariant
/// violations caught during development.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("request exceeded its deadline with {0}ms remaining")]
    RequestExceededDeadline(i64),

    #[error("datastore cluster '{0}' rejected the request: {1}")]
    SearchFailed(String, String),

    #[error("transport error talking to cluster '{0}': {1}")]
    Transport(String, String),

    #[error("malformed msearch response from cluster '{0}': {1}")]
    MalformedResponse(String, String),

    #[error("unknown query cluster '{0}'")]
    UnknownCluster(String),
}
