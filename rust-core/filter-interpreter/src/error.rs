#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("unknown field '{1}' on type '{0}'")]
    UnknownField(String, String),
    #[error("filter predicate for field '{0}' must be an object, got: {1}")]
    NotAnObject(String, String),
    #[error("'any_of' must be an array, got: {0}")]
    AnyOfNotArray(String),
    #[error("'all_of' must be an array, got: {0}")]
    AllOfNotArray(String),
    #[error("field '{0}' is scalar and cannot be filtered with 'any_satisfy' or 'count'")]
    ListOperatorOnScalarField(String),
    #[error("field '{0}' is a list and must be filtered with 'any_satisfy' or 'count', got: {1}")]
    ScalarOperatorOnListField(String, String),
    #[error("unrecognized operator '{0}' on field '{1}'")]
    UnknownOperator(String, String),
    #[error(
        "'any_satisfy' on field '{0}' must compile to exactly one clause with no 'not' and no \
         'equal_to_any_of: [null, ...]'; this is rejected at schema-compile time, not per request"
    )]
    DisallowedAnySatisfyShape(String),
    #[error("value for operator '{0}' on field '{1}' has the wrong shape: {2}")]
    MalformedOperatorValue(String, String, String),
    #[error(transparent)]
    Schema(#[from] schema_view::SchemaError),
}
