//! GraphQL scalar coercion. Built on the `async_graphql::dynamic` schema
//! API, so scalars are registered by name (`Scalar::new`) rather than
//! through the static `ScalarType` trait — validation happens inline in
//! field/argument resolvers via the functions below, which just forward
//! into `schema_view`'s coercers and translate their errors.

use async_graphql::dynamic::TypeRef;
use async_graphql::Value as GraphqlValue;
use schema_view::{
    coerce_date, coerce_date_time, coerce_geo_location, coerce_json_safe_long, coerce_local_time,
    coerce_long_string, coerce_time_zone,
};
use serde_json::Value;

use crate::error::EngineError;

/// Every scalar name the schema registers besides the built-in
/// `String`/`Int`/`Float`/`Boolean`/`ID`.
pub const DATE: &str = "Date";
pub const DATE_TIME: &str = "DateTime";
pub const LOCAL_TIME: &str = "LocalTime";
pub const JSON_SAFE_LONG: &str = "JsonSafeLong";
pub const LONG_STRING: &str = "LongString";
pub const TIME_ZONE: &str = "TimeZone";
pub const CURSOR: &str = "Cursor";

/// Passthrough scalar for filter/sort/aggregation-grouping arguments: their
/// input shape is the DSL's own recursive JSON, which isn't worth modeling
/// as exhaustive per-field GraphQL input types for this crate's purposes.
pub const UNTYPED: &str = "Untyped";

pub fn scalar_type(name: &str) -> TypeRef {
    TypeRef::named(name)
}

fn as_str(value: &GraphqlValue, scalar: &str) -> Result<String, EngineError> {
    match value {
        GraphqlValue::String(s) => Ok(s.clone()),
        other => Err(EngineError::Validation(format!("{scalar} expects a string, got {other:?}"))),
    }
}

/// Validates a `Date` scalar argument and returns it unchanged (the
/// datastore takes the same ISO-8601 text the client sent).
pub fn validate_date(value: &GraphqlValue) -> Result<String, EngineError> {
    let text = as_str(value, DATE)?;
    coerce_date(&text)?;
    Ok(text)
}

pub fn validate_date_time(value: &GraphqlValue) -> Result<String, EngineError> {
    let text = as_str(value, DATE_TIME)?;
    coerce_date_time(&text)?;
    Ok(text)
}

pub fn validate_local_time(value: &GraphqlValue) -> Result<String, EngineError> {
    let text = as_str(value, LOCAL_TIME)?;
    coerce_local_time(&text)?;
    Ok(text)
}

pub fn validate_time_zone(value: &GraphqlValue) -> Result<String, EngineError> {
    let text = as_str(value, TIME_ZONE)?;
    coerce_time_zone(&text)?;
    Ok(text)
}

/// `JsonSafeLong` arrives as a GraphQL `Int`/`Float`-shaped number; reject
/// anything outside `+/- 2^53` before it round-trips through JSON again.
pub fn validate_json_safe_long(value: &GraphqlValue) -> Result<i64, EngineError> {
    let number = match value {
        GraphqlValue::Number(n) => n.as_i64().ok_or_else(|| EngineError::Validation(format!("{JSON_SAFE_LONG} expects an integer, got {n}"))),
        other => Err(EngineError::Validation(format!("{JSON_SAFE_LONG} expects a number, got {other:?}"))),
    }?;
    Ok(coerce_json_safe_long(number)?)
}

/// `LongString`: carried over the wire as a string so arbitrary 64-bit
/// integers survive JSON's double-precision ceiling.
pub fn validate_long_string(value: &GraphqlValue) -> Result<i64, EngineError> {
    let text = as_str(value, LONG_STRING)?;
    Ok(coerce_long_string(&text)?)
}

/// Renders a decoded `PropertyValue`/raw document field back out as the
/// scalar's wire representation. `LongString` round-trips as text;
/// everything else already matches its JSON form.
pub fn render_long_string(value: i64) -> GraphqlValue {
    GraphqlValue::String(value.to_string())
}

/// The `GeoLocation` scalar is modeled as an input/output object pair
/// rather than a single `ScalarType`, since the spec gives it
/// `{latitude, longitude}` sub-fields rather than a primitive wire form.
/// `validate_geo_location` is the shared coercion both the input-object
/// field resolver and the output-object field resolver call.
pub fn validate_geo_location(latitude: f64, longitude: f64) -> Result<(f64, f64), EngineError> {
    Ok(coerce_geo_location(latitude, longitude)?)
}

/// The `Untyped` scalar passes a raw JSON value straight through, used for
/// filter/sort/grouping arguments whose shape is the DSL's own.
pub fn untyped_from_graphql(value: &GraphqlValue) -> Value {
    value.clone().into_json().unwrap_or(Value::Null)
}

pub fn untyped_to_graphql(value: &Value) -> GraphqlValue {
    GraphqlValue::from_json(value.clone()).unwrap_or(GraphqlValue::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_a_well_formed_date() {
        assert!(validate_date(&GraphqlValue::String("2022-11-23".to_string())).is_ok());
    }

    #[test]
    fn rejects_a_malformed_date() {
        let result = validate_date(&GraphqlValue::String("not-a-date".to_string()));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn json_safe_long_rejects_values_outside_the_double_precision_range() {
        let result = validate_json_safe_long(&GraphqlValue::Number((9_007_199_254_740_993i64).into()));
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn long_string_round_trips_through_text() {
        let parsed = validate_long_string(&GraphqlValue::String("9223372036854775807".to_string())).unwrap();
        assert_eq!(parsed, i64::MAX);
        match render_long_string(parsed) {
            GraphqlValue::String(text) => assert_eq!(text, "9223372036854775807"),
            other => panic!("expected string rendering, got {other:?}"),
        }
    }

    #[test]
    fn geo_location_rejects_out_of_range_latitude() {
        let result = validate_geo_location(120.0, 0.0);
        assert!(result.is_err());
    }

    #[test]
    fn untyped_round_trips_arbitrary_json() {
        let original = serde_json::json!({"any_of": [{"cost": {"gt": 1}}]});
        let graphql_value = untyped_to_graphql(&original);
        let round_tripped = untyped_from_graphql(&graphql_value);
        assert_eq!(round_tripped, original);
    }
}
