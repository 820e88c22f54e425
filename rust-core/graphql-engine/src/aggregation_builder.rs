use filter_interpreter::compile;
use query_planner::{
    AggregatedValueFunction, AggregatedValueSpec, AggregationNode, DateGroupingOutput, DateOffset,
    Exactness, Grouping, TruncationUnit,
};
use schema_view::{FieldPath, SchemaView};
use serde_json::Value;

use crate::error::EngineError;

fn truncation_unit(name: &str) -> Result<TruncationUnit, EngineError> {
    match name {
        "YEAR" => Ok(TruncationUnit::Year),
        "QUARTER" => Ok(TruncationUnit::Quarter),
        "MONTH" => Ok(TruncationUnit::Month),
        "WEEK" => Ok(TruncationUnit::Week),
        "DAY" => Ok(TruncationUnit::Day),
        "HOUR" => Ok(TruncationUnit::Hour),
        "MINUTE" => Ok(TruncationUnit::Minute),
        "SECOND" => Ok(TruncationUnit::Second),
        other => Err(EngineError::Validation(format!("unknown truncation_unit '{other}'"))),
    }
}

fn date_offset(value: &Value) -> Result<Option<DateOffset>, EngineError> {
    let Some(obj) = value.as_object() else { return Ok(None) };
    let amount = obj
        .get("amount")
        .and_then(Value::as_i64)
        .ok_or_else(|| EngineError::Validation("offset.amount is required".to_string()))?;
    let unit = obj
        .get("unit")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Validation("offset.unit is required".to_string()))?;
    Ok(Some(DateOffset { amount, unit: truncation_unit(unit)? }))
}

fn date_histogram_grouping(field: FieldPath, output: DateGroupingOutput, spec: &Value) -> Result<Grouping, EngineError> {
    let truncation = spec
        .get("truncation_unit")
        .and_then(Value::as_str)
        .ok_or_else(|| EngineError::Validation("truncation_unit is required for a date grouping".to_string()))?;
    let time_zone = spec.get("time_zone").and_then(Value::as_str).map(str::to_string);
    let offset = match spec.get("offset") {
        Some(v) => date_offset(v)?,
        None => None,
    };
    let missing_bucket = spec.get("missing_bucket").and_then(Value::as_bool).unwrap_or(false);
    Ok(Grouping::DateHistogram {
        field,
        output,
        truncation_unit: truncation_unit(truncation)?,
        time_zone,
        offset,
        missing_bucket,
    })
}

/// Parses one entry of the `grouped_by` argument: `{field_name: spec}`
/// where `spec` is either `{term: {missing_bucket}}` (the default when no
/// key is recognized) or one of the four date-grouping output shapes (spec
/// §6 "Date/time groupings").
fn parse_grouping(field_name: &str, spec: &Value) -> Result<Grouping, EngineError> {
    let field = FieldPath::single(field_name);
    let Some(obj) = spec.as_object() else {
        return Ok(Grouping::Term { field, missing_bucket: false });
    };

    if let Some(date_spec) = obj.get("as_date_time") {
        return date_histogram_grouping(field, DateGroupingOutput::AsDateTime, date_spec);
    }
    if let Some(date_spec) = obj.get("as_date") {
        return date_histogram_grouping(field, DateGroupingOutput::AsDate, date_spec);
    }
    if let Some(date_spec) = obj.get("as_day_of_week") {
        return date_histogram_grouping(field, DateGroupingOutput::AsDayOfWeek, date_spec);
    }
    if let Some(date_spec) = obj.get("as_time_of_day") {
        return date_histogram_grouping(field, DateGroupingOutput::AsTimeOfDay, date_spec);
    }

    let missing_bucket = obj.get("term").and_then(|t| t.get("missing_bucket")).and_then(Value::as_bool).unwrap_or(false);
    Ok(Grouping::Term { field, missing_bucket })
}

fn parse_groupings(value: &Value) -> Result<Vec<Grouping>, EngineError> {
    let Some(obj) = value.as_object() else { return Ok(vec![]) };
    obj.iter().map(|(field_name, spec)| parse_grouping(field_name, spec)).collect()
}

fn parse_function(name: &str) -> Result<(AggregatedValueFunction, Exactness), EngineError> {
    match name {
        "sum" => Ok((AggregatedValueFunction::Sum, Exactness::Exact)),
        "avg" => Ok((AggregatedValueFunction::Avg, Exactness::Exact)),
        "min" => Ok((AggregatedValueFunction::Min, Exactness::Exact)),
        "max" => Ok((AggregatedValueFunction::Max, Exactness::Exact)),
        "distinct_count" | "cardinality" => Ok((AggregatedValueFunction::DistinctCount, Exactness::Approximate)),
        other => Err(EngineError::Validation(format!("unknown aggregated value function '{other}'"))),
    }
}

/// Parses the `aggregated_values` argument: `{alias: {field, function}}`.
fn parse_aggregated_values(value: &Value) -> Result<Vec<AggregatedValueSpec>, EngineError> {
    let Some(obj) = value.as_object() else { return Ok(vec![]) };
    obj.iter()
        .map(|(alias, spec)| {
            let field_name = spec
                .get("field")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::Validation(format!("aggregated_values.{alias}.field is required")))?;
            let function_name = spec
                .get("function")
                .and_then(Value::as_str)
                .ok_or_else(|| EngineError::Validation(format!("aggregated_values.{alias}.function is required")))?;
            let (function, exactness) = parse_function(function_name)?;
            Ok(AggregatedValueSpec { alias: alias.clone(), field: FieldPath::single(field_name), function, exactness })
        })
        .collect()
}

/// Builds one `AggregationNode` (and its `sub_aggregations`, recursively)
/// from the GraphQL `_aggregations` field's arguments (spec §4.7, §6).
/// `type_name` is the grouping's own target type, used to compile `filter`
/// the same way a document connection's filter is compiled.
pub fn build_aggregation_node(
    schema: &SchemaView,
    type_name: &str,
    alias: &str,
    filter: &Value,
    grouped_by: &Value,
    aggregated_values: &Value,
    sub_aggregations: &Value,
) -> Result<AggregationNode, EngineError> {
    let compiled_filter = compile(schema, type_name, filter)?.into_tree();
    let groupings = parse_groupings(grouped_by)?;
    let values = parse_aggregated_values(aggregated_values)?;

    let sub_aggregations = match sub_aggregations.as_object() {
        None => vec![],
        Some(obj) => obj
            .iter()
            .map(|(sub_alias, sub_spec)| {
                let sub_filter = sub_spec.get("filter").cloned().unwrap_or(Value::Null);
                let sub_grouped_by = sub_spec.get("grouped_by").cloned().unwrap_or(Value::Null);
                let sub_aggregated_values = sub_spec.get("aggregated_values").cloned().unwrap_or(Value::Null);
                let sub_sub = sub_spec.get("sub_aggregations").cloned().unwrap_or(Value::Null);
                build_aggregation_node(schema, type_name, sub_alias, &sub_filter, &sub_grouped_by, &sub_aggregated_values, &sub_sub)
            })
            .collect::<Result<Vec<_>, _>>()?,
    };

    Ok(AggregationNode {
        alias: alias.to_string(),
        path: FieldPath::root(),
        filter: compiled_filter,
        groupings,
        aggregated_values: values,
        sub_aggregations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use schema_view::{SchemaConfig, TypeDef, TypeKind};
    use serde_json::json;

    fn schema() -> SchemaView {
        SchemaView::from_config(SchemaConfig {
            types: vec![TypeDef { name: "Widget".to_string(), kind: TypeKind::Object, fields: vec![], enum_value_overrides: vec![], backing_index: Some("widgets".to_string()) }],
            index_definitions: Default::default(),
        })
        .unwrap()
    }

    #[test]
    fn parses_a_plain_term_grouping() {
        let node = build_aggregation_node(&schema(), "Widget", "root", &Value::Null, &json!({"tag": {}}), &Value::Null, &Value::Null).unwrap();
        assert_eq!(node.groupings.len(), 1);
        match &node.groupings[0] {
            Grouping::Term { field, missing_bucket } => {
                assert_eq!(field, &FieldPath::single("tag"));
                assert!(!missing_bucket);
            }
            other => panic!("expected a term grouping, got {other:?}"),
        }
    }

    #[test]
    fn parses_a_date_histogram_grouping_with_offset() {
        let grouped_by = json!({"created_at": {"as_date_time": {"truncation_unit": "DAY", "time_zone": "America/Los_Angeles", "offset": {"amount": 1, "unit": "DAY"}}}});
        let node = build_aggregation_node(&schema(), "Widget", "root", &Value::Null, &grouped_by, &Value::Null, &Value::Null).unwrap();
        match &node.groupings[0] {
            Grouping::DateHistogram { truncation_unit, time_zone, offset, .. } => {
                assert_eq!(*truncation_unit, TruncationUnit::Day);
                assert_eq!(time_zone.as_deref(), Some("America/Los_Angeles"));
                assert_eq!(offset.as_ref().unwrap().amount, 1);
            }
            other => panic!("expected a date histogram grouping, got {other:?}"),
        }
    }

    #[test]
    fn parses_aggregated_values_with_their_function() {
        let values = json!({"total_cost": {"field": "cost", "function": "sum"}});
        let node = build_aggregation_node(&schema(), "Widget", "root", &Value::Null, &Value::Null, &values, &Value::Null).unwrap();
        assert_eq!(node.aggregated_values.len(), 1);
        assert_eq!(node.aggregated_values[0].alias, "total_cost");
        assert_eq!(node.aggregated_values[0].function, AggregatedValueFunction::Sum);
    }

    #[test]
    fn rejects_an_unknown_aggregation_function() {
        let values = json!({"total_cost": {"field": "cost", "function": "median"}});
        let result = build_aggregation_node(&schema(), "Widget", "root", &Value::Null, &Value::Null, &values, &Value::Null);
        assert!(matches!(result, Err(EngineError::Validation(_))));
    }

    #[test]
    fn parses_nested_sub_aggregations_recursively() {
        let sub = json!({"by_manufacturer": {"grouped_by": {"manufacturer_id": {}}}});
        let node = build_aggregation_node(&schema(), "Widget", "root", &Value::Null, &Value::Null, &Value::Null, &sub).unwrap();
        assert_eq!(node.sub_aggregations.len(), 1);
        assert_eq!(node.sub_aggregations[0].alias, "by_manufacturer");
        assert_eq!(node.sub_aggregations[0].groupings.len(), 1);
    }
}
