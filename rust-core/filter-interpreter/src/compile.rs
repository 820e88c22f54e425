use schema_view::{FieldDef, FieldPath, ListElementKind, SchemaView};
use serde_json::{Map, Value};

use crate::error::FilterError;
use crate::tree::{
    and_all, is_single_clause_without_not_or_null_equality, negate, or_all, FilterOutcome,
    FilterTree, LeafOp, LeafPredicate,
};

/// Compiles a GraphQL filter input (already decoded to JSON) against the
/// schema's view of `type_name`, producing either a concrete DSL node or
/// one of the two constant outcomes (spec §4.1 steps 1-7).
pub fn compile(
    schema: &SchemaView,
    type_name: &str,
    filter: &Value,
) -> Result<FilterOutcome, FilterError> {
    compile_type(schema, type_name, &FieldPath::root(), filter)
}

fn as_object<'a>(value: &'a Value, context: &str) -> Result<Option<&'a Map<String, Value>>, FilterError> {
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        other => Err(FilterError::NotAnObject(context.to_string(), other.to_string())),
    }
}

fn compile_type(
    schema: &SchemaView,
    type_name: &str,
    base_path: &FieldPath,
    filter: &Value,
) -> Result<FilterOutcome, FilterError> {
    let obj = match as_object(filter, type_name)? {
        None => return Ok(FilterOutcome::True),
        Some(obj) if obj.is_empty() => return Ok(FilterOutcome::True),
        Some(obj) => obj,
    };

    let mut outcomes = Vec::with_capacity(obj.len());
    for (key, val) in obj {
        if val.is_null() {
            continue;
        }
        let outcome = match key.as_str() {
            "not" => negate(compile_type(schema, type_name, base_path, val)?),
            "any_of" => {
                let items = val
                    .as_array()
                    .ok_or_else(|| FilterError::AnyOfNotArray(val.to_string()))?;
                if items.is_empty() {
                    FilterOutcome::False
                } else {
                    or_all(
                        items
                            .iter()
                            .map(|v| compile_type(schema, type_name, base_path, v))
                            .collect::<Result<Vec<_>, _>>()?,
                    )
                }
            }
            "all_of" => {
                let items = val
                    .as_array()
                    .ok_or_else(|| FilterError::AllOfNotArray(val.to_string()))?;
                and_all(
                    items
                        .iter()
                        .map(|v| compile_type(schema, type_name, base_path, v))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            field_name => compile_field(schema, type_name, field_name, base_path, val)?,
        };
        outcomes.push(outcome);
    }
    Ok(and_all(outcomes))
}

fn compile_field(
    schema: &SchemaView,
    type_name: &str,
    field_name: &str,
    base_path: &FieldPath,
    val: &Value,
) -> Result<FilterOutcome, FilterError> {
    let field = schema.field(type_name, field_name)?;
    let field_path = base_path.join(field.index_name());

    if field.is_list() {
        compile_list_field(schema, field, &field_path, val)
    } else {
        match schema.get_type(&field.declared_type) {
            Some(_) => compile_type(schema, &field.declared_type, &field_path, val),
            None => compile_scalar_predicate(&field_path, val),
        }
    }
}

fn compile_list_field(
    schema: &SchemaView,
    field: &FieldDef,
    field_path: &FieldPath,
    val: &Value,
) -> Result<FilterOutcome, FilterError> {
    let obj = match as_object(val, &field_path.dotted())? {
        None => return Ok(FilterOutcome::True),
        Some(obj) if obj.is_empty() => return Ok(FilterOutcome::True),
        Some(obj) => obj,
    };

    let mut outcomes = Vec::with_capacity(obj.len());
    for (key, v) in obj {
        if v.is_null() {
            continue;
        }
        let outcome = match key.as_str() {
            "any_satisfy" => compile_any_satisfy(schema, field, field_path, v)?,
            "count" => compile_count(field_path, v)?,
            "not" => negate(compile_list_field(schema, field, field_path, v)?),
            "any_of" => {
                let items = v
                    .as_array()
                    .ok_or_else(|| FilterError::AnyOfNotArray(v.to_string()))?;
                if items.is_empty() {
                    FilterOutcome::False
                } else {
                    or_all(
                        items
                            .iter()
                            .map(|item| compile_list_field(schema, field, field_path, item))
                            .collect::<Result<Vec<_>, _>>()?,
                    )
                }
            }
            "all_of" => {
                let items = v
                    .as_array()
                    .ok_or_else(|| FilterError::AllOfNotArray(v.to_string()))?;
                and_all(
                    items
                        .iter()
                        .map(|item| compile_list_field(schema, field, field_path, item))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            other => {
                return Err(FilterError::UnknownOperator(
                    other.to_string(),
                    field_path.dotted(),
                ))
            }
        };
        outcomes.push(outcome);
    }
    Ok(and_all(outcomes))
}

fn compile_any_satisfy(
    schema: &SchemaView,
    field: &FieldDef,
    field_path: &FieldPath,
    val: &Value,
) -> Result<FilterOutcome, FilterError> {
    let kind = field
        .list_element_kind
        .expect("compile_list_field only calls this for list fields, which always carry a kind");

    match kind {
        ListElementKind::Scalar => compile_scalar_predicate(field_path, val),
        ListElementKind::Object => match schema.get_type(&field.declared_type) {
            Some(_) => compile_type(schema, &field.declared_type, field_path, val),
            None => compile_scalar_predicate(field_path, val),
        },
        ListElementKind::Nested => {
            let body_outcome = match schema.get_type(&field.declared_type) {
                Some(_) => compile_type(schema, &field.declared_type, field_path, val)?,
                None => compile_scalar_predicate(field_path, val)?,
            };
            match body_outcome {
                FilterOutcome::True | FilterOutcome::False => Ok(body_outcome),
                FilterOutcome::Node(tree) => {
                    if !is_single_clause_without_not_or_null_equality(&tree) {
                        return Err(FilterError::DisallowedAnySatisfyShape(field_path.dotted()));
                    }
                    Ok(FilterOutcome::Node(FilterTree::Nested {
                        path: field_path.clone(),
                        body: Box::new(tree),
                    }))
                }
            }
        }
    }
}

/// `count` (spec step 7): a numeric predicate on the list's precomputed
/// length field. If the field is absent from the mapping (list added after
/// some documents were indexed), the datastore side is expected to treat
/// the length as 0 — that fallback lives in the datastore client, not here.
fn compile_count(field_path: &FieldPath, val: &Value) -> Result<FilterOutcome, FilterError> {
    let outcome = compile_scalar_predicate(field_path, val)?;
    Ok(match outcome {
        FilterOutcome::Node(tree) => FilterOutcome::Node(FilterTree::LengthPredicate {
            path: field_path.clone(),
            predicate: Box::new(tree),
        }),
        other => other,
    })
}

fn compile_scalar_predicate(path: &FieldPath, value: &Value) -> Result<FilterOutcome, FilterError> {
    let obj = match as_object(value, &path.dotted())? {
        None => return Ok(FilterOutcome::True),
        Some(obj) if obj.is_empty() => return Ok(FilterOutcome::True),
        Some(obj) => obj,
    };

    let mut outcomes = Vec::with_capacity(obj.len());
    for (key, val) in obj {
        if val.is_null() {
            continue;
        }
        let outcome = match key.as_str() {
            "not" => negate(compile_scalar_predicate(path, val)?),
            "any_of" => {
                let items = val
                    .as_array()
                    .ok_or_else(|| FilterError::AnyOfNotArray(val.to_string()))?;
                if items.is_empty() {
                    FilterOutcome::False
                } else {
                    or_all(
                        items
                            .iter()
                            .map(|v| compile_scalar_predicate(path, v))
                            .collect::<Result<Vec<_>, _>>()?,
                    )
                }
            }
            "all_of" => {
                let items = val
                    .as_array()
                    .ok_or_else(|| FilterError::AllOfNotArray(val.to_string()))?;
                and_all(
                    items
                        .iter()
                        .map(|v| compile_scalar_predicate(path, v))
                        .collect::<Result<Vec<_>, _>>()?,
                )
            }
            "equal_to_any_of" => {
                let items = val
                    .as_array()
                    .ok_or_else(|| FilterError::AnyOfNotArray(val.to_string()))?;
                leaf(path, LeafOp::EqualToAnyOf(items.clone()))
            }
            "gt" => leaf(path, LeafOp::Gt(val.clone())),
            "gte" => leaf(path, LeafOp::Gte(val.clone())),
            "lt" => leaf(path, LeafOp::Lt(val.clone())),
            "lte" => leaf(path, LeafOp::Lte(val.clone())),
            "matches" => {
                let text = val
                    .as_str()
                    .ok_or_else(|| malformed("matches", path, val))?;
                leaf(path, LeafOp::Matches(text.to_string()))
            }
            "matches_query" => {
                let inner = val
                    .as_object()
                    .ok_or_else(|| malformed("matches_query", path, val))?;
                let query = inner
                    .get("query")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("matches_query", path, val))?;
                let allowed_edits_per_term = inner
                    .get("allowed_edits_per_term")
                    .and_then(Value::as_u64)
                    .map(|n| n as u32);
                leaf(
                    path,
                    LeafOp::MatchesQuery {
                        query: query.to_string(),
                        allowed_edits_per_term,
                    },
                )
            }
            "matches_phrase" => {
                let inner = val
                    .as_object()
                    .ok_or_else(|| malformed("matches_phrase", path, val))?;
                let phrase = inner
                    .get("phrase")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("matches_phrase", path, val))?;
                leaf(
                    path,
                    LeafOp::MatchesPhrase {
                        phrase: phrase.to_string(),
                    },
                )
            }
            "near" => {
                let inner = val
                    .as_object()
                    .ok_or_else(|| malformed("near", path, val))?;
                let lat = inner
                    .get("lat")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| malformed("near", path, val))?;
                let lon = inner
                    .get("lon")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| malformed("near", path, val))?;
                let max_distance = inner
                    .get("max_distance")
                    .and_then(Value::as_f64)
                    .ok_or_else(|| malformed("near", path, val))?;
                let unit = inner
                    .get("unit")
                    .and_then(Value::as_str)
                    .ok_or_else(|| malformed("near", path, val))?;
                leaf(
                    path,
                    LeafOp::Near {
                        lat,
                        lon,
                        max_distance,
                        unit: unit.to_string(),
                    },
                )
            }
            "time_of_day" => {
                let inner = val
                    .as_object()
                    .ok_or_else(|| malformed("time_of_day", path, val))?;
                let str_field = |name: &str| {
                    inner.get(name).and_then(Value::as_str).map(str::to_string)
                };
                leaf(
                    path,
                    LeafOp::TimeOfDay {
                        gt: str_field("gt"),
                        gte: str_field("gte"),
                        lt: str_field("lt"),
                        lte: str_field("lte"),
                        time_zone: str_field("time_zone"),
                    },
                )
            }
            other => {
                return Err(FilterError::UnknownOperator(
                    other.to_string(),
                    path.dotted(),
                ))
            }
        };
        outcomes.push(outcome);
    }
    Ok(and_all(outcomes))
}

fn leaf(path: &FieldPath, op: LeafOp) -> FilterOutcome {
    FilterOutcome::Node(FilterTree::Leaf(LeafPredicate {
        path: path.clone(),
        op,
    }))
}

fn malformed(op: &str, path: &FieldPath, val: &Value) -> FilterError {
    FilterError::MalformedOperatorValue(op.to_string(), path.dotted(), val.to_string())
}
