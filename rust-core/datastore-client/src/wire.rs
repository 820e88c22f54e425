use serde_json::Value;

/// One `(header, body)` pair as produced by `DatastoreQuery::to_header_body`.
pub type MsearchBody = (Value, Value);

/// Renders a batch of header/body pairs as the newline-delimited msearch
/// envelope shared by Elasticsearch and OpenSearch (spec §6): header, body,
/// header, body, ..., each line terminated by `\n`.
pub fn encode_msearch_envelope(bodies: &[MsearchBody]) -> String {
    let mut out = String::new();
    for (header, body) in bodies {
        out.push_str(&header.to_string());
        out.push('\n');
        out.push_str(&body.to_string());
        out.push('\n');
    }
    out
}

/// One per-query response inside an msearch reply, or the error shape the
/// datastore emits for a query that failed in isolation (spec §7
/// propagation policy: an isolated per-query failure does not necessarily
/// fail the whole request).
#[derive(Debug, Clone)]
pub enum MsearchResponse {
    Ok(Value),
    Error(Value),
}

impl MsearchResponse {
    pub fn into_result(self) -> Result<Value, String> {
        match self {
            MsearchResponse::Ok(body) => Ok(body),
            MsearchResponse::Error(err) => Err(err.to_string()),
        }
    }
}

/// Decodes the `{"responses": [...]}` envelope msearch returns, one entry
/// per request body in the order submitted.
pub fn decode_msearch_responses(raw: &Value) -> Result<Vec<MsearchResponse>, String> {
    let responses = raw
        .get("responses")
        .and_then(Value::as_array)
        .ok_or_else(|| "msearch response missing 'responses' array".to_string())?;

    Ok(responses
        .iter()
        .map(|entry| {
            if entry.get("error").is_some() {
                MsearchResponse::Error(entry.get("error").cloned().unwrap_or(Value::Null))
            } else {
                MsearchResponse::Ok(entry.clone())
            }
        })
        .collect())
}

/// A synthetic zero-hit response for a short-circuited query (spec §4.2,
/// §4.5): never sent over the wire, constructed locally so dispatch can
/// treat it uniformly with real responses.
pub fn synthetic_empty_response() -> Value {
    serde_json::json!({
        "hits": { "total": { "value": 0, "relation": "eq" }, "hits": [] },
        "aggregations": {},
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_alternates_header_and_body_lines() {
        let bodies = vec![
            (json!({"index": "widgets"}), json!({"size": 0})),
            (json!({"index": "manufacturers"}), json!({"size": 10})),
        ];
        let envelope = encode_msearch_envelope(&bodies);
        let lines: Vec<&str> = envelope.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], json!({"index": "widgets"}).to_string());
        assert_eq!(lines[2], json!({"index": "manufacturers"}).to_string());
    }

    #[test]
    fn decodes_mixed_ok_and_error_responses_in_order() {
        let raw = json!({
            "responses": [
                {"hits": {"total": {"value": 1}}},
                {"error": {"type": "search_phase_execution_exception"}},
            ]
        });
        let decoded = decode_msearch_responses(&raw).unwrap();
        assert!(matches!(decoded[0], MsearchResponse::Ok(_)));
        assert!(matches!(decoded[1], MsearchResponse::Error(_)));
    }

    #[test]
    fn missing_responses_array_is_an_error() {
        assert!(decode_msearch_responses(&json!({})).is_err());
    }
}
