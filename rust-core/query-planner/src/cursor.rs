use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::Value;

use crate::error::PlanError;

/// Opaque cursor wire format: `base64(json(payload))`, URL-safe and
/// unpadded so it drops cleanly into a GraphQL string without escaping.
pub fn encode_cursor(payload: &Value) -> String {
    URL_SAFE_NO_PAD.encode(payload.to_string())
}

pub fn decode_cursor(cursor: &str) -> Result<Value, PlanError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(cursor)
        .map_err(|_| PlanError::MalformedCursor(cursor.to_string()))?;
    let text =
        String::from_utf8(bytes).map_err(|_| PlanError::MalformedCursor(cursor.to_string()))?;
    serde_json::from_str(&text).map_err(|_| PlanError::MalformedCursor(cursor.to_string()))
}

/// The constant cursor for an ungrouped aggregation's single synthetic
/// bucket. Not a literal so as not to fake a precomputed constant; cheap
/// to recompute on every call.
pub fn singleton_cursor() -> String {
    encode_cursor(&serde_json::json!({"__singleton": true}))
}

pub fn is_singleton_cursor(cursor: &str) -> bool {
    cursor == singleton_cursor()
}

/// Encodes a grouped bucket's key tuple (one entry per grouping, in
/// declaration order, `null` for a missing-value bucket) as a cursor.
pub fn encode_grouping_cursor(key: &[Value]) -> String {
    encode_cursor(&Value::Array(key.to_vec()))
}

pub fn decode_grouping_cursor(cursor: &str) -> Result<Vec<Value>, PlanError> {
    match decode_cursor(cursor)? {
        Value::Array(values) => Ok(values),
        _ => Err(PlanError::MalformedCursor(cursor.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cursor_round_trips() {
        let payload = json!({"tag": "red", "doc_count": 4});
        let cursor = encode_cursor(&payload);
        assert_eq!(decode_cursor(&cursor).unwrap(), payload);
    }

    #[test]
    fn singleton_cursor_is_stable_and_decodes_distinctly() {
        assert_eq!(singleton_cursor(), singleton_cursor());
        assert!(is_singleton_cursor(&singleton_cursor()));
        assert!(!is_singleton_cursor("not-a-real-cursor"));
    }

    #[test]
    fn malformed_cursor_is_rejected() {
        assert!(decode_cursor("not valid base64!!").is_err());
    }

    #[test]
    fn grouping_cursor_round_trips_null_aware() {
        let key = vec![json!("red"), Value::Null];
        let cursor = encode_grouping_cursor(&key);
        assert_eq!(decode_grouping_cursor(&cursor).unwrap(), key);
    }
}
