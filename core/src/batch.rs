use serde_json::Value;
use serde_json::json;

/// Bundle N logical payloads into one wire payload. Providers that support
/// batching receive `{"batch": [...]}` and are expected to answer with
/// `{"results": [...]}` in the same order.
pub(crate) fn encode_batch(payloads: &[Value]) -> Value {
    json!({ "batch": payloads })
}

/// Split a batched response back into per-item results, in input order.
/// Returns `None` when the structure is malformed or the count is off; the
/// caller falls back to per-item dispatch rather than losing the batch.
pub(crate) fn decode_batch(response: &Value, expected: usize) -> Option<Vec<Value>> {
    let results = response.get("results")?.as_array()?;
    if results.len() != expected {
        return None;
    }
    Some(results.clone())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn roundtrip_preserves_order() {
        let payloads = vec![json!({"i": 0}), json!({"i": 1}), json!({"i": 2})];
        let combined = encode_batch(&payloads);
        assert_eq!(combined["batch"].as_array().unwrap().len(), 3);

        let response = json!({"results": [{"i": 0}, {"i": 1}, {"i": 2}]});
        let decoded = decode_batch(&response, 3).unwrap();
        assert_eq!(decoded, payloads);
    }

    #[test]
    fn rejects_wrong_count() {
        let response = json!({"results": [{"i": 0}]});
        assert!(decode_batch(&response, 2).is_none());
    }

    #[test]
    fn rejects_malformed_shape() {
        assert!(decode_batch(&json!({"output": []}), 0).is_none());
        assert!(decode_batch(&json!({"results": "oops"}), 1).is_none());
    }
}
