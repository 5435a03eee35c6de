//! Message envelope
//!
//! Every operation call is `{id, op, args}`; every reply is
//! `{id, ok, result | error}`. The envelope is transport-independent.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One operation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRequest {
    /// Caller-chosen correlation id, echoed back verbatim
    #[serde(default)]
    pub id: Option<Value>,
    /// Operation name from the tool vocabulary
    pub op: String,
    /// Operation arguments, validated against the op's schema
    #[serde(default)]
    pub args: Value,
}

/// One operation reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResponse {
    pub fn success(id: Option<Value>, result: Value) -> Self {
        Self {
            id,
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Option<Value>, error: impl Into<String>) -> Self {
        Self {
            id,
            ok: false,
            result: None,
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_roundtrip() {
        let raw = r#"{"id": 3, "op": "search", "args": {"project": "p", "query": "q"}}"#;
        let request: ToolRequest = serde_json::from_str(raw).unwrap();
        assert_eq!(request.op, "search");
        assert_eq!(request.id, Some(json!(3)));
        assert_eq!(request.args["query"], "q");

        // args are optional
        let bare: ToolRequest = serde_json::from_str(r#"{"op": "get_memory_stats"}"#).unwrap();
        assert!(bare.id.is_none());
        assert!(bare.args.is_null());
    }

    #[test]
    fn responses_carry_result_xor_error() {
        let ok = ToolResponse::success(Some(json!(1)), json!({"total": 0}));
        let json = serde_json::to_string(&ok).unwrap();
        assert!(json.contains(r#""ok":true"#));
        assert!(!json.contains("error"));

        let err = ToolResponse::failure(None, "unknown operation: frobnicate");
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains(r#""ok":false"#));
        assert!(!json.contains("result"));
    }
}
