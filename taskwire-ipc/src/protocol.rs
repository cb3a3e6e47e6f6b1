//! Wire protocol message types
//!
//! One request/response pair per remote invocation, matched by correlation id.
//! Messages travel as single-line JSON over the worker's stdio.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Request sent to a worker process.
///
/// `file` names the module to load; `method` selects an export by name, or the
/// module's default export when absent. Arguments must already be in
/// serializable form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRequest {
    pub id: String,
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<JsonValue>>,
}

impl TaskRequest {
    pub fn new(
        id: impl Into<String>,
        file: impl Into<String>,
        method: Option<String>,
        args: Option<Vec<JsonValue>>,
    ) -> Self {
        Self {
            id: id.into(),
            file: file.into(),
            method,
            args,
        }
    }
}

/// Response sent back by a worker process.
///
/// At most one of `result`/`error` is present; [`TaskResponse::outcome`]
/// interprets the combination when consuming a response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResponse {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<JsonValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteErrorPayload>,
}

impl TaskResponse {
    /// Create a successful response.
    pub fn success(id: impl Into<String>, result: JsonValue) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
        }
    }

    /// Create a failed response.
    pub fn failure(id: impl Into<String>, error: RemoteErrorPayload) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error),
        }
    }

    /// Consume the response, yielding its result or error descriptor.
    ///
    /// A response with no error field is a success; a `null` result collapses
    /// to an absent field on the wire, so absence reads back as `Null`.
    /// Returns `None` only for the contradictory shape carrying both fields.
    pub fn outcome(self) -> Option<Result<JsonValue, RemoteErrorPayload>> {
        match (self.result, self.error) {
            (Some(_), Some(_)) => None,
            (_, Some(error)) => Some(Err(error)),
            (result, None) => Some(Ok(result.unwrap_or(JsonValue::Null))),
        }
    }
}

/// Structured error descriptor carried on a failed response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteErrorPayload {
    pub message: String,
    pub stack: String,
}

impl RemoteErrorPayload {
    pub fn new(message: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: stack.into(),
        }
    }

    /// Build a payload from an error, capturing the current backtrace as the
    /// stack text.
    pub fn from_error(error: &dyn std::error::Error) -> Self {
        Self {
            message: error.to_string(),
            stack: std::backtrace::Backtrace::force_capture().to_string(),
        }
    }
}

impl std::fmt::Display for RemoteErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_omits_absent_fields() {
        let request = TaskRequest::new("1", "/tmp/mod.js", None, None);
        let json = serde_json::to_string(&request).unwrap();

        assert_eq!(json, r#"{"id":"1","file":"/tmp/mod.js"}"#);
    }

    #[test]
    fn test_request_with_method_and_args() {
        let request = TaskRequest::new(
            "1",
            "/tmp/mod.js",
            Some("add".to_string()),
            Some(vec![json!(2), json!(3)]),
        );

        let json = serde_json::to_string(&request).unwrap();
        let parsed: TaskRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
        assert_eq!(parsed.method.as_deref(), Some("add"));
        assert_eq!(parsed.args.unwrap(), vec![json!(2), json!(3)]);
    }

    #[test]
    fn test_response_outcome_success() {
        let response = TaskResponse::success("1", json!(5));
        assert_eq!(response.outcome(), Some(Ok(json!(5))));
    }

    #[test]
    fn test_response_outcome_error() {
        let response = TaskResponse::failure("1", RemoteErrorPayload::new("boom", "..."));
        let error = response.outcome().unwrap().unwrap_err();
        assert_eq!(error.message, "boom");
        assert_eq!(error.stack, "...");
    }

    #[test]
    fn test_response_outcome_null_result_round_trips() {
        // "result": null and an absent result are the same wire shape
        let response: TaskResponse = serde_json::from_str(r#"{"id":"1","result":null}"#).unwrap();
        assert_eq!(response.outcome(), Some(Ok(JsonValue::Null)));

        let line = serde_json::to_string(&TaskResponse::success("1", JsonValue::Null)).unwrap();
        let parsed: TaskResponse = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.outcome(), Some(Ok(JsonValue::Null)));
    }

    #[test]
    fn test_response_outcome_rejects_contradictory_shape() {
        let both = TaskResponse {
            id: "1".to_string(),
            result: Some(json!(5)),
            error: Some(RemoteErrorPayload::new("boom", "")),
        };
        assert_eq!(both.outcome(), None);
    }

    #[test]
    fn test_response_wire_shape() {
        let line = r#"{"id":"7","error":{"message":"boom","stack":"at add"}}"#;
        let response: TaskResponse = serde_json::from_str(line).unwrap();

        assert_eq!(response.id, "7");
        assert!(response.result.is_none());
        assert_eq!(response.error.unwrap().message, "boom");
    }

    #[test]
    fn test_error_payload_from_error() {
        let source = std::io::Error::other("boom");
        let payload = RemoteErrorPayload::from_error(&source);

        assert_eq!(payload.message, "boom");
        assert!(!payload.stack.is_empty());
    }
}
