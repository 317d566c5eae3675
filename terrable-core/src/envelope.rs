//! Result Envelope types
//!
//! The envelope is the API Gateway proxy response shape a handler resolves
//! with. Failures reported by the engine use the same shape with a 500 status
//! and a JSON error body.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::protocol::wrap_result;

/// Handler response envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultEnvelope {
    pub status_code: i32,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: String,
}

/// Error details carried in the body of a failure envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub message: String,
    pub error_message: String,
    pub error_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
}

impl ErrorBody {
    pub fn new(
        error_type: impl Into<String>,
        error_message: impl Into<String>,
        stack_trace: Option<String>,
    ) -> Self {
        Self {
            message: "Internal server error".to_string(),
            error_message: error_message.into(),
            error_type: error_type.into(),
            stack_trace,
        }
    }
}

impl ResultEnvelope {
    /// Build the 500 envelope reported for an uncaught failure
    pub fn internal_error(error: &ErrorBody) -> Self {
        let body = serde_json::to_string(error).unwrap_or_else(|_| {
            format!(
                r#"{{"message":"{}","errorType":"{}"}}"#,
                error.message, error.error_type
            )
        });

        let mut headers = HashMap::new();
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        Self {
            status_code: 500,
            headers,
            body,
        }
    }

    /// Parse the body as an error body, if it is one
    pub fn error_body(&self) -> Option<ErrorBody> {
        serde_json::from_str(&self.body).ok()
    }

    /// Serialize and wrap between the result markers, ready to print as one line
    pub fn to_marked_line(&self) -> String {
        let json = serde_json::to_string(self).unwrap_or_else(|_| {
            format!(r#"{{"statusCode":{},"headers":{{}},"body":""}}"#, self.status_code)
        });
        wrap_result(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_error_envelope() {
        let error = ErrorBody::new("Error", "boom", Some("    at <eval>".to_string()));
        let envelope = ResultEnvelope::internal_error(&error);

        assert_eq!(envelope.status_code, 500);
        assert_eq!(
            envelope.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );

        let body: serde_json::Value = serde_json::from_str(&envelope.body).unwrap();
        assert_eq!(body["message"], "Internal server error");
        assert_eq!(body["errorMessage"], "boom");
        assert_eq!(body["errorType"], "Error");
        assert_eq!(body["stackTrace"], "    at <eval>");
    }

    #[test]
    fn test_error_body_without_stack_omits_field() {
        let error = ErrorBody::new("SyntaxError", "unexpected token", None);
        let json = serde_json::to_string(&error).unwrap();
        assert!(!json.contains("stackTrace"));
        assert!(json.contains(r#""errorType":"SyntaxError""#));
    }

    #[test]
    fn test_marked_line_is_single_line() {
        let error = ErrorBody::new("Error", "multi\nline", Some("a\nb".to_string()));
        let line = ResultEnvelope::internal_error(&error).to_marked_line();

        assert!(!line.contains('\n'));
        assert!(line.starts_with("TERRABLE_RESULT_START:{"));
        assert!(line.ends_with("}:TERRABLE_RESULT_END"));
    }

    #[test]
    fn test_envelope_defaults_missing_fields() {
        let envelope: ResultEnvelope = serde_json::from_str(r#"{"statusCode":204}"#).unwrap();
        assert_eq!(envelope.status_code, 204);
        assert!(envelope.headers.is_empty());
        assert_eq!(envelope.body, "");
        assert!(envelope.error_body().is_none());
    }
}
