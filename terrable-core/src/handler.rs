//! Handler invocation wrapper
//!
//! Turns a bundled handler (a script defining `exports.handler`) plus an
//! already-shaped event into a code unit the engine can run. The generated
//! script calls the handler with `(event, context, callback)`, settles once on
//! whichever of the returned promise or the callback fires first, prints the
//! Result Envelope between the result markers and calls `complete()`.

use chrono::Utc;
use serde::Serialize;
use std::time::Duration;

use crate::error::ProtocolError;
use crate::invocation_id::InvocationId;
use crate::protocol::encode_code_unit;

/// Lambda context object passed to the handler
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerContext {
    pub aws_request_id: String,
    pub invoked_function_arn: String,
    pub function_name: String,
    pub function_version: String,
    #[serde(rename = "memoryLimitInMB")]
    pub memory_limit_in_mb: i32,
    pub log_group_name: String,
    pub log_stream_name: String,
    pub deadline_ms: i64,
}

impl HandlerContext {
    pub fn new(function_name: &str, invocation_id: &InvocationId, timeout: Duration) -> Self {
        let timeout_ms = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        let now = Utc::now();

        Self {
            aws_request_id: invocation_id.to_string(),
            invoked_function_arn: format!(
                "arn:aws:lambda:us-east-1:000000000000:function:{function_name}"
            ),
            function_name: function_name.to_string(),
            function_version: "$LATEST".to_string(),
            memory_limit_in_mb: 128,
            log_group_name: format!("/aws/lambda/{function_name}"),
            log_stream_name: format!(
                "{}/[$LATEST]{}",
                now.format("%Y/%m/%d"),
                invocation_id.short()
            ),
            deadline_ms: now.timestamp_millis().saturating_add(timeout_ms),
        }
    }
}

/// One handler call, ready to be framed as a code unit
#[derive(Debug, Clone)]
pub struct HandlerInvocation {
    pub handler_code: String,
    pub event: serde_json::Value,
    pub context: HandlerContext,
}

const DEFAULT_FUNCTION_NAME: &str = "handler";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

const PREAMBLE: &str = "var module = { exports: {} };\nvar exports = module.exports;\n";

const SETTLE_SCRIPT: &str = r#"
;(function (event, context) {
    var handler = (exports && exports.handler) || (module.exports && module.exports.handler);
    var settled = false;

    function emit(result) {
        console.log("TERRABLE_RESULT_START:" + JSON.stringify(result) + ":TERRABLE_RESULT_END");
    }

    function settle(error, result) {
        if (settled) {
            return;
        }
        settled = true;

        if (error) {
            console.error(error);
            emit({
                statusCode: 500,
                headers: {
                    "Content-Type": "application/json",
                },
                body: JSON.stringify({
                    message: "Internal server error",
                    errorMessage: error instanceof Error ? error.message : String(error),
                    errorType: (error && error.name) || "Error",
                    stackTrace: error && error.stack,
                }),
            });
        } else {
            emit(result === undefined ? null : result);
        }

        complete();
    }

    context.getRemainingTimeInMillis = function () {
        return Math.max(0, context.deadlineMs - Date.now());
    };

    if (typeof handler !== "function") {
        settle(new TypeError("exports.handler is not a function"));
        return;
    }

    var returned;
    try {
        returned = handler(event, context, settle);
    } catch (error) {
        settle(error);
        return;
    }

    if (returned && typeof returned.then === "function") {
        returned.then(
            function (result) { settle(null, result); },
            function (error) { settle(error); }
        );
    } else if (handler.length < 3) {
        settle(null, returned);
    }
})(eventInput, contextInput);
"#;

impl HandlerInvocation {
    pub fn new(handler_code: impl Into<String>, event: serde_json::Value) -> Self {
        let invocation_id = InvocationId::new();
        Self {
            handler_code: handler_code.into(),
            event,
            context: HandlerContext::new(DEFAULT_FUNCTION_NAME, &invocation_id, DEFAULT_TIMEOUT),
        }
    }

    /// Build an invocation from a raw JSON event document
    pub fn from_event_json(
        handler_code: impl Into<String>,
        event_json: &str,
    ) -> Result<Self, ProtocolError> {
        let event = serde_json::from_str(event_json).map_err(ProtocolError::InvalidEvent)?;
        Ok(Self::new(handler_code, event))
    }

    /// The multi-line script run for this invocation
    pub fn script(&self) -> String {
        let event = serde_json::to_string(&self.event).unwrap_or_else(|_| "null".to_string());
        let context = serde_json::to_string(&self.context).unwrap_or_else(|_| "{}".to_string());

        let mut script = String::with_capacity(
            PREAMBLE.len() + self.handler_code.len() + SETTLE_SCRIPT.len() + event.len() + 64,
        );
        script.push_str(PREAMBLE);
        script.push_str("var eventInput = ");
        script.push_str(&event);
        script.push_str(";\nvar contextInput = ");
        script.push_str(&context);
        script.push_str(";\n");
        script.push_str(&self.handler_code);
        // Bundles often end in a `//# sourceMappingURL` comment
        script.push('\n');
        script.push_str(SETTLE_SCRIPT);
        script
    }

    /// The script framed as a single newline-terminated code unit
    pub fn to_code_unit(&self) -> String {
        encode_code_unit(&self.script())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_context_serialization() {
        let id = InvocationId::with_id("0123456789abcdef");
        let context = HandlerContext::new("Echo", &id, Duration::from_secs(3));
        let json = serde_json::to_value(&context).unwrap();

        assert_eq!(json["awsRequestId"], "0123456789abcdef");
        assert_eq!(json["functionName"], "Echo");
        assert_eq!(json["memoryLimitInMB"], 128);
        assert_eq!(json["logGroupName"], "/aws/lambda/Echo");
        assert!(json["logStreamName"]
            .as_str()
            .unwrap()
            .ends_with("[$LATEST]01234567"));
    }

    #[test]
    fn test_deadline_follows_timeout() {
        let before = Utc::now().timestamp_millis();
        let context =
            HandlerContext::new("Echo", &InvocationId::new(), Duration::from_secs(60));
        let json = serde_json::to_value(&context).unwrap();

        let deadline = json["deadlineMs"].as_i64().unwrap();
        assert!(deadline >= before + 60_000);
        assert!(deadline <= Utc::now().timestamp_millis() + 60_000);
    }

    #[test]
    fn test_script_embeds_event_and_handler() {
        let invocation = HandlerInvocation::new(
            "exports.handler = async (event) => ({ statusCode: 200, body: event.name });",
            json!({ "name": "terrable" }),
        );
        let script = invocation.script();

        assert!(script.contains(r#"var eventInput = {"name":"terrable"};"#));
        assert!(script.contains("exports.handler = async"));
        assert!(script.contains("TERRABLE_RESULT_START:"));
        assert!(script.contains("complete();"));
    }

    #[test]
    fn test_code_unit_is_one_line() {
        let invocation = HandlerInvocation::new(
            "exports.handler = function () {\n  return 1;\n}\n//# sourceMappingURL=x.js.map",
            json!(null),
        );
        let unit = invocation.to_code_unit();

        assert_eq!(unit.matches('\n').count(), 1);
        assert!(unit.ends_with('\n'));
        // the source map comment must not swallow the settle script
        assert!(unit.contains("x.js.map\r"));
    }

    #[test]
    fn test_from_event_json() {
        let invocation = HandlerInvocation::from_event_json("", r#"{"body":null}"#).unwrap();
        assert_eq!(invocation.event, json!({ "body": null }));

        let result = HandlerInvocation::from_event_json("", "{not json");
        assert!(matches!(result, Err(ProtocolError::InvalidEvent(_))));
    }
}
