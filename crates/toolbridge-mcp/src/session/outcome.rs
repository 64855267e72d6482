//! Classification of `tools/call` replies into user-visible outcomes.

use std::fmt;

use serde_json::Value;

use crate::types::ToolCallResult;

/// Exactly one of the three things a tool call can end as.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The tool ran and returned a payload (decoded JSON, or the raw text).
    Success(Value),
    /// The tool ran but reported a problem in-band.
    ToolFailed(String),
    /// The call never reached a tool.
    Rejected(String),
}

impl CallOutcome {
    /// Classify the `result` member of a successful `tools/call` reply.
    pub fn from_result(result: &Value) -> Self {
        let has_content = result.get("content").is_some();
        if let (Some(error), false) = (result.get("error"), has_content) {
            return CallOutcome::Rejected(error_text(error));
        }

        let call: ToolCallResult = match serde_json::from_value(result.clone()) {
            Ok(call) => call,
            Err(_) => return CallOutcome::Success(result.clone()),
        };
        let Some(text) = call.first_text() else {
            return CallOutcome::Success(Value::Null);
        };

        match serde_json::from_str::<Value>(text) {
            Ok(decoded) => match decoded.get("error") {
                Some(error) if decoded.is_object() => CallOutcome::ToolFailed(error_text(error)),
                _ => CallOutcome::Success(decoded),
            },
            Err(_) => CallOutcome::Success(Value::String(text.to_string())),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CallOutcome::Success(_))
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallOutcome::Success(Value::String(text)) => f.write_str(text),
            CallOutcome::Success(value) => {
                let pretty = serde_json::to_string_pretty(value).map_err(|_| fmt::Error)?;
                f.write_str(&pretty)
            }
            CallOutcome::ToolFailed(message) => write!(f, "tool error: {message}"),
            CallOutcome::Rejected(message) => write!(f, "rejected: {message}"),
        }
    }
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_success_payload_is_decoded() {
        let result = serde_json::to_value(ToolCallResult::json(&json!({"message": "hi"}))).unwrap();
        assert_eq!(
            CallOutcome::from_result(&result),
            CallOutcome::Success(json!({"message": "hi"}))
        );
    }

    #[test]
    fn test_in_band_error() {
        let result = serde_json::to_value(ToolCallResult::in_band_error("bucket not found")).unwrap();
        assert_eq!(
            CallOutcome::from_result(&result),
            CallOutcome::ToolFailed("bucket not found".into())
        );
    }

    #[test]
    fn test_bare_error_is_rejection() {
        let outcome = CallOutcome::from_result(&json!({"error": "Unknown tool: nope"}));
        assert_eq!(outcome, CallOutcome::Rejected("Unknown tool: nope".into()));
    }

    #[test]
    fn test_plain_text_payload() {
        let result = json!({"content": [{"type": "text", "text": "not json"}]});
        assert_eq!(
            CallOutcome::from_result(&result),
            CallOutcome::Success(json!("not json"))
        );
        assert_eq!(CallOutcome::from_result(&result).to_string(), "not json");
    }

    #[test]
    fn test_array_payload_with_no_error_key() {
        let result = serde_json::to_value(ToolCallResult::json(&json!([1, 2]))).unwrap();
        assert!(CallOutcome::from_result(&result).is_success());
    }
}
