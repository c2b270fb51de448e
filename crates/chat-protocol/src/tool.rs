//! Tool types: calls and outcomes.

use serde::{Deserialize, Serialize};

/// A tool invocation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            call_id: uuid::Uuid::new_v4().to_string(),
            tool_name: tool_name.into(),
            input,
        }
    }
}

/// Tool execution outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { text: String },
    Failure { error: String },
}

impl ToolOutcome {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Failure { .. })
    }

    pub fn text(&self) -> &str {
        match self {
            ToolOutcome::Success { text } => text,
            ToolOutcome::Failure { error } => error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_new() {
        let tc = ToolCall::new("post_message", serde_json::json!({"channel": "roadmap"}));
        assert_eq!(tc.tool_name, "post_message");
        assert!(!tc.call_id.is_empty());
    }

    #[test]
    fn tool_outcome_serde_tags_status() {
        let failure = ToolOutcome::Failure {
            error: "Error: no handle set".into(),
        };
        let json = serde_json::to_string(&failure).unwrap();
        assert!(json.contains("\"status\":\"failure\""));
        assert!(failure.is_error());
        assert_eq!(failure.text(), "Error: no handle set");
    }
}
