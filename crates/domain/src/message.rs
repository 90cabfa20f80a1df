//! Conversation data model (provider-agnostic).
//!
//! A thread is an ordered list of [`Message`]s. Tool invocations round-trip
//! through the model as assistant [`ToolCall`]s answered by `role=tool`
//! messages carrying the matching `tool_call_id`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A single entry in a conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    /// Tool invocations issued by the model (`role=assistant` only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// The assistant tool call this message answers (`role=tool` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Name of the tool that produced this message (`role=tool` only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn assistant_with_tools(text: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_calls,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, name: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: output.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            name: Some(name.into()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ToolCall / ToolResult
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A tool invocation issued by the model within one assistant turn.
/// `id` is unique within that turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
    /// The raw argument string as streamed by the provider, before parsing.
    #[serde(default)]
    pub raw_args: String,
}

/// The outcome of executing one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub output: String,
    #[serde(default)]
    pub is_error: bool,
}

impl From<ToolResult> for Message {
    fn from(r: ToolResult) -> Self {
        Message::tool(r.tool_call_id, r.name, r.output)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Todo
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Done,
}

/// An item on the agent's self-managed task list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Todo {
    pub id: String,
    pub title: String,
    pub status: TodoStatus,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Validate a message list against the conversation invariants:
///
/// - `role=tool` carries both `tool_call_id` and `name`, and the id must
///   match a tool call on an earlier assistant message;
/// - `role=assistant` may have empty content only when it has tool calls;
/// - `role ∈ {user, system}` must have non-empty content and no tool fields.
pub fn validate_messages(messages: &[Message]) -> Result<()> {
    let mut issued_ids: Vec<&str> = Vec::new();

    for (i, msg) in messages.iter().enumerate() {
        match msg.role {
            Role::System | Role::User => {
                if msg.content.is_empty() {
                    return Err(Error::InvalidMessage(format!(
                        "message {i}: {} message with empty content",
                        msg.role
                    )));
                }
                if !msg.tool_calls.is_empty() || msg.tool_call_id.is_some() {
                    return Err(Error::InvalidMessage(format!(
                        "message {i}: {} message carries tool fields",
                        msg.role
                    )));
                }
            }
            Role::Assistant => {
                if msg.content.is_empty() && msg.tool_calls.is_empty() {
                    return Err(Error::InvalidMessage(format!(
                        "message {i}: assistant message with neither content nor tool calls"
                    )));
                }
                for tc in &msg.tool_calls {
                    issued_ids.push(tc.id.as_str());
                }
            }
            Role::Tool => {
                let id = msg.tool_call_id.as_deref().ok_or_else(|| {
                    Error::InvalidMessage(format!("message {i}: tool message without tool_call_id"))
                })?;
                if msg.name.is_none() {
                    return Err(Error::InvalidMessage(format!(
                        "message {i}: tool message without tool name"
                    )));
                }
                if !issued_ids.contains(&id) {
                    return Err(Error::InvalidMessage(format!(
                        "message {i}: tool message references unknown tool_call_id '{id}'"
                    )));
                }
            }
        }
    }

    Ok(())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: "calculate".into(),
            args: serde_json::json!({ "expr": "2+2" }),
            raw_args: r#"{"expr":"2+2"}"#.into(),
        }
    }

    #[test]
    fn valid_tool_roundtrip() {
        let msgs = vec![
            Message::user("compute this"),
            Message::assistant_with_tools("", vec![call("c1")]),
            Message::tool("c1", "calculate", "4"),
            Message::assistant("2+2=4"),
        ];
        assert!(validate_messages(&msgs).is_ok());
    }

    #[test]
    fn empty_user_content_rejected() {
        let msgs = vec![Message::user("")];
        assert!(validate_messages(&msgs).is_err());
    }

    #[test]
    fn empty_assistant_without_tool_calls_rejected() {
        let msgs = vec![Message::user("hi"), Message::assistant("")];
        assert!(validate_messages(&msgs).is_err());
    }

    #[test]
    fn empty_assistant_with_tool_calls_allowed() {
        let msgs = vec![
            Message::user("hi"),
            Message::assistant_with_tools("", vec![call("c1")]),
            Message::tool("c1", "calculate", "4"),
        ];
        assert!(validate_messages(&msgs).is_ok());
    }

    #[test]
    fn tool_message_with_unknown_id_rejected() {
        let msgs = vec![
            Message::user("hi"),
            Message::tool("never-issued", "calculate", "4"),
        ];
        let err = validate_messages(&msgs).unwrap_err();
        assert!(err.to_string().contains("never-issued"));
    }

    #[test]
    fn tool_message_without_name_rejected() {
        let mut msg = Message::tool("c1", "calculate", "4");
        msg.name = None;
        let msgs = vec![
            Message::user("hi"),
            Message::assistant_with_tools("", vec![call("c1")]),
            msg,
        ];
        assert!(validate_messages(&msgs).is_err());
    }

    #[test]
    fn user_message_with_tool_calls_rejected() {
        let mut msg = Message::user("hi");
        msg.tool_calls.push(call("c1"));
        assert!(validate_messages(&[msg]).is_err());
    }

    #[test]
    fn tool_result_converts_to_tool_message() {
        let result = ToolResult {
            tool_call_id: "c9".into(),
            name: "execute".into(),
            output: "done".into(),
            is_error: false,
        };
        let msg: Message = result.into();
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.tool_call_id.as_deref(), Some("c9"));
        assert_eq!(msg.name.as_deref(), Some("execute"));
        assert_eq!(msg.content, "done");
    }

    #[test]
    fn message_serde_skips_empty_tool_fields() {
        let json = serde_json::to_string(&Message::user("hi")).unwrap();
        assert!(!json.contains("tool_calls"));
        assert!(!json.contains("tool_call_id"));
    }
}
