//! Wire contract between the conversation layers and a chat-completion
//! provider. Provider dialect translation (field names, tool-call framing)
//! lives in the gateway implementations; these types are neutral.

use serde::{Deserialize, Serialize};

use crate::errors::GatewayError;
use crate::messages::Role;

/// One entry of a prompt window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    /// Set on `tool`-role messages: the call this result answers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Set on assistant messages that requested tool invocations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_call_id: None,
            tool_calls: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }
}

/// A provider-form tool declaration (translated from an MCP input schema).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDecl {
    pub name: String,
    pub description: String,
    /// JSON-schema object describing the parameters.
    pub parameters: serde_json::Value,
}

/// A tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// Options for a single completion call.
#[derive(Clone, Debug, Default)]
pub struct ChatOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub tools: Vec<ToolDecl>,
}

/// Token accounting reported by the provider.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStats {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// One completion choice.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A full (non-streaming) completion response.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: TokenStats,
}

impl ChatResponse {
    /// Content of the first choice, if any.
    pub fn first_content(&self) -> Option<&str> {
        self.choices.first().map(|c| c.message.content.as_str())
    }

    /// Tool calls requested by the first choice (empty when the model
    /// produced plain text).
    pub fn first_tool_calls(&self) -> &[ToolCallRequest] {
        self.choices
            .first()
            .and_then(|c| c.message.tool_calls.as_deref())
            .unwrap_or(&[])
    }
}

/// Incremental pieces of a streamed completion.
#[derive(Clone, Debug)]
pub enum StreamChunk {
    Content(String),
    Done,
    Error(GatewayError),
}

impl StreamChunk {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_roles() {
        assert_eq!(ChatMessage::system("s").role, Role::System);
        assert_eq!(ChatMessage::user("u").role, Role::User);
        assert_eq!(ChatMessage::assistant("a").role, Role::Assistant);

        let tr = ChatMessage::tool_result("call_9", "{\"result\": 1}");
        assert_eq!(tr.role, Role::Tool);
        assert_eq!(tr.tool_call_id.as_deref(), Some("call_9"));
    }

    #[test]
    fn optional_fields_skipped_in_json() {
        let json = serde_json::to_value(ChatMessage::user("hi")).unwrap();
        assert!(json.get("tool_call_id").is_none());
        assert!(json.get("tool_calls").is_none());
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn first_content_and_tool_calls() {
        let resp = ChatResponse {
            id: "r1".into(),
            model: "m".into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage {
                    role: Role::Assistant,
                    content: "thinking".into(),
                    tool_call_id: None,
                    tool_calls: Some(vec![ToolCallRequest {
                        id: "call_1".into(),
                        name: "lookup".into(),
                        arguments: serde_json::json!({"q": "x"}),
                    }]),
                },
                finish_reason: Some("tool_calls".into()),
            }],
            usage: TokenStats::default(),
        };
        assert_eq!(resp.first_content(), Some("thinking"));
        assert_eq!(resp.first_tool_calls().len(), 1);
        assert_eq!(resp.first_tool_calls()[0].name, "lookup");
    }

    #[test]
    fn empty_response_has_no_content() {
        let resp = ChatResponse {
            id: "r2".into(),
            model: "m".into(),
            choices: vec![],
            usage: TokenStats::default(),
        };
        assert!(resp.first_content().is_none());
        assert!(resp.first_tool_calls().is_empty());
    }

    #[test]
    fn stream_chunk_terminality() {
        assert!(!StreamChunk::Content("x".into()).is_terminal());
        assert!(StreamChunk::Done.is_terminal());
        assert!(StreamChunk::Error(GatewayError::Cancelled).is_terminal());
    }
}
