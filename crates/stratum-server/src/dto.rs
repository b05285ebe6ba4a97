//! Request/response DTOs of the HTTP API.

use serde::{Deserialize, Serialize};

use stratum_context::{CompressionInfo, ContextInfo};
use stratum_core::ids::SESSION_ID_MAX_LEN;
use stratum_core::messages::MessageRecord;
use stratum_core::summary::SummaryRecord;
use stratum_store::SessionRow;

use crate::error::ApiError;

/// Maximum accepted user-message length.
pub const MESSAGE_MAX_LEN: usize = 10_000;

pub const HISTORY_DEFAULT_LIMIT: u32 = 50;
pub const HISTORY_MAX_LIMIT: u32 = 200;

#[derive(Clone, Debug, Deserialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub message: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub user_id: Option<String>,
}

impl ChatRequest {
    pub fn validate(&self) -> Result<(), ApiError> {
        validate_session_id(&self.session_id)?;
        if self.message.trim().is_empty() {
            return Err(ApiError::Validation("message is required".into()));
        }
        if self.message.chars().count() > MESSAGE_MAX_LEN {
            return Err(ApiError::Validation(format!(
                "message exceeds {MESSAGE_MAX_LEN} characters"
            )));
        }
        Ok(())
    }
}

pub fn validate_session_id(session_id: &str) -> Result<(), ApiError> {
    if session_id.trim().is_empty() {
        return Err(ApiError::Validation("session_id is required".into()));
    }
    if session_id.len() > SESSION_ID_MAX_LEN {
        return Err(ApiError::Validation(format!(
            "session_id exceeds {SESSION_ID_MAX_LEN} characters"
        )));
    }
    Ok(())
}

/// Context block attached to chat responses.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ContextMetadata {
    pub total_messages: u32,
    pub context_window_used: usize,
    pub has_summary: bool,
    pub compression_triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_level: Option<i64>,
    #[serde(default)]
    pub messages_compressed: u32,
    #[serde(default)]
    pub summaries_compressed: u32,
}

impl ContextMetadata {
    pub fn from_parts(
        total_messages: u32,
        window_used: usize,
        has_summary: bool,
        info: &CompressionInfo,
    ) -> Self {
        Self {
            total_messages,
            context_window_used: window_used,
            has_summary,
            compression_triggered: info.triggered,
            compression_level: info.level,
            messages_compressed: info.messages_compressed,
            summaries_compressed: info.summaries_compressed,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message_id: String,
    pub response: String,
    pub session_id: String,
    pub tokens_used: u32,
    pub model: String,
    pub processing_time_ms: u64,
    pub context_info: ContextMetadata,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub iteration_limit_hit: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

impl HistoryQuery {
    pub fn effective_limit(&self) -> u32 {
        self.limit
            .unwrap_or(HISTORY_DEFAULT_LIMIT)
            .min(HISTORY_MAX_LIMIT)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageDto {
    pub id: String,
    pub role: String,
    pub content: String,
    pub kind: String,
    pub compressed: bool,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl From<&MessageRecord> for MessageDto {
    fn from(msg: &MessageRecord) -> Self {
        Self {
            id: msg.id.to_string(),
            role: msg.role.to_string(),
            content: msg.content.clone(),
            kind: msg.kind.to_string(),
            compressed: msg.compressed,
            timestamp: msg.created_at.clone(),
            tool_name: msg.tool_name.clone(),
            tokens: msg.metadata.tokens,
            model: msg.metadata.model.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub messages: Vec<MessageDto>,
    pub count: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub created_at: String,
    pub updated_at: String,
    pub message_count: u32,
    pub context: ContextInfo,
}

impl SessionResponse {
    pub fn new(row: SessionRow, context: ContextInfo) -> Self {
        Self {
            session_id: row.id.to_string(),
            created_at: row.created_at,
            updated_at: row.updated_at,
            message_count: row.message_count,
            context,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CompressResponse {
    pub session_id: String,
    pub total_messages: u32,
    pub context_size: usize,
    pub has_summary: bool,
    #[serde(flatten)]
    pub compression: CompressionInfo,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummaryDto {
    pub id: String,
    pub session_id: String,
    pub level: i64,
    pub text: String,
    pub anchors: Vec<String>,
    pub covers_from_msg_id: String,
    pub covers_to_msg_id: String,
    pub message_count: u32,
    pub tokens_used: u32,
    pub created_at: String,
}

impl From<&SummaryRecord> for SummaryDto {
    fn from(s: &SummaryRecord) -> Self {
        Self {
            id: s.id.to_string(),
            session_id: s.session_id.to_string(),
            level: s.level.as_i64(),
            text: s.text.clone(),
            anchors: s.anchors.clone(),
            covers_from_msg_id: s.covers_from_msg_id.to_string(),
            covers_to_msg_id: s.covers_to_msg_id.to_string(),
            message_count: s.message_count,
            tokens_used: s.tokens_used,
            created_at: s.created_at.clone(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeleteSummariesResponse {
    pub session_id: String,
    pub deleted: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelDto {
    pub channel: String,
    pub model: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub models: Vec<ChannelDto>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Events of the streaming chat response.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum StreamPayload {
    Context {
        message_id: String,
        context_info: ContextMetadata,
    },
    Content {
        content: String,
    },
    Done {
        message_id: String,
    },
    Error {
        error: String,
        code: String,
    },
}

impl StreamPayload {
    /// SSE event name for this payload.
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Context { .. } => "context",
            Self::Content { .. } => "content",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }
}
