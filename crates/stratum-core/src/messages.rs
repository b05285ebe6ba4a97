use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionId, SummaryId};
use crate::summary::SummaryLevel;

/// Speaker role of a stored or wire message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::System => write!(f, "system"),
            Self::Tool => write!(f, "tool"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

/// Whether a message is original dialogue or the mirror of a summary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Regular,
    Summary,
    BulkSummary,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Regular => write!(f, "regular"),
            Self::Summary => write!(f, "summary"),
            Self::BulkSummary => write!(f, "bulk_summary"),
        }
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(Self::Regular),
            "summary" => Ok(Self::Summary),
            "bulk_summary" => Ok(Self::BulkSummary),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// Free-form metadata attached to a stored message.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl MessageMeta {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_none() && self.cost.is_none() && self.model.is_none()
    }
}

/// A persisted chat message.
///
/// `compressed` + `covered_by` express the coverage relation: a compressed
/// message is subsumed by exactly one summary and excluded from prompt
/// assembly, but remains part of the UI transcript.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub session_id: SessionId,
    pub role: Role,
    pub content: String,
    pub kind: MessageKind,
    pub compressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub covered_by: Option<SummaryId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "MessageMeta::is_empty")]
    pub metadata: MessageMeta,
}

impl MessageRecord {
    fn base(session_id: SessionId, role: Role, content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            role,
            content: content.into(),
            kind: MessageKind::Regular,
            compressed: false,
            covered_by: None,
            tool_name: None,
            tool_call_id: None,
            created_at: Utc::now().to_rfc3339(),
            metadata: MessageMeta::default(),
        }
    }

    pub fn user(session_id: SessionId, content: impl Into<String>) -> Self {
        Self::base(session_id, Role::User, content)
    }

    pub fn assistant(session_id: SessionId, content: impl Into<String>) -> Self {
        Self::base(session_id, Role::Assistant, content)
    }

    /// A tool-result message recorded during a tool-augmented turn.
    pub fn tool(
        session_id: SessionId,
        content: impl Into<String>,
        tool_name: impl Into<String>,
        tool_call_id: impl Into<String>,
    ) -> Self {
        let mut msg = Self::base(session_id, Role::Tool, content);
        msg.tool_name = Some(tool_name.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg
    }

    /// The transcript mirror of a freshly created summary. Summaries speak
    /// with the assistant's voice.
    pub fn summary_mirror(
        session_id: SessionId,
        content: impl Into<String>,
        level: SummaryLevel,
    ) -> Self {
        let mut msg = Self::base(session_id, Role::Assistant, content);
        msg.kind = match level {
            SummaryLevel::One => MessageKind::Summary,
            SummaryLevel::Two => MessageKind::BulkSummary,
        };
        msg
    }

    pub fn is_regular(&self) -> bool {
        self.kind == MessageKind::Regular
    }

    pub fn is_active(&self) -> bool {
        !self.compressed
    }

    pub fn with_metadata(mut self, metadata: MessageMeta) -> Self {
        self.metadata = metadata;
        self
    }
}
