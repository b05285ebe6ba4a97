use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::ids::{MessageId, SessionId, SummaryId};

/// Compression level: level-1 summaries cover regular messages, level-2
/// (bulk) summaries cover level-1 summaries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SummaryLevel {
    #[serde(rename = "1")]
    One,
    #[serde(rename = "2")]
    Two,
}

impl SummaryLevel {
    pub fn as_i64(self) -> i64 {
        match self {
            Self::One => 1,
            Self::Two => 2,
        }
    }

    pub fn from_i64(v: i64) -> Result<Self, String> {
        match v {
            1 => Ok(Self::One),
            2 => Ok(Self::Two),
            other => Err(format!("invalid summary level: {other}")),
        }
    }
}

impl std::fmt::Display for SummaryLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_i64())
    }
}

impl std::str::FromStr for SummaryLevel {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let v: i64 = s.parse().map_err(|_| format!("invalid summary level: {s}"))?;
        Self::from_i64(v)
    }
}

/// A persisted summary.
///
/// `covers_from_msg_id..=covers_to_msg_id` delimit the contiguous range of
/// original regular messages this summary (transitively) subsumes. For a
/// level-2 summary these still resolve to regular-message ids: the first
/// input summary's lower bound and the last input summary's upper bound.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummaryRecord {
    pub id: SummaryId,
    pub session_id: SessionId,
    pub level: SummaryLevel,
    pub text: String,
    pub anchors: Vec<String>,
    pub covers_from_msg_id: MessageId,
    pub covers_to_msg_id: MessageId,
    /// Count of underlying regular messages subsumed. For level 2 this is
    /// the sum over the input summaries.
    pub message_count: u32,
    pub compressed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub covered_by: Option<SummaryId>,
    pub tokens_used: u32,
    pub created_at: String,
}

impl SummaryRecord {
    pub fn new(
        session_id: SessionId,
        level: SummaryLevel,
        text: impl Into<String>,
        anchors: Vec<String>,
        covers_from_msg_id: MessageId,
        covers_to_msg_id: MessageId,
        message_count: u32,
        tokens_used: u32,
    ) -> Self {
        Self {
            id: SummaryId::new(),
            session_id,
            level,
            text: text.into(),
            anchors,
            covers_from_msg_id,
            covers_to_msg_id,
            message_count,
            compressed: false,
            covered_by: None,
            tokens_used,
            created_at: Utc::now().to_rfc3339(),
        }
    }

    pub fn is_bulk(&self) -> bool {
        self.level == SummaryLevel::Two
    }

    pub fn is_active(&self) -> bool {
        !self.compressed
    }
}
