use serde::{Deserialize, Serialize};

use stratum_core::chat::ChatMessage;
use stratum_core::ids::SessionId;

/// Tunables of the context manager.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Hard upper bound on messages sent to the main LLM.
    pub window_size: usize,
    /// Level-1 trigger: compress when active_messages / window_size exceeds this.
    pub message_compression_ratio: f64,
    /// Level-2 trigger: compress when active_summaries / window_size exceeds this.
    pub summary_compression_ratio: f64,
    /// Lower bound on regular messages kept after level-1 compression.
    pub min_messages_in_window: usize,
    /// Soft guard reported in context metrics.
    pub max_messages_before_compress: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            message_compression_ratio: 0.3,
            summary_compression_ratio: 0.8,
            min_messages_in_window: 5,
            max_messages_before_compress: 50,
        }
    }
}

impl ContextConfig {
    /// Regular messages kept in the window after a level-1 compression.
    pub fn keep_messages(&self) -> usize {
        let ratio_keep = (self.window_size as f64 * (1.0 - self.message_compression_ratio)) as usize;
        ratio_keep.max(self.min_messages_in_window)
    }

    /// Level-1 summaries kept active after a level-2 compression.
    pub fn keep_summaries(&self) -> usize {
        let ratio_keep = (self.window_size as f64 * (1.0 - self.summary_compression_ratio)) as usize;
        ratio_keep.max(2)
    }
}

/// Input to prompt-window assembly.
#[derive(Clone, Debug)]
pub struct ContextRequest {
    pub session_id: SessionId,
    /// Included as the leading system message when set.
    pub system_prompt: Option<String>,
}

/// The assembled window plus what happened while building it.
#[derive(Clone, Debug)]
pub struct ContextResponse {
    pub messages: Vec<ChatMessage>,
    pub total_messages: u32,
    pub window_size: usize,
    pub has_summary: bool,
    pub compression_info: CompressionInfo,
}

/// Outcome of the per-turn trigger check.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub messages_compressed: u32,
    pub summaries_compressed: u32,
    pub anchors_created: u32,
    pub tokens_used: u32,
    pub duration_ms: u64,
}

/// Context metrics for observability endpoints.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContextInfo {
    pub session_id: SessionId,
    pub total_messages: u32,
    pub active_messages: u32,
    pub active_summaries: u32,
    pub bulk_summaries: u32,
    pub window_size: usize,
    pub max_before_compress: usize,
    pub message_ratio: f64,
    pub summary_ratio: f64,
    pub has_summary: bool,
    pub would_compress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compression_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_policy() {
        let config = ContextConfig::default();
        assert_eq!(config.window_size, 20);
        assert!((config.message_compression_ratio - 0.3).abs() < f64::EPSILON);
        assert!((config.summary_compression_ratio - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.min_messages_in_window, 5);
    }

    #[test]
    fn keep_messages_is_ratio_floor_or_min() {
        let config = ContextConfig::default();
        // 20 * 0.7 = 14 > min 5
        assert_eq!(config.keep_messages(), 14);

        let tight = ContextConfig {
            window_size: 6,
            message_compression_ratio: 0.5,
            min_messages_in_window: 5,
            ..ContextConfig::default()
        };
        // 6 * 0.5 = 3 < min 5
        assert_eq!(tight.keep_messages(), 5);
    }

    #[test]
    fn keep_summaries_floors_at_two() {
        let config = ContextConfig {
            window_size: 10,
            summary_compression_ratio: 0.8,
            ..ContextConfig::default()
        };
        // 10 * 0.2 = 2
        assert_eq!(config.keep_summaries(), 2);

        let tiny = ContextConfig {
            window_size: 4,
            summary_compression_ratio: 0.9,
            ..ContextConfig::default()
        };
        // 4 * 0.1 = 0 -> floor 2
        assert_eq!(tiny.keep_summaries(), 2);
    }

    #[test]
    fn compression_info_serializes_compactly() {
        let info = CompressionInfo::default();
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["triggered"], false);
        assert!(json.get("level").is_none());
        assert!(json.get("reason").is_none());
    }
}
