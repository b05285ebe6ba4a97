use std::sync::Arc;

use tracing::{debug, info, instrument};

use stratum_core::chat::{ChatMessage, ChatOptions};
use stratum_core::ids::SessionId;
use stratum_core::messages::MessageRecord;
use stratum_core::summary::{SummaryLevel, SummaryRecord};
use stratum_llm::ChatGateway;

use crate::error::SummarizeError;
use crate::prompts;

/// Tunables of the summarizer.
#[derive(Clone, Debug)]
pub struct SummarizerConfig {
    pub anchors_count: usize,
    pub summary_max_length: usize,
    pub min_items_for_summary: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            anchors_count: 5,
            summary_max_length: 500,
            min_items_for_summary: 3,
        }
    }
}

/// The inputs of one summarization: regular messages for level 1, prior
/// level-1 summaries for level 2. Both must be in temporal ascending order.
pub enum SummaryItems<'a> {
    Messages(&'a [MessageRecord]),
    Summaries(&'a [SummaryRecord]),
}

impl SummaryItems<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::Messages(m) => m.len(),
            Self::Summaries(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn matches_level(&self, level: SummaryLevel) -> bool {
        matches!(
            (self, level),
            (Self::Messages(_), SummaryLevel::One) | (Self::Summaries(_), SummaryLevel::Two)
        )
    }
}

/// Produces summary drafts through the shrink LLM channel. Two calls per
/// invocation: anchor extraction, then the prose summary seeded with those
/// anchors. Persistence belongs to the caller so the coverage marks land
/// in the same transaction.
pub struct Summarizer {
    shrink: Arc<dyn ChatGateway>,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(shrink: Arc<dyn ChatGateway>, config: SummarizerConfig) -> Self {
        Self { shrink, config }
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    /// Create a summary draft over `items`. No state is persisted here;
    /// any shrink failure aborts with nothing written.
    #[instrument(skip(self, items), fields(session_id = %session_id, level = %level, items = items.len(), reason))]
    pub async fn create_summary(
        &self,
        session_id: &SessionId,
        items: &SummaryItems<'_>,
        reason: &str,
        level: SummaryLevel,
    ) -> Result<SummaryRecord, SummarizeError> {
        if items.len() < self.config.min_items_for_summary {
            return Err(SummarizeError::TooFewItems {
                got: items.len(),
                min: self.config.min_items_for_summary,
            });
        }
        if !items.matches_level(level) {
            return Err(SummarizeError::LevelMismatch {
                level: level.as_i64(),
            });
        }

        let anchors = self.extract_anchors(items, level).await?;
        let (text, tokens_used) = self.write_prose(items, &anchors, level).await?;

        let (covers_from, covers_to, message_count) = match items {
            SummaryItems::Messages(messages) => {
                let first = &messages[0];
                let last = &messages[messages.len() - 1];
                (first.id.clone(), last.id.clone(), messages.len() as u32)
            }
            SummaryItems::Summaries(summaries) => {
                // Coverage bounds resolve to the underlying regular
                // messages: the first input's lower bound through the last
                // input's upper bound.
                let first = &summaries[0];
                let last = &summaries[summaries.len() - 1];
                (
                    first.covers_from_msg_id.clone(),
                    last.covers_to_msg_id.clone(),
                    summaries.iter().map(|s| s.message_count).sum(),
                )
            }
        };

        let record = SummaryRecord::new(
            session_id.clone(),
            level,
            text,
            anchors,
            covers_from,
            covers_to,
            message_count,
            tokens_used,
        );

        info!(
            summary_id = %record.id,
            anchors = record.anchors.len(),
            text_chars = record.text.chars().count(),
            tokens_used,
            reason,
            "summary draft created"
        );

        Ok(record)
    }

    async fn extract_anchors(
        &self,
        items: &SummaryItems<'_>,
        level: SummaryLevel,
    ) -> Result<Vec<String>, SummarizeError> {
        let request = vec![
            ChatMessage::system(prompts::anchor_system_prompt(level, self.config.anchors_count)),
            ChatMessage::user(render_items(items, level, None)),
        ];

        let response = self
            .shrink
            .chat_completion(&request, &ChatOptions::default())
            .await?;
        let raw = response.first_content().unwrap_or_default();

        let anchors = parse_anchors(raw, self.config.anchors_count);
        debug!(raw_lines = raw.lines().count(), parsed = anchors.len(), "anchors parsed");

        if anchors.is_empty() {
            return Err(SummarizeError::EmptyAnchors);
        }
        Ok(anchors)
    }

    async fn write_prose(
        &self,
        items: &SummaryItems<'_>,
        anchors: &[String],
        level: SummaryLevel,
    ) -> Result<(String, u32), SummarizeError> {
        // Level 1 subsamples long transcripts to bound shrink cost.
        let step = match items {
            SummaryItems::Messages(messages) if messages.len() > 20 => {
                Some(messages.len().div_ceil(20))
            }
            _ => None,
        };

        let request = vec![
            ChatMessage::system(prompts::summary_system_prompt(
                level,
                self.config.summary_max_length,
                anchors,
            )),
            ChatMessage::user(render_items(items, level, step)),
        ];

        let response = self
            .shrink
            .chat_completion(&request, &ChatOptions::default())
            .await?;
        let text = response.first_content().unwrap_or_default().trim().to_owned();
        if text.is_empty() {
            return Err(SummarizeError::EmptyText);
        }

        Ok((
            cap_length(&text, self.config.summary_max_length),
            response.usage.total_tokens,
        ))
    }
}

/// Render the items into the user-message body of a shrink call. For
/// level 1 a `step` of `k` keeps every k-th message.
fn render_items(items: &SummaryItems<'_>, level: SummaryLevel, step: Option<usize>) -> String {
    let mut out = String::from(prompts::content_header(level));
    out.push_str("\n\n");

    match items {
        SummaryItems::Messages(messages) => {
            let step = step.unwrap_or(1).max(1);
            for msg in messages.iter().step_by(step) {
                out.push_str(prompts::role_display(msg.role));
                out.push_str(": ");
                out.push_str(&msg.content);
                out.push('\n');
            }
        }
        SummaryItems::Summaries(summaries) => {
            for (i, summary) in summaries.iter().enumerate() {
                out.push_str(&format!("Summary {}:\n{}\n\n", i + 1, summary.text));
            }
        }
    }
    out
}

/// Parse anchors line-wise: strip bullet markers and whitespace, discard
/// entries shorter than 4 characters, cap the count.
fn parse_anchors(raw: &str, max: usize) -> Vec<String> {
    raw.lines()
        .map(|line| {
            line.trim()
                .trim_start_matches('-')
                .trim_start_matches('•')
                .trim()
        })
        .filter(|anchor| anchor.chars().count() > 3)
        .map(String::from)
        .take(max)
        .collect()
}

/// Enforce the length cap, truncating with an ellipsis on overflow.
fn cap_length(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_owned();
    }
    let kept: String = text.chars().take(max.saturating_sub(3)).collect();
    format!("{kept}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::chat::TokenStats;
    use stratum_core::ids::MessageId;
    use stratum_llm::{MockGateway, MockReply};

    fn session() -> SessionId {
        SessionId::from_raw("test-session")
    }

    fn messages(n: usize) -> Vec<MessageRecord> {
        (0..n)
            .map(|i| {
                if i % 2 == 0 {
                    MessageRecord::user(session(), format!("question {i}"))
                } else {
                    MessageRecord::assistant(session(), format!("answer {i}"))
                }
            })
            .collect()
    }

    fn summarizer(replies: Vec<MockReply>) -> (Arc<MockGateway>, Summarizer) {
        let mock = Arc::new(MockGateway::new(replies));
        let s = Summarizer::new(mock.clone(), SummarizerConfig::default());
        (mock, s)
    }

    #[tokio::test]
    async fn level1_summary_two_shrink_calls() {
        let (mock, s) = summarizer(vec![
            MockReply::text("- travel plans\n- visa paperwork\n- hotel booking"),
            MockReply::text_with_usage(
                "They discussed travel plans, visas, and hotels.",
                TokenStats { prompt_tokens: 80, completion_tokens: 20, total_tokens: 100 },
            ),
        ]);

        let msgs = messages(6);
        let record = s
            .create_summary(&session(), &SummaryItems::Messages(&msgs), "ratio", SummaryLevel::One)
            .await
            .unwrap();

        assert_eq!(mock.call_count(), 2);
        assert_eq!(record.level, SummaryLevel::One);
        assert_eq!(record.anchors.len(), 3);
        assert_eq!(record.anchors[0], "travel plans");
        assert_eq!(record.covers_from_msg_id, msgs[0].id);
        assert_eq!(record.covers_to_msg_id, msgs[5].id);
        assert_eq!(record.message_count, 6);
        assert_eq!(record.tokens_used, 100);
        assert!(!record.compressed);
    }

    #[tokio::test]
    async fn level2_summary_sums_coverage() {
        let (mock, s) = summarizer(vec![
            MockReply::text("- recurring themes\n- project direction\n- open questions"),
            MockReply::text("A long-running project discussion."),
        ]);

        let inputs: Vec<SummaryRecord> = (0..3)
            .map(|i| {
                SummaryRecord::new(
                    session(),
                    SummaryLevel::One,
                    format!("summary {i}"),
                    vec![format!("theme {i}")],
                    MessageId::from_raw(format!("msg_from_{i}")),
                    MessageId::from_raw(format!("msg_to_{i}")),
                    4,
                    10,
                )
            })
            .collect();

        let record = s
            .create_summary(&session(), &SummaryItems::Summaries(&inputs), "ratio", SummaryLevel::Two)
            .await
            .unwrap();

        assert_eq!(mock.call_count(), 2);
        assert_eq!(record.level, SummaryLevel::Two);
        assert_eq!(record.covers_from_msg_id.as_str(), "msg_from_0");
        assert_eq!(record.covers_to_msg_id.as_str(), "msg_to_2");
        assert_eq!(record.message_count, 12, "sum of input coverage");

        // Second call body enumerates the input summaries.
        let requests = mock.requests();
        assert!(requests[1][1].content.contains("Summary 1:"));
        assert!(requests[1][1].content.contains("Summary 3:"));
    }

    #[tokio::test]
    async fn too_few_items_rejected() {
        let (mock, s) = summarizer(vec![]);
        let msgs = messages(2);
        let err = s
            .create_summary(&session(), &SummaryItems::Messages(&msgs), "ratio", SummaryLevel::One)
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::TooFewItems { got: 2, min: 3 }));
        assert_eq!(mock.call_count(), 0, "no shrink call made");
    }

    #[tokio::test]
    async fn level_mismatch_rejected() {
        let (_mock, s) = summarizer(vec![]);
        let msgs = messages(4);
        let err = s
            .create_summary(&session(), &SummaryItems::Messages(&msgs), "ratio", SummaryLevel::Two)
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::LevelMismatch { level: 2 }));
    }

    #[tokio::test]
    async fn shrink_failure_aborts() {
        let (_mock, s) = summarizer(vec![MockReply::Error(
            stratum_core::errors::GatewayError::ServerError { status: 500, body: "down".into() },
        )]);
        let msgs = messages(4);
        let err = s
            .create_summary(&session(), &SummaryItems::Messages(&msgs), "ratio", SummaryLevel::One)
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::Gateway(_)));
    }

    #[tokio::test]
    async fn unusable_anchor_response_aborts() {
        let (_mock, s) = summarizer(vec![MockReply::text("-\n- ab\n•")]);
        let msgs = messages(4);
        let err = s
            .create_summary(&session(), &SummaryItems::Messages(&msgs), "ratio", SummaryLevel::One)
            .await
            .unwrap_err();
        assert!(matches!(err, SummarizeError::EmptyAnchors));
    }

    #[tokio::test]
    async fn long_text_truncated_with_ellipsis() {
        let long = "x".repeat(600);
        let (_mock, s) = summarizer(vec![
            MockReply::text("- one topic\n- another topic"),
            MockReply::text(&long),
        ]);
        let msgs = messages(4);
        let record = s
            .create_summary(&session(), &SummaryItems::Messages(&msgs), "ratio", SummaryLevel::One)
            .await
            .unwrap();
        assert_eq!(record.text.chars().count(), 500);
        assert!(record.text.ends_with("..."));
    }

    #[tokio::test]
    async fn long_transcript_subsampled() {
        let (mock, s) = summarizer(vec![
            MockReply::text("- a recurring topic"),
            MockReply::text("A very long conversation."),
        ]);
        let msgs = messages(45); // step = ceil(45/20) = 3 -> 15 lines
        let _ = s
            .create_summary(&session(), &SummaryItems::Messages(&msgs), "ratio", SummaryLevel::One)
            .await
            .unwrap();

        let requests = mock.requests();
        let prose_body = &requests[1][1].content;
        let lines = prose_body.lines().filter(|l| l.contains(':')).count();
        assert!(lines <= 16, "expected subsampled transcript, got {lines} lines");

        // The anchor call sees the full transcript.
        let anchor_body = &requests[0][1].content;
        assert!(anchor_body.lines().count() > prose_body.lines().count());
    }

    #[test]
    fn anchor_parsing_rules() {
        let parsed = parse_anchors("- first topic\n• second topic\n  third topic  \n- x\n\n", 5);
        assert_eq!(parsed, vec!["first topic", "second topic", "third topic"]);

        let capped = parse_anchors("- aaaa\n- bbbb\n- cccc\n- dddd", 2);
        assert_eq!(capped.len(), 2);
    }

    #[test]
    fn cap_length_char_safe() {
        assert_eq!(cap_length("short", 500), "short");
        let capped = cap_length(&"é".repeat(600), 500);
        assert_eq!(capped.chars().count(), 500);
        assert!(capped.ends_with("..."));
    }
}
