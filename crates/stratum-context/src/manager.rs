use std::time::Instant;

use tracing::{debug, info, instrument, warn};

use stratum_core::chat::ChatMessage;
use stratum_core::ids::SessionId;
use stratum_core::messages::{MessageRecord, Role};
use stratum_core::summary::{SummaryLevel, SummaryRecord};
use stratum_store::{
    apply_compression, CoveredItems, Database, MessageRepo, SessionRepo, SummaryRepo,
};

use crate::error::ContextError;
use crate::prompts::render_summary_entry;
use crate::summarizer::{Summarizer, SummaryItems};
use crate::types::{
    CompressionInfo, ContextConfig, ContextInfo, ContextRequest, ContextResponse,
};

/// What the trigger policy decided for this turn.
enum Trigger {
    None,
    /// Fold the oldest active regular messages into a level-1 summary.
    LevelOne(Vec<MessageRecord>),
    /// Fold the oldest active level-1 summaries into one bulk summary.
    LevelTwo(Vec<SummaryRecord>),
}

/// Decides if/when history is compressed and assembles the prompt window.
///
/// At most one compression happens per turn, and level 2 is evaluated
/// before level 1: when both are near threshold the turn still completes
/// one useful compression, and fresh level-1 summaries are not immediately
/// recompressed.
pub struct ContextManager {
    db: Database,
    sessions: SessionRepo,
    messages: MessageRepo,
    summaries: SummaryRepo,
    summarizer: Summarizer,
    config: ContextConfig,
}

impl ContextManager {
    pub fn new(db: Database, summarizer: Summarizer, config: ContextConfig) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            summaries: SummaryRepo::new(db.clone()),
            db,
            summarizer,
            config,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Run the trigger check (compressing if due) and assemble the window.
    #[instrument(skip(self, req), fields(session_id = %req.session_id))]
    pub async fn build_context(
        &self,
        req: &ContextRequest,
    ) -> Result<ContextResponse, ContextError> {
        let start = Instant::now();
        let total_messages = self.messages.message_count(&req.session_id)?;

        let compression_info = self.check_and_compress(&req.session_id).await?;
        let (messages, has_summary) = self.assemble(req)?;

        info!(
            total_messages,
            window = messages.len(),
            has_summary,
            compressed = compression_info.triggered,
            duration_ms = start.elapsed().as_millis() as u64,
            "context built"
        );

        Ok(ContextResponse {
            messages,
            total_messages,
            window_size: self.config.window_size,
            has_summary,
            compression_info,
        })
    }

    /// Context metrics without side effects (the would-compress view).
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn context_info(&self, session_id: &SessionId) -> Result<ContextInfo, ContextError> {
        self.sessions.get(session_id)?;

        let total_messages = self.messages.message_count(session_id)?;
        let active_messages = self.messages.get_active_messages(session_id)?.len() as u32;
        let active_summaries = self
            .summaries
            .get_active(session_id, SummaryLevel::One)?
            .len() as u32;
        let bulk_summaries = self
            .summaries
            .get_active(session_id, SummaryLevel::Two)?
            .len() as u32;

        let w = self.config.window_size as f64;
        let (would_compress, compression_reason) = match self.evaluate_trigger(session_id)? {
            Trigger::LevelTwo(_) => (true, Some("summary_ratio_threshold".to_owned())),
            Trigger::LevelOne(_) => (true, Some("message_ratio_threshold".to_owned())),
            Trigger::None => (false, None),
        };

        Ok(ContextInfo {
            session_id: session_id.clone(),
            total_messages,
            active_messages,
            active_summaries,
            bulk_summaries,
            window_size: self.config.window_size,
            max_before_compress: self.config.max_messages_before_compress,
            message_ratio: f64::from(active_messages) / w,
            summary_ratio: f64::from(active_summaries) / w,
            has_summary: active_summaries > 0 || bulk_summaries > 0,
            would_compress,
            compression_reason,
        })
    }

    /// Remove all summaries of a session and reactivate covered history.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn cleanup_session(&self, session_id: &SessionId) -> Result<u32, ContextError> {
        Ok(self.summaries.delete_for_session(session_id)?)
    }

    // ── Trigger policy ─────────────────────────────────────────────────

    /// Evaluate the trigger policy. Level 2 first, then level 1, at most
    /// one selected. Reads only; the decision carries the items to fold.
    fn evaluate_trigger(&self, session_id: &SessionId) -> Result<Trigger, ContextError> {
        let w = self.config.window_size as f64;
        let min_items = self.summarizer.config().min_items_for_summary;

        let active_summaries = self.summaries.get_active(session_id, SummaryLevel::One)?;
        let a_s = active_summaries.len();
        if a_s as f64 / w > self.config.summary_compression_ratio && a_s >= 2 {
            let keep = self.config.keep_summaries();
            if a_s > keep {
                let fold = a_s - keep;
                if fold >= min_items {
                    return Ok(Trigger::LevelTwo(active_summaries[..fold].to_vec()));
                }
                debug!(fold, min_items, "level-2 due but below minimum fold size");
            }
        }

        let active_messages = self.messages.get_active_messages(session_id)?;
        let a_m = active_messages.len();
        if a_m as f64 / w > self.config.message_compression_ratio {
            let keep = self.config.keep_messages();
            if a_m > keep {
                let fold = a_m - keep;
                if fold >= min_items {
                    return Ok(Trigger::LevelOne(active_messages[..fold].to_vec()));
                }
                debug!(fold, min_items, "level-1 due but below minimum fold size");
            }
        }

        Ok(Trigger::None)
    }

    /// Check the triggers and run at most one compression. A summarization
    /// failure is recovered locally: no compression this turn, the next
    /// turn re-evaluates.
    async fn check_and_compress(
        &self,
        session_id: &SessionId,
    ) -> Result<CompressionInfo, ContextError> {
        let start = Instant::now();

        let (level, reason, record, covered) = match self.evaluate_trigger(session_id)? {
            Trigger::None => return Ok(CompressionInfo::default()),

            Trigger::LevelTwo(inputs) => {
                if inputs.len() < 2 {
                    return Err(ContextError::InvariantViolation(
                        "level-2 compression selected with fewer than 2 inputs".into(),
                    ));
                }
                let reason = "summary_ratio_threshold";
                let draft = self
                    .summarizer
                    .create_summary(
                        session_id,
                        &SummaryItems::Summaries(&inputs),
                        reason,
                        SummaryLevel::Two,
                    )
                    .await;
                match draft {
                    Ok(record) => {
                        let covered =
                            CoveredItems::Summaries(inputs.iter().map(|s| s.id.clone()).collect());
                        (SummaryLevel::Two, reason, record, covered)
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "level-2 summarization failed, skipping compression this turn");
                        return Ok(CompressionInfo::default());
                    }
                }
            }

            Trigger::LevelOne(inputs) => {
                let reason = "message_ratio_threshold";
                let draft = self
                    .summarizer
                    .create_summary(
                        session_id,
                        &SummaryItems::Messages(&inputs),
                        reason,
                        SummaryLevel::One,
                    )
                    .await;
                match draft {
                    Ok(record) => {
                        let covered =
                            CoveredItems::Messages(inputs.iter().map(|m| m.id.clone()).collect());
                        (SummaryLevel::One, reason, record, covered)
                    }
                    Err(e) => {
                        warn!(session_id = %session_id, error = %e, "level-1 summarization failed, skipping compression this turn");
                        return Ok(CompressionInfo::default());
                    }
                }
            }
        };

        let folded = covered.len() as u32;
        let mirror =
            MessageRecord::summary_mirror(session_id.clone(), record.text.clone(), level);
        apply_compression(&self.db, &record, &covered, &mirror)?;

        let mut compression = CompressionInfo {
            triggered: true,
            level: Some(level.as_i64()),
            reason: Some(reason.to_owned()),
            anchors_created: record.anchors.len() as u32,
            tokens_used: record.tokens_used,
            duration_ms: start.elapsed().as_millis() as u64,
            ..CompressionInfo::default()
        };
        match level {
            SummaryLevel::One => compression.messages_compressed = folded,
            SummaryLevel::Two => compression.summaries_compressed = folded,
        }

        info!(
            session_id = %session_id,
            summary_id = %record.id,
            level = %level,
            folded,
            tokens_used = record.tokens_used,
            "compression completed"
        );

        Ok(compression)
    }

    // ── Prompt assembly ────────────────────────────────────────────────

    /// Assemble the window: system prompt, bulk summaries, active level-1
    /// summaries, then active regular messages, all chronological, trimmed
    /// to the window bound.
    fn assemble(
        &self,
        req: &ContextRequest,
    ) -> Result<(Vec<ChatMessage>, bool), ContextError> {
        let mut window = Vec::new();

        if let Some(system_prompt) = &req.system_prompt {
            if !system_prompt.is_empty() {
                window.push(ChatMessage::system(system_prompt.clone()));
            }
        }

        let bulks = self.summaries.get_active(&req.session_id, SummaryLevel::Two)?;
        let level1 = self.summaries.get_active(&req.session_id, SummaryLevel::One)?;
        let has_summary = !bulks.is_empty() || !level1.is_empty();

        for summary in bulks.iter().chain(level1.iter()) {
            window.push(ChatMessage::assistant(render_summary_entry(summary)));
        }

        for msg in self.messages.get_active_messages(&req.session_id)? {
            let mut entry = ChatMessage::new(msg.role, msg.content);
            if msg.role == Role::Tool {
                entry.tool_call_id = msg.tool_call_id;
            }
            window.push(entry);
        }

        Ok((trim_window(window, self.config.window_size), has_summary))
    }
}

/// Drop the oldest non-system entries until the window fits. System
/// messages are never evicted.
fn trim_window(messages: Vec<ChatMessage>, window_size: usize) -> Vec<ChatMessage> {
    if messages.len() <= window_size {
        return messages;
    }

    let (system, rest): (Vec<ChatMessage>, Vec<ChatMessage>) =
        messages.into_iter().partition(|m| m.role == Role::System);

    let available = window_size.saturating_sub(system.len());
    let kept = if rest.len() > available {
        rest[rest.len() - available..].to_vec()
    } else {
        rest
    };

    let mut out = system;
    out.extend(kept);
    out
}
