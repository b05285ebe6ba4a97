use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use stratum_context::{ContextManager, ContextRequest, ContextResponse};
use stratum_core::chat::{ChatOptions, StreamChunk};
use stratum_core::ids::{MessageId, SessionId};
use stratum_core::messages::{MessageMeta, MessageRecord};
use stratum_engine::{TurnEngine, TurnOutcome};
use stratum_llm::{ChatGateway, LlmChannels};
use stratum_store::{Database, MessageRepo, SessionRepo, SummaryRepo};

use crate::dto::{
    ChannelDto, ChatRequest, ChatResponse, CompressResponse, ContextMetadata,
    DeleteSummariesResponse, HistoryResponse, MessageDto, ModelsResponse, SessionResponse,
    StreamPayload, SummaryDto,
};
use crate::error::ApiError;

const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer in the user's language. \
Be polite, informative, and help the user solve their problems. If you do not know the answer, \
say so honestly.\n\nWhen the context contains summaries of earlier conversation, take them into \
account, but do not mention reading summaries.";

#[derive(Clone, Debug)]
pub struct ChatServiceConfig {
    pub system_prompt: String,
    /// Deadline for one whole turn, compression included.
    pub turn_timeout: Duration,
    pub max_messages_per_session: u32,
    /// Flat per-token estimate recorded on assistant messages.
    pub cost_per_token: f64,
}

impl Default for ChatServiceConfig {
    fn default() -> Self {
        Self {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            turn_timeout: Duration::from_secs(120),
            max_messages_per_session: 1000,
            cost_per_token: 0.0001,
        }
    }
}

/// Per-request coordinator: persists the user turn, obtains the assembled
/// context, drives the turn engine, persists the assistant turn.
///
/// Turns within one session are serialized by a keyed async mutex so
/// interleaved compressions cannot produce non-contiguous coverage.
/// Different sessions are fully independent.
pub struct ChatService {
    sessions: SessionRepo,
    messages: MessageRepo,
    summaries: SummaryRepo,
    context: Arc<ContextManager>,
    engine: Arc<TurnEngine>,
    channels: LlmChannels,
    config: ChatServiceConfig,
    turn_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl ChatService {
    pub fn new(
        db: Database,
        context: Arc<ContextManager>,
        engine: Arc<TurnEngine>,
        channels: LlmChannels,
        config: ChatServiceConfig,
    ) -> Self {
        Self {
            sessions: SessionRepo::new(db.clone()),
            messages: MessageRepo::new(db.clone()),
            summaries: SummaryRepo::new(db),
            context,
            engine,
            channels,
            config,
            turn_locks: DashMap::new(),
        }
    }

    async fn lock_session(&self, session_id: &SessionId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = self
            .turn_locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    fn ensure_session(&self, session_id: &SessionId) -> Result<(), ApiError> {
        self.sessions.create(session_id)?;
        if self.messages.message_count(session_id)? >= self.config.max_messages_per_session {
            return Err(ApiError::Validation(format!(
                "session reached the {} message cap",
                self.config.max_messages_per_session
            )));
        }
        Ok(())
    }

    // ── Chat turns ─────────────────────────────────────────────────────

    /// One non-streaming user turn.
    #[instrument(skip(self, req), fields(session_id = %req.session_id, message_len = req.message.len()))]
    pub async fn process_message(&self, req: ChatRequest) -> Result<ChatResponse, ApiError> {
        let start = Instant::now();
        req.validate()?;

        let session_id = SessionId::from_raw(req.session_id.clone());
        let _turn = self.lock_session(&session_id).await;
        self.ensure_session(&session_id)?;

        let user_msg = MessageRecord::user(session_id.clone(), req.message.clone());
        self.messages.append(&user_msg)?;

        let (ctx, outcome) = self.run_turn(&session_id).await?;

        let tokens_used = outcome.usage.total_tokens;
        let assistant = MessageRecord::assistant(session_id.clone(), outcome.text.clone())
            .with_metadata(MessageMeta {
                tokens: Some(tokens_used),
                cost: Some(f64::from(tokens_used) * self.config.cost_per_token),
                model: Some(outcome.model.clone()),
            });
        self.messages.append(&assistant)?;

        info!(
            session_id = %session_id,
            message_id = %assistant.id,
            tokens_used,
            iterations = outcome.iterations,
            tool_invocations = outcome.tool_invocations,
            compression = ctx.compression_info.triggered,
            duration_ms = start.elapsed().as_millis() as u64,
            "turn completed"
        );

        Ok(ChatResponse {
            message_id: assistant.id.to_string(),
            response: outcome.text,
            session_id: req.session_id,
            tokens_used,
            model: outcome.model,
            processing_time_ms: start.elapsed().as_millis() as u64,
            context_info: ContextMetadata::from_parts(
                ctx.total_messages,
                ctx.messages.len(),
                ctx.has_summary,
                &ctx.compression_info,
            ),
            iteration_limit_hit: outcome.iteration_limit_hit,
        })
    }

    /// Build context and drive the engine under the turn deadline. The
    /// deadline cancels the engine at its iteration boundary so already
    /// recorded tool messages are still persisted; no assistant message is
    /// written for a failed turn.
    async fn run_turn(
        &self,
        session_id: &SessionId,
    ) -> Result<(ContextResponse, TurnOutcome), ApiError> {
        let deadline = tokio::time::Instant::now() + self.config.turn_timeout;

        let ctx_req = ContextRequest {
            session_id: session_id.clone(),
            system_prompt: Some(self.config.system_prompt.clone()),
        };
        let ctx = tokio::time::timeout_at(deadline, self.context.build_context(&ctx_req))
            .await
            .map_err(|_| ApiError::DeadlineExceeded)??;

        let cancel = CancellationToken::new();
        let deadline_task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(deadline).await;
                cancel.cancel();
            })
        };

        let run = self.engine.run(session_id, ctx.messages.clone(), &cancel).await;
        deadline_task.abort();

        match run {
            Ok(outcome) => {
                self.persist_tool_messages(&outcome.tool_messages)?;
                Ok((ctx, outcome))
            }
            Err(failure) => {
                // Tool messages are a faithful transcript of what ran.
                if let Err(e) = self.persist_tool_messages(&failure.tool_messages) {
                    error!(session_id = %session_id, error = %e, "failed to persist tool transcript of failed turn");
                }
                Err(failure.error.into())
            }
        }
    }

    fn persist_tool_messages(&self, tool_messages: &[MessageRecord]) -> Result<(), ApiError> {
        for msg in tool_messages {
            self.messages.append(msg)?;
        }
        Ok(())
    }

    /// Streaming variant: a `context` event, `content` chunks, then `done`
    /// after the assistant text is persisted. Tools are not involved; the
    /// stream path is the plain-completion case.
    pub fn process_message_stream(
        self: Arc<Self>,
        req: ChatRequest,
    ) -> Result<ReceiverStream<StreamPayload>, ApiError> {
        req.validate()?;

        let (tx, rx) = mpsc::channel::<StreamPayload>(64);
        let service = self;
        tokio::spawn(async move {
            if let Err(e) = service.stream_turn(&req, &tx).await {
                warn!(session_id = %req.session_id, error = %e, "streaming turn failed");
                let _ = tx
                    .send(StreamPayload::Error {
                        error: e.to_string(),
                        code: e.code().to_owned(),
                    })
                    .await;
            }
        });

        Ok(ReceiverStream::new(rx))
    }

    async fn stream_turn(
        &self,
        req: &ChatRequest,
        tx: &mpsc::Sender<StreamPayload>,
    ) -> Result<(), ApiError> {
        let session_id = SessionId::from_raw(req.session_id.clone());
        let _turn = self.lock_session(&session_id).await;
        self.ensure_session(&session_id)?;

        let user_msg = MessageRecord::user(session_id.clone(), req.message.clone());
        self.messages.append(&user_msg)?;

        let ctx_req = ContextRequest {
            session_id: session_id.clone(),
            system_prompt: Some(self.config.system_prompt.clone()),
        };
        let ctx = tokio::time::timeout(self.config.turn_timeout, self.context.build_context(&ctx_req))
            .await
            .map_err(|_| ApiError::DeadlineExceeded)??;

        let message_id = MessageId::new();
        let _ = tx
            .send(StreamPayload::Context {
                message_id: message_id.to_string(),
                context_info: ContextMetadata::from_parts(
                    ctx.total_messages,
                    ctx.messages.len(),
                    ctx.has_summary,
                    &ctx.compression_info,
                ),
            })
            .await;

        let mut stream = self
            .channels
            .main
            .chat_completion_stream(&ctx.messages, &ChatOptions::default())
            .await?;

        let mut full_text = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                StreamChunk::Content(content) => {
                    full_text.push_str(&content);
                    if tx.send(StreamPayload::Content { content }).await.is_err() {
                        // Client went away; the assistant message is not
                        // persisted for an abandoned stream.
                        return Ok(());
                    }
                }
                StreamChunk::Done => break,
                StreamChunk::Error(e) => return Err(e.into()),
            }
        }

        let mut assistant = MessageRecord::assistant(session_id.clone(), full_text)
            .with_metadata(MessageMeta {
                tokens: None,
                cost: None,
                model: Some(self.channels.main.model().to_owned()),
            });
        assistant.id = message_id.clone();
        self.messages.append(&assistant)?;

        let _ = tx
            .send(StreamPayload::Done {
                message_id: message_id.to_string(),
            })
            .await;
        Ok(())
    }

    // ── Session operations ─────────────────────────────────────────────

    pub fn get_history(&self, session_id: &SessionId, limit: u32) -> Result<HistoryResponse, ApiError> {
        self.sessions.get(session_id)?;
        let messages = self.messages.get_messages(session_id, limit)?;
        Ok(HistoryResponse {
            session_id: session_id.to_string(),
            count: messages.len(),
            messages: messages.iter().map(MessageDto::from).collect(),
        })
    }

    pub fn get_session(&self, session_id: &SessionId) -> Result<SessionResponse, ApiError> {
        let row = self.sessions.get(session_id)?;
        let context = self.context.context_info(session_id)?;
        Ok(SessionResponse::new(row, context))
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn delete_session(&self, session_id: &SessionId) -> Result<(), ApiError> {
        self.sessions.delete(session_id)?;
        self.turn_locks.remove(session_id.as_str());
        Ok(())
    }

    pub fn context_info(&self, session_id: &SessionId) -> Result<stratum_context::ContextInfo, ApiError> {
        Ok(self.context.context_info(session_id)?)
    }

    /// Admin operation: run the trigger check (and any due compression)
    /// without a user message.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub async fn trigger_compression(
        &self,
        session_id: &SessionId,
    ) -> Result<CompressResponse, ApiError> {
        let _turn = self.lock_session(session_id).await;
        self.sessions.get(session_id)?;

        let ctx = self
            .context
            .build_context(&ContextRequest {
                session_id: session_id.clone(),
                system_prompt: None,
            })
            .await?;

        Ok(CompressResponse {
            session_id: session_id.to_string(),
            total_messages: ctx.total_messages,
            context_size: ctx.messages.len(),
            has_summary: ctx.has_summary,
            compression: ctx.compression_info,
        })
    }

    pub fn latest_summary(&self, session_id: &SessionId) -> Result<SummaryDto, ApiError> {
        self.sessions.get(session_id)?;
        let summary = self.summaries.get_latest(session_id)?;
        Ok(SummaryDto::from(&summary))
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn delete_summaries(
        &self,
        session_id: &SessionId,
    ) -> Result<DeleteSummariesResponse, ApiError> {
        self.sessions.get(session_id)?;
        let deleted = self.context.cleanup_session(session_id)?;
        Ok(DeleteSummariesResponse {
            session_id: session_id.to_string(),
            deleted,
        })
    }

    pub fn models(&self) -> ModelsResponse {
        ModelsResponse {
            models: vec![
                ChannelDto {
                    channel: "main".into(),
                    model: self.channels.main.model().to_owned(),
                },
                ChannelDto {
                    channel: "shrink".into(),
                    model: self.channels.shrink.model().to_owned(),
                },
            ],
        }
    }
}
