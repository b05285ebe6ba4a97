use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use stratum_core::chat::{ChatMessage, ChatOptions, TokenStats, ToolDecl};
use stratum_core::ids::SessionId;
use stratum_core::messages::MessageRecord;
use stratum_llm::ChatGateway;
use stratum_mcp::{schema, ToolTransport};

use crate::error::{EngineError, TurnFailure};

/// Stock reply persisted when the loop hits the iteration cap.
pub const ITERATION_CAP_MESSAGE: &str =
    "Iteration limit reached before the assistant produced a final answer.";

const DEFAULT_MAX_ITERATIONS: u32 = 10;

/// Runs one user turn as a bounded model↔tool loop. The non-tool path is
/// the degenerate case: with an empty catalog the model has nothing to
/// call and the loop exits after one iteration.
pub struct TurnEngine {
    gateway: Arc<dyn ChatGateway>,
    tools: Option<Arc<dyn ToolTransport>>,
    tool_decls: Vec<ToolDecl>,
    max_iterations: u32,
}

/// Everything a completed turn produced.
#[derive(Debug)]
pub struct TurnOutcome {
    pub text: String,
    pub model: String,
    /// Usage summed over every model call of the turn.
    pub usage: TokenStats,
    /// Model calls made.
    pub iterations: u32,
    pub tool_invocations: u32,
    pub iteration_limit_hit: bool,
    /// Tool-result transcript, in execution order, for persistence.
    pub tool_messages: Vec<MessageRecord>,
}

impl TurnEngine {
    /// Create the engine, discovering the tool catalog once. With no
    /// transport the engine runs plain completions.
    #[instrument(skip(gateway, tools), fields(with_tools = tools.is_some()))]
    pub async fn initialize(
        gateway: Arc<dyn ChatGateway>,
        tools: Option<Arc<dyn ToolTransport>>,
        max_iterations: u32,
    ) -> Result<Self, EngineError> {
        let tool_decls = match &tools {
            Some(transport) => {
                let catalog = transport.list_tools().await?;
                let decls: Vec<ToolDecl> = catalog.iter().map(schema::translate_tool).collect();
                info!(tools = decls.len(), "tool catalog translated");
                decls
            }
            None => Vec::new(),
        };

        Ok(Self {
            gateway,
            tools,
            tool_decls,
            max_iterations: max_iterations.max(1),
        })
    }

    /// Engine without tools and with the default iteration cap.
    pub fn plain(gateway: Arc<dyn ChatGateway>) -> Self {
        Self {
            gateway,
            tools: None,
            tool_decls: Vec::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
        }
    }

    pub fn tool_count(&self) -> usize {
        self.tool_decls.len()
    }

    /// Execute one turn over the assembled prompt.
    ///
    /// Cancellation is honored at the boundary between iterations; a
    /// cancelled turn fails with the tool transcript recorded so far.
    #[instrument(skip(self, prompt, cancel), fields(session_id = %session_id, prompt = prompt.len(), max_iterations = self.max_iterations))]
    pub async fn run(
        &self,
        session_id: &SessionId,
        prompt: Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnFailure> {
        let mut history = prompt;
        let mut usage = TokenStats::default();
        let mut model = self.gateway.model().to_owned();
        let mut tool_messages: Vec<MessageRecord> = Vec::new();
        let mut tool_invocations = 0u32;

        let options = ChatOptions {
            tools: self.tool_decls.clone(),
            ..Default::default()
        };

        for iteration in 1..=self.max_iterations {
            if cancel.is_cancelled() {
                return Err(TurnFailure {
                    error: EngineError::Cancelled,
                    tool_messages,
                });
            }

            debug!(iteration, history = history.len(), "model call");
            let response = match self.gateway.chat_completion(&history, &options).await {
                Ok(resp) => resp,
                Err(e) => {
                    return Err(TurnFailure {
                        error: EngineError::Gateway(e),
                        tool_messages,
                    })
                }
            };

            usage = add_usage(usage, response.usage);
            model = response.model.clone();

            let calls = response.first_tool_calls().to_vec();
            if calls.is_empty() {
                let text = response.first_content().unwrap_or_default().trim().to_owned();
                return Ok(TurnOutcome {
                    text,
                    model,
                    usage,
                    iterations: iteration,
                    tool_invocations,
                    iteration_limit_hit: false,
                    tool_messages,
                });
            }

            // The assistant's tool-call message joins the in-turn history
            // so subsequent model calls see their own requests.
            let mut assistant_entry =
                ChatMessage::assistant(response.first_content().unwrap_or_default());
            assistant_entry.tool_calls = Some(calls.clone());
            history.push(assistant_entry);

            for call in &calls {
                let result = self.invoke_tool(&call.name, call.arguments.clone()).await;
                let content = result.to_string();

                history.push(ChatMessage::tool_result(&call.id, &content));
                tool_messages.push(MessageRecord::tool(
                    session_id.clone(),
                    &content,
                    &call.name,
                    &call.id,
                ));
                tool_invocations += 1;
            }
        }

        warn!(
            session_id = %session_id,
            max_iterations = self.max_iterations,
            tool_invocations,
            "iteration cap reached without convergence"
        );

        Ok(TurnOutcome {
            text: ITERATION_CAP_MESSAGE.to_owned(),
            model,
            usage,
            iterations: self.max_iterations,
            tool_invocations,
            iteration_limit_hit: true,
            tool_messages,
        })
    }

    /// Call one tool. Failures become `{"error": …}` data for the model.
    async fn invoke_tool(&self, name: &str, arguments: serde_json::Value) -> serde_json::Value {
        let Some(transport) = &self.tools else {
            return serde_json::json!({"error": format!("unknown tool: {name}")});
        };

        match transport.call_tool(name, arguments).await {
            Ok(outcome) => outcome.normalize(),
            Err(e) => {
                warn!(tool = name, error = %e, "tool call failed, feeding error back to model");
                serde_json::json!({"error": e.to_string()})
            }
        }
    }
}

fn add_usage(a: TokenStats, b: TokenStats) -> TokenStats {
    TokenStats {
        prompt_tokens: a.prompt_tokens + b.prompt_tokens,
        completion_tokens: a.completion_tokens + b.completion_tokens,
        total_tokens: a.total_tokens + b.total_tokens,
    }
}
