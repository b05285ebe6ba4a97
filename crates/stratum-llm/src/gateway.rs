use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;

use stratum_core::chat::{ChatMessage, ChatOptions, ChatResponse, StreamChunk};
use stratum_core::errors::GatewayError;

pub type GatewayStream = Pin<Box<dyn Stream<Item = StreamChunk> + Send>>;

/// Uniform request/response contract to a chat-completion provider.
///
/// Implementations must be safe for concurrent use from many sessions and
/// abort in-flight requests promptly when the caller's future is dropped.
/// The gateway holds no conversation memory.
#[async_trait]
pub trait ChatGateway: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, GatewayError>;

    async fn chat_completion_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<GatewayStream, GatewayError>;
}

/// The two configured channels of the service.
#[derive(Clone)]
pub struct LlmChannels {
    /// User-facing completions.
    pub main: Arc<dyn ChatGateway>,
    /// Cheaper/faster model, used only for producing summaries.
    pub shrink: Arc<dyn ChatGateway>,
}

impl LlmChannels {
    pub fn new(main: Arc<dyn ChatGateway>, shrink: Arc<dyn ChatGateway>) -> Self {
        Self { main, shrink }
    }
}
