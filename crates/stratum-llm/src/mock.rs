use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;

use stratum_core::chat::{
    ChatMessage, ChatOptions, ChatResponse, Choice, StreamChunk, TokenStats, ToolCallRequest,
};
use stratum_core::errors::GatewayError;
use stratum_core::messages::Role;

use crate::gateway::{ChatGateway, GatewayStream};

/// Pre-programmed replies for deterministic testing without API calls.
#[derive(Clone)]
pub enum MockReply {
    /// A plain assistant text response.
    Response(ChatResponse),
    /// Return an error from the call itself.
    Error(GatewayError),
    /// Wait a duration, then yield the inner reply.
    Delay(Duration, Box<MockReply>),
}

impl MockReply {
    /// Convenience: an assistant text response with default usage.
    pub fn text(text: &str) -> Self {
        Self::text_with_usage(
            text,
            TokenStats {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        )
    }

    pub fn text_with_usage(text: &str, usage: TokenStats) -> Self {
        Self::Response(ChatResponse {
            id: "mock-cmpl".into(),
            model: "mock-model".into(),
            choices: vec![Choice {
                index: 0,
                message: ChatMessage::assistant(text),
                finish_reason: Some("stop".into()),
            }],
            usage,
        })
    }

    /// Convenience: an assistant turn that requests one tool invocation.
    pub fn tool_call(call_id: &str, name: &str, arguments: serde_json::Value) -> Self {
        let mut message = ChatMessage::assistant("");
        message.tool_calls = Some(vec![ToolCallRequest {
            id: call_id.into(),
            name: name.into(),
            arguments,
        }]);
        Self::Response(ChatResponse {
            id: "mock-cmpl".into(),
            model: "mock-model".into(),
            choices: vec![Choice {
                index: 0,
                message,
                finish_reason: Some("tool_calls".into()),
            }],
            usage: TokenStats {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            },
        })
    }

    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock gateway that returns pre-programmed replies in sequence and records
/// every request it saw.
pub struct MockGateway {
    replies: Vec<MockReply>,
    call_count: AtomicUsize,
    requests: parking_lot::Mutex<Vec<Vec<ChatMessage>>>,
}

impl MockGateway {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self {
            replies,
            call_count: AtomicUsize::new(0),
            requests: parking_lot::Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// The message lists of every request received, in call order.
    pub fn requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests.lock().clone()
    }

    async fn next_reply(&self, messages: &[ChatMessage]) -> Result<ChatResponse, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push(messages.to_vec());

        let Some(reply) = self.replies.get(idx) else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockGateway: no reply configured for call {idx}"
            )));
        };

        let mut current = reply.clone();
        loop {
            match current {
                MockReply::Response(resp) => return Ok(resp),
                MockReply::Error(e) => return Err(e),
                MockReply::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
            }
        }
    }
}

#[async_trait]
impl ChatGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<ChatResponse, GatewayError> {
        self.next_reply(messages).await
    }

    async fn chat_completion_stream(
        &self,
        messages: &[ChatMessage],
        _options: &ChatOptions,
    ) -> Result<GatewayStream, GatewayError> {
        let resp = self.next_reply(messages).await?;
        let content = resp.first_content().unwrap_or_default().to_owned();
        let chunks = vec![StreamChunk::Content(content), StreamChunk::Done];
        Ok(Box::pin(stream::iter(chunks)))
    }
}
