use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{instrument, warn};

use stratum_core::chat::{
    ChatMessage, ChatOptions, ChatResponse, Choice, StreamChunk, TokenStats, ToolCallRequest,
};
use stratum_core::errors::GatewayError;
use stratum_core::messages::Role;

use crate::gateway::{ChatGateway, GatewayStream};
use crate::sse::{SseBuffer, DONE_SENTINEL};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const SSE_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

/// Configuration for one gateway channel.
#[derive(Clone)]
pub struct HttpGatewayConfig {
    /// Base URL of an OpenAI-compatible API, e.g. `https://api.example.com/v1`.
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Channel label used in logs ("main" or "shrink").
    pub channel: String,
}

/// Chat-completion provider speaking the OpenAI dialect over HTTP.
pub struct HttpGateway {
    client: reqwest::Client,
    config: HttpGatewayConfig,
}

impl HttpGateway {
    pub fn new(config: HttpGatewayConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()
                .expect("failed to build HTTP client"),
            config,
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    fn build_body(&self, messages: &[ChatMessage], options: &ChatOptions, stream: bool) -> WireRequest {
        WireRequest {
            model: self.config.model.clone(),
            messages: messages.iter().map(WireMessage::from).collect(),
            tools: if options.tools.is_empty() {
                None
            } else {
                Some(
                    options
                        .tools
                        .iter()
                        .map(|t| WireTool {
                            kind: "function".into(),
                            function: WireFunctionDecl {
                                name: t.name.clone(),
                                description: t.description.clone(),
                                parameters: t.parameters.clone(),
                            },
                        })
                        .collect(),
                )
            },
            max_tokens: options.max_tokens,
            temperature: options.temperature,
            stream,
        }
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
        stream: bool,
    ) -> Result<reqwest::Response, GatewayError> {
        let body = self.build_body(messages, options, stream);

        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.api_key.expose_secret())
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Timeout(self.config.timeout)
                } else {
                    GatewayError::NetworkError(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(resp.headers());
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status.as_u16(), body, retry_after));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ChatGateway for HttpGateway {
    fn name(&self) -> &str {
        &self.config.channel
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    #[instrument(skip(self, messages, options), fields(channel = %self.config.channel, model = %self.config.model, messages = messages.len()))]
    async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<ChatResponse, GatewayError> {
        let resp = self.send(messages, options, false).await?;

        let wire: WireResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::NetworkError(format!("decode response: {e}")))?;

        let response = wire.into_response();
        if response.choices.is_empty() {
            return Err(GatewayError::EmptyResponse);
        }
        Ok(response)
    }

    #[instrument(skip(self, messages, options), fields(channel = %self.config.channel, model = %self.config.model, messages = messages.len()))]
    async fn chat_completion_stream(
        &self,
        messages: &[ChatMessage],
        options: &ChatOptions,
    ) -> Result<GatewayStream, GatewayError> {
        let resp = self.send(messages, options, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel::<StreamChunk>(64);
        let mut bytes = resp.bytes_stream();

        tokio::spawn(async move {
            let mut buf = SseBuffer::new();
            let mut done = false;

            loop {
                let next = tokio::time::timeout(SSE_IDLE_TIMEOUT, bytes.next()).await;
                let item = match next {
                    Ok(item) => item,
                    Err(_) => {
                        let _ = tx
                            .send(StreamChunk::Error(GatewayError::StreamInterrupted(
                                format!("idle timeout after {}s", SSE_IDLE_TIMEOUT.as_secs()),
                            )))
                            .await;
                        return;
                    }
                };

                match item {
                    Some(Ok(chunk)) => {
                        for payload in buf.push(&chunk) {
                            if forward_payload(&tx, &payload, &mut done).await.is_err() {
                                return; // receiver dropped, caller cancelled
                            }
                        }
                        if done {
                            return;
                        }
                    }
                    Some(Err(e)) => {
                        let _ = tx
                            .send(StreamChunk::Error(GatewayError::StreamInterrupted(
                                e.to_string(),
                            )))
                            .await;
                        return;
                    }
                    None => {
                        for payload in buf.finish() {
                            if forward_payload(&tx, &payload, &mut done).await.is_err() {
                                return;
                            }
                        }
                        if !done {
                            warn!("stream ended without done sentinel");
                            let _ = tx.send(StreamChunk::Done).await;
                        }
                        return;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn forward_payload(
    tx: &tokio::sync::mpsc::Sender<StreamChunk>,
    payload: &str,
    done: &mut bool,
) -> Result<(), ()> {
    if payload == DONE_SENTINEL {
        *done = true;
        return tx.send(StreamChunk::Done).await.map_err(|_| ());
    }

    match serde_json::from_str::<WireStreamChunk>(payload) {
        Ok(chunk) => {
            if let Some(content) = chunk
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.delta.content)
            {
                if !content.is_empty() {
                    return tx.send(StreamChunk::Content(content)).await.map_err(|_| ());
                }
            }
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "unparseable stream payload skipped");
            Ok(())
        }
    }
}

fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

// --- Wire dialect ---

#[derive(Serialize)]
struct WireRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    stream: bool,
}

#[derive(Serialize, Deserialize)]
struct WireMessage {
    role: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<WireToolCall>>,
}

impl From<&ChatMessage> for WireMessage {
    fn from(msg: &ChatMessage) -> Self {
        Self {
            role: msg.role.to_string(),
            content: Some(msg.content.clone()),
            tool_call_id: msg.tool_call_id.clone(),
            tool_calls: msg.tool_calls.as_ref().map(|calls| {
                calls
                    .iter()
                    .map(|tc| WireToolCall {
                        id: tc.id.clone(),
                        kind: "function".into(),
                        function: WireFunctionCall {
                            name: tc.name.clone(),
                            arguments: tc.arguments.to_string(),
                        },
                    })
                    .collect()
            }),
        }
    }
}

#[derive(Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionDecl,
}

#[derive(Serialize)]
struct WireFunctionDecl {
    name: String,
    description: String,
    parameters: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    /// JSON-encoded argument object, per the OpenAI dialect.
    arguments: String,
}

#[derive(Deserialize)]
struct WireResponse {
    id: String,
    model: String,
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: WireUsage,
}

#[derive(Deserialize)]
struct WireChoice {
    index: u32,
    message: WireMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[derive(Deserialize)]
struct WireStreamChunk {
    #[serde(default)]
    choices: Vec<WireStreamChoice>,
}

#[derive(Deserialize)]
struct WireStreamChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

impl WireResponse {
    fn into_response(self) -> ChatResponse {
        ChatResponse {
            id: self.id,
            model: self.model,
            choices: self
                .choices
                .into_iter()
                .map(|c| Choice {
                    index: c.index,
                    message: ChatMessage {
                        role: c.message.role.parse().unwrap_or(Role::Assistant),
                        content: c.message.content.unwrap_or_default(),
                        tool_call_id: c.message.tool_call_id,
                        tool_calls: c.message.tool_calls.map(|calls| {
                            calls
                                .into_iter()
                                .map(|tc| ToolCallRequest {
                                    id: tc.id,
                                    name: tc.function.name,
                                    arguments: serde_json::from_str(&tc.function.arguments)
                                        .unwrap_or_else(|_| serde_json::json!({})),
                                })
                                .collect()
                        }),
                    },
                    finish_reason: c.finish_reason,
                })
                .collect(),
            usage: TokenStats {
                prompt_tokens: self.usage.prompt_tokens,
                completion_tokens: self.usage.completion_tokens,
                total_tokens: self.usage.total_tokens,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_core::chat::ToolDecl;

    fn config() -> HttpGatewayConfig {
        HttpGatewayConfig {
            base_url: "https://api.example.com/v1/".into(),
            api_key: SecretString::from("test-key"),
            model: "test-model".into(),
            timeout: Duration::from_secs(30),
            channel: "main".into(),
        }
    }

    #[test]
    fn endpoint_strips_trailing_slash() {
        let gw = HttpGateway::new(config());
        assert_eq!(gw.endpoint(), "https://api.example.com/v1/chat/completions");
    }

    #[test]
    fn gateway_properties() {
        let gw = HttpGateway::new(config());
        assert_eq!(gw.name(), "main");
        assert_eq!(gw.model(), "test-model");
    }

    #[test]
    fn body_serializes_roles_and_tools() {
        let gw = HttpGateway::new(config());
        let messages = vec![
            ChatMessage::system("be terse"),
            ChatMessage::user("hello"),
            ChatMessage::tool_result("call_1", "{\"result\": 3}"),
        ];
        let options = ChatOptions {
            tools: vec![ToolDecl {
                name: "adder".into(),
                description: "adds numbers".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            ..Default::default()
        };

        let body = gw.build_body(&messages, &options, false);
        let json = serde_json::to_value(&body).unwrap();

        assert_eq!(json["model"], "test-model");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][2]["role"], "tool");
        assert_eq!(json["messages"][2]["tool_call_id"], "call_1");
        assert_eq!(json["tools"][0]["type"], "function");
        assert_eq!(json["tools"][0]["function"]["name"], "adder");
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn body_omits_empty_tools() {
        let gw = HttpGateway::new(config());
        let body = gw.build_body(&[ChatMessage::user("hi")], &ChatOptions::default(), true);
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("tools").is_none());
        assert_eq!(json["stream"], true);
    }

    #[test]
    fn assistant_tool_calls_serialize_arguments_as_string() {
        let mut msg = ChatMessage::assistant("");
        msg.tool_calls = Some(vec![ToolCallRequest {
            id: "call_7".into(),
            name: "lookup".into(),
            arguments: serde_json::json!({"q": "rust"}),
        }]);
        let wire = WireMessage::from(&msg);
        let json = serde_json::to_value(&wire).unwrap();
        assert_eq!(json["tool_calls"][0]["function"]["name"], "lookup");
        let args: serde_json::Value =
            serde_json::from_str(json["tool_calls"][0]["function"]["arguments"].as_str().unwrap())
                .unwrap();
        assert_eq!(args["q"], "rust");
    }

    #[test]
    fn response_decodes_tool_calls() {
        let raw = serde_json::json!({
            "id": "cmpl-1",
            "model": "test-model",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": {"name": "adder", "arguments": "{\"a\": 1, \"b\": 2}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 4, "total_tokens": 16}
        });

        let wire: WireResponse = serde_json::from_value(raw).unwrap();
        let resp = wire.into_response();
        assert_eq!(resp.usage.total_tokens, 16);
        let calls = resp.first_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].arguments["b"], 2);
    }

    #[test]
    fn response_tolerates_malformed_arguments() {
        let raw = serde_json::json!({
            "id": "cmpl-2",
            "model": "m",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "tool_calls": [{
                        "id": "call_2",
                        "type": "function",
                        "function": {"name": "adder", "arguments": "not json"}
                    }]
                }
            }]
        });
        let wire: WireResponse = serde_json::from_value(raw).unwrap();
        let resp = wire.into_response();
        assert_eq!(resp.first_tool_calls()[0].arguments, serde_json::json!({}));
    }

    #[test]
    fn stream_chunk_decodes_delta() {
        let chunk: WireStreamChunk =
            serde_json::from_str(r#"{"choices":[{"delta":{"content":"hel"}}]}"#).unwrap();
        assert_eq!(chunk.choices[0].delta.content.as_deref(), Some("hel"));

        let empty: WireStreamChunk = serde_json::from_str(r#"{"choices":[{"delta":{}}]}"#).unwrap();
        assert!(empty.choices[0].delta.content.is_none());
    }
}
