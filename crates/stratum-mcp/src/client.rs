use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, instrument};

use crate::error::McpError;
use crate::transport::ToolTransport;
use crate::types::{CallOutcome, JsonRpcRequest, JsonRpcResponse, ToolDescriptor};

const PROTOCOL_VERSION: &str = "2024-11-05";
const SESSION_HEADER: &str = "Mcp-Session-Id";

#[derive(Clone, Debug)]
pub struct McpClientConfig {
    /// Streamable-HTTP endpoint, e.g. `http://localhost:8000/mcp`.
    pub server_url: String,
    /// Extra headers attached to every request.
    pub headers: Vec<(String, String)>,
    pub request_timeout: Duration,
}

impl Default for McpClientConfig {
    fn default() -> Self {
        Self {
            server_url: "http://localhost:8000/mcp".into(),
            headers: Vec::new(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// MCP client over streamable HTTP.
///
/// One persistent logical session per client: `connect` runs the
/// `initialize` handshake (capturing the server-assigned session id) and
/// sends `notifications/initialized`. Afterwards `list_tools`/`call_tool`
/// may be invoked concurrently; each call is an independent POST.
pub struct McpClient {
    client: reqwest::Client,
    config: McpClientConfig,
    next_id: AtomicU64,
    session_id: RwLock<Option<String>>,
}

impl McpClient {
    /// Connect and run the protocol handshake.
    #[instrument(skip(config), fields(server = %config.server_url))]
    pub async fn connect(config: McpClientConfig) -> Result<Self, McpError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| McpError::Transport(format!("build HTTP client: {e}")))?;

        let this = Self {
            client,
            config,
            next_id: AtomicU64::new(1),
            session_id: RwLock::new(None),
        };

        let init_params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": "stratum",
                "version": env!("CARGO_PKG_VERSION"),
            }
        });
        let result = this.rpc("initialize", Some(init_params)).await?;
        debug!(server_info = %result.get("serverInfo").cloned().unwrap_or_default(), "MCP handshake accepted");

        this.notify("notifications/initialized").await?;
        info!("MCP session established");
        Ok(this)
    }

    fn build_post(&self, body: String) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(&self.config.server_url)
            .timeout(self.config.request_timeout)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .body(body);

        if let Some(session) = self.session_id.read().as_deref() {
            req = req.header(SESSION_HEADER, session);
        }
        for (name, value) in &self.config.headers {
            req = req.header(name, value);
        }
        req
    }

    /// Send a request and wait for the matching response. Streamable HTTP
    /// servers answer either with a plain JSON body or with a short SSE
    /// stream carrying the response; both are handled here.
    async fn rpc(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let request = JsonRpcRequest::new(id, method, params);
        let body = serde_json::to_string(&request)
            .map_err(|e| McpError::Transport(format!("serialize request: {e}")))?;

        let resp = self
            .build_post(body)
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            return Err(McpError::Transport(format!(
                "{method}: HTTP {}",
                resp.status().as_u16()
            )));
        }

        if let Some(session) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *self.session_id.write() = Some(session.to_owned());
        }

        let is_sse = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.starts_with("text/event-stream"))
            .unwrap_or(false);

        let text = resp
            .text()
            .await
            .map_err(|e| McpError::Transport(format!("{method}: read body: {e}")))?;

        let response = if is_sse {
            extract_sse_response(&text, id)?
        } else {
            serde_json::from_str::<JsonRpcResponse>(&text)
                .map_err(|e| McpError::Protocol(format!("{method}: parse response: {e}")))?
        };

        if let Some(err) = response.error {
            return Err(McpError::Server {
                code: err.code,
                message: err.message,
            });
        }
        response.result.ok_or_else(|| {
            McpError::Protocol(format!("{method}: response missing both result and error"))
        })
    }

    /// Fire-and-forget JSON-RPC notification (no id, no response body).
    async fn notify(&self, method: &str) -> Result<(), McpError> {
        let body = serde_json::json!({"jsonrpc": "2.0", "method": method}).to_string();
        let resp = self
            .build_post(body)
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("{method}: {e}")))?;

        if !resp.status().is_success() {
            return Err(McpError::Transport(format!(
                "{method}: HTTP {}",
                resp.status().as_u16()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ToolTransport for McpClient {
    #[instrument(skip(self))]
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = match &cursor {
                Some(c) => serde_json::json!({ "cursor": c }),
                None => serde_json::json!({}),
            };
            let result = self.rpc("tools/list", Some(params)).await?;
            let (page, next) = parse_tools_page(&result)?;
            tools.extend(page);
            match next {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        info!(count = tools.len(), "tool catalog discovered");
        Ok(tools)
    }

    #[instrument(skip(self, arguments), fields(tool = %name))]
    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallOutcome, McpError> {
        let args = if arguments.is_object() {
            arguments
        } else {
            serde_json::json!({})
        };
        let result = self
            .rpc(
                "tools/call",
                Some(serde_json::json!({"name": name, "arguments": args})),
            )
            .await?;
        Ok(parse_call_result(&result))
    }
}

/// Pull the matching JSON-RPC response out of an SSE body.
fn extract_sse_response(body: &str, id: u64) -> Result<JsonRpcResponse, McpError> {
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data:") else {
            continue;
        };
        let data = data.trim();
        if data.is_empty() {
            continue;
        }
        if let Ok(resp) = serde_json::from_str::<JsonRpcResponse>(data) {
            if resp.id == Some(id) {
                return Ok(resp);
            }
        }
    }
    Err(McpError::Protocol(format!(
        "no response for request {id} in event stream"
    )))
}

fn parse_tools_page(
    result: &serde_json::Value,
) -> Result<(Vec<ToolDescriptor>, Option<String>), McpError> {
    let tools = result
        .get("tools")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| McpError::Protocol("tools/list result missing tools array".into()))?
        .iter()
        .map(|t| {
            serde_json::from_value::<ToolDescriptor>(t.clone())
                .map_err(|e| McpError::Protocol(format!("bad tool descriptor: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let next = result
        .get("nextCursor")
        .and_then(serde_json::Value::as_str)
        .filter(|c| !c.is_empty())
        .map(String::from);

    Ok((tools, next))
}

fn parse_call_result(result: &serde_json::Value) -> CallOutcome {
    let is_error = result
        .get("isError")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);

    let structured = result.get("structuredContent").cloned();

    let text_parts = result
        .get("content")
        .and_then(serde_json::Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|p| p.get("type").and_then(serde_json::Value::as_str) == Some("text"))
                .filter_map(|p| p.get("text").and_then(serde_json::Value::as_str))
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    CallOutcome {
        is_error,
        structured,
        text_parts,
    }
}
