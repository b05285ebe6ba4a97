use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Serialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl JsonRpcRequest {
    pub fn new(id: u64, method: &str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.to_owned(),
            params,
        }
    }
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcResponse {
    #[allow(dead_code)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
pub struct JsonRpcError {
    pub code: i64,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

/// A tool advertised by the MCP server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Option<serde_json::Value>,
}

/// Raw result of a `tools/call`: either structured content or text parts,
/// plus the server's error flag.
#[derive(Clone, Debug, Default)]
pub struct CallOutcome {
    pub is_error: bool,
    pub structured: Option<serde_json::Value>,
    pub text_parts: Vec<String>,
}

impl CallOutcome {
    /// Normalize into the JSON value that is fed back to the model.
    ///
    /// A server-side tool error becomes `{"error": …}` data rather than a
    /// client error: the model may recover from it.
    pub fn normalize(&self) -> serde_json::Value {
        if self.is_error {
            let msg = self
                .text_parts
                .iter()
                .map(|t| t.trim())
                .find(|t| !t.is_empty())
                .unwrap_or("tool error");
            return serde_json::json!({ "error": msg });
        }

        if let Some(structured) = &self.structured {
            return match structured {
                serde_json::Value::Object(_) => structured.clone(),
                other => serde_json::json!({ "result": other.to_string() }),
            };
        }

        let text = self.text_parts.join("\n");
        let text = text.trim();
        if text.is_empty() {
            serde_json::json!({ "result": null })
        } else {
            serde_json::json!({ "result": text })
        }
    }
}
