use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::McpError;
use crate::types::{CallOutcome, ToolDescriptor};

/// The two MCP operations the turn engine needs. The wire client implements
/// this; tests use [`ScriptedToolTransport`].
#[async_trait]
pub trait ToolTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError>;

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallOutcome, McpError>;
}

/// Scripted transport for tests: a fixed catalog and a queue of outcomes,
/// with every invocation recorded.
pub struct ScriptedToolTransport {
    tools: Vec<ToolDescriptor>,
    outcomes: Mutex<std::collections::VecDeque<Result<CallOutcome, McpError>>>,
    calls: Mutex<Vec<(String, serde_json::Value)>>,
}

impl ScriptedToolTransport {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self {
            tools,
            outcomes: Mutex::new(std::collections::VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue the outcome for the next `call_tool`.
    pub fn push_outcome(&self, outcome: Result<CallOutcome, McpError>) {
        self.outcomes.lock().push_back(outcome);
    }

    /// Queue a plain text result.
    pub fn push_text(&self, text: &str) {
        self.push_outcome(Ok(CallOutcome {
            is_error: false,
            structured: None,
            text_parts: vec![text.to_owned()],
        }));
    }

    /// Invocations seen so far, in order.
    pub fn calls(&self) -> Vec<(String, serde_json::Value)> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl ToolTransport for ScriptedToolTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, McpError> {
        Ok(self.tools.clone())
    }

    async fn call_tool(
        &self,
        name: &str,
        arguments: serde_json::Value,
    ) -> Result<CallOutcome, McpError> {
        self.calls.lock().push((name.to_owned(), arguments));
        self.outcomes
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(McpError::Protocol("no scripted outcome left".into())))
    }
}
