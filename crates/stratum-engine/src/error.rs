use stratum_core::errors::GatewayError;
use stratum_core::messages::MessageRecord;
use stratum_mcp::McpError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("tool discovery failed: {0}")]
    ToolDiscovery(#[from] McpError),

    #[error("turn cancelled")]
    Cancelled,
}

impl EngineError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Gateway(_) => "gateway",
            Self::ToolDiscovery(_) => "tool_discovery",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A failed turn, carrying the tool transcript recorded before the
/// failure. Tool messages are a faithful record of what actually ran, so
/// the caller persists them even when no assistant message is produced.
#[derive(Debug)]
pub struct TurnFailure {
    pub error: EngineError,
    pub tool_messages: Vec<MessageRecord>,
}

impl TurnFailure {
    pub fn bare(error: EngineError) -> Self {
        Self {
            error,
            tool_messages: Vec::new(),
        }
    }
}

impl std::fmt::Display for TurnFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}
