#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("server error {code}: {message}")]
    Server { code: i64, message: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("not connected")]
    NotConnected,
}

impl McpError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Server { .. } => "server",
            Self::Protocol(_) => "protocol",
            Self::NotConnected => "not_connected",
        }
    }
}
