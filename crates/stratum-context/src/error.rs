use stratum_core::errors::GatewayError;
use stratum_store::StoreError;

/// Failures while producing a summary. None of these leave partial state:
/// the caller persists nothing when summarization fails.
#[derive(Debug, thiserror::Error)]
pub enum SummarizeError {
    #[error("not enough items for summary: {got} < {min}")]
    TooFewItems { got: usize, min: usize },

    #[error("items do not match summary level {level}")]
    LevelMismatch { level: i64 },

    #[error("shrink LLM call failed: {0}")]
    Gateway(#[from] GatewayError),

    #[error("no usable anchors in shrink response")]
    EmptyAnchors,

    #[error("empty summary text in shrink response")]
    EmptyText,
}

#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A state that the trigger policy should have made impossible.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl ContextError {
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Store(_) => "store",
            Self::InvariantViolation(_) => "invariant_violation",
        }
    }
}
