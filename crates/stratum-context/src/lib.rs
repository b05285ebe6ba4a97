//! # stratum-context
//!
//! The context-management subsystem: decides when conversation history must
//! be compressed, produces summaries through the shrink LLM channel, and
//! assembles the bounded prompt window sent to the main model.
//!
//! Two compression levels exist. Level 1 folds a contiguous run of old
//! regular messages into a summary; level 2 folds a contiguous run of old
//! level-1 summaries into one bulk summary. Triggering is ratio-based
//! against the window size, level 2 is checked first, and at most one
//! compression happens per turn.

pub mod error;
pub mod manager;
pub mod prompts;
pub mod summarizer;
pub mod types;

pub use error::{ContextError, SummarizeError};
pub use manager::ContextManager;
pub use summarizer::{Summarizer, SummarizerConfig, SummaryItems};
pub use types::{CompressionInfo, ContextConfig, ContextInfo, ContextRequest, ContextResponse};
