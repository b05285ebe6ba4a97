//! # stratum-llm
//!
//! The LLM gateway: a uniform chat-completion contract over an
//! OpenAI-compatible HTTP provider, with a retrying wrapper for transient
//! failures and a scripted mock for tests.
//!
//! Two logical channels share the contract: **main** (user-facing, supports
//! streaming) and **shrink** (cheaper model, used only by the summarizer).
//! Both are plain [`ChatGateway`] instances bundled in [`LlmChannels`].

pub mod gateway;
pub mod http;
pub mod mock;
pub mod retry;
mod sse;

pub use gateway::{ChatGateway, GatewayStream, LlmChannels};
pub use http::{HttpGateway, HttpGatewayConfig};
pub use mock::{MockGateway, MockReply};
pub use retry::{RetryConfig, RetryingGateway};
