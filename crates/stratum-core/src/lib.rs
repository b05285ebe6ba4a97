//! # stratum-core
//!
//! Shared domain types: branded identifiers, stored message and summary
//! records, the chat-completion wire contract, and the gateway error
//! taxonomy. Every other crate in the workspace builds on these.

pub mod chat;
pub mod errors;
pub mod ids;
pub mod messages;
pub mod summary;
