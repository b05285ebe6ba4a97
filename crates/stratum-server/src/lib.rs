//! # stratum-server
//!
//! The HTTP surface and per-request orchestration. [`service::ChatService`]
//! coordinates one user turn end to end: validate, persist the user
//! message, obtain the assembled context (compressing when due), drive the
//! turn engine, persist the assistant reply. Sessions are serialized by a
//! keyed lock so concurrent turns on the same session cannot interleave
//! compressions; different sessions proceed in parallel.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod server;
pub mod service;

pub use error::ApiError;
pub use server::{build_router, start, AppState, ServerConfig, ServerHandle};
pub use service::{ChatService, ChatServiceConfig};
