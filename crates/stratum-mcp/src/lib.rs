//! # stratum-mcp
//!
//! Client side of the Model Context Protocol over streamable HTTP:
//! initialize handshake, tool-catalog discovery, tool invocation, and the
//! translation of MCP JSON-Schema tool inputs into the provider's
//! function-declaration form.
//!
//! The turn engine depends only on the [`ToolTransport`] trait, so tests
//! substitute a scripted transport for the wire client.

pub mod client;
pub mod error;
pub mod schema;
pub mod transport;
pub mod types;

pub use client::{McpClient, McpClientConfig};
pub use error::McpError;
pub use transport::{ScriptedToolTransport, ToolTransport};
pub use types::{CallOutcome, ToolDescriptor};
