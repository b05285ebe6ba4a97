//! # stratum-engine
//!
//! Drives one assistant reply as an iterated model↔tool exchange. The
//! model either answers with text (the turn is done) or requests tool
//! calls, which are executed through the MCP transport and fed back as
//! `tool`-role messages visible to subsequent model calls within the turn.
//! A hard iteration cap bounds the loop; a failing tool call is data for
//! the model, never a turn failure.

pub mod error;
pub mod turn;

pub use error::{EngineError, TurnFailure};
pub use turn::{TurnEngine, TurnOutcome, ITERATION_CAP_MESSAGE};
