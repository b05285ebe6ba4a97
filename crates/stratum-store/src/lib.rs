//! # stratum-store
//!
//! SQLite persistence for chat sessions, messages, and summaries, plus the
//! atomic compression transaction that establishes coverage. All writes
//! that mark items `compressed` go through [`compression::apply_compression`]
//! so a summary is never visible without its coverage marks, and vice
//! versa.

pub mod compression;
pub mod database;
pub mod error;
pub mod messages;
mod row_helpers;
pub mod schema;
pub mod sessions;
pub mod summaries;

pub use compression::{apply_compression, CoveredItems};
pub use database::Database;
pub use error::StoreError;
pub use messages::MessageRepo;
pub use sessions::{SessionRepo, SessionRow};
pub use summaries::SummaryRepo;
