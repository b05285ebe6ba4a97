//! The atomic compression transaction.
//!
//! Creating coverage requires three writes that must be indivisible: the
//! new summary row, the `compressed`/`covered_by` marks on everything it
//! subsumes, and the mirrored summary-kind message for the transcript.
//! A reader never observes a summary without its marks or marks without a
//! visible covering summary.

use chrono::Utc;
use tracing::instrument;

use stratum_core::ids::{MessageId, SummaryId};
use stratum_core::messages::MessageRecord;
use stratum_core::summary::SummaryRecord;

use crate::database::Database;
use crate::error::StoreError;
use crate::messages::mark_messages_compressed_tx;
use crate::summaries::{insert_summary_tx, mark_summaries_compressed_tx};

/// What a new summary covers: regular messages (level 1) or older level-1
/// summaries (level 2).
#[derive(Clone, Debug)]
pub enum CoveredItems {
    Messages(Vec<MessageId>),
    Summaries(Vec<SummaryId>),
}

impl CoveredItems {
    pub fn len(&self) -> usize {
        match self {
            Self::Messages(ids) => ids.len(),
            Self::Summaries(ids) => ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Persist a summary, mark its inputs compressed, and append the mirror
/// message, all in one transaction.
#[instrument(skip_all, fields(session_id = %summary.session_id, summary_id = %summary.id, level = %summary.level, covered = covered.len()))]
pub fn apply_compression(
    db: &Database,
    summary: &SummaryRecord,
    covered: &CoveredItems,
    mirror: &MessageRecord,
) -> Result<(), StoreError> {
    if covered.is_empty() {
        return Err(StoreError::Conflict(
            "refusing to apply a compression that covers nothing".into(),
        ));
    }

    let mirror_metadata = serde_json::to_string(&mirror.metadata)?;
    db.with_tx(|tx| {
        insert_summary_tx(tx, summary)?;

        match covered {
            CoveredItems::Messages(ids) => mark_messages_compressed_tx(tx, ids, &summary.id)?,
            CoveredItems::Summaries(ids) => mark_summaries_compressed_tx(tx, ids, &summary.id)?,
        }

        tx.execute(
            "INSERT INTO messages (id, session_id, role, content, kind, is_compressed, covered_by,
                                   tool_name, tool_call_id, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, 0, NULL, NULL, NULL, ?6, ?7)",
            rusqlite::params![
                mirror.id.as_str(),
                mirror.session_id.as_str(),
                mirror.role.to_string(),
                mirror.content,
                mirror.kind.to_string(),
                mirror.created_at,
                mirror_metadata,
            ],
        )?;

        tx.execute(
            "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![Utc::now().to_rfc3339(), summary.session_id.as_str()],
        )?;

        Ok(())
    })
}
