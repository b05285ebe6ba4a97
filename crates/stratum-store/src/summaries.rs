use tracing::instrument;

use stratum_core::ids::{MessageId, SessionId, SummaryId};
use stratum_core::summary::{SummaryLevel, SummaryRecord};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const SELECT_COLUMNS: &str = "id, session_id, level, summary_text, anchors, covers_from_msg_id, \
                              covers_to_msg_id, message_count, is_compressed, covered_by, \
                              tokens_used, created_at";

pub struct SummaryRepo {
    db: Database,
}

impl SummaryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, summary), fields(session_id = %summary.session_id, level = %summary.level))]
    pub fn save(&self, summary: &SummaryRecord) -> Result<(), StoreError> {
        self.db.with_tx(|tx| insert_summary_tx(tx, summary))
    }

    /// Most recent summary of any level.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn get_latest(&self, session_id: &SessionId) -> Result<SummaryRecord, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM summaries WHERE session_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ))?;
            let mut rows = stmt.query([session_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_summary(row),
                None => Err(StoreError::NotFound(format!(
                    "summary for session {session_id}"
                ))),
            }
        })
    }

    /// All summaries of a level, ascending by creation time.
    #[instrument(skip(self), fields(session_id = %session_id, level = %level))]
    pub fn get_by_level(
        &self,
        session_id: &SessionId,
        level: SummaryLevel,
    ) -> Result<Vec<SummaryRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM summaries
                 WHERE session_id = ?1 AND level = ?2
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            collect_summaries(&mut stmt, rusqlite::params![session_id.as_str(), level.as_i64()])
        })
    }

    /// Active (uncompressed) summaries of a level, ascending.
    #[instrument(skip(self), fields(session_id = %session_id, level = %level))]
    pub fn get_active(
        &self,
        session_id: &SessionId,
        level: SummaryLevel,
    ) -> Result<Vec<SummaryRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM summaries
                 WHERE session_id = ?1 AND level = ?2 AND is_compressed = 0
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            collect_summaries(&mut stmt, rusqlite::params![session_id.as_str(), level.as_i64()])
        })
    }

    /// Mark level-1 summaries compressed under a covering bulk summary.
    #[instrument(skip(self, ids), fields(count = ids.len(), bulk_id = %covering))]
    pub fn mark_compressed(
        &self,
        ids: &[SummaryId],
        covering: &SummaryId,
    ) -> Result<(), StoreError> {
        self.db
            .with_tx(|tx| mark_summaries_compressed_tx(tx, ids, covering))
    }

    /// Remove every summary of a session, and reactivate the messages they
    /// covered so the transcript flows back into the prompt window.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn delete_for_session(&self, session_id: &SessionId) -> Result<u32, StoreError> {
        self.db.with_tx(|tx| {
            tx.execute(
                "UPDATE messages SET is_compressed = 0, covered_by = NULL
                 WHERE session_id = ?1 AND is_compressed = 1",
                [session_id.as_str()],
            )?;
            let deleted = tx.execute(
                "DELETE FROM summaries WHERE session_id = ?1",
                [session_id.as_str()],
            )?;
            Ok(deleted as u32)
        })
    }
}

pub(crate) fn insert_summary_tx(
    tx: &rusqlite::Transaction<'_>,
    summary: &SummaryRecord,
) -> Result<(), StoreError> {
    let anchors = serde_json::to_string(&summary.anchors)?;
    tx.execute(
        "INSERT INTO summaries (id, session_id, level, summary_text, anchors, covers_from_msg_id,
                                covers_to_msg_id, message_count, is_compressed, covered_by,
                                tokens_used, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        rusqlite::params![
            summary.id.as_str(),
            summary.session_id.as_str(),
            summary.level.as_i64(),
            summary.text,
            anchors,
            summary.covers_from_msg_id.as_str(),
            summary.covers_to_msg_id.as_str(),
            summary.message_count,
            summary.compressed,
            summary.covered_by.as_ref().map(|s| s.as_str()),
            summary.tokens_used,
            summary.created_at,
        ],
    )?;
    Ok(())
}

/// Transaction body shared with [`crate::compression::apply_compression`].
pub(crate) fn mark_summaries_compressed_tx(
    tx: &rusqlite::Transaction<'_>,
    ids: &[SummaryId],
    covering: &SummaryId,
) -> Result<(), StoreError> {
    if ids.is_empty() {
        return Ok(());
    }

    let placeholders = row_helpers::placeholders_from(2, ids.len());
    let sql = format!(
        "UPDATE summaries SET is_compressed = 1, covered_by = ?1 WHERE id IN {placeholders}"
    );
    let owned: Vec<String> = std::iter::once(covering.as_str().to_owned())
        .chain(ids.iter().map(|id| id.as_str().to_owned()))
        .collect();
    let params: Vec<&dyn rusqlite::types::ToSql> = owned
        .iter()
        .map(|p| p as &dyn rusqlite::types::ToSql)
        .collect();
    let changed = tx.execute(&sql, params.as_slice())?;

    if changed != ids.len() {
        return Err(StoreError::Conflict(format!(
            "expected to mark {} summaries, marked {changed}",
            ids.len()
        )));
    }
    Ok(())
}

fn collect_summaries(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<SummaryRecord>, StoreError> {
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_summary(row)?);
    }
    Ok(out)
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> Result<SummaryRecord, StoreError> {
    let level_raw: i64 = row_helpers::get(row, 2, "summaries", "level")?;
    let anchors_str: String = row_helpers::get(row, 4, "summaries", "anchors")?;

    Ok(SummaryRecord {
        id: SummaryId::from_raw(row_helpers::get::<String>(row, 0, "summaries", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "summaries", "session_id")?),
        level: SummaryLevel::from_i64(level_raw).map_err(|detail| StoreError::CorruptRow {
            table: "summaries",
            column: "level",
            detail,
        })?,
        text: row_helpers::get(row, 3, "summaries", "summary_text")?,
        anchors: row_helpers::parse_json(&anchors_str, "summaries", "anchors")?,
        covers_from_msg_id: MessageId::from_raw(row_helpers::get::<String>(
            row, 5, "summaries", "covers_from_msg_id",
        )?),
        covers_to_msg_id: MessageId::from_raw(row_helpers::get::<String>(
            row, 6, "summaries", "covers_to_msg_id",
        )?),
        message_count: row_helpers::get::<i64>(row, 7, "summaries", "message_count")? as u32,
        compressed: row_helpers::get::<bool>(row, 8, "summaries", "is_compressed")?,
        covered_by: row_helpers::get_opt::<String>(row, 9, "summaries", "covered_by")?
            .map(SummaryId::from_raw),
        tokens_used: row_helpers::get::<i64>(row, 10, "summaries", "tokens_used")? as u32,
        created_at: row_helpers::get(row, 11, "summaries", "created_at")?,
    })
}
