use chrono::Utc;
use tracing::instrument;

use stratum_core::ids::{MessageId, SessionId, SummaryId};
use stratum_core::messages::{MessageKind, MessageMeta, MessageRecord};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

const SELECT_COLUMNS: &str = "id, session_id, role, content, kind, is_compressed, covered_by, \
                              tool_name, tool_call_id, created_at, metadata";

pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message. Also refreshes the owning session's `updated_at`
    /// and, for regular messages, its cached message count.
    #[instrument(skip(self, msg), fields(session_id = %msg.session_id, role = %msg.role, kind = %msg.kind))]
    pub fn append(&self, msg: &MessageRecord) -> Result<(), StoreError> {
        let metadata = serde_json::to_string(&msg.metadata)?;
        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO messages (id, session_id, role, content, kind, is_compressed, covered_by,
                                       tool_name, tool_call_id, created_at, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                rusqlite::params![
                    msg.id.as_str(),
                    msg.session_id.as_str(),
                    msg.role.to_string(),
                    msg.content,
                    msg.kind.to_string(),
                    msg.compressed,
                    msg.covered_by.as_ref().map(|s| s.as_str()),
                    msg.tool_name,
                    msg.tool_call_id,
                    msg.created_at,
                    metadata,
                ],
            )?;

            let now = Utc::now().to_rfc3339();
            if msg.kind == MessageKind::Regular {
                tx.execute(
                    "UPDATE chat_sessions SET updated_at = ?1, message_count = message_count + 1
                     WHERE id = ?2",
                    rusqlite::params![now, msg.session_id.as_str()],
                )?;
            } else {
                tx.execute(
                    "UPDATE chat_sessions SET updated_at = ?1 WHERE id = ?2",
                    rusqlite::params![now, msg.session_id.as_str()],
                )?;
            }
            Ok(())
        })
    }

    /// The last `limit` messages of any kind, in temporal ascending order.
    /// `limit = 0` returns everything.
    #[instrument(skip(self), fields(session_id = %session_id, limit))]
    pub fn get_messages(
        &self,
        session_id: &SessionId,
        limit: u32,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut messages = if limit == 0 {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM messages WHERE session_id = ?1
                     ORDER BY created_at DESC, rowid DESC"
                ))?;
                collect_messages(&mut stmt, rusqlite::params![session_id.as_str()])?
            } else {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM messages WHERE session_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ))?;
                collect_messages(&mut stmt, rusqlite::params![session_id.as_str(), limit])?
            };
            messages.reverse();
            Ok(messages)
        })
    }

    /// All active regular messages, ascending. This is the prompt-assembly
    /// view: compressed history and summary mirrors are excluded.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn get_active_messages(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND kind = 'regular' AND is_compressed = 0
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            collect_messages(&mut stmt, rusqlite::params![session_id.as_str()])
        })
    }

    /// All regular messages regardless of compression, ascending. This is
    /// the UI transcript view.
    #[instrument(skip(self), fields(session_id = %session_id))]
    pub fn get_messages_for_ui(
        &self,
        session_id: &SessionId,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS} FROM messages
                 WHERE session_id = ?1 AND kind = 'regular'
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            collect_messages(&mut stmt, rusqlite::params![session_id.as_str()])
        })
    }

    /// Count of regular messages.
    pub fn message_count(&self, session_id: &SessionId) -> Result<u32, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE session_id = ?1 AND kind = 'regular'",
                [session_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u32)
        })
    }

    /// Mark messages compressed under a covering summary, atomically.
    #[instrument(skip(self, ids), fields(count = ids.len(), summary_id = %covering))]
    pub fn mark_compressed(
        &self,
        ids: &[MessageId],
        covering: &SummaryId,
    ) -> Result<(), StoreError> {
        self.db
            .with_tx(|tx| mark_messages_compressed_tx(tx, ids, covering))
    }
}

/// Transaction body shared with [`crate::compression::apply_compression`].
pub(crate) fn mark_messages_compressed_tx(
    tx: &rusqlite::Transaction<'_>,
    ids: &[MessageId],
    covering: &SummaryId,
) -> Result<(), StoreError> {
    if ids.is_empty() {
        return Ok(());
    }

    let placeholders = row_helpers::placeholders_from(2, ids.len());
    let sql = format!(
        "UPDATE messages SET is_compressed = 1, covered_by = ?1 WHERE id IN {placeholders}"
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
            "expected to mark {} messages, marked {changed}",
            ids.len()
        )));
    }
    Ok(())
}

fn collect_messages(
    stmt: &mut rusqlite::Statement<'_>,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<MessageRecord>, StoreError> {
    let mut rows = stmt.query(params)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(row_to_message(row)?);
    }
    Ok(out)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRecord, StoreError> {
    let role_str: String = row_helpers::get(row, 2, "messages", "role")?;
    let kind_str: String = row_helpers::get(row, 4, "messages", "kind")?;
    let metadata_str: String = row_helpers::get(row, 10, "messages", "metadata")?;

    Ok(MessageRecord {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        session_id: SessionId::from_raw(row_helpers::get::<String>(row, 1, "messages", "session_id")?),
        role: row_helpers::parse_enum(&role_str, "messages", "role")?,
        content: row_helpers::get(row, 3, "messages", "content")?,
        kind: row_helpers::parse_enum(&kind_str, "messages", "kind")?,
        compressed: row_helpers::get::<bool>(row, 5, "messages", "is_compressed")?,
        covered_by: row_helpers::get_opt::<String>(row, 6, "messages", "covered_by")?
            .map(SummaryId::from_raw),
        tool_name: row_helpers::get_opt(row, 7, "messages", "tool_name")?,
        tool_call_id: row_helpers::get_opt(row, 8, "messages", "tool_call_id")?,
        created_at: row_helpers::get(row, 9, "messages", "created_at")?,
        metadata: row_helpers::parse_json::<MessageMeta>(&metadata_str, "messages", "metadata")?,
    })
}
