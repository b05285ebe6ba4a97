use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use stratum_core::ids::SessionId;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: SessionId,
    pub created_at: String,
    pub updated_at: String,
    /// Cached count of regular messages (maintained on append).
    pub message_count: u32,
}

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a session. Idempotent: an existing session with the same id
    /// is left untouched and the call succeeds.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn create(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT OR IGNORE INTO chat_sessions (id, created_at, updated_at, message_count)
                 VALUES (?1, ?2, ?2, 0)",
                rusqlite::params![id.as_str(), now],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(session_id = %id))]
    pub fn get(&self, id: &SessionId) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, created_at, updated_at, message_count
                 FROM chat_sessions WHERE id = ?1",
            )?;
            let mut rows = stmt.query([id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    pub fn exists(&self, id: &SessionId) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM chat_sessions WHERE id = ?1",
                [id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Delete a session. Messages and summaries cascade. Succeeds whether
    /// or not the session existed.
    #[instrument(skip(self), fields(session_id = %id))]
    pub fn delete(&self, id: &SessionId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute("DELETE FROM chat_sessions WHERE id = ?1", [id.as_str()])?;
            Ok(())
        })
    }
}

pub(crate) fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    Ok(SessionRow {
        id: SessionId::from_raw(row_helpers::get::<String>(row, 0, "chat_sessions", "id")?),
        created_at: row_helpers::get(row, 1, "chat_sessions", "created_at")?,
        updated_at: row_helpers::get(row, 2, "chat_sessions", "updated_at")?,
        message_count: row_helpers::get::<i64>(row, 3, "chat_sessions", "message_count")? as u32,
    })
}
