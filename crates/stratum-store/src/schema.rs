/// SQL DDL for the stratum database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS chat_sessions (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS summaries (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
    level INTEGER NOT NULL,
    summary_text TEXT NOT NULL,
    anchors TEXT NOT NULL DEFAULT '[]',
    covers_from_msg_id TEXT NOT NULL,
    covers_to_msg_id TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0,
    is_compressed INTEGER NOT NULL DEFAULT 0,
    covered_by TEXT REFERENCES summaries(id) ON DELETE SET NULL,
    tokens_used INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES chat_sessions(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'regular',
    is_compressed INTEGER NOT NULL DEFAULT 0,
    covered_by TEXT REFERENCES summaries(id) ON DELETE SET NULL,
    tool_name TEXT,
    tool_call_id TEXT,
    created_at TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}'
);

CREATE INDEX IF NOT EXISTS idx_messages_session_created ON messages(session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_session_active ON messages(session_id, kind, is_compressed);
CREATE INDEX IF NOT EXISTS idx_summaries_session_created ON summaries(session_id, created_at);
CREATE INDEX IF NOT EXISTS idx_summaries_session_compressed ON summaries(session_id, is_compressed);
CREATE INDEX IF NOT EXISTS idx_summaries_session_level ON summaries(session_id, level);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
"#;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;
