/// SQL DDL for the agora-store database.
/// WAL mode + foreign keys enabled at connection time.
pub const SCHEMA_VERSION: u32 = 1;

pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS room_sessions (
    id TEXT PRIMARY KEY,
    room_id TEXT NOT NULL,
    topic TEXT NOT NULL,
    pipeline TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL,
    closed_at TEXT
);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    room_session_id TEXT NOT NULL REFERENCES room_sessions(id),
    author TEXT NOT NULL,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    parent_id TEXT,
    used_ids TEXT NOT NULL DEFAULT '[]',
    created_at TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_room_sessions_one_active
    ON room_sessions(room_id) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(room_session_id);

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
