//! Schema management. Safe to run on every startup: every migration is a
//! "create if absent / add column if missing" step applied in order.

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;
use tracing::debug;

use crate::error::{MemoryError, Result};

/// Shared handle to the single SQLite connection.
///
/// Cheap to clone; all stores in the workspace go through one `Db`, so
/// writes serialize on the inner mutex. The file itself is opened in WAL
/// mode.
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl Db {
    /// Open (or create) the database at `path` and apply pending migrations.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        // journal_mode returns the resulting mode as a row.
        let _mode: String =
            conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        init_schema(&conn)?;
        verify_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    /// Run `f` against the raw connection. Used by sibling crates that own
    /// their own tables on the same file (quota history).
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&conn).map_err(MemoryError::from)
    }
}

fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id         INTEGER NOT NULL,
            thread_id       INTEGER,
            user_id         INTEGER,
            role            TEXT NOT NULL,
            text            TEXT,
            media_json      TEXT,
            embedding       BLOB,
            metadata_json   TEXT,
            external_message_id          INTEGER,
            reply_to_external_message_id INTEGER,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_messages_chat
            ON messages(chat_id, created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(chat_id, thread_id, created_at DESC);

        CREATE VIRTUAL TABLE IF NOT EXISTS messages_fts
            USING fts5(text, content='messages', content_rowid='id');

        CREATE TABLE IF NOT EXISTS facts (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            entity_type       TEXT NOT NULL,
            entity_id         INTEGER NOT NULL,
            chat_context      INTEGER,
            category          TEXT NOT NULL,
            key               TEXT NOT NULL,
            value             TEXT NOT NULL,
            confidence        REAL NOT NULL,
            evidence_count    INTEGER NOT NULL DEFAULT 1,
            evidence_text     TEXT,
            source_message_id INTEGER,
            first_observed    TEXT NOT NULL,
            last_reinforced   TEXT NOT NULL,
            is_active         INTEGER NOT NULL DEFAULT 1,
            decay_rate        REAL NOT NULL DEFAULT 0,
            embedding         BLOB,
            UNIQUE(entity_type, entity_id, chat_context, category, key)
        );
        CREATE INDEX IF NOT EXISTS idx_facts_entity
            ON facts(entity_type, entity_id, is_active);

        CREATE TABLE IF NOT EXISTS fact_versions (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            fact_id        INTEGER NOT NULL,
            previous_value TEXT NOT NULL,
            new_value      TEXT NOT NULL,
            change_type    TEXT NOT NULL,
            changed_at     TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS episodes (
            id                   INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id              INTEGER NOT NULL,
            thread_id            INTEGER,
            topic                TEXT NOT NULL,
            summary              TEXT NOT NULL,
            summary_embedding    BLOB,
            importance           REAL NOT NULL,
            emotional_valence    TEXT NOT NULL DEFAULT 'neutral',
            message_ids_json     TEXT NOT NULL,
            participant_ids_json TEXT NOT NULL,
            tags_json            TEXT NOT NULL DEFAULT '[]',
            created_at           TEXT NOT NULL,
            last_accessed        TEXT NOT NULL,
            access_count         INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_episodes_chat
            ON episodes(chat_id, importance DESC);

        CREATE TABLE IF NOT EXISTS chat_summaries (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id      INTEGER NOT NULL,
            kind         TEXT NOT NULL,
            period_start TEXT NOT NULL,
            period_end   TEXT NOT NULL,
            text         TEXT NOT NULL,
            token_count  INTEGER NOT NULL DEFAULT 0,
            generated_at TEXT NOT NULL,
            UNIQUE(chat_id, kind, period_start)
        );

        CREATE TABLE IF NOT EXISTS system_prompts (
            id           INTEGER PRIMARY KEY AUTOINCREMENT,
            admin_id     INTEGER NOT NULL,
            chat_id      INTEGER,
            scope        TEXT NOT NULL,
            prompt_text  TEXT NOT NULL,
            is_active    INTEGER NOT NULL DEFAULT 0,
            version      INTEGER NOT NULL DEFAULT 1,
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            activated_at TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_prompts_scope
            ON system_prompts(scope, chat_id, is_active);

        CREATE TABLE IF NOT EXISTS bans (
            chat_id        INTEGER NOT NULL,
            user_id        INTEGER NOT NULL,
            banned_at      TEXT NOT NULL,
            last_notice_at TEXT,
            PRIMARY KEY (chat_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS media_cache (
            media_id   TEXT PRIMARY KEY,
            chat_id    INTEGER NOT NULL,
            user_id    INTEGER,
            file_path  TEXT NOT NULL,
            media_type TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL
        );",
    )?;

    // Additive migrations for columns that appeared after the first release.
    ensure_column(conn, "facts", "embedding", "BLOB")?;
    ensure_column(conn, "episodes", "tags_json", "TEXT NOT NULL DEFAULT '[]'")?;

    debug!("memory schema ready");
    Ok(())
}

/// Add a column if the table does not have it yet.
fn ensure_column(conn: &Connection, table: &str, column: &str, decl: &str) -> Result<()> {
    if !has_column(conn, table, column)? {
        conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {decl};"))?;
    }
    Ok(())
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Type-check required columns. A pre-existing file with the wrong shape is
/// fatal at startup rather than a runtime surprise.
fn verify_schema(conn: &Connection) -> Result<()> {
    for (table, column, expected) in [
        ("messages", "chat_id", "INTEGER"),
        ("messages", "created_at", "TEXT"),
        ("facts", "confidence", "REAL"),
        ("facts", "evidence_count", "INTEGER"),
        ("episodes", "importance", "REAL"),
    ] {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
        let mut rows = stmt.query([])?;
        let mut found = false;
        while let Some(row) = rows.next()? {
            let name: String = row.get(1)?;
            if name == column {
                let decl: String = row.get(2)?;
                if !decl.to_uppercase().starts_with(expected) {
                    return Err(MemoryError::SchemaIncompatible(format!(
                        "{table}.{column} is {decl}, expected {expected}"
                    )));
                }
                found = true;
                break;
            }
        }
        if !found {
            return Err(MemoryError::SchemaIncompatible(format!(
                "{table}.{column} is missing"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        verify_schema(&conn).unwrap();
    }

    #[test]
    fn verify_rejects_wrong_type() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE messages (id INTEGER PRIMARY KEY, chat_id TEXT, created_at TEXT)")
            .unwrap();
        assert!(matches!(
            verify_schema(&conn),
            Err(MemoryError::SchemaIncompatible(_))
        ));
    }

    #[test]
    fn ensure_column_adds_once() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        ensure_column(&conn, "t", "extra", "TEXT").unwrap();
        ensure_column(&conn, "t", "extra", "TEXT").unwrap();
        assert!(has_column(&conn, "t", "extra").unwrap());
    }
}
