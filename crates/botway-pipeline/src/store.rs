use std::path::Path;
use std::sync::Mutex;

use botway_agents::Message;
use botway_common::{Error, Result};
use rusqlite::{params, Connection};
use tracing::info;

/// Persistent record of completed conversation turns. Writes are
/// best-effort from the pipeline's point of view: a failed insert is
/// logged and never fails the query.
pub struct ConversationStore {
    conn: Mutex<Connection>,
}

impl ConversationStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening conversation store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS conversations (
                    uuid TEXT PRIMARY KEY,
                    session_key TEXT NOT NULL,
                    pipeline_uuid TEXT NOT NULL,
                    bot_uuid TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE TABLE IF NOT EXISTS conversation_messages (
                    id TEXT PRIMARY KEY,
                    conversation_uuid TEXT NOT NULL REFERENCES conversations(uuid),
                    role TEXT NOT NULL,
                    payload TEXT NOT NULL,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_conv_messages_conv
                    ON conversation_messages(conversation_uuid, created_at);",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn upsert_conversation(
        &self,
        uuid: &str,
        session_key: &str,
        pipeline_uuid: &str,
        bot_uuid: &str,
    ) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO conversations (uuid, session_key, pipeline_uuid, bot_uuid)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(uuid) DO NOTHING",
                params![uuid, session_key, pipeline_uuid, bot_uuid],
            )
            .map_err(|e| Error::Database(format!("failed to upsert conversation: {e}")))?;
        Ok(())
    }

    /// Append a completed turn's messages in order.
    pub fn append_messages(&self, conversation_uuid: &str, messages: &[Message]) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        for message in messages {
            let payload = serde_json::to_string(message)?;
            let role = serde_json::to_value(message.role)?
                .as_str()
                .unwrap_or("unknown")
                .to_string();
            conn.execute(
                "INSERT INTO conversation_messages (id, conversation_uuid, role, payload)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    conversation_uuid,
                    role,
                    payload
                ],
            )
            .map_err(|e| Error::Database(format!("failed to append message: {e}")))?;
        }
        Ok(())
    }

    /// Load a conversation's messages in insertion order.
    pub fn load_messages(&self, conversation_uuid: &str) -> Result<Vec<Message>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT payload FROM conversation_messages
                 WHERE conversation_uuid = ?1 ORDER BY rowid",
            )
            .map_err(|e| Error::Database(format!("failed to prepare message query: {e}")))?;

        let rows = stmt
            .query_map(params![conversation_uuid], |row| {
                row.get::<_, String>(0)
            })
            .map_err(|e| Error::Database(format!("failed to load messages: {e}")))?;

        let mut messages = Vec::new();
        for row in rows {
            let payload =
                row.map_err(|e| Error::Database(format!("failed to read message row: {e}")))?;
            messages.push(serde_json::from_str(&payload)?);
        }
        Ok(messages)
    }

    /// Delete all but the most recent `keep` messages of a conversation.
    pub fn prune_old_messages(&self, conversation_uuid: &str, keep: usize) -> Result<usize> {
        let deleted = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM conversation_messages WHERE conversation_uuid = ?1 AND rowid NOT IN (
                    SELECT rowid FROM conversation_messages WHERE conversation_uuid = ?1
                    ORDER BY rowid DESC LIMIT ?2
                )",
                params![conversation_uuid, keep as i64],
            )
            .map_err(|e| Error::Database(format!("failed to prune old messages: {e}")))?;
        Ok(deleted)
    }
}
