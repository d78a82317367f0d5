use std::path::Path;
use std::sync::Mutex;

use botway_common::{Error, Result};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::info;

/// Ingestion lifecycle of a stored file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "processing" => FileStatus::Processing,
            "completed" => FileStatus::Completed,
            "failed" => FileStatus::Failed,
            _ => FileStatus::Pending,
        }
    }
}

/// A file row in a knowledge base.
#[derive(Debug, Clone)]
pub struct KbFile {
    pub uuid: String,
    pub kb_id: String,
    pub name: String,
    pub extension: String,
    pub status: FileStatus,
}

/// One retrieval hit, sorted ascending by distance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk_id: i64,
    pub text: String,
    pub distance: f32,
    pub file_id: String,
}

/// SQLite-backed vector store: file rows, chunk rows and their embeddings.
/// Nearest-neighbour search scans the collection and scores in process.
pub struct VectorStore {
    conn: Mutex<Connection>,
}

impl VectorStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening vector store at {}", db_path.display());
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
                "CREATE TABLE IF NOT EXISTS kb_files (
                    uuid TEXT PRIMARY KEY,
                    kb_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    extension TEXT NOT NULL,
                    status TEXT NOT NULL DEFAULT 'pending',
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                );

                CREATE INDEX IF NOT EXISTS idx_kb_files_kb ON kb_files(kb_id);

                CREATE TABLE IF NOT EXISTS kb_chunks (
                    id TEXT PRIMARY KEY,
                    kb_id TEXT NOT NULL,
                    file_id TEXT NOT NULL REFERENCES kb_files(uuid),
                    chunk_id INTEGER NOT NULL,
                    document TEXT NOT NULL,
                    embedding BLOB NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_kb_chunks_kb ON kb_chunks(kb_id);
                CREATE INDEX IF NOT EXISTS idx_kb_chunks_file ON kb_chunks(file_id);",
            )
            .map_err(|e| Error::Database(format!("migration failed: {e}")))?;
        Ok(())
    }

    pub fn insert_file(&self, file: &KbFile) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO kb_files (uuid, kb_id, name, extension, status)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    file.uuid,
                    file.kb_id,
                    file.name,
                    file.extension,
                    file.status.as_str()
                ],
            )
            .map_err(|e| Error::Database(format!("failed to insert file: {e}")))?;
        Ok(())
    }

    pub fn set_file_status(&self, file_uuid: &str, status: FileStatus) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE kb_files SET status = ?1 WHERE uuid = ?2",
                params![status.as_str(), file_uuid],
            )
            .map_err(|e| Error::Database(format!("failed to update file status: {e}")))?;
        Ok(())
    }

    pub fn get_file(&self, file_uuid: &str) -> Result<Option<KbFile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT uuid, kb_id, name, extension, status FROM kb_files WHERE uuid = ?1")
            .map_err(|e| Error::Database(format!("failed to prepare file query: {e}")))?;

        let file = stmt
            .query_row(params![file_uuid], |row| {
                let status: String = row.get(4)?;
                Ok(KbFile {
                    uuid: row.get(0)?,
                    kb_id: row.get(1)?,
                    name: row.get(2)?,
                    extension: row.get(3)?,
                    status: FileStatus::parse(&status),
                })
            })
            .map(Some)
            .unwrap_or(None);
        Ok(file)
    }

    pub fn list_files(&self, kb_id: &str) -> Result<Vec<KbFile>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT uuid, kb_id, name, extension, status FROM kb_files
                 WHERE kb_id = ?1 ORDER BY created_at",
            )
            .map_err(|e| Error::Database(format!("failed to prepare file list query: {e}")))?;

        let rows = stmt
            .query_map(params![kb_id], |row| {
                let status: String = row.get(4)?;
                Ok(KbFile {
                    uuid: row.get(0)?,
                    kb_id: row.get(1)?,
                    name: row.get(2)?,
                    extension: row.get(3)?,
                    status: FileStatus::parse(&status),
                })
            })
            .map_err(|e| Error::Database(format!("failed to list files: {e}")))?;

        let mut files = Vec::new();
        for row in rows {
            files.push(row.map_err(|e| Error::Database(format!("failed to read file row: {e}")))?);
        }
        Ok(files)
    }

    /// Insert one chunk with its embedding. The row id is
    /// `"{file_uuid}_{chunk_id}"`.
    pub fn insert_chunk(
        &self,
        kb_id: &str,
        file_id: &str,
        chunk_id: i64,
        document: &str,
        embedding: &[f32],
    ) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO kb_chunks (id, kb_id, file_id, chunk_id, document, embedding)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    format!("{file_id}_{chunk_id}"),
                    kb_id,
                    file_id,
                    chunk_id,
                    document,
                    encode_embedding(embedding)
                ],
            )
            .map_err(|e| Error::Database(format!("failed to insert chunk: {e}")))?;
        Ok(())
    }

    /// Top-k nearest chunks of a collection by cosine distance, ascending.
    pub fn search(
        &self,
        kb_id: &str,
        query_embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<RetrievedChunk>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT chunk_id, document, embedding, file_id FROM kb_chunks WHERE kb_id = ?1")
            .map_err(|e| Error::Database(format!("failed to prepare search query: {e}")))?;

        let rows = stmt
            .query_map(params![kb_id], |row| {
                let blob: Vec<u8> = row.get(2)?;
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    blob,
                    row.get::<_, String>(3)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to search chunks: {e}")))?;

        let mut hits = Vec::new();
        for row in rows {
            let (chunk_id, document, blob, file_id) =
                row.map_err(|e| Error::Database(format!("failed to read chunk row: {e}")))?;
            let embedding = decode_embedding(&blob);
            let distance = cosine_distance(query_embedding, &embedding);
            hits.push(RetrievedChunk {
                chunk_id,
                text: document,
                distance,
                file_id,
            });
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// Delete a file's vectors, chunk rows, then the file row.
    pub fn delete_file(&self, file_uuid: &str) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM kb_chunks WHERE file_id = ?1", params![file_uuid])
            .map_err(|e| Error::Database(format!("failed to delete chunks: {e}")))?;
        conn.execute("DELETE FROM kb_files WHERE uuid = ?1", params![file_uuid])
            .map_err(|e| Error::Database(format!("failed to delete file: {e}")))?;
        Ok(())
    }
}

fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

fn decode_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::MAX;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return f32::MAX;
    }
    1.0 - dot / (norm_a.sqrt() * norm_b.sqrt())
}
