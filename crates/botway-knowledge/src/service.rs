use std::collections::HashMap;
use std::sync::Arc;

use botway_common::{Error, Result};
use tracing::{info, warn};

use crate::chunker::TextChunker;
use crate::embedder::Embedder;
use crate::parser::ParserRegistry;
use crate::store::{FileStatus, KbFile, RetrievedChunk, VectorStore};

/// One knowledge base: a named collection of ingested files with an
/// embedding model and retrieval settings bound at construction.
pub struct KnowledgeBase {
    pub uuid: String,
    pub name: String,
    pub description: String,
    top_k: usize,
    chunker: TextChunker,
    store: Arc<VectorStore>,
    embedder: Arc<dyn Embedder>,
    parsers: Arc<ParserRegistry>,
}

impl KnowledgeBase {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        uuid: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        top_k: usize,
        chunk_size: usize,
        chunk_overlap: usize,
        store: Arc<VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        Ok(Self {
            uuid: uuid.into(),
            name: name.into(),
            description: description.into(),
            top_k,
            chunker: TextChunker::new(chunk_size, chunk_overlap)?,
            store,
            embedder,
            parsers: Arc::new(ParserRegistry::builtin()),
        })
    }

    /// Register a file and schedule its ingestion in the background.
    /// Returns the file uuid immediately; progress is visible through the
    /// file's status column.
    pub fn store_file(self: &Arc<Self>, name: &str, bytes: Vec<u8>) -> Result<String> {
        let extension = name
            .rsplit('.')
            .next()
            .filter(|ext| *ext != name)
            .unwrap_or("txt")
            .to_ascii_lowercase();
        let file_uuid = uuid::Uuid::new_v4().to_string();

        self.store.insert_file(&KbFile {
            uuid: file_uuid.clone(),
            kb_id: self.uuid.clone(),
            name: name.to_string(),
            extension: extension.clone(),
            status: FileStatus::Pending,
        })?;

        let kb = Arc::clone(self);
        let task_file_uuid = file_uuid.clone();
        tokio::spawn(async move {
            if let Err(e) = kb.ingest(&task_file_uuid, &extension, &bytes).await {
                warn!("ingestion of file {task_file_uuid} failed: {e}");
                let _ = kb.store.set_file_status(&task_file_uuid, FileStatus::Failed);
            }
        });

        Ok(file_uuid)
    }

    /// Parse, chunk, embed and persist one file. Runs on a background task.
    async fn ingest(&self, file_uuid: &str, extension: &str, bytes: &[u8]) -> Result<()> {
        self.store
            .set_file_status(file_uuid, FileStatus::Processing)?;

        let text = self.parsers.parse(extension, bytes)?;
        let chunks = self.chunker.split(&text);
        if chunks.is_empty() {
            info!("file {file_uuid} produced no chunks");
            self.store
                .set_file_status(file_uuid, FileStatus::Completed)?;
            return Ok(());
        }

        let embeddings = self.embedder.embed(&chunks).await?;
        if embeddings.len() != chunks.len() {
            return Err(Error::KnowledgeBase(format!(
                "embedder returned {} vectors for {} chunks",
                embeddings.len(),
                chunks.len()
            )));
        }

        for (i, (chunk, embedding)) in chunks.iter().zip(&embeddings).enumerate() {
            self.store
                .insert_chunk(&self.uuid, file_uuid, i as i64, chunk, embedding)?;
        }

        self.store
            .set_file_status(file_uuid, FileStatus::Completed)?;
        info!(
            "file {file_uuid} ingested into kb '{}' ({} chunks)",
            self.name,
            chunks.len()
        );
        Ok(())
    }

    /// Embed the query once and return the top-k nearest chunks, ascending
    /// by distance. Read-only; safe to run while ingestion is in flight.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<RetrievedChunk>> {
        let embedding = self.embedder.embed_one(query).await?;
        self.store.search(&self.uuid, &embedding, self.top_k)
    }

    pub fn delete_file(&self, file_uuid: &str) -> Result<()> {
        self.store.delete_file(file_uuid)
    }

    pub fn list_files(&self) -> Result<Vec<KbFile>> {
        self.store.list_files(&self.uuid)
    }
}

/// Lookup of knowledge bases by uuid.
#[derive(Default)]
pub struct KnowledgeBaseRegistry {
    bases: HashMap<String, Arc<KnowledgeBase>>,
}

impl KnowledgeBaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kb: Arc<KnowledgeBase>) {
        info!("registered knowledge base '{}' ({})", kb.name, kb.uuid);
        self.bases.insert(kb.uuid.clone(), kb);
    }

    pub fn get(&self, uuid: &str) -> Result<Arc<KnowledgeBase>> {
        self.bases
            .get(uuid)
            .cloned()
            .ok_or_else(|| Error::KnowledgeBase(format!("knowledge base not found: {uuid}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Deterministic embedder: vector is [len, vowels] so tests can reason
    /// about distances.
    struct FakeEmbedder;

    #[async_trait]
    impl Embedder for FakeEmbedder {
        fn model_uuid(&self) -> &str {
            "fake"
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let vowels = t.chars().filter(|c| "aeiou".contains(*c)).count() as f32;
                    vec![t.len() as f32, vowels + 1.0]
                })
                .collect())
        }
    }

    fn kb() -> Arc<KnowledgeBase> {
        Arc::new(
            KnowledgeBase::new(
                "kb1",
                "docs",
                "",
                2,
                100,
                10,
                Arc::new(VectorStore::in_memory().unwrap()),
                Arc::new(FakeEmbedder),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn store_and_retrieve_round_trip() {
        let kb = kb();
        let file_uuid = kb.store_file("notes.txt", b"alpha beta".to_vec()).unwrap();

        // Wait for the background ingestion task.
        for _ in 0..50 {
            let file = kb.list_files().unwrap().remove(0);
            if file.status == FileStatus::Completed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let hits = kb.retrieve("alpha beta").await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].file_id, file_uuid);
        assert!(hits[0].text.contains("alpha"));
    }

    #[tokio::test]
    async fn unsupported_extension_marks_file_failed() {
        let kb = kb();
        let file_uuid = kb.store_file("binary.exe", vec![0x4d, 0x5a]).unwrap();

        let mut status = FileStatus::Pending;
        for _ in 0..50 {
            status = kb
                .list_files()
                .unwrap()
                .into_iter()
                .find(|f| f.uuid == file_uuid)
                .unwrap()
                .status;
            if status == FileStatus::Failed {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(status, FileStatus::Failed);
    }

    #[tokio::test]
    async fn registry_lookup_errors_on_unknown_uuid() {
        let mut registry = KnowledgeBaseRegistry::new();
        registry.register(kb());
        assert!(registry.get("kb1").is_ok());
        assert!(matches!(
            registry.get("missing"),
            Err(Error::KnowledgeBase(_))
        ));
    }
}
