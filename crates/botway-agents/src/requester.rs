use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use botway_common::{Error, Result};
use futures::Stream;
use tracing::info;

use crate::message::{Message, MessageChunk};
use crate::tools::ToolSpec;

pub type MessageChunkStream = Pin<Box<dyn Stream<Item = Result<MessageChunk>> + Send>>;

/// One prepared LLM invocation.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Provider-side model name (not the runtime uuid).
    pub model_name: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSpec>,
    pub extra_args: serde_json::Value,
}

/// Seam between the runner and a concrete LLM API. Implementations raise
/// `Error::Requester` for recoverable provider issues and must honour task
/// cancellation in their HTTP client.
#[async_trait]
pub trait LlmRequester: Send + Sync {
    /// Requester identifier (e.g. "openai-chat-completions").
    fn requester_id(&self) -> &str;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn invoke_llm(&self, request: &LlmRequest) -> Result<Message>;

    /// Stream a response as cumulative chunks. Optional; the runner falls
    /// back to `invoke_llm` when unsupported.
    async fn invoke_llm_stream(&self, request: &LlmRequest) -> Result<MessageChunkStream> {
        let _ = request;
        Err(Error::Agent(format!(
            "requester '{}' does not support streaming",
            self.requester_id()
        )))
    }

    fn supports_streaming(&self) -> bool {
        false
    }
}

/// A runtime model: uuid, provider-side name, declared abilities and the
/// requester that speaks its API.
pub struct LlmModel {
    pub uuid: String,
    pub name: String,
    pub abilities: Vec<String>,
    pub requester: Arc<dyn LlmRequester>,
}

impl LlmModel {
    pub fn supports_func_call(&self) -> bool {
        self.abilities.iter().any(|a| a == "func_call")
    }

    pub fn supports_vision(&self) -> bool {
        self.abilities.iter().any(|a| a == "vision")
    }
}

/// Registry of runtime models keyed by uuid.
#[derive(Default)]
pub struct ModelRegistry {
    models: RwLock<HashMap<String, Arc<LlmModel>>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, model: Arc<LlmModel>) {
        info!("registered model '{}' ({})", model.name, model.uuid);
        self.models
            .write()
            .unwrap()
            .insert(model.uuid.clone(), model);
    }

    pub fn get(&self, uuid: &str) -> Option<Arc<LlmModel>> {
        self.models.read().unwrap().get(uuid).cloned()
    }

    /// Like `get` but with the spec'd error for a stale binding.
    pub fn resolve(&self, uuid: &str) -> Result<Arc<LlmModel>> {
        self.get(uuid)
            .ok_or_else(|| Error::ModelNotFound(uuid.to_string()))
    }

    pub fn uuids(&self) -> Vec<String> {
        self.models.read().unwrap().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullRequester;

    #[async_trait]
    impl LlmRequester for NullRequester {
        fn requester_id(&self) -> &str {
            "null"
        }

        async fn invoke_llm(&self, _request: &LlmRequest) -> Result<Message> {
            Ok(Message::assistant("ok"))
        }
    }

    fn model(uuid: &str, abilities: &[&str]) -> Arc<LlmModel> {
        Arc::new(LlmModel {
            uuid: uuid.into(),
            name: "m".into(),
            abilities: abilities.iter().map(|s| s.to_string()).collect(),
            requester: Arc::new(NullRequester),
        })
    }

    #[test]
    fn abilities_are_queried_by_name() {
        let m = model("u1", &["func_call"]);
        assert!(m.supports_func_call());
        assert!(!m.supports_vision());
    }

    #[test]
    fn resolve_maps_missing_uuid_to_model_not_found() {
        let registry = ModelRegistry::new();
        registry.register(model("u1", &[]));
        assert!(registry.resolve("u1").is_ok());
        assert!(matches!(
            registry.resolve("u2"),
            Err(Error::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn default_stream_is_unsupported() {
        let req = NullRequester;
        assert!(!req.supports_streaming());
        let request = LlmRequest {
            model_name: "m".into(),
            messages: vec![],
            tools: vec![],
            extra_args: serde_json::Value::Null,
        };
        assert!(req.invoke_llm_stream(&request).await.is_err());
    }
}
