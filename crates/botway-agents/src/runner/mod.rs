pub mod local_agent;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use botway_common::{Error, Result};
use botway_knowledge::KnowledgeBase;
use tokio::sync::mpsc;

use crate::message::{Message, ResponseMessage};
use crate::tools::ToolSpec;

pub use local_agent::LocalAgentRunner;
pub use webhook::{ServiceEndpoint, WebhookFlavor, WebhookRunner};

/// Everything a runner needs for one turn, assembled by the pipeline from
/// the prepared query.
#[derive(Clone)]
pub struct RunnerInput {
    /// Fixed leading messages (the conversation prompt).
    pub prompt: Vec<Message>,
    /// Conversation history up to this turn.
    pub history: Vec<Message>,
    pub user_message: Message,
    pub tools: Vec<ToolSpec>,
    /// Runtime model uuid bound by the pipeline config.
    pub model_uuid: Option<String>,
    /// Correlates remote session state for stateful external runners.
    pub conversation_uuid: String,
    /// Plain text of the inbound chain; used for retrieval augmentation.
    pub query_text: String,
    /// Whether the originating adapter can take streamed replies.
    pub streaming: bool,
    pub remove_think: bool,
    pub knowledge_base: Option<Arc<KnowledgeBase>>,
    pub extra_args: serde_json::Value,
}

/// Terminal pipeline worker: turns a prepared query into one or more
/// response messages, sent through `tx` in production order. A dropped
/// receiver means the query was cancelled; runners stop silently.
#[async_trait]
pub trait Runner: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, input: RunnerInput, tx: mpsc::Sender<ResponseMessage>) -> Result<()>;
}

/// Runners keyed by the `ai.runner.runner` config value.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn Runner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, runner: Arc<dyn Runner>) {
        self.runners.insert(runner.name().to_string(), runner);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Runner>> {
        self.runners
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Agent(format!("unknown runner: {name}")))
    }
}
