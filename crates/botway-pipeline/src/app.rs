use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use botway_agents::requester::ModelRegistry;
use botway_agents::runner::RunnerRegistry;
use botway_agents::ToolManager;
use botway_channels::{EventType, PlatformAdapter};
use botway_common::{Error, Result};
use botway_config::PipelineConfig;
use botway_knowledge::KnowledgeBaseRegistry;
use botway_plugins::PluginHost;
use tracing::{debug, info, warn};

use crate::pool::{PoolSlot, QueryPool};
use crate::scope::{LifecycleScope, TaskScopes};
use crate::session::SessionManager;
use crate::stage::{RuntimePipeline, StageEngine};
use crate::store::ConversationStore;

/// Shared managers handed to stage constructors. One instance per
/// application; stages clone the Arcs they need.
#[derive(Clone)]
pub struct StageDeps {
    pub session_mgr: Arc<SessionManager>,
    pub models: Arc<ModelRegistry>,
    pub tools: Arc<ToolManager>,
    pub plugin_host: Arc<dyn PluginHost>,
    pub runners: Arc<RunnerRegistry>,
    pub knowledge: Arc<KnowledgeBaseRegistry>,
    pub store: Option<Arc<ConversationStore>>,
}

#[cfg(test)]
impl StageDeps {
    /// Bare-bones deps for stage unit tests.
    pub(crate) fn for_tests(plugin_host: Arc<dyn PluginHost>) -> Self {
        Self {
            session_mgr: Arc::new(SessionManager::new(1)),
            models: Arc::new(ModelRegistry::new()),
            tools: Arc::new(ToolManager::new()),
            plugin_host,
            runners: Arc::new(RunnerRegistry::new()),
            knowledge: Arc::new(KnowledgeBaseRegistry::new()),
            store: None,
        }
    }
}

/// Process-top aggregate: owns the managers, the query pool and the
/// loaded pipelines, and wires adapters into the pool. Passed explicitly
/// to everything that needs it; there are no process-wide singletons.
pub struct Application {
    pub deps: StageDeps,
    pub pool: Arc<QueryPool>,
    pub scopes: TaskScopes,
    pipelines: RwLock<HashMap<String, Arc<RuntimePipeline>>>,
}

impl Application {
    pub fn new(deps: StageDeps, pipeline_concurrency: usize) -> Self {
        Self {
            deps,
            pool: Arc::new(QueryPool::new(pipeline_concurrency)),
            scopes: TaskScopes::new(),
            pipelines: RwLock::new(HashMap::new()),
        }
    }

    /// Load one pipeline: build and initialize its stage chain.
    pub async fn load_pipeline(&self, config: PipelineConfig) -> Result<()> {
        let pipeline = RuntimePipeline::assemble(config, &self.deps).await?;
        self.pipelines
            .write()
            .unwrap()
            .insert(pipeline.uuid.clone(), Arc::new(pipeline));
        Ok(())
    }

    pub fn pipeline(&self, uuid: &str) -> Option<Arc<RuntimePipeline>> {
        self.pipelines.read().unwrap().get(uuid).cloned()
    }

    /// Subscribe an adapter's inbound events into the query pool. Over
    /// -admission is logged and dropped; the sender gets no reply.
    pub fn bind_adapter(
        self: &Arc<Self>,
        adapter: Arc<dyn PlatformAdapter>,
        bot_uuid: &str,
        pipeline_uuid: &str,
    ) {
        for event_type in [EventType::FriendMessage, EventType::GroupMessage] {
            let pool = Arc::clone(&self.pool);
            let adapter_for_query = Arc::clone(&adapter);
            let bot_uuid = bot_uuid.to_string();
            let pipeline_uuid = pipeline_uuid.to_string();
            adapter.register_listener(
                event_type,
                Arc::new(move |event| {
                    match pool.admit(
                        event,
                        Arc::clone(&adapter_for_query),
                        &bot_uuid,
                        &pipeline_uuid,
                    ) {
                        Ok(query_id) => debug!("query {query_id} admitted"),
                        Err(Error::PoolFull) => {
                            warn!("query pool full, dropping inbound message")
                        }
                        Err(e) => warn!("failed to admit inbound message: {e}"),
                    }
                }),
            );
        }
        info!(
            "adapter '{}' bound to pipeline '{pipeline_uuid}'",
            adapter.platform()
        );
    }

    /// The dispatcher loop: drain the pool and run each query as its own
    /// task under the application scope, serialized per session by the
    /// session semaphore.
    pub async fn run_dispatcher(self: Arc<Self>) {
        let cancel = self.scopes.token(LifecycleScope::Application);
        info!("query dispatcher started");
        loop {
            let query = tokio::select! {
                _ = cancel.cancelled() => break,
                query = self.pool.next() => query,
            };

            let slot = PoolSlot::new(Arc::clone(&self.pool));
            let Some(pipeline) = self.pipeline(&query.pipeline_uuid) else {
                warn!(
                    "query {} names unknown pipeline '{}', dropping",
                    query.query_id, query.pipeline_uuid
                );
                drop(slot);
                continue;
            };

            let session = self
                .deps
                .session_mgr
                .get_session(query.launcher_type, &query.launcher_id);

            self.scopes.spawn(LifecycleScope::Application, async move {
                let _slot = slot;
                // Fails open: over-concurrent queries of one session queue
                // here rather than being rejected.
                let permit = session.semaphore.clone().acquire_owned().await;
                if permit.is_err() {
                    return;
                }
                StageEngine::run(&pipeline, query).await;
            });
        }
        info!("query dispatcher stopped");
    }

    /// Cancel everything bound to the application lifecycle.
    pub fn shutdown(&self) {
        self.scopes.cancel(LifecycleScope::Application);
    }
}
