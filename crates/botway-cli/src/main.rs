use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use botway_agents::requester::ModelRegistry;
use botway_agents::runner::{
    LocalAgentRunner, RunnerRegistry, ServiceEndpoint, WebhookFlavor, WebhookRunner,
};
use botway_agents::tools::{BuiltinToolLoader, PluginToolLoader};
use botway_agents::ToolManager;
use botway_channels::{AdapterRegistry, PlatformAdapter, WebChatAdapter};
use botway_config::{AppConfig, ConfigLoader, ConfigWatcher};
use botway_knowledge::KnowledgeBaseRegistry;
use botway_pipeline::{Application, ConversationStore, SessionManager, StageDeps};
use botway_plugins::StaticPluginHost;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "botway", version, about = "Multi-platform chatbot middleware")]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, default_value = "botway.toml", env = "BOTWAY_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = ConfigLoader::new(&cli.config)
        .load()
        .with_context(|| format!("failed to load {}", cli.config.display()))?;

    run(cli.config, config).await
}

async fn run(config_path: PathBuf, config: AppConfig) -> anyhow::Result<()> {
    // Model registry. Requester implementations are provided by
    // integration crates; models naming an unknown requester are skipped.
    let models = Arc::new(ModelRegistry::new());
    for model in &config.models {
        warn!(
            "model '{}' uses requester '{}' which is not built into this binary; skipping",
            model.name, model.requester
        );
    }

    let plugin_host: Arc<dyn botway_plugins::PluginHost> = Arc::new(StaticPluginHost::new());

    let mut tools = ToolManager::new();
    tools.add_loader(Arc::new(BuiltinToolLoader));
    tools.add_loader(Arc::new(PluginToolLoader::new(Arc::clone(&plugin_host))));

    #[cfg(feature = "mcp")]
    let mcp_manager = {
        let manager = Arc::new(botway_agents::mcp::McpManager::new());
        for server in &config.mcp_servers {
            if let Err(e) = manager
                .connect(&server.name, &server.command, &server.args, server.timeout_secs)
                .await
            {
                warn!("MCP server '{}' unavailable: {e}", server.name);
            }
        }
        tools.add_loader(Arc::new(botway_agents::mcp::McpToolLoader::new(
            Arc::clone(&manager),
        )));
        manager
    };

    let tools = Arc::new(tools);

    // Knowledge bases need an embedder, which arrives with a requester
    // integration; definitions without one are reported and skipped.
    let knowledge = Arc::new(KnowledgeBaseRegistry::new());
    for kb in &config.knowledge_bases {
        warn!(
            "knowledge base '{}' needs embedding model '{}' which is not available; skipping",
            kb.name, kb.embedding_model
        );
    }

    let mut runners = RunnerRegistry::new();
    runners.register(Arc::new(LocalAgentRunner::new(
        Arc::clone(&models),
        Arc::clone(&tools),
    )));
    // Webhook runners take their endpoints from the first pipeline that
    // configures the matching `ai.service` entry.
    for flavor in [
        WebhookFlavor::Dify,
        WebhookFlavor::DashscopeApp,
        WebhookFlavor::N8n,
        WebhookFlavor::Langflow,
    ] {
        let endpoint = config.pipelines.iter().find_map(|p| {
            p.ai.service.get(flavor.runner_name()).map(|svc| ServiceEndpoint {
                base_url: svc.base_url.clone(),
                api_key: svc.api_key.clone(),
                app_id: svc.app_id.clone(),
                timeout_secs: svc.timeout_secs,
            })
        });
        if let Some(endpoint) = endpoint {
            runners.register(Arc::new(WebhookRunner::new(flavor, endpoint)));
        }
    }

    let store = match config.database.path.as_str() {
        "" => None,
        path => {
            let path = PathBuf::from(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).ok();
            }
            match ConversationStore::open(&path) {
                Ok(store) => Some(Arc::new(store)),
                Err(e) => {
                    warn!("conversation store unavailable: {e}");
                    None
                }
            }
        }
    };

    let session_concurrency = config
        .pipelines
        .first()
        .map(|p| p.concurrency.session)
        .unwrap_or(1);
    let pipeline_concurrency = config
        .pipelines
        .first()
        .map(|p| p.concurrency.pipeline)
        .unwrap_or(20);

    let deps = StageDeps {
        session_mgr: Arc::new(SessionManager::new(session_concurrency)),
        models,
        tools,
        plugin_host,
        runners: Arc::new(runners),
        knowledge,
        store,
    };

    let app = Arc::new(Application::new(deps, pipeline_concurrency));
    let mut pipelines = config.pipelines.clone();
    if pipelines.is_empty() {
        info!("no pipelines configured, loading the default pipeline");
        pipelines.push(Default::default());
    }
    let default_pipeline_uuid = pipelines[0].uuid.clone();
    let default_bot_uuid = pipelines[0].bot_uuid.clone();
    for pipeline in pipelines {
        app.load_pipeline(pipeline)
            .await
            .map_err(|e| anyhow::anyhow!("pipeline load failed: {e}"))?;
    }

    let mut adapters = AdapterRegistry::new();
    if config.webchat.enable {
        let webchat: Arc<dyn PlatformAdapter> = Arc::new(WebChatAdapter::new(
            &config.webchat.host,
            config.webchat.port,
        ));
        app.bind_adapter(
            Arc::clone(&webchat),
            &default_bot_uuid,
            &default_pipeline_uuid,
        );
        adapters.register(webchat);
    }

    let adapter_handles = adapters.spawn_all();
    let dispatcher = tokio::spawn(Arc::clone(&app).run_dispatcher());

    // Hot-reload pipeline configs when the file changes on disk.
    match ConfigWatcher::new(&config_path, std::time::Duration::from_millis(500)) {
        Ok(mut watcher) => {
            let app = Arc::clone(&app);
            tokio::spawn(async move {
                while watcher.changed().await.is_some() {
                    match ConfigLoader::new(&config_path).load() {
                        Ok(new_config) => {
                            for pipeline in new_config.pipelines {
                                let name = pipeline.name.clone();
                                if let Err(e) = app.load_pipeline(pipeline).await {
                                    warn!("reload of pipeline '{name}' failed: {e}");
                                }
                            }
                            info!("pipeline configuration reloaded");
                        }
                        Err(e) => warn!("config reload failed: {e}"),
                    }
                }
            });
        }
        Err(e) => warn!("config watcher unavailable: {e}"),
    }

    info!("botway running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await.ok();
    info!("shutting down");

    adapters.kill_all().await.ok();
    app.shutdown();
    #[cfg(feature = "mcp")]
    mcp_manager.disconnect_all().await;

    let _ = dispatcher.await;
    for handle in adapter_handles {
        handle.abort();
    }
    Ok(())
}
