pub mod loader;
pub mod model;
pub mod watcher;

pub use loader::ConfigLoader;
pub use model::{
    AccessControlConfig, AccessControlMode, AiConfig, AppConfig, CommandConfig, ConcurrencyConfig,
    DatabaseConfig, ForceDelayConfig, KnowledgeBaseConfig, LocalAgentConfig, LongTextConfig,
    LongTextStrategy, McpServerConfig, ModelConfig, OutputConfig, OutputMiscConfig, PipelineConfig,
    PromptMessage, RateLimitConfig, RateLimitStrategy, RunnerConfig, ServiceApiConfig,
    TriggerConfig, TriggerMiscConfig, WebChatConfig,
};
pub use watcher::ConfigWatcher;
