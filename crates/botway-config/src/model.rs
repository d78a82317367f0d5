use serde::{Deserialize, Serialize};

/// Top-level application configuration (botway.toml).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct AppConfig {
    #[serde(default)]
    pub webchat: WebChatConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
    #[serde(default)]
    pub pipelines: Vec<PipelineConfig>,
    #[serde(default)]
    pub knowledge_bases: Vec<KnowledgeBaseConfig>,
    #[serde(default)]
    pub mcp_servers: Vec<McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct WebChatConfig {
    #[serde(default = "default_webchat_host")]
    pub host: String,
    #[serde(default = "default_webchat_port")]
    pub port: u16,
    #[serde(default)]
    pub enable: bool,
}

impl Default for WebChatConfig {
    fn default() -> Self {
        Self {
            host: default_webchat_host(),
            port: default_webchat_port(),
            enable: false,
        }
    }
}

fn default_webchat_host() -> String {
    "127.0.0.1".to_string()
}

fn default_webchat_port() -> u16 {
    2800
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "data/botway.db".to_string()
}

/// One runtime LLM model entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ModelConfig {
    pub uuid: String,
    pub name: String,
    /// Requester implementation to bind ("openai-chat-completions", ...).
    pub requester: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Declared abilities: "func_call", "vision".
    #[serde(default)]
    pub abilities: Vec<String>,
}

/// One MCP server the tool manager may connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct McpServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_mcp_timeout")]
    pub timeout_secs: u64,
}

fn default_mcp_timeout() -> u64 {
    30
}

/// One knowledge base definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KnowledgeBaseConfig {
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub embedding_model: String,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

fn default_top_k() -> usize {
    5
}

fn default_chunk_size() -> usize {
    500
}

fn default_chunk_overlap() -> usize {
    50
}

/// Full per-pipeline configuration. Key paths follow the recognized-key
/// table: `trigger.*`, `ai.*`, `output.*`, `ratelimit.*`, `concurrency.*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PipelineConfig {
    #[serde(default = "default_pipeline_uuid")]
    pub uuid: String,
    #[serde(default = "default_pipeline_name")]
    pub name: String,
    #[serde(default)]
    pub bot_uuid: String,
    #[serde(default)]
    pub trigger: TriggerConfig,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub ratelimit: RateLimitConfig,
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    #[serde(default)]
    pub command: CommandConfig,
    /// Plugins this pipeline may call; `None` means all installed plugins.
    #[serde(default)]
    pub bound_plugins: Option<Vec<String>>,
    /// MCP servers this pipeline may call; `None` means all connected.
    #[serde(default)]
    pub bound_mcp_servers: Option<Vec<String>>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            uuid: default_pipeline_uuid(),
            name: default_pipeline_name(),
            bot_uuid: String::new(),
            trigger: TriggerConfig::default(),
            ai: AiConfig::default(),
            output: OutputConfig::default(),
            ratelimit: RateLimitConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            command: CommandConfig::default(),
            bound_plugins: None,
            bound_mcp_servers: None,
        }
    }
}

fn default_pipeline_uuid() -> String {
    "default".to_string()
}

fn default_pipeline_name() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct TriggerConfig {
    #[serde(default)]
    pub access_control: AccessControlConfig,
    #[serde(default)]
    pub misc: TriggerMiscConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccessControlMode {
    Whitelist,
    #[default]
    Blacklist,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct AccessControlConfig {
    #[serde(default)]
    pub mode: AccessControlMode,
    #[serde(default)]
    pub whitelist: Vec<String>,
    #[serde(default)]
    pub blacklist: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TriggerMiscConfig {
    #[serde(default)]
    pub combine_quote_message: bool,
    /// Key kept with an underscore to match the recognized-key table.
    #[serde(rename = "remove_think", default = "default_true")]
    pub remove_think: bool,
}

impl Default for TriggerMiscConfig {
    fn default() -> Self {
        Self {
            combine_quote_message: false,
            remove_think: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct AiConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub local_agent: LocalAgentConfig,
    /// Endpoint settings for the webhook runners, keyed by runner name.
    #[serde(default)]
    pub service: std::collections::HashMap<String, ServiceApiConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerConfig {
    /// One of `local-agent`, `dify-service-api`, `dashscope-app-api`,
    /// `n8n-service-api`, `langflow-api`.
    #[serde(default = "default_runner")]
    pub runner: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            runner: default_runner(),
        }
    }
}

fn default_runner() -> String {
    "local-agent".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PromptMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct LocalAgentConfig {
    /// UUID of the model to bind to the runner.
    #[serde(default)]
    pub model: Option<String>,
    /// Fixed leading messages injected before conversation history.
    #[serde(default)]
    pub prompt: Vec<PromptMessage>,
    /// Knowledge base UUID for retrieval augmentation.
    #[serde(default)]
    pub knowledge_base: Option<String>,
    /// Most recent user-led rounds of history kept by the truncator.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
}

fn default_max_rounds() -> usize {
    10
}

/// Connection settings for one external runner service.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceApiConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub app_id: String,
    #[serde(default = "default_service_timeout")]
    pub timeout_secs: u64,
}

fn default_service_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct OutputConfig {
    #[serde(default)]
    pub long_text_processing: LongTextConfig,
    #[serde(default)]
    pub force_delay: ForceDelayConfig,
    #[serde(default)]
    pub misc: OutputMiscConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LongTextStrategy {
    #[default]
    Forward,
    Image,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LongTextConfig {
    #[serde(default)]
    pub strategy: LongTextStrategy,
    #[serde(default = "default_long_text_threshold")]
    pub threshold: usize,
    #[serde(default)]
    pub font_path: Option<String>,
}

impl Default for LongTextConfig {
    fn default() -> Self {
        Self {
            strategy: LongTextStrategy::Forward,
            threshold: default_long_text_threshold(),
            font_path: None,
        }
    }
}

fn default_long_text_threshold() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ForceDelayConfig {
    #[serde(default)]
    pub min: f64,
    #[serde(default)]
    pub max: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutputMiscConfig {
    #[serde(default)]
    pub at_sender: bool,
    #[serde(default)]
    pub quote_origin: bool,
    #[serde(default = "default_true")]
    pub hide_exception: bool,
    #[serde(default)]
    pub track_function_calls: bool,
}

impl Default for OutputMiscConfig {
    fn default() -> Self {
        Self {
            at_sender: false,
            quote_origin: false,
            hide_exception: true,
            track_function_calls: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitStrategy {
    #[default]
    Drop,
    Wait,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RateLimitConfig {
    /// Window length in seconds.
    #[serde(default = "default_window_length")]
    pub window_length: u64,
    /// Messages admitted per window per session.
    #[serde(default = "default_limitation")]
    pub limitation: u64,
    #[serde(default)]
    pub strategy: RateLimitStrategy,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_length: default_window_length(),
            limitation: default_limitation(),
            strategy: RateLimitStrategy::Drop,
        }
    }
}

fn default_window_length() -> u64 {
    60
}

fn default_limitation() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConcurrencyConfig {
    /// Max in-flight queries across the pool.
    #[serde(default = "default_pipeline_concurrency")]
    pub pipeline: usize,
    /// Max simultaneously-running pipelines for one session.
    #[serde(default = "default_session_concurrency")]
    pub session: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            pipeline: default_pipeline_concurrency(),
            session: default_session_concurrency(),
        }
    }
}

fn default_pipeline_concurrency() -> usize {
    20
}

fn default_session_concurrency() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CommandConfig {
    #[serde(default = "default_true")]
    pub enable: bool,
    #[serde(default = "default_prefixes")]
    pub prefixes: Vec<String>,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            enable: true,
            prefixes: default_prefixes(),
        }
    }
}

fn default_prefixes() -> Vec<String> {
    vec!["!".to_string(), "！".to_string()]
}
