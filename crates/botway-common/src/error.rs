use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Workspace-wide error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("query pool is full")]
    PoolFull,

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("adapter send failed: {0}")]
    AdapterSend(String),

    #[error("knowledge base error: {0}")]
    KnowledgeBase(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Requester(#[from] RequesterError),

    #[error("config error: {0}")]
    Config(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("mcp error: {0}")]
    Mcp(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised by LLM requesters. All variants are recoverable from the
/// pipeline's point of view: the processor converts them to an interrupt
/// instead of tearing the query down.
#[derive(Debug, Error)]
pub enum RequesterError {
    #[error("request timed out")]
    Timeout,

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("model or endpoint not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("rate limited by provider: {0}")]
    RateLimit(String),

    #[error("context length exceeded: {0}")]
    ContextTooLong(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider API error: {0}")]
    Api(String),
}

impl Error {
    /// Whether this error should surface its message to the end user when
    /// exception echo is enabled on the pipeline.
    pub fn user_message(&self) -> String {
        match self {
            Error::Requester(e) => e.to_string(),
            other => other.to_string(),
        }
    }
}
