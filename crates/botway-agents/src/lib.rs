pub mod message;
#[cfg(feature = "mcp")]
pub mod mcp;
pub mod requester;
pub mod runner;
pub mod tools;

pub use message::{
    ContentPart, FunctionCall, Message, MessageChunk, MessageContent, ResponseMessage, Role,
    ToolCall,
};
pub use requester::{LlmModel, LlmRequest, LlmRequester, MessageChunkStream, ModelRegistry};
pub use runner::{Runner, RunnerInput, RunnerRegistry};
pub use tools::{ToolLoader, ToolManager, ToolOrigin, ToolSpec};
