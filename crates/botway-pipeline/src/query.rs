use std::sync::Arc;

use botway_agents::{Message, ResponseMessage, ToolSpec};
use botway_channels::PlatformAdapter;
use botway_common::{LauncherType, MessageChain, MessageEvent};

use crate::session::{Conversation, Session};

/// Reserved keys of `Query::variables`.
pub mod vars {
    pub const SESSION_ID: &str = "session_id";
    pub const CONVERSATION_ID: &str = "conversation_id";
    pub const MSG_CREATE_TIME: &str = "msg_create_time";
    pub const PIPELINE_BOUND_PLUGINS: &str = "_pipeline_bound_plugins";
    pub const PIPELINE_BOUND_MCP_SERVERS: &str = "_pipeline_bound_mcp_servers";
    pub const USER_MESSAGE_TEXT: &str = "user_message_text";
}

/// One entry of the response list: a provider message produced by the
/// runner, or a ready-made chain produced by a plugin or command reply.
#[derive(Debug, Clone)]
pub enum QueryResponse {
    Provider(ResponseMessage),
    Chain(MessageChain),
}

/// One complete request lifecycle triggered by a single inbound event.
///
/// Fields are grouped by the stage that populates them; later stages only
/// read what earlier stages wrote. The engine clones queries at fan-out
/// points, so everything here is cheaply cloneable.
#[derive(Clone)]
pub struct Query {
    // Intake.
    pub query_id: u64,
    pub launcher_type: LauncherType,
    pub launcher_id: String,
    pub sender_id: String,
    pub message_event: MessageEvent,
    pub message_chain: MessageChain,
    pub adapter: Arc<dyn PlatformAdapter>,
    pub bot_uuid: String,
    pub pipeline_uuid: String,

    // Preprocessor.
    pub session: Option<Arc<Session>>,
    pub conversation: Option<Arc<Conversation>>,
    pub prompt: Vec<Message>,
    pub messages: Vec<Message>,
    pub user_message: Option<Message>,
    pub use_funcs: Vec<ToolSpec>,
    pub use_llm_model_uuid: Option<String>,
    pub variables: serde_json::Map<String, serde_json::Value>,

    // Processor / runner.
    pub resp_messages: Vec<QueryResponse>,

    // Wrapper. Parallel to the delivered subset of `resp_messages`.
    pub resp_message_chain: Vec<MessageChain>,

    pub(crate) current_stage_name: Option<&'static str>,
}

impl Query {
    pub fn new(
        query_id: u64,
        event: MessageEvent,
        adapter: Arc<dyn PlatformAdapter>,
        bot_uuid: impl Into<String>,
        pipeline_uuid: impl Into<String>,
    ) -> Self {
        Self {
            query_id,
            launcher_type: event.launcher_type(),
            launcher_id: event.launcher_id().to_string(),
            sender_id: event.sender.id.clone(),
            message_chain: event.chain.clone(),
            message_event: event,
            adapter,
            bot_uuid: bot_uuid.into(),
            pipeline_uuid: pipeline_uuid.into(),
            session: None,
            conversation: None,
            prompt: Vec::new(),
            messages: Vec::new(),
            user_message: None,
            use_funcs: Vec::new(),
            use_llm_model_uuid: None,
            variables: serde_json::Map::new(),
            resp_messages: Vec::new(),
            resp_message_chain: Vec::new(),
            current_stage_name: None,
        }
    }

    pub fn session_key(&self) -> String {
        botway_common::session_key(self.launcher_type, &self.launcher_id)
    }

    /// The last response entry, if the processor produced any.
    pub fn last_response(&self) -> Option<&QueryResponse> {
        self.resp_messages.last()
    }

    pub fn set_variable(&mut self, key: &str, value: serde_json::Value) {
        self.variables.insert(key.to_string(), value);
    }

    /// String-list variable accessor for the reserved binding keys.
    pub fn string_list_variable(&self, key: &str) -> Option<Vec<String>> {
        self.variables.get(key).and_then(|v| {
            v.as_array().map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(str::to_string))
                    .collect()
            })
        })
    }
}
