use serde::{Deserialize, Serialize};

/// Role of a provider message. `command` and `plugin` are internal roles
/// carried through the response path; they never reach a requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
    Command,
    Plugin,
}

/// One part of a multi-part message body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
    ImageBase64 { data: String },
    FileUrl { name: String, url: String },
}

/// Message body: plain string or a list of typed parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenation of all text in the body.
    pub fn plain_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => {
                let mut out = String::new();
                for part in parts {
                    if let ContentPart::Text { text } = part {
                        out.push_str(text);
                    }
                }
                out
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments. In streamed chunks this accumulates across
    /// deltas of the same call id.
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// LLM-side message model shared by requesters, runners and conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Separate reasoning trace surfaced by some requesters; subject to
    /// the pipeline's remove-think policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: MessageContent) -> Self {
        Self {
            role,
            content: Some(content),
            tool_calls: Vec::new(),
            tool_call_id: None,
            reasoning_content: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, MessageContent::Text(text.into()))
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, MessageContent::Text(text.into()))
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, MessageContent::Text(text.into()))
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            tool_calls,
            tool_call_id: None,
            reasoning_content: None,
        }
    }

    pub fn tool(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: Some(MessageContent::Text(content.into())),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
            reasoning_content: None,
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    pub fn plain_text(&self) -> String {
        self.content
            .as_ref()
            .map(MessageContent::plain_text)
            .unwrap_or_default()
    }
}

/// A streamed partial message. `content` and tool-call arguments are
/// cumulative across chunks of the same response; `msg_sequence` starts at
/// 1 and increases by 1 per chunk; the terminal chunk has `is_final`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageChunk {
    #[serde(flatten)]
    pub message: Message,
    pub is_final: bool,
    pub msg_sequence: u64,
}

/// One entry of a query's response list: either a complete provider
/// message or a streamed chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseMessage {
    Final(Message),
    Chunk(MessageChunk),
}

impl ResponseMessage {
    pub fn message(&self) -> &Message {
        match self {
            ResponseMessage::Final(m) => m,
            ResponseMessage::Chunk(c) => &c.message,
        }
    }

    pub fn is_chunk(&self) -> bool {
        matches!(self, ResponseMessage::Chunk(_))
    }

    /// The streaming finality flag; complete messages count as final.
    pub fn is_final(&self) -> bool {
        match self {
            ResponseMessage::Final(_) => true,
            ResponseMessage::Chunk(c) => c.is_final,
        }
    }

    pub fn msg_sequence(&self) -> Option<u64> {
        match self {
            ResponseMessage::Final(_) => None,
            ResponseMessage::Chunk(c) => Some(c.msg_sequence),
        }
    }
}
