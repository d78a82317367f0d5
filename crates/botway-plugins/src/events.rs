use botway_common::MessageChain;
use serde::{Deserialize, Serialize};

/// One prompt message as plugins see it. The pipeline converts between
/// this and the provider message model at the hook boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptEntry {
    pub role: String,
    pub content: String,
}

/// Events broadcast to plugins at named points of the query lifecycle.
#[derive(Debug, Clone)]
pub enum PluginEvent {
    PersonNormalMessageReceived {
        sender_id: String,
        text: String,
    },
    GroupNormalMessageReceived {
        group_id: String,
        sender_id: String,
        text: String,
    },
    PersonCommandSent {
        sender_id: String,
        command: String,
        params: Vec<String>,
    },
    GroupCommandSent {
        group_id: String,
        sender_id: String,
        command: String,
        params: Vec<String>,
    },
    NormalMessageResponded {
        sender_id: String,
        response_text: String,
    },
    PromptPreProcessing {
        default_prompt: Vec<PromptEntry>,
        prompt: Vec<PromptEntry>,
    },
}

impl PluginEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PluginEvent::PersonNormalMessageReceived { .. } => "PersonNormalMessageReceived",
            PluginEvent::GroupNormalMessageReceived { .. } => "GroupNormalMessageReceived",
            PluginEvent::PersonCommandSent { .. } => "PersonCommandSent",
            PluginEvent::GroupCommandSent { .. } => "GroupCommandSent",
            PluginEvent::NormalMessageResponded { .. } => "NormalMessageResponded",
            PluginEvent::PromptPreProcessing { .. } => "PromptPreProcessing",
        }
    }
}

/// Mutable context handed through the plugin handler chain. Handlers set
/// flags and replacements; the emitting stage interprets them afterwards.
#[derive(Debug, Clone)]
pub struct EventContext {
    pub event: PluginEvent,
    /// Suppress the default handling of the event (e.g. skip the LLM).
    pub prevent_default: bool,
    /// Reply to send instead of (or before) the default handling.
    pub reply_chain: Option<MessageChain>,
    /// Replacement for the user message content.
    pub alter: Option<String>,
}

impl EventContext {
    pub fn new(event: PluginEvent) -> Self {
        Self {
            event,
            prevent_default: false,
            reply_chain: None,
            alter: None,
        }
    }

    pub fn prevent_default(&mut self) {
        self.prevent_default = true;
    }

    pub fn add_return_reply(&mut self, chain: MessageChain) {
        self.reply_chain = Some(chain);
    }

    pub fn alter_message(&mut self, text: impl Into<String>) {
        self.alter = Some(text.into());
    }
}
