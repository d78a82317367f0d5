use std::sync::{Arc, Mutex};

use botway_agents::{Message, MessageContent, Role};
use botway_common::LauncherType;
use botway_config::PromptMessage;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::info;

/// The fixed leading messages injected before conversation history.
#[derive(Debug, Clone, Default)]
pub struct Prompt {
    pub messages: Vec<Message>,
}

impl Prompt {
    /// Assemble from config records. Unknown roles fall back to system.
    pub fn from_config(entries: &[PromptMessage]) -> Self {
        let messages = entries
            .iter()
            .map(|e| {
                let role = match e.role.as_str() {
                    "user" => Role::User,
                    "assistant" => Role::Assistant,
                    _ => Role::System,
                };
                Message::new(role, MessageContent::Text(e.content.clone()))
            })
            .collect();
        Self { messages }
    }
}

/// A bounded history of provider messages bound to a (pipeline, bot) pair.
/// External stateful runners correlate their remote session by `uuid`.
pub struct Conversation {
    pub uuid: String,
    pub pipeline_uuid: String,
    pub bot_uuid: String,
    pub prompt: Prompt,
    messages: Mutex<Vec<Message>>,
    /// Tool set snapshot taken at creation, kept by name only.
    pub tool_names: Vec<String>,
    pub created_at: DateTime<Utc>,
    updated_at: Mutex<DateTime<Utc>>,
}

impl Conversation {
    pub fn new(
        pipeline_uuid: impl Into<String>,
        bot_uuid: impl Into<String>,
        prompt: Prompt,
        tool_names: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            uuid: uuid::Uuid::new_v4().to_string(),
            pipeline_uuid: pipeline_uuid.into(),
            bot_uuid: bot_uuid.into(),
            prompt,
            messages: Mutex::new(Vec::new()),
            tool_names,
            created_at: now,
            updated_at: Mutex::new(now),
        }
    }

    /// Copy of the history; readers never hold the lock across awaits.
    pub fn history(&self) -> Vec<Message> {
        self.messages.lock().unwrap().clone()
    }

    pub fn message_count(&self) -> usize {
        self.messages.lock().unwrap().len()
    }

    /// Persist one completed turn: the user message followed by the
    /// assistant/tool trail. Called only after a successful run.
    pub fn append_turn(&self, user_message: Message, trail: Vec<Message>) {
        let mut messages = self.messages.lock().unwrap();
        messages.push(user_message);
        messages.extend(trail);
        *self.updated_at.lock().unwrap() = Utc::now();
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        *self.updated_at.lock().unwrap()
    }
}

struct SessionState {
    conversations: Vec<Arc<Conversation>>,
    active: Option<Arc<Conversation>>,
}

/// Per-(launcher_type, launcher_id) context: conversations plus the
/// concurrency bound for pipeline runs of this session.
pub struct Session {
    pub launcher_type: LauncherType,
    pub launcher_id: String,
    pub semaphore: Arc<Semaphore>,
    state: Mutex<SessionState>,
    pub created_at: DateTime<Utc>,
}

impl Session {
    fn new(launcher_type: LauncherType, launcher_id: String, concurrency: usize) -> Self {
        Self {
            launcher_type,
            launcher_id,
            semaphore: Arc::new(Semaphore::new(concurrency.max(1))),
            state: Mutex::new(SessionState {
                conversations: Vec::new(),
                active: None,
            }),
            created_at: Utc::now(),
        }
    }

    pub fn key(&self) -> String {
        botway_common::session_key(self.launcher_type, &self.launcher_id)
    }

    pub fn active_conversation(&self) -> Option<Arc<Conversation>> {
        self.state.lock().unwrap().active.clone()
    }

    /// All conversations ever created for this session, oldest first.
    pub fn conversations(&self) -> Vec<Arc<Conversation>> {
        self.state.lock().unwrap().conversations.clone()
    }

    /// Append a new conversation and make it active in one step.
    fn activate(&self, conversation: Arc<Conversation>) {
        let mut state = self.state.lock().unwrap();
        state.conversations.push(Arc::clone(&conversation));
        state.active = Some(conversation);
    }
}

/// Owns sessions keyed by `(launcher_type, launcher_id)`. Sessions are
/// created lazily and kept for the process lifetime.
pub struct SessionManager {
    sessions: DashMap<(LauncherType, String), Arc<Session>>,
    session_concurrency: usize,
}

impl SessionManager {
    pub fn new(session_concurrency: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            session_concurrency,
        }
    }

    pub fn get_session(&self, launcher_type: LauncherType, launcher_id: &str) -> Arc<Session> {
        self.sessions
            .entry((launcher_type, launcher_id.to_string()))
            .or_insert_with(|| {
                info!(
                    "creating session {}",
                    botway_common::session_key(launcher_type, launcher_id)
                );
                Arc::new(Session::new(
                    launcher_type,
                    launcher_id.to_string(),
                    self.session_concurrency,
                ))
            })
            .clone()
    }

    /// The session's active conversation for this pipeline, or a fresh one
    /// when none exists or the active one is bound elsewhere. Old
    /// conversations are retained for history inspection.
    pub fn get_conversation(
        &self,
        session: &Session,
        prompt_cfg: &[PromptMessage],
        tool_names: Vec<String>,
        pipeline_uuid: &str,
        bot_uuid: &str,
    ) -> Arc<Conversation> {
        if let Some(active) = session.active_conversation() {
            if active.pipeline_uuid == pipeline_uuid && active.bot_uuid == bot_uuid {
                return active;
            }
        }

        let conversation = Arc::new(Conversation::new(
            pipeline_uuid,
            bot_uuid,
            Prompt::from_config(prompt_cfg),
            tool_names,
        ));
        info!(
            "new conversation {} for session {} (pipeline {})",
            conversation.uuid,
            session.key(),
            pipeline_uuid
        );
        session.activate(Arc::clone(&conversation));
        conversation
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}
