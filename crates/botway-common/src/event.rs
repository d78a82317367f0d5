use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::chain::MessageChain;
use crate::types::LauncherType;

/// Opaque handle to the platform-native event object. The core never looks
/// inside; the originating adapter downcasts it to address replies.
pub type PlatformObject = Arc<dyn Any + Send + Sync>;

/// The entity that sent a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageEventKind {
    Friend,
    Group { group_id: String },
}

/// One inbound message event as produced by an adapter.
#[derive(Clone)]
pub struct MessageEvent {
    pub kind: MessageEventKind,
    pub sender: Sender,
    pub chain: MessageChain,
    /// Unix seconds at which the platform reports the message was sent.
    pub time: i64,
    pub source_platform_object: Option<PlatformObject>,
}

impl MessageEvent {
    pub fn friend(sender: Sender, chain: MessageChain, time: i64) -> Self {
        Self {
            kind: MessageEventKind::Friend,
            sender,
            chain,
            time,
            source_platform_object: None,
        }
    }

    pub fn group(sender: Sender, group_id: impl Into<String>, chain: MessageChain, time: i64) -> Self {
        Self {
            kind: MessageEventKind::Group {
                group_id: group_id.into(),
            },
            sender,
            chain,
            time,
            source_platform_object: None,
        }
    }

    pub fn with_source(mut self, source: PlatformObject) -> Self {
        self.source_platform_object = Some(source);
        self
    }

    pub fn launcher_type(&self) -> LauncherType {
        match self.kind {
            MessageEventKind::Friend => LauncherType::Person,
            MessageEventKind::Group { .. } => LauncherType::Group,
        }
    }

    /// The conversation the event belongs to: the sender for private chats,
    /// the group for group chats.
    pub fn launcher_id(&self) -> &str {
        match &self.kind {
            MessageEventKind::Friend => &self.sender.id,
            MessageEventKind::Group { group_id } => group_id,
        }
    }

    pub fn is_group(&self) -> bool {
        matches!(self.kind, MessageEventKind::Group { .. })
    }
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("kind", &self.kind)
            .field("sender", &self.sender)
            .field("chain", &self.chain)
            .field("time", &self.time)
            .field(
                "source_platform_object",
                &self.source_platform_object.as_ref().map(|_| "<opaque>"),
            )
            .finish()
    }
}
