use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use botway_common::{LauncherType, MessageChain, MessageEvent, Result};

/// Which inbound events a listener wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    FriendMessage,
    GroupMessage,
}

impl EventType {
    pub fn matches(&self, event: &MessageEvent) -> bool {
        match self {
            EventType::FriendMessage => !event.is_group(),
            EventType::GroupMessage => event.is_group(),
        }
    }
}

/// Callback invoked for each matching inbound event. Listeners must not
/// block; long work is spawned onto the runtime by the intake layer.
pub type EventListener = Arc<dyn Fn(MessageEvent) + Send + Sync>;

/// An adapter converting between an external chat protocol and the
/// internal message-chain model. The core only ever talks to this trait.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Stable platform identifier ("webchat", "qq", "lark", ...).
    fn platform(&self) -> &str;

    /// Long-running listen loop. Returns when the adapter shuts down.
    async fn run(&self) -> Result<()>;

    /// Graceful shutdown; returns whether shutdown is effective.
    async fn kill(&self) -> Result<bool>;

    fn register_listener(&self, event_type: EventType, listener: EventListener);

    fn unregister_listener(&self, event_type: EventType);

    /// Proactive send to a person or group.
    async fn send_message(
        &self,
        target_type: LauncherType,
        target_id: &str,
        chain: &MessageChain,
    ) -> Result<()>;

    /// Reply to the given source event.
    async fn reply_message(
        &self,
        source_event: &MessageEvent,
        chain: &MessageChain,
        quote_origin: bool,
    ) -> Result<()>;

    /// Reply with one streamed partial message. `resp_message_id`
    /// correlates all chunks of the same response; `is_final` marks the
    /// last update. Only meaningful when `is_stream_output_supported()`.
    async fn reply_message_chunk(
        &self,
        source_event: &MessageEvent,
        resp_message_id: u64,
        chain: &MessageChain,
        quote_origin: bool,
        is_final: bool,
    ) -> Result<()> {
        let _ = (source_event, resp_message_id, quote_origin, is_final);
        let _ = chain;
        Err(botway_common::Error::Channel(format!(
            "adapter '{}' does not support streamed replies",
            self.platform()
        )))
    }

    fn is_stream_output_supported(&self) -> bool {
        false
    }

    /// Whether the bot is muted in the given group.
    async fn is_muted(&self, group_id: &str) -> bool {
        let _ = group_id;
        false
    }
}

/// Listener registry shared by adapter implementations: at most one
/// listener per event type, dispatched synchronously in arrival order.
#[derive(Default)]
pub struct ListenerSet {
    friend: Mutex<Option<EventListener>>,
    group: Mutex<Option<EventListener>>,
}

impl ListenerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, event_type: EventType, listener: EventListener) {
        match event_type {
            EventType::FriendMessage => *self.friend.lock().unwrap() = Some(listener),
            EventType::GroupMessage => *self.group.lock().unwrap() = Some(listener),
        }
    }

    pub fn unregister(&self, event_type: EventType) {
        match event_type {
            EventType::FriendMessage => *self.friend.lock().unwrap() = None,
            EventType::GroupMessage => *self.group.lock().unwrap() = None,
        }
    }

    pub fn dispatch(&self, event: MessageEvent) {
        let slot = if event.is_group() {
            self.group.lock().unwrap().clone()
        } else {
            self.friend.lock().unwrap().clone()
        };
        if let Some(listener) = slot {
            listener(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use botway_common::{MessageChain, Sender};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn friend_event() -> MessageEvent {
        MessageEvent::friend(
            Sender {
                id: "1".into(),
                name: "a".into(),
            },
            MessageChain::text("hi"),
            0,
        )
    }

    #[test]
    fn dispatch_routes_by_event_kind() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        set.register(
            EventType::FriendMessage,
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );

        set.dispatch(friend_event());
        let group = MessageEvent::group(
            Sender {
                id: "1".into(),
                name: "a".into(),
            },
            "g1",
            MessageChain::text("hi"),
            0,
        );
        set.dispatch(group);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unregister_stops_dispatch() {
        let set = ListenerSet::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        set.register(
            EventType::FriendMessage,
            Arc::new(move |_| {
                hits2.fetch_add(1, Ordering::SeqCst);
            }),
        );
        set.unregister(EventType::FriendMessage);
        set.dispatch(friend_event());
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }
}
