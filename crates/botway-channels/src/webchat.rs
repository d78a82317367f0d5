use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::any;
use axum::Router;
use botway_common::{
    Error, LauncherType, MessageChain, MessageElement, MessageEvent, Result, Sender,
};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::traits::{EventListener, EventType, ListenerSet, PlatformAdapter};

/// Handle attached to every webchat event so replies can find their way
/// back to the originating socket.
#[derive(Debug)]
struct WebChatSource {
    user_id: String,
}

#[derive(Debug, Deserialize)]
struct InboundFrame {
    content: String,
    #[serde(default)]
    user_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutboundFrame<'a> {
    Message {
        content: &'a str,
    },
    Chunk {
        message_id: u64,
        content: &'a str,
        is_final: bool,
    },
}

struct Inner {
    listeners: ListenerSet,
    sinks: DashMap<String, mpsc::UnboundedSender<String>>,
    next_message_id: AtomicU64,
    cancel: CancellationToken,
    bind_addr: String,
}

/// The built-in web chat: one WebSocket per user, JSON frames in both
/// directions, streamed partial replies supported.
pub struct WebChatAdapter {
    inner: Arc<Inner>,
}

impl WebChatAdapter {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            inner: Arc::new(Inner {
                listeners: ListenerSet::new(),
                sinks: DashMap::new(),
                next_message_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
                bind_addr: format!("{host}:{port}"),
            }),
        }
    }

    fn sink_for(&self, user_id: &str) -> Result<mpsc::UnboundedSender<String>> {
        self.inner
            .sinks
            .get(user_id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::AdapterSend(format!("webchat user '{user_id}' not connected")))
    }

    fn user_of(source_event: &MessageEvent) -> Result<String> {
        source_event
            .source_platform_object
            .as_ref()
            .and_then(|obj| obj.downcast_ref::<WebChatSource>())
            .map(|s| s.user_id.clone())
            .ok_or_else(|| Error::AdapterSend("event did not originate from webchat".into()))
    }
}

#[async_trait]
impl PlatformAdapter for WebChatAdapter {
    fn platform(&self) -> &str {
        "webchat"
    }

    async fn run(&self) -> Result<()> {
        let inner = Arc::clone(&self.inner);
        let app = Router::new()
            .route("/ws", any(ws_handler))
            .with_state(Arc::clone(&inner));

        let listener = tokio::net::TcpListener::bind(&inner.bind_addr)
            .await
            .map_err(|e| Error::Channel(format!("webchat bind failed: {e}")))?;
        info!("webchat listening on {}", inner.bind_addr);

        let cancel = inner.cancel.clone();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|e| Error::Channel(format!("webchat server error: {e}")))
    }

    async fn kill(&self) -> Result<bool> {
        self.inner.cancel.cancel();
        self.inner.sinks.clear();
        Ok(true)
    }

    fn register_listener(&self, event_type: EventType, listener: EventListener) {
        self.inner.listeners.register(event_type, listener);
    }

    fn unregister_listener(&self, event_type: EventType) {
        self.inner.listeners.unregister(event_type);
    }

    async fn send_message(
        &self,
        target_type: LauncherType,
        target_id: &str,
        chain: &MessageChain,
    ) -> Result<()> {
        if target_type != LauncherType::Person {
            return Err(Error::AdapterSend("webchat has no group chats".into()));
        }
        let frame = serde_json::to_string(&OutboundFrame::Message {
            content: &chain.plain_text(),
        })?;
        self.sink_for(target_id)?
            .send(frame)
            .map_err(|_| Error::AdapterSend(format!("webchat user '{target_id}' hung up")))
    }

    async fn reply_message(
        &self,
        source_event: &MessageEvent,
        chain: &MessageChain,
        _quote_origin: bool,
    ) -> Result<()> {
        let user_id = Self::user_of(source_event)?;
        self.send_message(LauncherType::Person, &user_id, chain).await
    }

    async fn reply_message_chunk(
        &self,
        source_event: &MessageEvent,
        resp_message_id: u64,
        chain: &MessageChain,
        _quote_origin: bool,
        is_final: bool,
    ) -> Result<()> {
        let user_id = Self::user_of(source_event)?;
        let frame = serde_json::to_string(&OutboundFrame::Chunk {
            message_id: resp_message_id,
            content: &chain.plain_text(),
            is_final,
        })?;
        self.sink_for(&user_id)?
            .send(frame)
            .map_err(|_| Error::AdapterSend(format!("webchat user '{user_id}' hung up")))
    }

    fn is_stream_output_supported(&self) -> bool {
        true
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<HashMap<String, String>>,
    State(inner): State<Arc<Inner>>,
) -> impl IntoResponse {
    let user_id = params
        .get("user")
        .cloned()
        .unwrap_or_else(|| format!("anon-{}", inner.next_message_id.fetch_add(1, Ordering::Relaxed)));
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, inner))
}

async fn handle_socket(socket: WebSocket, user_id: String, inner: Arc<Inner>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    inner.sinks.insert(user_id.clone(), tx);
    info!("webchat user '{user_id}' connected");

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(WsMessage::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = ws_rx.next().await {
        let WsMessage::Text(text) = msg else { continue };
        let frame: InboundFrame = match serde_json::from_str(text.as_str()) {
            Ok(f) => f,
            Err(e) => {
                warn!("webchat user '{user_id}' sent invalid frame: {e}");
                continue;
            }
        };

        let message_id = inner.next_message_id.fetch_add(1, Ordering::Relaxed);
        let time = chrono::Utc::now().timestamp();
        let chain = MessageChain::new(vec![
            MessageElement::Source {
                message_id: format!("webchat-{message_id}"),
                time,
            },
            MessageElement::Text {
                text: frame.content,
            },
        ]);
        let event = MessageEvent::friend(
            Sender {
                id: user_id.clone(),
                name: frame.user_name.unwrap_or_else(|| user_id.clone()),
            },
            chain,
            time,
        )
        .with_source(Arc::new(WebChatSource {
            user_id: user_id.clone(),
        }));

        inner.listeners.dispatch(event);
    }

    debug!("webchat user '{user_id}' disconnected");
    inner.sinks.remove(&user_id);
    writer.abort();
}
