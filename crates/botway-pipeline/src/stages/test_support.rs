use std::sync::Mutex;

use async_trait::async_trait;
use botway_channels::{EventListener, EventType, PlatformAdapter};
use botway_common::{LauncherType, MessageChain, MessageEvent, Result};

/// One streamed reply observed by the recording adapter.
#[derive(Debug, Clone)]
pub struct RecordedChunk {
    pub resp_message_id: u64,
    pub chain: MessageChain,
    pub is_final: bool,
}

/// Adapter double that records every reply for assertions.
pub struct RecordingAdapter {
    pub stream_supported: bool,
    pub replies: Mutex<Vec<MessageChain>>,
    pub chunks: Mutex<Vec<RecordedChunk>>,
}

impl RecordingAdapter {
    pub fn new() -> Self {
        Self {
            stream_supported: false,
            replies: Mutex::new(Vec::new()),
            chunks: Mutex::new(Vec::new()),
        }
    }

    pub fn streaming() -> Self {
        Self {
            stream_supported: true,
            ..Self::new()
        }
    }

    pub fn reply_texts(&self) -> Vec<String> {
        self.replies
            .lock()
            .unwrap()
            .iter()
            .map(MessageChain::plain_text)
            .collect()
    }
}

#[async_trait]
impl PlatformAdapter for RecordingAdapter {
    fn platform(&self) -> &str {
        "recording"
    }

    async fn run(&self) -> Result<()> {
        Ok(())
    }

    async fn kill(&self) -> Result<bool> {
        Ok(true)
    }

    fn register_listener(&self, _event_type: EventType, _listener: EventListener) {}

    fn unregister_listener(&self, _event_type: EventType) {}

    async fn send_message(
        &self,
        _target_type: LauncherType,
        _target_id: &str,
        chain: &MessageChain,
    ) -> Result<()> {
        self.replies.lock().unwrap().push(chain.clone());
        Ok(())
    }

    async fn reply_message(
        &self,
        _source_event: &MessageEvent,
        chain: &MessageChain,
        _quote_origin: bool,
    ) -> Result<()> {
        self.replies.lock().unwrap().push(chain.clone());
        Ok(())
    }

    async fn reply_message_chunk(
        &self,
        _source_event: &MessageEvent,
        resp_message_id: u64,
        chain: &MessageChain,
        _quote_origin: bool,
        is_final: bool,
    ) -> Result<()> {
        self.chunks.lock().unwrap().push(RecordedChunk {
            resp_message_id,
            chain: chain.clone(),
            is_final,
        });
        Ok(())
    }

    fn is_stream_output_supported(&self) -> bool {
        self.stream_supported
    }
}
