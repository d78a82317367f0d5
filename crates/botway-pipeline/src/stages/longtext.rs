use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use botway_common::{ImageSource, MessageChain, MessageElement, Result};
use botway_config::{LongTextConfig, LongTextStrategy, PipelineConfig};
use tracing::warn;

use crate::query::{Query, QueryResponse};
use crate::stage::{Stage, StageOutput, StageResult};

/// Renders long text to an image. The core ships no font rasterizer; the
/// binary may plug one in, otherwise the stage falls back to forwarding.
pub trait TextImageRenderer: Send + Sync {
    fn render(&self, text: &str, font_path: &Path) -> Result<Vec<u8>>;
}

/// Reshapes oversized plain-text replies: wrap them as a forward message
/// or render them to an image. Chains with non-plain parts and streamed
/// partials are passed through untouched.
pub struct LongTextProcessStage {
    config: LongTextConfig,
    renderer: Option<Arc<dyn TextImageRenderer>>,
}

impl LongTextProcessStage {
    pub fn new() -> Self {
        Self {
            config: LongTextConfig::default(),
            renderer: None,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TextImageRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    fn render_image(&self, text: &str) -> Option<Vec<u8>> {
        let font_path = self.config.font_path.as_ref().map(PathBuf::from)?;
        if !font_path.exists() {
            warn!(
                "long-text font '{}' missing, falling back to forward",
                font_path.display()
            );
            return None;
        }
        let renderer = self.renderer.as_ref()?;
        match renderer.render(text, &font_path) {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("long-text image rendering failed, falling back to forward: {e}");
                None
            }
        }
    }
}

impl Default for LongTextProcessStage {
    fn default() -> Self {
        Self::new()
    }
}

fn forward_chain(query: &Query, text: &str) -> MessageChain {
    MessageChain::new(vec![MessageElement::Forward {
        nodes: vec![botway_common::ForwardNode {
            sender_id: query.bot_uuid.clone(),
            sender_name: "bot".to_string(),
            chain: MessageChain::text(text.to_string()),
        }],
    }])
}

#[async_trait]
impl Stage for LongTextProcessStage {
    fn name(&self) -> &'static str {
        "LongTextProcess"
    }

    async fn initialize(&mut self, config: &PipelineConfig) -> Result<()> {
        self.config = config.output.long_text_processing.clone();
        Ok(())
    }

    async fn process(&self, mut query: Query, _stage_name: &str) -> Result<StageOutput> {
        let Some(chain) = query.resp_message_chain.last() else {
            return Ok(StageOutput::Single(StageResult::cont(query)));
        };

        // Streamed partials keep flowing as-is.
        if let Some(QueryResponse::Provider(rm)) = query.last_response() {
            if rm.is_chunk() {
                return Ok(StageOutput::Single(StageResult::cont(query)));
            }
        }

        if !chain.is_plain_only() {
            return Ok(StageOutput::Single(StageResult::cont(query)));
        }

        let text = chain.plain_text();
        if text.chars().count() <= self.config.threshold {
            return Ok(StageOutput::Single(StageResult::cont(query)));
        }

        let reshaped = match self.config.strategy {
            LongTextStrategy::Image => match self.render_image(&text) {
                Some(bytes) => MessageChain::new(vec![MessageElement::Image {
                    source: ImageSource::Base64(BASE64.encode(bytes)),
                }]),
                None => forward_chain(&query, &text),
            },
            LongTextStrategy::Forward => forward_chain(&query, &text),
        };

        query.resp_message_chain.pop();
        query.resp_message_chain.push(reshaped);
        Ok(StageOutput::Single(StageResult::cont(query)))
    }
}
