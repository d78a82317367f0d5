use std::time::Duration;

use async_trait::async_trait;
use botway_common::{MessageElement, Result};
use botway_config::{OutputConfig, PipelineConfig};
use rand::Rng;
use tracing::{debug, warn};

use crate::query::{Query, QueryResponse};
use crate::stage::{Stage, StageOutput, StageResult};

/// Delivers the newest wrapped chain back on the originating platform.
/// Streamed partials are throttled: only every 8th sequence number and
/// the final update reach the adapter.
pub struct SendResponseBackStage {
    config: OutputConfig,
}

impl SendResponseBackStage {
    pub fn new() -> Self {
        Self {
            config: OutputConfig::default(),
        }
    }
}

impl Default for SendResponseBackStage {
    fn default() -> Self {
        Self::new()
    }
}

fn should_send_chunk(msg_sequence: u64, is_final: bool) -> bool {
    msg_sequence % 8 == 0 || is_final
}

#[async_trait]
impl Stage for SendResponseBackStage {
    fn name(&self) -> &'static str {
        "SendResponseBack"
    }

    async fn initialize(&mut self, config: &PipelineConfig) -> Result<()> {
        self.config = config.output.clone();
        Ok(())
    }

    async fn process(&self, query: Query, _stage_name: &str) -> Result<StageOutput> {
        let Some(chain) = query.resp_message_chain.last().cloned() else {
            return Ok(StageOutput::Single(StageResult::cont(query)));
        };

        if query.message_event.is_group() && query.adapter.is_muted(&query.launcher_id).await {
            debug!(
                "bot is muted in group {}, dropping reply for query {}",
                query.launcher_id, query.query_id
            );
            return Ok(StageOutput::Single(StageResult::cont(query)));
        }

        let (min, max) = (self.config.force_delay.min, self.config.force_delay.max);
        let delay = if max > min {
            rand::rng().random_range(min..=max)
        } else {
            max
        };
        if delay > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(delay)).await;
        }

        let chain = if query.message_event.is_group() && self.config.misc.at_sender {
            chain.with_prefix(MessageElement::At {
                target: query.sender_id.clone(),
            })
        } else {
            chain
        };

        let quote_origin = self.config.misc.quote_origin;

        if query.adapter.is_stream_output_supported() {
            let (is_final, msg_sequence) = match query.last_response() {
                Some(QueryResponse::Provider(rm)) => (rm.is_final(), rm.msg_sequence()),
                _ => (true, None),
            };

            if let Some(seq) = msg_sequence {
                if !should_send_chunk(seq, is_final) {
                    return Ok(StageOutput::Single(StageResult::cont(query)));
                }
            }

            // One id per logical response: chunks of the same response
            // share the count of finalized entries before them.
            let finals_before = query
                .resp_messages
                .iter()
                .take(query.resp_messages.len().saturating_sub(1))
                .filter(|r| match r {
                    QueryResponse::Provider(rm) => rm.is_final(),
                    QueryResponse::Chain(_) => true,
                })
                .count() as u64;
            let resp_message_id = query.query_id * 1000 + finals_before;

            if let Err(e) = query
                .adapter
                .reply_message_chunk(
                    &query.message_event,
                    resp_message_id,
                    &chain,
                    quote_origin,
                    is_final,
                )
                .await
            {
                warn!("failed to stream reply for query {}: {e}", query.query_id);
            }
        } else if let Err(e) = query
            .adapter
            .reply_message(&query.message_event, &chain, quote_origin)
            .await
        {
            // The turn still counts as produced; delivery is best-effort.
            warn!("failed to deliver reply for query {}: {e}", query.query_id);
        }

        Ok(StageOutput::Single(StageResult::cont(query)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::test_support::RecordingAdapter;
    use botway_agents::{Message, MessageChunk, ResponseMessage};
    use botway_common::{MessageChain, MessageEvent, Sender};
    use std::sync::Arc;

    #[test]
    fn chunk_gating_matches_the_contract() {
        // 20 chunks numbered from 1: sequences 8 and 16 pass, plus the final.
        let sent: Vec<u64> = (1..=20u64)
            .filter(|seq| should_send_chunk(*seq, *seq == 20))
            .collect();
        assert_eq!(sent, vec![8, 16, 20]);
    }

    async fn group_query(
        adapter: Arc<RecordingAdapter>,
        at_sender: bool,
    ) -> (SendResponseBackStage, Query) {
        let mut stage = SendResponseBackStage::new();
        let mut config = PipelineConfig::default();
        config.output.misc.at_sender = at_sender;
        stage.initialize(&config).await.unwrap();

        let event = MessageEvent::group(
            Sender {
                id: "u1".into(),
                name: "a".into(),
            },
            "g1",
            MessageChain::text("hi"),
            0,
        );
        let mut query = Query::new(7, event, adapter, "b", "p");
        query
            .resp_messages
            .push(QueryResponse::Provider(ResponseMessage::Final(
                Message::assistant("pong"),
            )));
        query.resp_message_chain.push(MessageChain::text("pong"));
        (stage, query)
    }

    #[tokio::test]
    async fn non_streaming_reply_is_sent_once() {
        let adapter = Arc::new(RecordingAdapter::new());
        let (stage, query) = group_query(Arc::clone(&adapter), false).await;
        stage.process(query, "SendResponseBack").await.unwrap();
        assert_eq!(adapter.reply_texts(), vec!["pong"]);
        assert!(adapter.chunks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn at_sender_prefixes_group_replies() {
        let adapter = Arc::new(RecordingAdapter::new());
        let (stage, query) = group_query(Arc::clone(&adapter), true).await;
        stage.process(query, "SendResponseBack").await.unwrap();
        let replies = adapter.replies.lock().unwrap();
        assert!(matches!(
            replies[0].elements()[0],
            MessageElement::At { ref target } if target == "u1"
        ));
    }

    #[tokio::test]
    async fn streaming_adapter_receives_gated_chunks() {
        let adapter = Arc::new(RecordingAdapter::streaming());
        let mut stage = SendResponseBackStage::new();
        stage.initialize(&PipelineConfig::default()).await.unwrap();

        let event = MessageEvent::friend(
            Sender {
                id: "u1".into(),
                name: "a".into(),
            },
            MessageChain::text("hi"),
            0,
        );
        let base = Query::new(3, event, adapter.clone(), "b", "p");

        for seq in 1..=20u64 {
            let mut query = base.clone();
            query
                .resp_messages
                .push(QueryResponse::Provider(ResponseMessage::Chunk(
                    MessageChunk {
                        message: Message::assistant(format!("cum-{seq}")),
                        is_final: seq == 20,
                        msg_sequence: seq,
                    },
                )));
            query
                .resp_message_chain
                .push(MessageChain::text(format!("cum-{seq}")));
            stage.process(query, "SendResponseBack").await.unwrap();
        }

        let chunks = adapter.chunks.lock().unwrap();
        let sequences: Vec<String> = chunks.iter().map(|c| c.chain.plain_text()).collect();
        assert_eq!(sequences, vec!["cum-8", "cum-16", "cum-20"]);
        assert!(chunks[2].is_final);
        assert!(!chunks[0].is_final);
    }
}
