use std::sync::Arc;

use async_trait::async_trait;
use botway_agents::{ContentPart, Message, MessageContent, Role};
use botway_common::{ImageSource, MessageChain, MessageElement, Result};
use botway_config::PipelineConfig;
use botway_plugins::{PluginEvent, PluginHost};

use crate::app::StageDeps;
use crate::query::{vars, Query, QueryResponse};
use crate::stage::{Stage, StageOutput, StageResult};

/// Turns the newest response entry into the next platform chain. Entries
/// that produce no user-visible output (tool results, empty assistant
/// messages) interrupt their pass silently.
pub struct ResponseWrapperStage {
    plugin_host: Arc<dyn PluginHost>,
    config: PipelineConfig,
}

impl ResponseWrapperStage {
    pub fn new(deps: &StageDeps) -> Self {
        Self {
            plugin_host: Arc::clone(&deps.plugin_host),
            config: PipelineConfig::default(),
        }
    }

    async fn wrap_assistant_content(
        &self,
        query: &Query,
        message: &Message,
        fire_event: bool,
    ) -> Result<Option<MessageChain>> {
        let chain = content_to_chain(message);
        if !fire_event {
            return Ok(Some(chain));
        }

        let bound = query.string_list_variable(vars::PIPELINE_BOUND_PLUGINS);
        let ctx = self
            .plugin_host
            .emit_event(
                PluginEvent::NormalMessageResponded {
                    sender_id: query.sender_id.clone(),
                    response_text: message.plain_text(),
                },
                bound.as_deref(),
            )
            .await?;

        if ctx.prevent_default {
            return Ok(ctx.reply_chain);
        }
        if let Some(substitute) = ctx.reply_chain {
            return Ok(Some(substitute));
        }
        Ok(Some(chain))
    }
}

#[async_trait]
impl Stage for ResponseWrapperStage {
    fn name(&self) -> &'static str {
        "ResponseWrapper"
    }

    async fn initialize(&mut self, config: &PipelineConfig) -> Result<()> {
        self.config = config.clone();
        Ok(())
    }

    async fn process(&self, mut query: Query, _stage_name: &str) -> Result<StageOutput> {
        let Some(last) = query.last_response().cloned() else {
            return Ok(StageOutput::Single(StageResult::interrupt(query)));
        };

        let chain = match last {
            QueryResponse::Chain(chain) => Some(chain),
            QueryResponse::Provider(rm) => {
                let message = rm.message().clone();
                match message.role {
                    Role::Command => {
                        Some(content_to_chain(&message).with_prefix(MessageElement::Text {
                            text: "[bot] ".to_string(),
                        }))
                    }
                    Role::Plugin => Some(content_to_chain(&message)),
                    Role::Assistant => {
                        let has_content = message
                            .content
                            .as_ref()
                            .map(|c| match c {
                                MessageContent::Text(t) => !t.is_empty(),
                                MessageContent::Parts(p) => !p.is_empty(),
                            })
                            .unwrap_or(false);

                        if has_content {
                            // Responded events fire once per logical
                            // message, not per streamed partial.
                            let fire = !rm.is_chunk() || rm.is_final();
                            self.wrap_assistant_content(&query, &message, fire).await?
                        } else if message.has_tool_calls() {
                            let names: Vec<&str> = message
                                .tool_calls
                                .iter()
                                .map(|c| c.function.name.as_str())
                                .collect();
                            let chain =
                                MessageChain::text(format!("调用函数 {}...", names.join(", ")));
                            if self.config.output.misc.track_function_calls {
                                let bound =
                                    query.string_list_variable(vars::PIPELINE_BOUND_PLUGINS);
                                let _ = self
                                    .plugin_host
                                    .emit_event(
                                        PluginEvent::NormalMessageResponded {
                                            sender_id: query.sender_id.clone(),
                                            response_text: chain.plain_text(),
                                        },
                                        bound.as_deref(),
                                    )
                                    .await?;
                            }
                            Some(chain)
                        } else {
                            None
                        }
                    }
                    _ => None,
                }
            }
        };

        match chain {
            Some(chain) => {
                query.resp_message_chain.push(chain);
                Ok(StageOutput::Single(StageResult::cont(query)))
            }
            None => Ok(StageOutput::Single(StageResult::interrupt(query))),
        }
    }
}

fn content_to_chain(message: &Message) -> MessageChain {
    let elements = match &message.content {
        None => Vec::new(),
        Some(MessageContent::Text(text)) => vec![MessageElement::Text { text: text.clone() }],
        Some(MessageContent::Parts(parts)) => parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => MessageElement::Text { text: text.clone() },
                ContentPart::ImageUrl { url } => MessageElement::Image {
                    source: ImageSource::Url(url.clone()),
                },
                ContentPart::ImageBase64 { data } => MessageElement::Image {
                    source: ImageSource::Base64(data.clone()),
                },
                ContentPart::FileUrl { name, url } => MessageElement::File {
                    name: name.clone(),
                    url: Some(url.clone()),
                    path: None,
                    size: None,
                },
            })
            .collect(),
    };
    MessageChain::new(elements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::ResultType;
    use crate::stages::test_support::RecordingAdapter;
    use botway_agents::{MessageChunk, ResponseMessage, ToolCall};
    use botway_common::{MessageEvent, Sender};
    use botway_plugins::StaticPluginHost;

    fn deps() -> StageDeps {
        StageDeps::for_tests(Arc::new(StaticPluginHost::new()))
    }

    async fn stage() -> ResponseWrapperStage {
        let mut stage = ResponseWrapperStage::new(&deps());
        stage.initialize(&PipelineConfig::default()).await.unwrap();
        stage
    }

    fn query_with(resp: QueryResponse) -> Query {
        let event = MessageEvent::friend(
            Sender {
                id: "u1".into(),
                name: "a".into(),
            },
            MessageChain::text("hi"),
            0,
        );
        let mut query = Query::new(1, event, Arc::new(RecordingAdapter::new()), "b", "p");
        query.resp_messages.push(resp);
        query
    }

    async fn run(stage: &ResponseWrapperStage, query: Query) -> StageResult {
        match stage.process(query, "ResponseWrapper").await.unwrap() {
            StageOutput::Single(result) => result,
            StageOutput::Stream(_) => panic!("wrapper is not a generator"),
        }
    }

    #[tokio::test]
    async fn assistant_content_becomes_a_text_chain() {
        let stage = stage().await;
        let query = query_with(QueryResponse::Provider(ResponseMessage::Final(
            Message::assistant("Hello"),
        )));
        let result = run(&stage, query).await;
        assert_eq!(result.result_type, ResultType::Continue);
        assert_eq!(
            result.new_query.resp_message_chain.last().unwrap().plain_text(),
            "Hello"
        );
    }

    #[tokio::test]
    async fn tool_calls_become_an_announcement() {
        let stage = stage().await;
        let query = query_with(QueryResponse::Provider(ResponseMessage::Final(
            Message::assistant_tool_calls(vec![ToolCall::function(
                "t1",
                "plugin-foo-echo",
                "{}",
            )]),
        )));
        let result = run(&stage, query).await;
        assert_eq!(result.result_type, ResultType::Continue);
        assert_eq!(
            result.new_query.resp_message_chain.last().unwrap().plain_text(),
            "调用函数 plugin-foo-echo..."
        );
    }

    #[tokio::test]
    async fn tool_results_are_silent() {
        let stage = stage().await;
        let query = query_with(QueryResponse::Provider(ResponseMessage::Final(
            Message::tool("t1", "{\"ok\":true}"),
        )));
        let result = run(&stage, query).await;
        assert_eq!(result.result_type, ResultType::Interrupt);
        assert!(result.user_notice.is_none());
    }

    #[tokio::test]
    async fn command_output_gets_the_bot_prefix() {
        let stage = stage().await;
        let query = query_with(QueryResponse::Provider(ResponseMessage::Final(
            Message::new(Role::Command, MessageContent::Text("done".into())),
        )));
        let result = run(&stage, query).await;
        assert_eq!(
            result.new_query.resp_message_chain.last().unwrap().plain_text(),
            "[bot] done"
        );
    }

    #[tokio::test]
    async fn ready_made_chains_pass_through() {
        let stage = stage().await;
        let query = query_with(QueryResponse::Chain(MessageChain::text("verbatim")));
        let result = run(&stage, query).await;
        assert_eq!(
            result.new_query.resp_message_chain.last().unwrap().plain_text(),
            "verbatim"
        );
    }

    #[tokio::test]
    async fn chunks_wrap_their_cumulative_content() {
        let stage = stage().await;
        let query = query_with(QueryResponse::Provider(ResponseMessage::Chunk(
            MessageChunk {
                message: Message::assistant("Hel"),
                is_final: false,
                msg_sequence: 1,
            },
        )));
        let result = run(&stage, query).await;
        assert_eq!(result.result_type, ResultType::Continue);
        assert_eq!(
            result.new_query.resp_message_chain.last().unwrap().plain_text(),
            "Hel"
        );
    }
}
