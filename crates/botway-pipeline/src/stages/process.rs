use std::sync::Arc;

use async_trait::async_trait;
use botway_agents::runner::{RunnerInput, RunnerRegistry};
use botway_agents::{Message, MessageContent, ResponseMessage, Role};
use botway_common::{Error, Result};
use botway_config::PipelineConfig;
use botway_knowledge::KnowledgeBaseRegistry;
use botway_plugins::{CommandReturn, PluginEvent, PluginHost};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::app::StageDeps;
use crate::query::{vars, Query, QueryResponse};
use crate::stage::{Stage, StageOutput, StageResult};
use crate::store::ConversationStore;

/// Dispatches a prepared query to the command handler or the chat
/// handler. This is the pipeline's generator stage: every produced
/// response re-enters the tail of the pipeline as its own pass.
pub struct MessageProcessorStage {
    plugin_host: Arc<dyn PluginHost>,
    runners: Arc<RunnerRegistry>,
    knowledge: Arc<KnowledgeBaseRegistry>,
    store: Option<Arc<ConversationStore>>,
    config: PipelineConfig,
}

impl MessageProcessorStage {
    pub fn new(deps: &StageDeps) -> Self {
        Self {
            plugin_host: Arc::clone(&deps.plugin_host),
            runners: Arc::clone(&deps.runners),
            knowledge: Arc::clone(&deps.knowledge),
            store: deps.store.clone(),
            config: PipelineConfig::default(),
        }
    }

    fn command_invocation<'a>(&self, text: &'a str) -> Option<&'a str> {
        if !self.config.command.enable {
            return None;
        }
        self.config
            .command
            .prefixes
            .iter()
            .find_map(|p| text.strip_prefix(p.as_str()))
    }
}

#[async_trait]
impl Stage for MessageProcessorStage {
    fn name(&self) -> &'static str {
        "MessageProcessor"
    }

    async fn initialize(&mut self, config: &PipelineConfig) -> Result<()> {
        self.config = config.clone();
        Ok(())
    }

    async fn process(&self, query: Query, _stage_name: &str) -> Result<StageOutput> {
        let (tx, rx) = mpsc::channel(16);
        let text = query.message_chain.plain_text();

        let worker = Worker {
            plugin_host: Arc::clone(&self.plugin_host),
            runners: Arc::clone(&self.runners),
            knowledge: Arc::clone(&self.knowledge),
            store: self.store.clone(),
            config: self.config.clone(),
        };

        match self.command_invocation(&text) {
            Some(invocation) => {
                let invocation = invocation.to_string();
                tokio::spawn(async move { worker.handle_command(query, invocation, tx).await });
            }
            None => {
                tokio::spawn(async move { worker.handle_chat(query, tx).await });
            }
        }

        Ok(StageOutput::Stream(rx))
    }
}

/// The spawned half of the processor; owns everything it needs so the
/// generator task outlives the `process` call.
struct Worker {
    plugin_host: Arc<dyn PluginHost>,
    runners: Arc<RunnerRegistry>,
    knowledge: Arc<KnowledgeBaseRegistry>,
    store: Option<Arc<ConversationStore>>,
    config: PipelineConfig,
}

impl Worker {
    fn interrupt_for(&self, query: Query, err: &Error) -> StageResult {
        let user_notice = if self.config.output.misc.hide_exception {
            "Request failed".to_string()
        } else {
            err.user_message()
        };
        StageResult::interrupt(query)
            .with_user_notice(user_notice)
            .with_error_notice(err.to_string())
    }

    async fn handle_command(
        &self,
        mut query: Query,
        invocation: String,
        tx: mpsc::Sender<StageResult>,
    ) {
        let mut words = invocation.split_whitespace();
        let Some(command) = words.next().map(str::to_string) else {
            return;
        };
        let params: Vec<String> = words.map(str::to_string).collect();
        let bound = query.string_list_variable(vars::PIPELINE_BOUND_PLUGINS);

        let event = if query.message_event.is_group() {
            PluginEvent::GroupCommandSent {
                group_id: query.launcher_id.clone(),
                sender_id: query.sender_id.clone(),
                command: command.clone(),
                params: params.clone(),
            }
        } else {
            PluginEvent::PersonCommandSent {
                sender_id: query.sender_id.clone(),
                command: command.clone(),
                params: params.clone(),
            }
        };

        match self.plugin_host.emit_event(event, bound.as_deref()).await {
            Ok(ctx) => {
                if ctx.prevent_default {
                    if let Some(chain) = ctx.reply_chain {
                        query.resp_messages.push(QueryResponse::Chain(chain));
                        let _ = tx.send(StageResult::cont(query.clone())).await;
                    }
                    return;
                }
            }
            Err(e) => {
                let _ = tx.send(self.interrupt_for(query, &e)).await;
                return;
            }
        }

        let returns = match self
            .plugin_host
            .execute_command(&command, &params, bound.as_deref())
            .await
        {
            Ok(returns) => returns,
            Err(e) => vec![CommandReturn::Error {
                message: e.to_string(),
            }],
        };

        for ret in returns {
            let message = command_return_to_message(ret);
            query
                .resp_messages
                .push(QueryResponse::Provider(ResponseMessage::Final(message)));
            if tx.send(StageResult::cont(query.clone())).await.is_err() {
                return;
            }
        }
    }

    async fn handle_chat(&self, mut query: Query, tx: mpsc::Sender<StageResult>) {
        let text = query.message_chain.plain_text();
        let event = if query.message_event.is_group() {
            PluginEvent::GroupNormalMessageReceived {
                group_id: query.launcher_id.clone(),
                sender_id: query.sender_id.clone(),
                text: text.clone(),
            }
        } else {
            PluginEvent::PersonNormalMessageReceived {
                sender_id: query.sender_id.clone(),
                text: text.clone(),
            }
        };

        let bound = query.string_list_variable(vars::PIPELINE_BOUND_PLUGINS);
        match self.plugin_host.emit_event(event, bound.as_deref()).await {
            Ok(ctx) => {
                if ctx.prevent_default {
                    if let Some(chain) = ctx.reply_chain {
                        query.resp_messages.push(QueryResponse::Chain(chain));
                        let _ = tx.send(StageResult::cont(query.clone())).await;
                    }
                    return;
                }
                if let Some(alter) = ctx.alter {
                    if let Some(user_message) = &mut query.user_message {
                        user_message.content = Some(MessageContent::Text(alter));
                    }
                }
            }
            Err(e) => {
                let _ = tx.send(self.interrupt_for(query, &e)).await;
                return;
            }
        }

        let runner = match self.runners.get(&self.config.ai.runner.runner) {
            Ok(runner) => runner,
            Err(e) => {
                let _ = tx.send(self.interrupt_for(query, &e)).await;
                return;
            }
        };

        let knowledge_base = self
            .config
            .ai
            .local_agent
            .knowledge_base
            .as_deref()
            .and_then(|uuid| match self.knowledge.get(uuid) {
                Ok(kb) => Some(kb),
                Err(e) => {
                    warn!("knowledge base unavailable: {e}");
                    None
                }
            });

        let Some(user_message) = query.user_message.clone() else {
            let err = Error::Agent("query reached the processor without a user message".into());
            let _ = tx.send(self.interrupt_for(query, &err)).await;
            return;
        };
        let conversation = query.conversation.clone();
        let conversation_uuid = conversation
            .as_ref()
            .map(|c| c.uuid.clone())
            .unwrap_or_default();

        let input = RunnerInput {
            prompt: query.prompt.clone(),
            history: query.messages.clone(),
            user_message: user_message.clone(),
            tools: query.use_funcs.clone(),
            model_uuid: query.use_llm_model_uuid.clone(),
            conversation_uuid,
            query_text: text,
            streaming: query.adapter.is_stream_output_supported(),
            remove_think: self.config.trigger.misc.remove_think,
            knowledge_base,
            extra_args: serde_json::Value::Null,
        };

        let (runner_tx, mut runner_rx) = mpsc::channel::<ResponseMessage>(16);
        let runner_task = {
            let runner = Arc::clone(&runner);
            tokio::spawn(async move { runner.run(input, runner_tx).await })
        };

        // Non-chunk trail persisted after a successful run. A streamed
        // round contributes its terminal chunk as the assistant entry.
        let mut trail: Vec<Message> = Vec::new();
        while let Some(produced) = runner_rx.recv().await {
            match &produced {
                ResponseMessage::Final(m) => trail.push(m.clone()),
                ResponseMessage::Chunk(c) if c.is_final => trail.push(c.message.clone()),
                ResponseMessage::Chunk(_) => {}
            }
            query
                .resp_messages
                .push(QueryResponse::Provider(produced));
            if tx.send(StageResult::cont(query.clone())).await.is_err() {
                return;
            }
        }

        match runner_task.await {
            Ok(Ok(())) => {
                if let Some(conversation) = conversation {
                    conversation.append_turn(user_message.clone(), trail.clone());
                    if let Some(store) = &self.store {
                        let mut persisted = vec![user_message];
                        persisted.extend(trail);
                        if let Err(e) = store
                            .upsert_conversation(
                                &conversation.uuid,
                                &query.session_key(),
                                &query.pipeline_uuid,
                                &query.bot_uuid,
                            )
                            .and_then(|_| store.append_messages(&conversation.uuid, &persisted))
                        {
                            warn!("failed to persist turn: {e}");
                        }
                    }
                }
            }
            Ok(Err(Error::Cancelled)) => {
                debug!("runner cancelled for query {}", query.query_id);
            }
            Ok(Err(e)) => {
                let _ = tx.send(self.interrupt_for(query, &e)).await;
            }
            Err(e) => {
                let err = Error::Agent(format!("runner task panicked: {e}"));
                let _ = tx.send(self.interrupt_for(query, &err)).await;
            }
        }
    }
}

fn command_return_to_message(ret: CommandReturn) -> Message {
    use botway_agents::ContentPart;
    let content = match ret {
        CommandReturn::Text { text } => MessageContent::Text(text),
        CommandReturn::Error { message } => MessageContent::Text(message),
        CommandReturn::ImageUrl { url } => {
            MessageContent::Parts(vec![ContentPart::ImageUrl { url }])
        }
        CommandReturn::ImageBase64 { data } => {
            MessageContent::Parts(vec![ContentPart::ImageBase64 { data }])
        }
        CommandReturn::FileUrl { name, url } => {
            MessageContent::Parts(vec![ContentPart::FileUrl { name, url }])
        }
    };
    Message::new(Role::Command, content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_returns_map_to_command_role_messages() {
        let msg = command_return_to_message(CommandReturn::Text { text: "ok".into() });
        assert_eq!(msg.role, Role::Command);
        assert_eq!(msg.plain_text(), "ok");

        let msg = command_return_to_message(CommandReturn::ImageUrl {
            url: "http://x/i.png".into(),
        });
        let Some(MessageContent::Parts(parts)) = msg.content else {
            panic!("expected parts")
        };
        assert_eq!(parts.len(), 1);
    }
}
