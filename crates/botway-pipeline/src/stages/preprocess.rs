use std::sync::Arc;

use async_trait::async_trait;
use botway_agents::{ContentPart, Message, MessageContent, Role, ToolManager};
use botway_agents::requester::ModelRegistry;
use botway_common::{MessageChain, MessageElement, Result};
use botway_config::PipelineConfig;
use botway_plugins::{PluginEvent, PluginHost, PromptEntry};
use tracing::warn;

use crate::app::StageDeps;
use crate::query::{vars, Query};
use crate::session::SessionManager;
use crate::stage::{Stage, StageOutput, StageResult};

/// Prepares a query for the processor: session and conversation
/// resolution, model binding, tool population, variable assembly and the
/// chain-to-provider-message translation.
pub struct PreProcessorStage {
    session_mgr: Arc<SessionManager>,
    models: Arc<ModelRegistry>,
    tools: Arc<ToolManager>,
    plugin_host: Arc<dyn PluginHost>,
    config: PipelineConfig,
}

impl PreProcessorStage {
    pub fn new(deps: &StageDeps) -> Self {
        Self {
            session_mgr: Arc::clone(&deps.session_mgr),
            models: Arc::clone(&deps.models),
            tools: Arc::clone(&deps.tools),
            plugin_host: Arc::clone(&deps.plugin_host),
            config: PipelineConfig::default(),
        }
    }
}

#[async_trait]
impl Stage for PreProcessorStage {
    fn name(&self) -> &'static str {
        "PreProcessor"
    }

    async fn initialize(&mut self, config: &PipelineConfig) -> Result<()> {
        self.config = config.clone();
        Ok(())
    }

    async fn process(&self, mut query: Query, _stage_name: &str) -> Result<StageOutput> {
        // Session.
        let session = self
            .session_mgr
            .get_session(query.launcher_type, &query.launcher_id);
        query.session = Some(Arc::clone(&session));

        // Model binding for the local agent.
        let agent_cfg = &self.config.ai.local_agent;
        if self.config.ai.runner.runner == "local-agent" {
            match &agent_cfg.model {
                Some(uuid) if self.models.get(uuid).is_some() => {
                    query.use_llm_model_uuid = Some(uuid.clone());
                }
                Some(uuid) => {
                    warn!("configured model '{uuid}' not found; leaving query unbound");
                }
                None => {
                    warn!("pipeline '{}' has no model configured", query.pipeline_uuid);
                }
            }
        }

        // Binding lists become reserved variables before anything reads them.
        query.set_variable(
            vars::PIPELINE_BOUND_PLUGINS,
            serde_json::to_value(&self.config.bound_plugins)?,
        );
        query.set_variable(
            vars::PIPELINE_BOUND_MCP_SERVERS,
            serde_json::to_value(&self.config.bound_mcp_servers)?,
        );
        let plugin_filter = query.string_list_variable(vars::PIPELINE_BOUND_PLUGINS);
        let mcp_filter = query.string_list_variable(vars::PIPELINE_BOUND_MCP_SERVERS);

        let all_tools = self
            .tools
            .get_all_tools(plugin_filter.as_deref(), mcp_filter.as_deref())
            .await;

        // Conversation: copy prompt and history so downstream mutation
        // stays out of persistent state until the runner commits the turn.
        let conversation = self.session_mgr.get_conversation(
            &session,
            &agent_cfg.prompt,
            all_tools.iter().map(|t| t.name.clone()).collect(),
            &query.pipeline_uuid,
            &query.bot_uuid,
        );
        query.prompt = conversation.prompt.messages.clone();
        query.messages = conversation.history();
        query.conversation = Some(Arc::clone(&conversation));

        // History bound: keep the most recent user-led rounds.
        truncate_rounds(&mut query.messages, agent_cfg.max_rounds);

        // Tools only when the bound model can call them.
        let func_call = query
            .use_llm_model_uuid
            .as_deref()
            .and_then(|uuid| self.models.get(uuid))
            .map(|m| m.supports_func_call())
            .unwrap_or(false);
        if func_call {
            query.use_funcs = all_tools;
        }

        // Remaining reserved variables.
        query.set_variable(vars::SESSION_ID, serde_json::json!(query.session_key()));
        query.set_variable(
            vars::CONVERSATION_ID,
            serde_json::json!(conversation.uuid.clone()),
        );
        query.set_variable(
            vars::MSG_CREATE_TIME,
            serde_json::json!(query.message_event.time),
        );
        query.set_variable(
            vars::USER_MESSAGE_TEXT,
            serde_json::json!(query.message_chain.plain_text()),
        );

        // Chain -> provider user message.
        let vision = query
            .use_llm_model_uuid
            .as_deref()
            .and_then(|uuid| self.models.get(uuid))
            .map(|m| m.supports_vision())
            .unwrap_or(false);
        query.user_message = Some(build_user_message(
            &query.message_chain,
            self.config.trigger.misc.combine_quote_message,
            vision,
        ));

        // Plugin hook: handlers may replace both prompt and history.
        let ctx = self
            .plugin_host
            .emit_event(
                PluginEvent::PromptPreProcessing {
                    default_prompt: messages_to_entries(&query.prompt),
                    prompt: messages_to_entries(&query.messages),
                },
                plugin_filter.as_deref(),
            )
            .await?;
        if let PluginEvent::PromptPreProcessing {
            default_prompt,
            prompt,
        } = ctx.event
        {
            query.prompt = entries_to_messages(&default_prompt);
            query.messages = entries_to_messages(&prompt);
        }

        Ok(StageOutput::Single(StageResult::cont(query)))
    }
}

/// Keep only the most recent `max_rounds` user-led rounds of history. A
/// round starts at a user message and runs to the next one.
pub(crate) fn truncate_rounds(messages: &mut Vec<Message>, max_rounds: usize) {
    if max_rounds == 0 {
        messages.clear();
        return;
    }
    let mut rounds = 0;
    let mut cut = 0;
    for (i, message) in messages.iter().enumerate().rev() {
        if message.role == Role::User {
            rounds += 1;
            if rounds == max_rounds {
                cut = i;
                break;
            }
        }
    }
    if rounds >= max_rounds && cut > 0 {
        messages.drain(..cut);
    }
}

/// Translate the inbound chain into a provider user message. Quote parts
/// are inlined when the pipeline combines quotes; images are dropped for
/// models without vision.
fn build_user_message(chain: &MessageChain, combine_quote: bool, vision: bool) -> Message {
    let mut elements: Vec<MessageElement> = Vec::new();
    for el in chain {
        match el {
            MessageElement::Quote { origin, .. } if combine_quote => {
                elements.extend(origin.elements().iter().cloned());
            }
            other => elements.push(other.clone()),
        }
    }

    let mut parts: Vec<ContentPart> = Vec::new();
    for el in &elements {
        match el {
            MessageElement::Text { text } => parts.push(ContentPart::Text { text: text.clone() }),
            MessageElement::Image { source } if vision => match source {
                botway_common::ImageSource::Base64(data) => {
                    parts.push(ContentPart::ImageBase64 { data: data.clone() })
                }
                botway_common::ImageSource::Url(url) => {
                    parts.push(ContentPart::ImageUrl { url: url.clone() })
                }
                botway_common::ImageSource::Path(path) => {
                    warn!("local image path '{path}' not forwarded to the model");
                }
            },
            MessageElement::File { name, url: Some(url), .. } => parts.push(ContentPart::FileUrl {
                name: name.clone(),
                url: url.clone(),
            }),
            _ => {}
        }
    }

    let content = match parts.as_slice() {
        [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
        _ => MessageContent::Parts(parts),
    };
    Message::new(Role::User, content)
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
        Role::Command => "command",
        Role::Plugin => "plugin",
    }
}

fn messages_to_entries(messages: &[Message]) -> Vec<PromptEntry> {
    messages
        .iter()
        .map(|m| PromptEntry {
            role: role_str(m.role).to_string(),
            content: m.plain_text(),
        })
        .collect()
}

fn entries_to_messages(entries: &[PromptEntry]) -> Vec<Message> {
    entries
        .iter()
        .map(|e| {
            let role = match e.role.as_str() {
                "user" => Role::User,
                "assistant" => Role::Assistant,
                "tool" => Role::Tool,
                _ => Role::System,
            };
            Message::new(role, MessageContent::Text(e.content.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use botway_common::ImageSource;

    fn user(text: &str) -> Message {
        Message::user(text)
    }

    fn assistant(text: &str) -> Message {
        Message::assistant(text)
    }

    #[test]
    fn truncation_keeps_whole_recent_rounds() {
        let mut messages = vec![
            user("r1"),
            assistant("a1"),
            user("r2"),
            assistant("a2"),
            user("r3"),
            assistant("a3"),
        ];
        truncate_rounds(&mut messages, 2);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].plain_text(), "r2");
    }

    #[test]
    fn truncation_is_a_noop_under_the_bound() {
        let mut messages = vec![user("r1"), assistant("a1")];
        truncate_rounds(&mut messages, 10);
        assert_eq!(messages.len(), 2);
    }

    #[test]
    fn zero_rounds_clears_history() {
        let mut messages = vec![user("r1"), assistant("a1")];
        truncate_rounds(&mut messages, 0);
        assert!(messages.is_empty());
    }

    #[test]
    fn single_text_chain_becomes_string_content() {
        let chain = MessageChain::new(vec![
            MessageElement::Source {
                message_id: "m".into(),
                time: 0,
            },
            MessageElement::Text { text: "hi".into() },
        ]);
        let msg = build_user_message(&chain, false, false);
        assert_eq!(msg.content, Some(MessageContent::Text("hi".into())));
    }

    #[test]
    fn images_are_dropped_without_vision() {
        let chain = MessageChain::new(vec![
            MessageElement::Text { text: "look".into() },
            MessageElement::Image {
                source: ImageSource::Base64("aGk=".into()),
            },
        ]);
        let without = build_user_message(&chain, false, false);
        assert_eq!(without.content, Some(MessageContent::Text("look".into())));

        let with = build_user_message(&chain, false, true);
        let Some(MessageContent::Parts(parts)) = with.content else {
            panic!("expected parts")
        };
        assert_eq!(parts.len(), 2);
        assert!(matches!(parts[1], ContentPart::ImageBase64 { .. }));
    }

    #[test]
    fn quote_is_inlined_when_combining() {
        let chain = MessageChain::new(vec![
            MessageElement::Quote {
                message_id: "m0".into(),
                origin: MessageChain::text("earlier "),
            },
            MessageElement::Text { text: "reply".into() },
        ]);
        let combined = build_user_message(&chain, true, false);
        let Some(MessageContent::Parts(parts)) = &combined.content else {
            panic!("expected parts")
        };
        assert_eq!(parts.len(), 2);
        assert_eq!(combined.plain_text(), "earlier reply");

        let plain = build_user_message(&chain, false, false);
        assert_eq!(plain.plain_text(), "reply");
    }

    #[test]
    fn files_become_file_url_parts() {
        let chain = MessageChain::new(vec![MessageElement::File {
            name: "doc.pdf".into(),
            url: Some("http://x/doc.pdf".into()),
            path: None,
            size: Some(10),
        }]);
        let msg = build_user_message(&chain, false, false);
        let Some(MessageContent::Parts(parts)) = msg.content else {
            panic!("expected parts")
        };
        assert!(matches!(parts[0], ContentPart::FileUrl { .. }));
    }

    #[test]
    fn prompt_entries_round_trip() {
        let messages = vec![Message::system("s"), user("u")];
        let entries = messages_to_entries(&messages);
        assert_eq!(entries[0].role, "system");
        let back = entries_to_messages(&entries);
        assert_eq!(back[1].role, Role::User);
        assert_eq!(back[1].plain_text(), "u");
    }
}
