use std::sync::Arc;

use async_trait::async_trait;
use botway_common::{Error, Result};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::warn;

use super::{Runner, RunnerInput};
use crate::message::{Message, MessageContent, ResponseMessage};
use crate::requester::{LlmModel, LlmRequest, ModelRegistry};
use crate::tools::ToolManager;

/// Maximum number of tool-use round-trips before the loop is forcibly stopped.
const MAX_TOOL_ITERATIONS: usize = 10;

/// The tool-calling agent: retrieval-augment the request, call the model,
/// execute any requested tools, feed results back, repeat until the model
/// stops calling tools.
pub struct LocalAgentRunner {
    models: Arc<ModelRegistry>,
    tools: Arc<ToolManager>,
}

impl LocalAgentRunner {
    pub fn new(models: Arc<ModelRegistry>, tools: Arc<ToolManager>) -> Self {
        Self { models, tools }
    }

    /// One streamed model round: forward every chunk unchanged, return the
    /// assistant message assembled from the terminal chunk.
    async fn stream_round(
        &self,
        model: &LlmModel,
        request: &LlmRequest,
        tx: &mpsc::Sender<ResponseMessage>,
    ) -> Result<Message> {
        let mut stream = model.requester.invoke_llm_stream(request).await?;
        let mut last = None;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if tx
                .send(ResponseMessage::Chunk(chunk.clone()))
                .await
                .is_err()
            {
                return Err(Error::Cancelled);
            }
            last = Some(chunk);
        }
        // Chunk content is cumulative, so the terminal chunk carries the
        // whole assistant message.
        Ok(last.map(|c| c.message).unwrap_or_else(|| Message::assistant("")))
    }
}

#[async_trait]
impl Runner for LocalAgentRunner {
    fn name(&self) -> &str {
        "local-agent"
    }

    async fn run(&self, input: RunnerInput, tx: mpsc::Sender<ResponseMessage>) -> Result<()> {
        let model_uuid = input
            .model_uuid
            .as_deref()
            .ok_or_else(|| Error::ModelNotFound("no model bound to this pipeline".into()))?;
        let model = self.models.resolve(model_uuid)?;

        let mut req: Vec<Message> =
            Vec::with_capacity(input.prompt.len() + input.history.len() + 2);
        req.extend(input.prompt.iter().cloned());
        req.extend(input.history.iter().cloned());
        req.push(input.user_message.clone());

        if let Some(kb) = &input.knowledge_base {
            match kb.retrieve(&input.query_text).await {
                Ok(hits) if !hits.is_empty() => {
                    let context: Vec<&str> = hits.iter().map(|h| h.text.as_str()).collect();
                    req.push(Message::user(format!(
                        "Relevant context:\n{}",
                        context.join("\n")
                    )));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("knowledge retrieval failed, continuing without context: {e}");
                }
            }
        }

        for _iteration in 0..MAX_TOOL_ITERATIONS {
            let request = LlmRequest {
                model_name: model.name.clone(),
                messages: req.clone(),
                tools: input.tools.clone(),
                extra_args: input.extra_args.clone(),
            };

            let assistant = if input.streaming && model.requester.supports_streaming() {
                let mut msg = self.stream_round(&model, &request, &tx).await?;
                apply_think_policy(&mut msg, input.remove_think);
                msg
            } else {
                let mut msg = model.requester.invoke_llm(&request).await?;
                apply_think_policy(&mut msg, input.remove_think);
                if tx
                    .send(ResponseMessage::Final(msg.clone()))
                    .await
                    .is_err()
                {
                    return Err(Error::Cancelled);
                }
                msg
            };

            req.push(assistant.clone());

            if !assistant.has_tool_calls() {
                return Ok(());
            }

            for call in &assistant.tool_calls {
                let content = match serde_json::from_str::<serde_json::Value>(
                    &call.function.arguments,
                ) {
                    Ok(args) => match self.tools.execute(&call.function.name, args).await {
                        Ok(result) => result.to_string(),
                        Err(e) => format!("err: {e}"),
                    },
                    Err(e) => format!("err: {e}"),
                };
                let tool_msg = Message::tool(&call.id, content);
                if tx
                    .send(ResponseMessage::Final(tool_msg.clone()))
                    .await
                    .is_err()
                {
                    return Err(Error::Cancelled);
                }
                req.push(tool_msg);
            }
        }

        Err(Error::Agent(format!(
            "tool loop exceeded maximum of {MAX_TOOL_ITERATIONS} iterations"
        )))
    }
}

/// Apply the pipeline's reasoning policy: drop thinking entirely, or
/// inline it as a `<think>` block ahead of the answer.
fn apply_think_policy(msg: &mut Message, remove_think: bool) {
    if remove_think {
        if let Some(MessageContent::Text(text)) = &msg.content {
            msg.content = Some(MessageContent::Text(strip_think_tags(text)));
        }
        msg.reasoning_content = None;
    } else if let Some(reasoning) = msg.reasoning_content.take() {
        let answer = msg.plain_text();
        msg.content = Some(MessageContent::Text(format!(
            "<think>\n{reasoning}\n</think>\n{answer}"
        )));
    }
}

fn strip_think_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("<think>") {
        out.push_str(&rest[..start]);
        match rest[start..].find("</think>") {
            Some(end) => rest = &rest[start + end + "</think>".len()..],
            None => {
                // Unterminated block: drop everything after the tag.
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out.trim_start().to_string()
}
