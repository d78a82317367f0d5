//! End-to-end pipeline runs with an in-process adapter and a scripted
//! requester standing in for the platform and the LLM.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use botway_agents::requester::{LlmModel, LlmRequest, LlmRequester, MessageChunkStream, ModelRegistry};
use botway_agents::runner::{LocalAgentRunner, RunnerRegistry};
use botway_agents::{Message, MessageChunk, ToolCall, ToolManager};
use botway_channels::{EventListener, EventType, PlatformAdapter};
use botway_common::{
    LauncherType, MessageChain, MessageElement, MessageEvent, Result, Sender,
};
use botway_config::PipelineConfig;
use botway_knowledge::{Embedder, KnowledgeBase, KnowledgeBaseRegistry, VectorStore};
use botway_pipeline::{Application, Query, SessionManager, StageDeps, StageEngine};
use botway_plugins::{Plugin, PluginInfo, PluginToolSpec, StaticPluginHost};

#[derive(Debug, Clone)]
struct SentChunk {
    chain: MessageChain,
    is_final: bool,
}

struct MockAdapter {
    stream_supported: bool,
    replies: Mutex<Vec<MessageChain>>,
    chunks: Mutex<Vec<SentChunk>>,
    listeners: botway_channels::ListenerSet,
}

impl MockAdapter {
    fn new(stream_supported: bool) -> Self {
        Self {
            stream_supported,
            replies: Mutex::new(Vec::new()),
            chunks: Mutex::new(Vec::new()),
            listeners: botway_channels::ListenerSet::new(),
        }
    }

    fn reply_texts(&self) -> Vec<String> {
        self.replies
            .lock()
            .unwrap()
            .iter()
            .map(MessageChain::plain_text)
            .collect()
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> &str {
        "mock"
    }

    async fn run(&self) -> Result<()> {
        Ok(())
    }

    async fn kill(&self) -> Result<bool> {
        Ok(true)
    }

    fn register_listener(&self, event_type: EventType, listener: EventListener) {
        self.listeners.register(event_type, listener);
    }

    fn unregister_listener(&self, event_type: EventType) {
        self.listeners.unregister(event_type);
    }

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
        _resp_message_id: u64,
        chain: &MessageChain,
        _quote_origin: bool,
        is_final: bool,
    ) -> Result<()> {
        self.chunks.lock().unwrap().push(SentChunk {
            chain: chain.clone(),
            is_final,
        });
        Ok(())
    }

    fn is_stream_output_supported(&self) -> bool {
        self.stream_supported
    }
}

/// Replays scripted responses and records every request it sees.
struct ScriptedRequester {
    responses: Mutex<Vec<Message>>,
    chunks: Option<Vec<MessageChunk>>,
    requests: Mutex<Vec<LlmRequest>>,
}

impl ScriptedRequester {
    fn new(responses: Vec<Message>) -> Self {
        Self {
            responses: Mutex::new(responses),
            chunks: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    fn with_chunks(chunks: Vec<MessageChunk>) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            chunks: Some(chunks),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl LlmRequester for ScriptedRequester {
    fn requester_id(&self) -> &str {
        "scripted"
    }

    async fn invoke_llm(&self, request: &LlmRequest) -> Result<Message> {
        self.requests.lock().unwrap().push(request.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(botway_common::Error::Agent("script exhausted".into()));
        }
        Ok(responses.remove(0))
    }

    async fn invoke_llm_stream(&self, request: &LlmRequest) -> Result<MessageChunkStream> {
        self.requests.lock().unwrap().push(request.clone());
        let chunks = self
            .chunks
            .clone()
            .ok_or_else(|| botway_common::Error::Agent("no chunks scripted".into()))?;
        Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
    }

    fn supports_streaming(&self) -> bool {
        self.chunks.is_some()
    }
}

struct EchoPlugin;

#[async_trait]
impl Plugin for EchoPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "foo".into(),
            version: "0.1.0".into(),
            description: "echo tool".into(),
        }
    }

    fn tools(&self) -> Vec<PluginToolSpec> {
        vec![PluginToolSpec {
            name: "echo".into(),
            description: "echo".into(),
            parameters: serde_json::json!({"type": "object"}),
        }]
    }

    async fn execute_tool(
        &self,
        _name: &str,
        _args: serde_json::Value,
    ) -> Result<serde_json::Value> {
        Ok(serde_json::json!({"ok": true}))
    }
}

/// Embeds to [1, 0] for queries containing "A-ish" text and mirrors for
/// others; good enough to exercise ordering by distance.
struct FakeEmbedder;

#[async_trait]
impl Embedder for FakeEmbedder {
    fn model_uuid(&self) -> &str {
        "fake"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

struct Harness {
    deps: StageDeps,
    requester: Arc<ScriptedRequester>,
}

fn harness(requester: ScriptedRequester) -> Harness {
    let requester = Arc::new(requester);
    let models = Arc::new(ModelRegistry::new());
    models.register(Arc::new(LlmModel {
        uuid: "m-1".into(),
        name: "scripted-model".into(),
        abilities: vec!["func_call".into()],
        requester: requester.clone(),
    }));

    let mut host = StaticPluginHost::new();
    host.register(Arc::new(EchoPlugin));
    let plugin_host: Arc<dyn botway_plugins::PluginHost> = Arc::new(host);

    let mut tools = ToolManager::new();
    tools.add_loader(Arc::new(botway_agents::tools::PluginToolLoader::new(
        Arc::clone(&plugin_host),
    )));
    let tools = Arc::new(tools);

    let mut runners = RunnerRegistry::new();
    runners.register(Arc::new(LocalAgentRunner::new(
        Arc::clone(&models),
        Arc::clone(&tools),
    )));

    let deps = StageDeps {
        session_mgr: Arc::new(SessionManager::new(1)),
        models,
        tools,
        plugin_host,
        runners: Arc::new(runners),
        knowledge: Arc::new(KnowledgeBaseRegistry::new()),
        store: None,
    };
    Harness { deps, requester }
}

fn pipeline_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.ai.local_agent.model = Some("m-1".into());
    config
}

fn inbound_event() -> MessageEvent {
    MessageEvent::friend(
        Sender {
            id: "42".into(),
            name: "alice".into(),
        },
        MessageChain::new(vec![
            MessageElement::Source {
                message_id: "1".into(),
                time: 1_700_000_000,
            },
            MessageElement::Text { text: "Hi".into() },
        ]),
        1_700_000_000,
    )
}

async fn run_query(harness: &Harness, config: PipelineConfig, adapter: Arc<MockAdapter>) {
    let app = Arc::new(Application::new(harness.deps.clone(), 20));
    app.load_pipeline(config).await.unwrap();
    let pipeline = app.pipeline("default").unwrap();
    let query = Query::new(1, inbound_event(), adapter, "bot-1", "default");
    StageEngine::run(&pipeline, query).await;
}

#[tokio::test]
async fn simple_text_chat_round_trip() {
    let harness = harness(ScriptedRequester::new(vec![Message::assistant("Hello")]));
    let adapter = Arc::new(MockAdapter::new(false));
    run_query(&harness, pipeline_config(), Arc::clone(&adapter)).await;

    assert_eq!(adapter.reply_texts(), vec!["Hello"]);

    // The conversation gained exactly user + assistant.
    let session = harness
        .deps
        .session_mgr
        .get_session(LauncherType::Person, "42");
    let conversation = session.active_conversation().unwrap();
    let history = conversation.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].plain_text(), "Hi");
    assert_eq!(history[1].plain_text(), "Hello");
}

#[tokio::test]
async fn tool_round_trip_announces_then_answers() {
    let harness = harness(ScriptedRequester::new(vec![
        Message::assistant_tool_calls(vec![ToolCall::function(
            "t1",
            "plugin-foo-echo",
            "{\"x\":1}",
        )]),
        Message::assistant("Done"),
    ]));
    let adapter = Arc::new(MockAdapter::new(false));
    run_query(&harness, pipeline_config(), Arc::clone(&adapter)).await;

    assert_eq!(
        adapter.reply_texts(),
        vec!["调用函数 plugin-foo-echo...", "Done"]
    );

    let session = harness
        .deps
        .session_mgr
        .get_session(LauncherType::Person, "42");
    let history = session.active_conversation().unwrap().history();
    assert_eq!(history.len(), 4);
    assert_eq!(history[0].plain_text(), "Hi");
    assert!(history[1].has_tool_calls());
    assert_eq!(history[2].tool_call_id.as_deref(), Some("t1"));
    assert_eq!(history[2].plain_text(), "{\"ok\":true}");
    assert_eq!(history[3].plain_text(), "Done");
}

#[tokio::test]
async fn access_control_blocks_before_the_llm() {
    let harness = harness(ScriptedRequester::new(vec![Message::assistant("nope")]));
    let adapter = Arc::new(MockAdapter::new(false));

    let mut config = pipeline_config();
    config.trigger.access_control.mode = botway_config::AccessControlMode::Whitelist;
    config.trigger.access_control.whitelist = vec!["person_99".into()];
    run_query(&harness, config, Arc::clone(&adapter)).await;

    assert!(adapter.reply_texts().is_empty());
    assert!(adapter.chunks.lock().unwrap().is_empty());
    assert_eq!(harness.requester.request_count(), 0);
}

#[tokio::test]
async fn long_text_is_forwarded_as_a_transcript() {
    let long_text = "x".repeat(4096);
    let harness = harness(ScriptedRequester::new(vec![Message::assistant(
        long_text.clone(),
    )]));
    let adapter = Arc::new(MockAdapter::new(false));

    let mut config = pipeline_config();
    config.output.long_text_processing.threshold = 200;
    run_query(&harness, config, Arc::clone(&adapter)).await;

    let replies = adapter.replies.lock().unwrap();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].len(), 1);
    let MessageElement::Forward { nodes } = &replies[0].elements()[0] else {
        panic!("expected a forward part");
    };
    assert_eq!(nodes.len(), 1);
    assert_eq!(nodes[0].chain.plain_text(), long_text);
    assert_eq!(nodes[0].chain.len(), 1);
}

#[tokio::test]
async fn streaming_chunks_are_throttled_and_cumulative() {
    let chunks: Vec<MessageChunk> = (1..=20u64)
        .map(|seq| MessageChunk {
            message: Message::assistant("tok ".repeat(seq as usize).trim_end().to_string()),
            is_final: seq == 20,
            msg_sequence: seq,
        })
        .collect();
    let harness = harness(ScriptedRequester::with_chunks(chunks));
    let adapter = Arc::new(MockAdapter::new(true));
    run_query(&harness, pipeline_config(), Arc::clone(&adapter)).await;

    let sent = adapter.chunks.lock().unwrap();
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].chain.plain_text(), "tok ".repeat(8).trim_end());
    assert_eq!(sent[1].chain.plain_text(), "tok ".repeat(16).trim_end());
    assert_eq!(sent[2].chain.plain_text(), "tok ".repeat(20).trim_end());
    assert!(!sent[0].is_final);
    assert!(!sent[1].is_final);
    assert!(sent[2].is_final);
}

#[tokio::test]
async fn knowledge_base_augments_the_first_request() {
    let harness = harness(ScriptedRequester::new(vec![Message::assistant("ok")]));

    let store = Arc::new(VectorStore::in_memory().unwrap());
    store
        .insert_file(&botway_knowledge::KbFile {
            uuid: "f1".into(),
            kb_id: "kb1".into(),
            name: "notes.txt".into(),
            extension: "txt".into(),
            status: botway_knowledge::FileStatus::Completed,
        })
        .unwrap();
    // "A" sits closer to the query embedding than "B".
    store.insert_chunk("kb1", "f1", 0, "A", &[1.0, 0.1]).unwrap();
    store.insert_chunk("kb1", "f1", 1, "B", &[1.0, 0.4]).unwrap();

    let kb = Arc::new(
        KnowledgeBase::new("kb1", "docs", "", 2, 100, 10, store, Arc::new(FakeEmbedder)).unwrap(),
    );
    let mut knowledge = KnowledgeBaseRegistry::new();
    knowledge.register(kb);
    let mut deps = harness.deps.clone();
    deps.knowledge = Arc::new(knowledge);
    let harness = Harness {
        deps,
        requester: Arc::clone(&harness.requester),
    };

    let mut config = pipeline_config();
    config.ai.local_agent.knowledge_base = Some("kb1".into());
    config.ai.local_agent.prompt = vec![botway_config::PromptMessage {
        role: "system".into(),
        content: "sys".into(),
    }];
    let adapter = Arc::new(MockAdapter::new(false));
    run_query(&harness, config, Arc::clone(&adapter)).await;

    let requests = harness.requester.requests.lock().unwrap();
    assert_eq!(requests.len(), 1);
    let messages = &requests[0].messages;
    // prompt, user message, then the retrieval context in distance order.
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].plain_text(), "sys");
    assert_eq!(messages[1].plain_text(), "Hi");
    assert_eq!(messages[2].plain_text(), "Relevant context:\nA\nB");
}

#[tokio::test]
async fn dispatcher_runs_admitted_queries() {
    let harness = harness(ScriptedRequester::new(vec![Message::assistant("pong")]));
    let adapter = Arc::new(MockAdapter::new(false));

    let app = Arc::new(Application::new(harness.deps.clone(), 20));
    app.load_pipeline(pipeline_config()).await.unwrap();

    let dispatcher = tokio::spawn(Arc::clone(&app).run_dispatcher());

    let adapter_dyn: Arc<dyn PlatformAdapter> = Arc::clone(&adapter) as Arc<dyn PlatformAdapter>;
    app.pool
        .admit(inbound_event(), adapter_dyn, "bot-1", "default")
        .unwrap();

    // Wait for the reply to land.
    for _ in 0..100 {
        if !adapter.reply_texts().is_empty() {
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    assert_eq!(adapter.reply_texts(), vec!["pong"]);
    assert_eq!(app.pool.in_flight(), 0);

    app.shutdown();
    let _ = dispatcher.await;
}

#[tokio::test]
async fn runner_errors_surface_as_a_single_notice() {
    // Empty script: the first invoke fails.
    let harness = harness(ScriptedRequester::new(vec![]));
    let adapter = Arc::new(MockAdapter::new(false));

    let mut config = pipeline_config();
    config.output.misc.hide_exception = true;
    run_query(&harness, config, Arc::clone(&adapter)).await;

    assert_eq!(adapter.reply_texts(), vec!["Request failed"]);
}

#[tokio::test]
async fn exception_echo_reveals_the_error() {
    let harness = harness(ScriptedRequester::new(vec![]));
    let adapter = Arc::new(MockAdapter::new(false));

    let mut config = pipeline_config();
    config.output.misc.hide_exception = false;
    run_query(&harness, config, Arc::clone(&adapter)).await;

    let replies = adapter.reply_texts();
    assert_eq!(replies.len(), 1);
    assert!(replies[0].contains("script exhausted"));
}
