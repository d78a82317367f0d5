use async_trait::async_trait;
use botway_common::{Error, MessageChain, Result};
use botway_config::PipelineConfig;
use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::app::StageDeps;
use crate::query::Query;
use crate::stages;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Continue,
    Interrupt,
}

/// Outcome of one stage pass over one query.
pub struct StageResult {
    pub result_type: ResultType,
    pub new_query: Query,
    /// Delivered to the originating chat; the only user-visible notice.
    pub user_notice: Option<String>,
    pub console_notice: Option<String>,
    pub debug_notice: Option<String>,
    pub error_notice: Option<String>,
}

impl StageResult {
    pub fn cont(new_query: Query) -> Self {
        Self {
            result_type: ResultType::Continue,
            new_query,
            user_notice: None,
            console_notice: None,
            debug_notice: None,
            error_notice: None,
        }
    }

    pub fn interrupt(new_query: Query) -> Self {
        Self {
            result_type: ResultType::Interrupt,
            new_query,
            user_notice: None,
            console_notice: None,
            debug_notice: None,
            error_notice: None,
        }
    }

    pub fn with_user_notice(mut self, notice: impl Into<String>) -> Self {
        self.user_notice = Some(notice.into());
        self
    }

    pub fn with_console_notice(mut self, notice: impl Into<String>) -> Self {
        self.console_notice = Some(notice.into());
        self
    }

    pub fn with_debug_notice(mut self, notice: impl Into<String>) -> Self {
        self.debug_notice = Some(notice.into());
        self
    }

    pub fn with_error_notice(mut self, notice: impl Into<String>) -> Self {
        self.error_notice = Some(notice.into());
        self
    }
}

/// What a stage hands back: one result, or a stream of results for
/// generator stages that fork a query into several responses.
pub enum StageOutput {
    Single(StageResult),
    Stream(mpsc::Receiver<StageResult>),
}

/// A named, ordered unit of the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    /// One-shot setup at pipeline load.
    async fn initialize(&mut self, config: &PipelineConfig) -> Result<()> {
        let _ = config;
        Ok(())
    }

    async fn process(&self, query: Query, stage_name: &str) -> Result<StageOutput>;
}

/// A loaded pipeline: config plus its initialized stage chain in the
/// fixed default order.
pub struct RuntimePipeline {
    pub uuid: String,
    pub name: String,
    pub config: PipelineConfig,
    stages: Vec<Box<dyn Stage>>,
}

impl RuntimePipeline {
    /// Build the default stage chain and run each stage's one-shot
    /// initialization against the pipeline config.
    pub async fn assemble(config: PipelineConfig, deps: &StageDeps) -> Result<Self> {
        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(stages::ban::BanSessionCheckStage::new()),
            Box::new(stages::ratelimit::RateLimitStage::new()),
            Box::new(stages::preprocess::PreProcessorStage::new(deps)),
            Box::new(stages::process::MessageProcessorStage::new(deps)),
            Box::new(stages::wrapper::ResponseWrapperStage::new(deps)),
            Box::new(stages::longtext::LongTextProcessStage::new()),
            Box::new(stages::sendback::SendResponseBackStage::new()),
        ];
        for stage in &mut stages {
            stage.initialize(&config).await?;
        }
        info!(
            "pipeline '{}' ({}) loaded with {} stages",
            config.name,
            config.uuid,
            stages.len()
        );
        Ok(Self {
            uuid: config.uuid.clone(),
            name: config.name.clone(),
            config,
            stages,
        })
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }
}

/// Drives a query through a pipeline's stage chain. The engine owns no
/// data; it borrows the pipeline and moves queries.
pub struct StageEngine;

impl StageEngine {
    pub async fn run(pipeline: &RuntimePipeline, query: Query) {
        Self::run_from(pipeline, 0, query).await;
    }

    /// Run stages `[start..]` on the query. Generator stages fan out: each
    /// CONTINUE entry recursively drives the tail of the pipeline to
    /// completion before the next entry is pulled, so sub-runs of one
    /// query stay serialized.
    fn run_from(pipeline: &RuntimePipeline, start: usize, query: Query) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let mut query = query;
            let mut i = start;
            while i < pipeline.stages.len() {
                let stage = &pipeline.stages[i];
                let name = stage.name();
                query.current_stage_name = Some(name);
                let snapshot = query.clone();

                match stage.process(query, name).await {
                    Ok(StageOutput::Single(result)) => {
                        Self::log_notices(name, &result);
                        match result.result_type {
                            ResultType::Continue => {
                                query = result.new_query;
                                i += 1;
                            }
                            ResultType::Interrupt => {
                                Self::deliver_user_notice(pipeline, &result).await;
                                return;
                            }
                        }
                    }
                    Ok(StageOutput::Stream(mut rx)) => {
                        while let Some(result) = rx.recv().await {
                            Self::log_notices(name, &result);
                            match result.result_type {
                                ResultType::Continue => {
                                    Self::run_from(pipeline, i + 1, result.new_query).await;
                                }
                                ResultType::Interrupt => {
                                    Self::deliver_user_notice(pipeline, &result).await;
                                }
                            }
                        }
                        return;
                    }
                    Err(Error::Cancelled) => {
                        debug!("query {} cancelled in stage {name}", snapshot.query_id);
                        return;
                    }
                    Err(e) => {
                        Self::handle_stage_error(pipeline, name, snapshot, e).await;
                        return;
                    }
                }
            }
        })
    }

    fn log_notices(stage: &str, result: &StageResult) {
        if let Some(notice) = &result.console_notice {
            info!("[{stage}] {notice}");
        }
        if let Some(notice) = &result.debug_notice {
            debug!("[{stage}] {notice}");
        }
        if let Some(notice) = &result.error_notice {
            error!("[{stage}] {notice}");
        }
    }

    /// Terminal notice path: send the user notice straight back through
    /// the adapter, bypassing the remaining pipeline stages.
    async fn deliver_user_notice(pipeline: &RuntimePipeline, result: &StageResult) {
        let Some(notice) = &result.user_notice else {
            return;
        };
        let query = &result.new_query;
        let chain = MessageChain::text(notice.clone());
        if let Err(e) = query
            .adapter
            .reply_message(
                &query.message_event,
                &chain,
                pipeline.config.output.misc.quote_origin,
            )
            .await
        {
            warn!("failed to deliver notice for query {}: {e}", query.query_id);
        }
    }

    /// Wrap an escaped stage error into the interrupt contract: log it,
    /// then send exactly one textual reply gated by the exception-echo
    /// setting.
    async fn handle_stage_error(
        pipeline: &RuntimePipeline,
        stage: &str,
        query: Query,
        err: Error,
    ) {
        let user_notice = if pipeline.config.output.misc.hide_exception {
            "Request failed".to_string()
        } else {
            err.user_message()
        };
        let result = StageResult::interrupt(query)
            .with_user_notice(user_notice)
            .with_error_notice(err.to_string())
            .with_debug_notice(format!("{err:?}"));
        Self::log_notices(stage, &result);
        Self::deliver_user_notice(pipeline, &result).await;
    }
}
