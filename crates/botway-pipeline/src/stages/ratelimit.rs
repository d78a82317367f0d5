use std::time::Duration;

use async_trait::async_trait;
use botway_common::Result;
use botway_config::{PipelineConfig, RateLimitConfig, RateLimitStrategy};
use dashmap::DashMap;
use tokio::time::Instant;

use crate::query::Query;
use crate::stage::{Stage, StageOutput, StageResult};

struct Window {
    started: Instant,
    count: u64,
}

/// Fixed-window per-session rate limiter. `drop` interrupts over-limit
/// queries; `wait` parks them until the window rolls over.
pub struct RateLimitStage {
    config: RateLimitConfig,
    windows: DashMap<String, Window>,
}

impl RateLimitStage {
    pub fn new() -> Self {
        Self {
            config: RateLimitConfig::default(),
            windows: DashMap::new(),
        }
    }

    fn window_len(&self) -> Duration {
        Duration::from_secs(self.config.window_length.max(1))
    }

    /// Try to take one slot in the current window. Returns the remaining
    /// time of the window when the limit is hit.
    fn try_acquire(&self, key: &str) -> std::result::Result<(), Duration> {
        let now = Instant::now();
        let window_len = self.window_len();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= window_len {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count < self.config.limitation {
            entry.count += 1;
            Ok(())
        } else {
            let elapsed = now.duration_since(entry.started);
            Err(window_len.saturating_sub(elapsed))
        }
    }
}

impl Default for RateLimitStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for RateLimitStage {
    fn name(&self) -> &'static str {
        "RateLimitCheck"
    }

    async fn initialize(&mut self, config: &PipelineConfig) -> Result<()> {
        self.config = config.ratelimit.clone();
        Ok(())
    }

    async fn process(&self, query: Query, _stage_name: &str) -> Result<StageOutput> {
        let key = query.session_key();
        loop {
            match self.try_acquire(&key) {
                Ok(()) => return Ok(StageOutput::Single(StageResult::cont(query))),
                Err(wait) => match self.config.strategy {
                    RateLimitStrategy::Drop => {
                        let notice = format!("Dropping message from {key}: rate limited");
                        return Ok(StageOutput::Single(
                            StageResult::interrupt(query).with_console_notice(notice),
                        ));
                    }
                    RateLimitStrategy::Wait => {
                        tokio::time::sleep(wait).await;
                    }
                },
            }
        }
    }
}
