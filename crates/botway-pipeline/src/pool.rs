use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use botway_channels::PlatformAdapter;
use botway_common::{Error, MessageEvent, Result};
use tokio::sync::Notify;
use tracing::debug;

use crate::query::Query;

struct PoolState {
    next_query_id: u64,
    queue: VecDeque<Query>,
    in_flight: usize,
}

/// Bounded admission queue of inbound events. `admit` is called from
/// adapter listener callbacks; the dispatcher drains the queue and runs
/// each query through its pipeline.
pub struct QueryPool {
    max_in_flight: usize,
    state: Mutex<PoolState>,
    notify: Notify,
}

impl QueryPool {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            state: Mutex::new(PoolState {
                next_query_id: 1,
                queue: VecDeque::new(),
                in_flight: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Admit one inbound event. Fails with `PoolFull` when the number of
    /// in-flight queries (queued plus running) has reached the bound.
    pub fn admit(
        &self,
        event: MessageEvent,
        adapter: Arc<dyn PlatformAdapter>,
        bot_uuid: &str,
        pipeline_uuid: &str,
    ) -> Result<u64> {
        let query_id = {
            let mut state = self.state.lock().unwrap();
            if state.in_flight >= self.max_in_flight {
                return Err(Error::PoolFull);
            }
            let query_id = state.next_query_id;
            state.next_query_id += 1;
            state.in_flight += 1;
            let query = Query::new(query_id, event, adapter, bot_uuid, pipeline_uuid);
            state.queue.push_back(query);
            query_id
        };
        debug!("admitted query {query_id}");
        self.notify.notify_one();
        Ok(query_id)
    }

    /// Wait for the next admitted query.
    pub async fn next(&self) -> Query {
        loop {
            if let Some(query) = self.state.lock().unwrap().queue.pop_front() {
                return query;
            }
            self.notify.notified().await;
        }
    }

    /// Mark one query as done; pairs with a successful `admit`.
    pub fn release(&self) {
        let mut state = self.state.lock().unwrap();
        state.in_flight = state.in_flight.saturating_sub(1);
    }

    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight
    }
}

/// Drop guard that releases a pool slot when the query's root task ends,
/// including on cancellation.
pub struct PoolSlot {
    pool: Arc<QueryPool>,
}

impl PoolSlot {
    pub fn new(pool: Arc<QueryPool>) -> Self {
        Self { pool }
    }
}

impl Drop for PoolSlot {
    fn drop(&mut self) {
        self.pool.release();
    }
}
