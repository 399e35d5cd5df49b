//! Simulated read-committed consumer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eos_core::Message;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{lock, SharedState, SimConfig};
use crate::error::HarnessResult;
use crate::service::{ConsumerSpec, ReadCommittedConsumer};

/// Maximum records taken from one partition per poll.
const FETCH_MAX: usize = 500;

/// Consumer reading every partition of a topic from the beginning, up to
/// each partition's last stable offset.
pub struct SimReadCommittedConsumer {
    state: SharedState,
    spec: ConsumerSpec,
    sim: SimConfig,
    consumed: Arc<Mutex<Vec<Message>>>,
    task: Option<JoinHandle<()>>,
}

impl SimReadCommittedConsumer {
    pub(crate) fn new(state: SharedState, spec: ConsumerSpec, sim: SimConfig) -> Self {
        Self {
            state,
            spec,
            sim,
            consumed: Arc::new(Mutex::new(Vec::new())),
            task: None,
        }
    }
}

async fn poll_loop(
    state: SharedState,
    spec: ConsumerSpec,
    partitions: u32,
    sim: SimConfig,
    consumed: Arc<Mutex<Vec<Message>>>,
) {
    let mut positions = vec![0u64; partitions as usize];
    loop {
        let mut received = 0;
        for (partition, position) in (0..partitions).zip(positions.iter_mut()) {
            let fetch = lock(&state).fetch(&spec.topic, partition, *position, FETCH_MAX, true);
            let fetch = match fetch {
                Ok(fetch) => fetch,
                Err(e) => {
                    debug!(group = %spec.group_id, partition, error = %e, "fetch failed");
                    continue;
                }
            };
            *position = fetch.next_offset;

            let mut sink = consumed.lock().expect("consumed lock poisoned");
            for (offset, payload) in fetch.records {
                match Message::parse(&payload) {
                    Ok(message) => {
                        sink.push(message);
                        received += 1;
                    }
                    Err(e) => warn!(partition, offset, error = %e, "skipping invalid payload"),
                }
            }
        }

        if received == 0 {
            tokio::time::sleep(sim.fetch_interval).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

#[async_trait]
impl ReadCommittedConsumer for SimReadCommittedConsumer {
    async fn start(&mut self) -> HarnessResult<()> {
        if self.task.is_some() {
            return Ok(());
        }
        let partitions = lock(&self.state).partition_count(&self.spec.topic)?;
        self.task = Some(tokio::spawn(poll_loop(
            Arc::clone(&self.state),
            self.spec.clone(),
            partitions,
            self.sim.clone(),
            Arc::clone(&self.consumed),
        )));
        debug!(topic = %self.spec.topic, group = %self.spec.group_id, "consumer started");
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    fn num_consumed(&self) -> usize {
        self.consumed.lock().expect("consumed lock poisoned").len()
    }

    fn messages_consumed(&self) -> Vec<Message> {
        self.consumed.lock().expect("consumed lock poisoned").clone()
    }
}
