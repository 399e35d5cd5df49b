//! Simulated idempotent producer.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use eos_core::Message;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::{lock, SharedState, SimConfig, SimFaults};
use crate::error::HarnessResult;
use crate::service::{IdempotentProducer, ProducerSpec};

/// Messages produced between yields to the runtime.
const YIELD_EVERY: u64 = 1_000;

/// Producer writing `0..max_messages` round-robin across partitions.
///
/// Lost acknowledgments make it resend the same sequence number, which the
/// cluster deduplicates.
pub struct SimIdempotentProducer {
    state: SharedState,
    spec: ProducerSpec,
    sim: SimConfig,
    ack_limit: Option<u64>,
    ack_loss_rate: f64,
    acked: Arc<Mutex<Vec<Message>>>,
    task: Option<JoinHandle<()>>,
}

impl SimIdempotentProducer {
    pub(crate) fn new(
        state: SharedState,
        spec: ProducerSpec,
        sim: SimConfig,
        faults: &SimFaults,
    ) -> Self {
        Self {
            state,
            spec,
            sim,
            ack_limit: faults.ack_limit,
            ack_loss_rate: faults.ack_loss_rate,
            acked: Arc::new(Mutex::new(Vec::new())),
            task: None,
        }
    }
}

struct ProduceTask {
    state: SharedState,
    topic: String,
    max_messages: u64,
    partitions: u32,
    producer_id: u64,
    ack_limit: Option<u64>,
    ack_loss_rate: f64,
    sim: SimConfig,
    acked: Arc<Mutex<Vec<Message>>>,
}

impl ProduceTask {
    async fn run(self) {
        let mut rng = ChaCha8Rng::seed_from_u64(self.sim.seed);
        let mut sequences = vec![0u64; self.partitions as usize];
        let mut retries = 0u64;

        for value in 0..self.max_messages {
            if self.ack_limit.is_some_and(|limit| value >= limit) {
                debug!(topic = %self.topic, acked = value, "producer stalled");
                return;
            }

            let partition = u32::try_from(value % u64::from(self.partitions)).unwrap_or(0);
            let sequence = sequences[partition as usize];
            let message = Message::new(value);

            loop {
                let result = lock(&self.state).append(
                    self.producer_id,
                    &self.topic,
                    partition,
                    sequence,
                    message.to_payload(),
                );
                match result {
                    Ok(_) if self.ack_loss_rate > 0.0 && rng.gen_bool(self.ack_loss_rate) => {
                        trace!(%message, "acknowledgment lost, resending");
                        retries += 1;
                        tokio::task::yield_now().await;
                    }
                    Ok(_) => break,
                    Err(e) => {
                        debug!(%message, error = %e, "send failed, retrying");
                        tokio::time::sleep(self.sim.retry_backoff).await;
                    }
                }
            }

            sequences[partition as usize] += 1;
            self.acked.lock().expect("acked lock poisoned").push(message);
            if value % YIELD_EVERY == YIELD_EVERY - 1 {
                tokio::task::yield_now().await;
            }
        }
        debug!(topic = %self.topic, count = self.max_messages, retries, "producer finished");
    }
}

#[async_trait]
impl IdempotentProducer for SimIdempotentProducer {
    async fn start(&mut self) -> HarnessResult<()> {
        if self.task.is_some() {
            return Ok(());
        }
        let (partitions, producer_id) = {
            let mut state = lock(&self.state);
            (
                state.partition_count(&self.spec.topic)?,
                state.allocate_producer_id(),
            )
        };
        let task = ProduceTask {
            state: Arc::clone(&self.state),
            topic: self.spec.topic.clone(),
            max_messages: self.spec.max_messages,
            partitions,
            producer_id,
            ack_limit: self.ack_limit,
            ack_loss_rate: self.ack_loss_rate,
            sim: self.sim.clone(),
            acked: Arc::clone(&self.acked),
        };
        self.task = Some(tokio::spawn(task.run()));
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            let _ = task.await;
        }
    }

    fn num_acked(&self) -> u64 {
        self.acked.lock().expect("acked lock poisoned").len() as u64
    }

    fn acked(&self) -> Vec<Message> {
        self.acked.lock().expect("acked lock poisoned").clone()
    }
}
