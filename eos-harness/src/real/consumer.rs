//! Read-committed consumer over librdkafka.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eos_core::Message;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::message::Message as _;
use tracing::{debug, warn};

use super::client_config;
use super::worker::{Worker, STOP_NOW};
use crate::error::HarnessResult;
use crate::service::{ConsumerSpec, ReadCommittedConsumer};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Consumer with `isolation.level=read_committed`, reading from the earliest offset.
pub struct RealReadCommittedConsumer {
    bootstrap_servers: String,
    spec: ConsumerSpec,
    consumed: Arc<Mutex<Vec<Message>>>,
    worker: Worker,
}

impl RealReadCommittedConsumer {
    pub(crate) fn new(bootstrap_servers: &str, spec: ConsumerSpec) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.to_string(),
            spec,
            consumed: Arc::new(Mutex::new(Vec::new())),
            worker: Worker::default(),
        }
    }
}

#[async_trait]
impl ReadCommittedConsumer for RealReadCommittedConsumer {
    async fn start(&mut self) -> HarnessResult<()> {
        if self.worker.is_running() {
            return Ok(());
        }
        let consumer: BaseConsumer = client_config(&self.bootstrap_servers)
            .set("group.id", &self.spec.group_id)
            .set("isolation.level", "read_committed")
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .create()?;
        consumer.subscribe(&[self.spec.topic.as_str()])?;

        let consumed = Arc::clone(&self.consumed);
        let group = self.spec.group_id.clone();
        self.worker.spawn(format!("consumer-{group}"), move |stop| {
            while !stop.is_set() {
                match consumer.poll(POLL_INTERVAL) {
                    Some(Ok(record)) => match record.payload().map(Message::parse) {
                        Some(Ok(message)) => {
                            consumed.lock().expect("consumed lock poisoned").push(message);
                        }
                        _ => warn!(
                            partition = record.partition(),
                            offset = record.offset(),
                            "skipping invalid payload"
                        ),
                    },
                    Some(Err(e)) => debug!(%group, error = %e, "poll failed"),
                    None => {}
                }
            }
        })?;
        debug!(topic = %self.spec.topic, group = %self.spec.group_id, "consumer started");
        Ok(())
    }

    async fn stop(&mut self) {
        self.worker.stop(STOP_NOW).await;
    }

    fn num_consumed(&self) -> usize {
        self.consumed.lock().expect("consumed lock poisoned").len()
    }

    fn messages_consumed(&self) -> Vec<Message> {
        self.consumed.lock().expect("consumed lock poisoned").clone()
    }
}
