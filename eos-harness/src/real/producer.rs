//! Idempotent producer over librdkafka.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use eos_core::Message;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message as _;
use rdkafka::producer::{BaseProducer, BaseRecord, DeliveryResult, Producer, ProducerContext};
use rdkafka::ClientContext;
use tracing::{debug, warn};

use super::client_config;
use super::worker::{StopSignal, Worker, STOP_NOW};
use crate::error::HarnessResult;
use crate::service::{IdempotentProducer, ProducerSpec};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Records acknowledged messages from delivery reports.
struct AckContext {
    acked: Arc<Mutex<Vec<Message>>>,
}

impl ClientContext for AckContext {}

impl ProducerContext for AckContext {
    type DeliveryOpaque = ();

    fn delivery(&self, result: &DeliveryResult<'_>, _opaque: Self::DeliveryOpaque) {
        match result {
            Ok(record) => {
                if let Some(message) = record.payload().and_then(|p| Message::parse(p).ok()) {
                    self.acked.lock().expect("acked lock poisoned").push(message);
                }
            }
            Err((e, _)) => debug!(error = %e, "delivery failed"),
        }
    }
}

/// Producer with `enable.idempotence=true` and `acks=all`.
pub struct RealIdempotentProducer {
    bootstrap_servers: String,
    spec: ProducerSpec,
    acked: Arc<Mutex<Vec<Message>>>,
    worker: Worker,
}

impl RealIdempotentProducer {
    pub(crate) fn new(bootstrap_servers: &str, spec: ProducerSpec) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.to_string(),
            spec,
            acked: Arc::new(Mutex::new(Vec::new())),
            worker: Worker::default(),
        }
    }
}

fn produce(producer: &BaseProducer<AckContext>, topic: &str, max_messages: u64, stop: &StopSignal) {
    for value in 0..max_messages {
        let payload = Message::new(value).to_payload();
        let mut record = BaseRecord::<(), [u8]>::to(topic).payload(payload.as_ref());
        loop {
            if stop.is_set() {
                return;
            }
            match producer.send(record) {
                Ok(()) => break,
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    record = returned;
                    producer.poll(POLL_INTERVAL);
                }
                Err((e, _)) => {
                    warn!(topic, value, error = %e, "send failed");
                    return;
                }
            }
        }
        producer.poll(Duration::ZERO);
    }

    while !stop.is_set() && producer.in_flight_count() > 0 {
        producer.poll(POLL_INTERVAL);
    }
    debug!(topic, count = max_messages, "producer finished");
}

#[async_trait]
impl IdempotentProducer for RealIdempotentProducer {
    async fn start(&mut self) -> HarnessResult<()> {
        if self.worker.is_running() {
            return Ok(());
        }
        let producer: BaseProducer<AckContext> = client_config(&self.bootstrap_servers)
            .set("enable.idempotence", "true")
            .set("acks", "all")
            .create_with_context(AckContext {
                acked: Arc::clone(&self.acked),
            })?;
        let spec = self.spec.clone();
        self.worker.spawn(format!("producer-{}", spec.topic), move |stop| {
            produce(&producer, &spec.topic, spec.max_messages, &stop);
        })
    }

    async fn stop(&mut self) {
        self.worker.stop(STOP_NOW).await;
    }

    fn num_acked(&self) -> u64 {
        self.acked.lock().expect("acked lock poisoned").len() as u64
    }

    fn acked(&self) -> Vec<Message> {
        self.acked.lock().expect("acked lock poisoned").clone()
    }
}
