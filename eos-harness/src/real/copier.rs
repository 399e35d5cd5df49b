//! Transactional copier over librdkafka.
//!
//! One thread per copier. Each transaction reads up to `transaction_size`
//! records from the assigned input partition, writes them to the output
//! topic and commits the consumed offsets through the producer. A failed
//! transaction is aborted and the consumer rewinds to the last committed
//! offset.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eos_core::{PartitionId, TransactionalId};
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, KafkaResult, RDKafkaErrorCode};
use rdkafka::message::Message as _;
use rdkafka::producer::{BaseProducer, BaseRecord, Producer};
use rdkafka::{Offset, TopicPartitionList};
use tracing::{debug, info, warn};

use super::client_config;
use super::worker::{StopSignal, Worker, STOP_GRACEFUL, STOP_NOW};
use crate::error::HarnessResult;
use crate::service::{CopierSpec, TransactionalCopier};

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Positions published by the copy thread.
#[derive(Debug, Default)]
struct Progress {
    committed: AtomicU64,
    end: AtomicU64,
    done: AtomicBool,
}

/// Copier thread bound to one input partition and one transactional id.
pub struct RealTransactionalCopier {
    bootstrap_servers: String,
    spec: CopierSpec,
    progress: Arc<Progress>,
    worker: Worker,
}

impl RealTransactionalCopier {
    pub(crate) fn new(bootstrap_servers: &str, spec: CopierSpec) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.to_string(),
            spec,
            progress: Arc::new(Progress::default()),
            worker: Worker::default(),
        }
    }
}

struct CopyLoop {
    consumer: BaseConsumer,
    producer: BaseProducer,
    spec: CopierSpec,
    partition: i32,
    progress: Arc<Progress>,
}

impl CopyLoop {
    fn committed(&self) -> KafkaResult<i64> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition(&self.spec.input_topic, self.partition);
        let committed = self.consumer.committed_offsets(tpl, REQUEST_TIMEOUT)?;
        Ok(committed
            .find_partition(&self.spec.input_topic, self.partition)
            .and_then(|elem| elem.offset().to_raw())
            .filter(|offset| *offset >= 0)
            .unwrap_or(0))
    }

    /// Reassigns the input partition at the last committed offset.
    fn rewind(&self) -> KafkaResult<i64> {
        let position = self.committed()?;
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &self.spec.input_topic,
            self.partition,
            Offset::Offset(position),
        )?;
        self.consumer.assign(&tpl)?;
        Ok(position)
    }

    fn send(&self, payload: &[u8]) -> KafkaResult<()> {
        let mut record = BaseRecord::to(&self.spec.output_topic)
            .key(payload)
            .payload(payload);
        loop {
            match self.producer.send(record) {
                Ok(()) => return Ok(()),
                Err((KafkaError::MessageProduction(RDKafkaErrorCode::QueueFull), returned)) => {
                    record = returned;
                    self.producer.poll(POLL_INTERVAL);
                }
                Err((e, _)) => return Err(e),
            }
        }
    }

    /// Copies one transaction starting at `position`. Returns the next position.
    fn copy_transaction(&self, position: i64, stop: &StopSignal) -> KafkaResult<Option<i64>> {
        self.producer.begin_transaction()?;
        let mut next = position;
        let mut copied = 0;
        while copied < self.spec.transaction_size {
            if stop.is_immediate() {
                // Leave the transaction open for the coordinator to fence.
                return Ok(None);
            }
            match self.consumer.poll(POLL_INTERVAL) {
                Some(Ok(record)) => {
                    self.send(record.payload().unwrap_or_default())?;
                    next = record.offset() + 1;
                    copied += 1;
                }
                Some(Err(e)) => return Err(e),
                None => break,
            }
        }

        if copied == 0 {
            self.producer.abort_transaction(REQUEST_TIMEOUT)?;
            return Ok(Some(position));
        }

        let mut offsets = TopicPartitionList::new();
        offsets.add_partition_offset(&self.spec.input_topic, self.partition, Offset::Offset(next))?;
        let group = self
            .consumer
            .group_metadata()
            .ok_or(KafkaError::ConsumerCommit(RDKafkaErrorCode::InvalidGroupId))?;
        self.producer
            .send_offsets_to_transaction(&offsets, &group, REQUEST_TIMEOUT)?;
        self.producer.commit_transaction(REQUEST_TIMEOUT)?;
        debug!(transactional_id = %self.spec.transactional_id, copied, next, "transaction committed");
        Ok(Some(next))
    }

    fn run(&self, stop: &StopSignal) -> KafkaResult<()> {
        self.producer.init_transactions(REQUEST_TIMEOUT)?;
        let mut position = self.rewind()?;

        while !stop.is_set() {
            let (_, end) =
                self.consumer
                    .fetch_watermarks(&self.spec.input_topic, self.partition, REQUEST_TIMEOUT)?;
            self.progress.end.store(non_negative(end), Ordering::Release);
            self.progress
                .committed
                .store(non_negative(position), Ordering::Release);
            if position >= end {
                self.progress.done.store(true, Ordering::Release);
                info!(transactional_id = %self.spec.transactional_id, copied = end, "copied all messages");
                return Ok(());
            }

            match self.copy_transaction(position, stop) {
                Ok(Some(next)) => position = next,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!(transactional_id = %self.spec.transactional_id, error = %e, "transaction failed, aborting");
                    self.producer.abort_transaction(REQUEST_TIMEOUT)?;
                    position = self.rewind()?;
                }
            }
        }
        Ok(())
    }
}

fn non_negative(offset: i64) -> u64 {
    u64::try_from(offset).unwrap_or(0)
}

#[async_trait]
impl TransactionalCopier for RealTransactionalCopier {
    fn transactional_id(&self) -> &TransactionalId {
        &self.spec.transactional_id
    }

    fn input_partition(&self) -> PartitionId {
        self.spec.input_partition
    }

    async fn start(&mut self) -> HarnessResult<()> {
        if self.worker.is_running() {
            return Ok(());
        }
        let consumer: BaseConsumer = client_config(&self.bootstrap_servers)
            .set("group.id", &self.spec.consumer_group)
            .set("isolation.level", "read_committed")
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;
        let producer: BaseProducer = client_config(&self.bootstrap_servers)
            .set("transactional.id", self.spec.transactional_id.as_str())
            .set("enable.idempotence", "true")
            .create()?;
        let copy = CopyLoop {
            consumer,
            producer,
            partition: i32::try_from(self.spec.input_partition.get()).unwrap_or(i32::MAX),
            spec: self.spec.clone(),
            progress: Arc::clone(&self.progress),
        };

        let name = format!("copier-{}", self.spec.transactional_id);
        self.worker.spawn(name, move |stop| {
            if let Err(e) = copy.run(&stop) {
                warn!(transactional_id = %copy.spec.transactional_id, error = %e, "copier exited");
            }
        })?;
        debug!(transactional_id = %self.spec.transactional_id, "copier thread started");
        Ok(())
    }

    async fn stop(&mut self, clean: bool) -> HarnessResult<()> {
        self.worker
            .stop(if clean { STOP_GRACEFUL } else { STOP_NOW })
            .await;
        debug!(transactional_id = %self.spec.transactional_id, clean, "copier thread stopped");
        Ok(())
    }

    fn alive(&self) -> bool {
        self.worker.is_running()
    }

    #[allow(clippy::cast_precision_loss)]
    fn progress_percent(&self) -> f64 {
        let end = self.progress.end.load(Ordering::Acquire);
        if end == 0 {
            return 0.0;
        }
        self.progress.committed.load(Ordering::Acquire) as f64 * 100.0 / end as f64
    }

    fn is_done(&self) -> bool {
        self.progress.done.load(Ordering::Acquire)
    }
}
