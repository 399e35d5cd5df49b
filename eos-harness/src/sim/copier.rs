//! Simulated transactional copier.
//!
//! Each instance is a tokio task running a consume-transform-produce loop:
//! read a batch from the input partition at the group's committed offset,
//! write it to the output topic inside a transaction, then commit the
//! transaction together with the new group offset. Any failure aborts the
//! transaction and the loop rewinds to the committed offset.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use eos_core::{Message, PartitionId, TransactionalId};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{lock, OffsetCommit, SharedState, SimConfig, SimResult};
use crate::error::HarnessResult;
use crate::service::{CopierSpec, TransactionalCopier};

/// Records written between pauses inside a transaction.
const RECORDS_PER_PAUSE: usize = 50;

/// Copier task over one input partition.
pub struct SimTransactionalCopier {
    state: SharedState,
    spec: CopierSpec,
    sim: SimConfig,
    stall_at: Option<f64>,
    done: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl SimTransactionalCopier {
    pub(crate) fn new(
        state: SharedState,
        spec: CopierSpec,
        sim: SimConfig,
        stall_at: Option<f64>,
    ) -> Self {
        Self {
            state,
            spec,
            sim,
            stall_at,
            done: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
            task: None,
        }
    }

    fn partition(&self) -> u32 {
        u32::try_from(self.spec.input_partition.get()).unwrap_or(u32::MAX)
    }
}

#[allow(clippy::cast_precision_loss)]
fn percent(position: u64, end: u64) -> f64 {
    if end == 0 {
        return 100.0;
    }
    position as f64 * 100.0 / end as f64
}

struct CopyTask {
    state: SharedState,
    spec: CopierSpec,
    partition: u32,
    sim: SimConfig,
    stall_at: Option<f64>,
    done: Arc<AtomicBool>,
    stop_requested: Arc<AtomicBool>,
}

impl CopyTask {
    fn transactional_id(&self) -> &TransactionalId {
        &self.spec.transactional_id
    }

    async fn run(self) {
        loop {
            if self.stop_requested.load(Ordering::Acquire) {
                return;
            }
            let init = lock(&self.state).init_transactions(self.transactional_id());
            let epoch = match init {
                Ok(epoch) => epoch,
                Err(e) => {
                    debug!(transactional_id = %self.transactional_id(), error = %e, "init failed, retrying");
                    tokio::time::sleep(self.sim.retry_backoff).await;
                    continue;
                }
            };
            debug!(transactional_id = %self.transactional_id(), epoch, "transactions initialized");

            // Returns only when the session must be re-initialized.
            if self.copy_session(epoch).await {
                return;
            }
        }
    }

    /// Copies batches under one epoch. Returns true when the task should exit.
    async fn copy_session(&self, epoch: u64) -> bool {
        loop {
            if self.stop_requested.load(Ordering::Acquire) {
                return true;
            }

            let (position, end) = {
                let state = lock(&self.state);
                let position = state.committed_offset(
                    &self.spec.consumer_group,
                    &self.spec.input_topic,
                    self.partition,
                );
                (position, state.end_offset(&self.spec.input_topic, self.partition))
            };
            let end = match end {
                Ok(end) => end,
                Err(e) => {
                    warn!(transactional_id = %self.transactional_id(), error = %e, "input partition unavailable");
                    tokio::time::sleep(self.sim.retry_backoff).await;
                    continue;
                }
            };

            if position >= end {
                self.done.store(true, Ordering::Release);
                info!(transactional_id = %self.transactional_id(), copied = end, "copied all messages");
                return true;
            }
            if self.stall_at.is_some_and(|at| percent(position, end) >= at) {
                tokio::time::sleep(self.sim.retry_backoff).await;
                continue;
            }

            match self.copy_batch(epoch, position).await {
                Ok(()) => {}
                Err(e) if e.is_fenced() => {
                    warn!(transactional_id = %self.transactional_id(), error = %e, "copier fenced");
                    return true;
                }
                Err(e) => {
                    debug!(transactional_id = %self.transactional_id(), error = %e, "transaction failed, aborting");
                    let aborted = lock(&self.state).abort_transaction(self.transactional_id(), epoch);
                    tokio::time::sleep(self.sim.retry_backoff).await;
                    if aborted.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn copy_batch(&self, epoch: u64, position: u64) -> SimResult<()> {
        let (fetch, output_partitions) = {
            let state = lock(&self.state);
            let fetch = state.fetch(
                &self.spec.input_topic,
                self.partition,
                position,
                self.spec.transaction_size as usize,
                true,
            )?;
            (fetch, state.partition_count(&self.spec.output_topic)?)
        };

        for (i, (_, payload)) in fetch.records.iter().enumerate() {
            let partition = Message::parse(payload).map_or(0, |m| {
                u32::try_from(m.value() % u64::from(output_partitions)).unwrap_or(0)
            });
            lock(&self.state).append_transactional(
                self.transactional_id(),
                epoch,
                &self.spec.output_topic,
                partition,
                payload.clone(),
            )?;
            if (i + 1) % RECORDS_PER_PAUSE == 0 {
                tokio::time::sleep(self.sim.txn_pause).await;
            }
        }
        tokio::time::sleep(self.sim.txn_pause).await;

        lock(&self.state).commit_transaction(
            self.transactional_id(),
            epoch,
            Some(OffsetCommit {
                group: self.spec.consumer_group.clone(),
                topic: self.spec.input_topic.clone(),
                partition: self.partition,
                offset: fetch.next_offset,
            }),
        )
    }
}

#[async_trait]
impl TransactionalCopier for SimTransactionalCopier {
    fn transactional_id(&self) -> &TransactionalId {
        &self.spec.transactional_id
    }

    fn input_partition(&self) -> PartitionId {
        self.spec.input_partition
    }

    async fn start(&mut self) -> HarnessResult<()> {
        if self.alive() {
            return Ok(());
        }
        self.stop_requested.store(false, Ordering::Release);
        let task = CopyTask {
            state: Arc::clone(&self.state),
            spec: self.spec.clone(),
            partition: self.partition(),
            sim: self.sim.clone(),
            stall_at: self.stall_at,
            done: Arc::clone(&self.done),
            stop_requested: Arc::clone(&self.stop_requested),
        };
        self.task = Some(tokio::spawn(task.run()));
        debug!(transactional_id = %self.spec.transactional_id, "copier task started");
        Ok(())
    }

    async fn stop(&mut self, clean: bool) -> HarnessResult<()> {
        let Some(mut task) = self.task.take() else {
            return Ok(());
        };
        if clean {
            self.stop_requested.store(true, Ordering::Release);
            if tokio::time::timeout(self.sim.clean_stop_grace, &mut task)
                .await
                .is_err()
            {
                warn!(transactional_id = %self.spec.transactional_id, "copier ignored stop request, killing");
                task.abort();
                let _ = task.await;
            }
        } else {
            task.abort();
            let _ = task.await;
        }
        debug!(transactional_id = %self.spec.transactional_id, clean, "copier task stopped");
        Ok(())
    }

    fn alive(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn progress_percent(&self) -> f64 {
        let state = lock(&self.state);
        let position = state.committed_offset(
            &self.spec.consumer_group,
            &self.spec.input_topic,
            self.partition(),
        );
        state
            .end_offset(&self.spec.input_topic, self.partition())
            .map_or(0.0, |end| percent(position, end))
    }

    fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::ScenarioConfig;
    use crate::service::Backend;
    use crate::sim::SimBackend;

    fn spec(backend: &SimBackend) -> CopierSpec {
        let config = backend.config();
        CopierSpec {
            transactional_id: TransactionalId::new("retrying-id"),
            input_topic: config.input_topic.clone(),
            input_partition: PartitionId::new(0),
            output_topic: config.output_topic.clone(),
            consumer_group: config.consumer_group.clone(),
            transaction_size: config.transaction_size,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_init_retry_releases_cluster_state_while_backing_off() {
        let backend = SimBackend::new(ScenarioConfig::default());
        // No broker is running, so every init attempt fails and backs off.
        let mut copier = backend.transactional_copier(spec(&backend)).unwrap();
        copier.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(copier.alive());
        assert!(backend.state().try_lock().is_ok());
        copier.stop(false).await.unwrap();
    }

    #[test]
    fn test_copy_task_future_is_send() {
        fn assert_send<T: Send>(_: &T) {}

        let backend = SimBackend::new(ScenarioConfig::default());
        let task = CopyTask {
            state: backend.state(),
            spec: spec(&backend),
            partition: 0,
            sim: SimConfig::default(),
            stall_at: None,
            done: Arc::new(AtomicBool::new(false)),
            stop_requested: Arc::new(AtomicBool::new(false)),
        };
        assert_send(&task.run());
    }
}
