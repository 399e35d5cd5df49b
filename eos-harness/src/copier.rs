//! The copier pool: named transactional copy streams.
//!
//! Each [`CopyStream`] owns one copier bound to one input partition and one
//! transactional identity for its whole life. Restarts reuse the same
//! identity so the messaging system can fence the previous instance and
//! resolve its dangling transaction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use eos_core::{PartitionId, TransactionalId};
use tracing::{debug, info, warn};

use crate::config::ScenarioConfig;
use crate::error::HarnessResult;
use crate::service::{Backend, CopierSpec, TransactionalCopier};
use crate::waiter::Waiter;

/// One supervised transactional copier.
pub struct CopyStream {
    copier: Box<dyn TransactionalCopier>,
    transactional_id: TransactionalId,
    partition: PartitionId,
    /// Highest progress observed, as `f64` bits. Never decreases.
    progress_high_water: AtomicU64,
    /// Latched once the copier reports done.
    done: AtomicBool,
    /// Progress at the last bounce gate.
    checkpoint: f64,
    restarts: u32,
}

impl CopyStream {
    fn new(copier: Box<dyn TransactionalCopier>) -> Self {
        let transactional_id = copier.transactional_id().clone();
        let partition = copier.input_partition();
        Self {
            copier,
            transactional_id,
            partition,
            progress_high_water: AtomicU64::new(0f64.to_bits()),
            done: AtomicBool::new(false),
            checkpoint: 0.0,
            restarts: 0,
        }
    }

    /// The identity this stream commits under. Stable across restarts.
    #[must_use]
    pub const fn transactional_id(&self) -> &TransactionalId {
        &self.transactional_id
    }

    /// The input partition this stream copies.
    #[must_use]
    pub const fn partition(&self) -> PartitionId {
        self.partition
    }

    /// Returns true while the copier process runs.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.copier.alive()
    }

    /// Progress in percent, clamped so it never goes backwards.
    ///
    /// A restarted process may report less than its predecessor did; the
    /// stream keeps the highest value observed.
    #[must_use]
    pub fn progress_percent(&self) -> f64 {
        let reported = self.copier.progress_percent().clamp(0.0, 100.0);
        let previous = self
            .progress_high_water
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |bits| {
                (reported > f64::from_bits(bits)).then(|| reported.to_bits())
            })
            .unwrap_or_else(|bits| bits);
        f64::from_bits(previous).max(reported)
    }

    /// Returns true once the copier has copied its whole partition.
    ///
    /// Latches: once true it stays true.
    #[must_use]
    pub fn is_done(&self) -> bool {
        if self.done.load(Ordering::Acquire) {
            return true;
        }
        if self.copier.is_done() {
            self.done.store(true, Ordering::Release);
            return true;
        }
        false
    }

    /// Number of restarts applied to this stream.
    #[must_use]
    pub const fn restarts(&self) -> u32 {
        self.restarts
    }

    /// Progress recorded at the last bounce gate.
    #[must_use]
    pub const fn checkpoint(&self) -> f64 {
        self.checkpoint
    }

    pub(crate) fn set_checkpoint(&mut self, progress: f64) {
        self.checkpoint = progress;
    }

    async fn restart(&mut self, clean: bool) -> HarnessResult<()> {
        self.copier.restart(clean).await?;
        self.restarts += 1;
        debug_assert_eq!(self.copier.transactional_id(), &self.transactional_id);
        Ok(())
    }
}

/// Fixed set of copy streams for one scenario.
pub struct CopierPool<'a> {
    config: &'a ScenarioConfig,
    waiter: Waiter,
    streams: Vec<CopyStream>,
}

impl<'a> CopierPool<'a> {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(config: &'a ScenarioConfig) -> Self {
        Self {
            config,
            waiter: Waiter::new(config.poll_interval),
            streams: Vec::new(),
        }
    }

    /// Starts one copier per `(partition, transactional id)` assignment.
    ///
    /// Each copier must report alive within the copier start timeout before
    /// the next one is started.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` naming the copier that failed to come up, or a
    /// service error if it could not be created.
    pub async fn start_all(
        &mut self,
        backend: &dyn Backend,
        assignments: &[(PartitionId, TransactionalId)],
    ) -> HarnessResult<()> {
        let timeout = self.config.copier_start_timeout;

        for (partition, transactional_id) in assignments {
            let mut copier = backend.transactional_copier(CopierSpec {
                transactional_id: transactional_id.clone(),
                input_topic: self.config.input_topic.clone(),
                input_partition: *partition,
                output_topic: self.config.output_topic.clone(),
                consumer_group: self.config.consumer_group.clone(),
                transaction_size: self.config.transaction_size,
            })?;
            copier.start().await?;

            let stream = CopyStream::new(copier);
            self.waiter
                .wait_until(
                    || stream.is_alive() || stream.is_done(),
                    timeout,
                    || format!("message copier {transactional_id} failed to start after {timeout:?}"),
                )
                .await?;

            info!(%transactional_id, %partition, "copier started");
            self.streams.push(stream);
        }
        Ok(())
    }

    /// Returns the streams in start order.
    #[must_use]
    pub fn streams(&self) -> &[CopyStream] {
        &self.streams
    }

    /// Returns the number of streams.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns true if no stream was started.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn from_streams(config: &'a ScenarioConfig, streams: Vec<CopyStream>) -> Self {
        Self {
            config,
            waiter: Waiter::new(config.poll_interval),
            streams,
        }
    }

    pub(crate) fn stream_mut(&mut self, index: usize) -> Option<&mut CopyStream> {
        self.streams.get_mut(index)
    }

    /// Restarts one stream in place under its transactional identity.
    ///
    /// # Errors
    ///
    /// Returns a service error if the copier cannot be stopped or started.
    pub async fn restart(&mut self, index: usize, clean: bool) -> HarnessResult<()> {
        let Some(stream) = self.streams.get_mut(index) else {
            return Err(crate::error::HarnessError::InvalidConfig(format!(
                "no copy stream at index {index}"
            )));
        };
        info!(
            transactional_id = %stream.transactional_id,
            clean,
            progress = stream.progress_percent(),
            "restarting copier"
        );
        stream.restart(clean).await
    }

    /// Waits until every stream reports done.
    ///
    /// Streams are awaited in order, each with the full `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` naming the first stream that did not finish.
    pub async fn await_completion(&self, timeout: std::time::Duration) -> HarnessResult<()> {
        for stream in &self.streams {
            self.waiter
                .wait_until(
                    || stream.is_done(),
                    timeout,
                    || {
                        format!(
                            "{} - failed to copy all messages in {timeout:?} (progress {:.1}%)",
                            stream.transactional_id,
                            stream.progress_percent()
                        )
                    },
                )
                .await?;
            debug!(transactional_id = %stream.transactional_id, "copier done");
        }
        info!(streams = self.streams.len(), "finished copying messages");
        Ok(())
    }

    /// Stops every copier still running. Best effort.
    pub async fn shutdown(&mut self) {
        for stream in &mut self.streams {
            if stream.copier.alive() {
                if let Err(e) = stream.copier.stop(true).await {
                    warn!(transactional_id = %stream.transactional_id, error = %e, "copier stop failed");
                }
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Arc;
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    /// Copier whose observable state is scripted by the test.
    pub struct ScriptedCopier {
        pub id: TransactionalId,
        pub state: Arc<Mutex<ScriptedState>>,
    }

    #[derive(Debug, Default)]
    pub struct ScriptedState {
        pub alive: bool,
        pub progress: f64,
        pub done: bool,
        pub restarts: Vec<bool>,
    }

    #[async_trait]
    impl TransactionalCopier for ScriptedCopier {
        fn transactional_id(&self) -> &TransactionalId {
            &self.id
        }

        fn input_partition(&self) -> PartitionId {
            PartitionId::new(0)
        }

        async fn start(&mut self) -> HarnessResult<()> {
            self.state.lock().unwrap().alive = true;
            Ok(())
        }

        async fn stop(&mut self, _clean: bool) -> HarnessResult<()> {
            self.state.lock().unwrap().alive = false;
            Ok(())
        }

        async fn restart(&mut self, clean: bool) -> HarnessResult<()> {
            let mut state = self.state.lock().unwrap();
            state.restarts.push(clean);
            // A fresh process only knows what it has copied since it started.
            state.progress = 0.0;
            Ok(())
        }

        fn alive(&self) -> bool {
            self.state.lock().unwrap().alive
        }

        fn progress_percent(&self) -> f64 {
            self.state.lock().unwrap().progress
        }

        fn is_done(&self) -> bool {
            self.state.lock().unwrap().done
        }
    }

    pub fn scripted_stream(id: &str) -> (CopyStream, Arc<Mutex<ScriptedState>>) {
        let state = Arc::new(Mutex::new(ScriptedState::default()));
        let copier = ScriptedCopier {
            id: TransactionalId::new(id),
            state: Arc::clone(&state),
        };
        (CopyStream::new(Box::new(copier)), state)
    }

    #[test]
    fn test_progress_never_decreases() {
        let (stream, state) = scripted_stream("t1");
        state.lock().unwrap().progress = 45.0;
        assert!((stream.progress_percent() - 45.0).abs() < f64::EPSILON);

        state.lock().unwrap().progress = 10.0;
        assert!((stream.progress_percent() - 45.0).abs() < f64::EPSILON);

        state.lock().unwrap().progress = 60.0;
        assert!((stream.progress_percent() - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_progress_is_clamped() {
        let (stream, state) = scripted_stream("t1");
        state.lock().unwrap().progress = 180.0;
        assert!((stream.progress_percent() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_done_latches() {
        let (stream, state) = scripted_stream("t1");
        assert!(!stream.is_done());
        state.lock().unwrap().done = true;
        assert!(stream.is_done());
        state.lock().unwrap().done = false;
        assert!(stream.is_done());
    }

    #[tokio::test]
    async fn test_restart_preserves_identity() {
        let (mut stream, state) = scripted_stream("my-first-transactional-id");
        for clean in [true, false, true, false] {
            stream.restart(clean).await.unwrap();
        }
        assert_eq!(stream.restarts(), 4);
        assert_eq!(stream.transactional_id().as_str(), "my-first-transactional-id");
        assert_eq!(state.lock().unwrap().restarts, vec![true, false, true, false]);
    }
}
