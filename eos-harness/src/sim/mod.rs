//! In-memory simulated cluster and clients.
//!
//! The simulated backend implements every service trait against one shared
//! [`SimState`], so a whole scenario, faults included, runs inside a single
//! tokio runtime. Client processes are tokio tasks: a clean stop asks the
//! task to finish at its next batch boundary, a hard stop aborts it wherever
//! it is, leaving any open transaction behind for the next instance to
//! resolve.
//!
//! # Determinism
//!
//! Lost acknowledgments are drawn from a `ChaCha8Rng` seeded from
//! [`SimConfig::seed`]. Timing follows the tokio clock, so tests run with a
//! paused clock are reproducible.

mod cluster;
mod consumer;
mod copier;
mod error;
mod producer;
mod state;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use eos_core::TransactionalId;

pub use cluster::SimCluster;
pub use consumer::SimReadCommittedConsumer;
pub use copier::SimTransactionalCopier;
pub use error::{SimError, SimResult};
pub use producer::SimIdempotentProducer;
pub use state::{AppendOutcome, Fetch, OffsetCommit, SimState, TxnStatus};

use crate::config::ScenarioConfig;
use crate::error::HarnessResult;
use crate::service::{
    Backend, ClusterService, ConsumerSpec, CopierSpec, IdempotentProducer, ProducerSpec,
    ReadCommittedConsumer, TransactionalCopier,
};

/// Handle to the shared simulated state.
pub type SharedState = Arc<Mutex<SimState>>;

pub(crate) fn lock(state: &Mutex<SimState>) -> MutexGuard<'_, SimState> {
    state.lock().expect("sim state lock poisoned")
}

/// Timing of the simulated cluster and clients.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Time a hard-stopped broker stays registered.
    pub session_timeout: Duration,
    /// Time a broker takes to shut down cleanly or to start.
    pub restart_delay: Duration,
    /// Pause a copier takes between chunks of transactional writes.
    pub txn_pause: Duration,
    /// Consumer poll interval when no new records are available.
    pub fetch_interval: Duration,
    /// Client backoff after a failed request.
    pub retry_backoff: Duration,
    /// Time a copier gets to finish its batch on a clean stop.
    pub clean_stop_grace: Duration,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            session_timeout: Duration::from_secs(2),
            restart_delay: Duration::from_millis(50),
            txn_pause: Duration::from_millis(1),
            fetch_interval: Duration::from_millis(5),
            retry_backoff: Duration::from_millis(20),
            clean_stop_grace: Duration::from_secs(5),
            seed: 42,
        }
    }
}

/// Client misbehavior injected by the simulated backend.
#[derive(Debug, Clone, Default)]
pub struct SimFaults {
    /// Stop acknowledging after this many messages.
    pub ack_limit: Option<u64>,
    /// Probability that an acknowledgment is lost and the send retried.
    pub ack_loss_rate: f64,
    /// Copier that stops making progress at the given percentage.
    pub stalled_copier: Option<(TransactionalId, f64)>,
}

impl SimFaults {
    /// No injected faults.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Caps the seeding producer's acknowledgments.
    #[must_use]
    pub const fn with_ack_limit(mut self, limit: u64) -> Self {
        self.ack_limit = Some(limit);
        self
    }

    /// Sets the lost-acknowledgment probability.
    ///
    /// # Panics
    ///
    /// Panics if rate is not in range 0.0..=1.0.
    #[must_use]
    pub fn with_ack_loss_rate(mut self, rate: f64) -> Self {
        assert!((0.0..=1.0).contains(&rate), "rate must be in 0.0..=1.0");
        self.ack_loss_rate = rate;
        self
    }

    /// Stalls one copier once it reaches `percent` progress.
    #[must_use]
    pub fn with_stalled_copier(mut self, id: impl Into<TransactionalId>, percent: f64) -> Self {
        self.stalled_copier = Some((id.into(), percent));
        self
    }
}

/// Backend running every collaborator in memory.
pub struct SimBackend {
    config: ScenarioConfig,
    sim: SimConfig,
    faults: SimFaults,
    state: SharedState,
    cluster: Arc<SimCluster>,
    copiers_created: AtomicUsize,
}

impl SimBackend {
    /// Creates a backend with default timing and no injected faults.
    #[must_use]
    pub fn new(config: ScenarioConfig) -> Self {
        Self::with_options(config, SimConfig::default(), SimFaults::default())
    }

    /// Creates a backend with explicit timing and faults.
    #[must_use]
    pub fn with_options(config: ScenarioConfig, sim: SimConfig, faults: SimFaults) -> Self {
        let state = Arc::new(Mutex::new(SimState::new(
            config.num_brokers,
            config.min_insync_replicas,
        )));
        let cluster = Arc::new(SimCluster::new(
            Arc::clone(&state),
            config.clone(),
            sim.clone(),
        ));
        Self {
            config,
            sim,
            faults,
            state,
            cluster,
            copiers_created: AtomicUsize::new(0),
        }
    }

    /// Replaces the injected faults.
    #[must_use]
    pub fn with_faults(mut self, faults: SimFaults) -> Self {
        self.faults = faults;
        self
    }

    /// Replaces the timing, resetting the cluster.
    #[must_use]
    pub fn with_sim_config(self, sim: SimConfig) -> Self {
        Self::with_options(self.config, sim, self.faults)
    }

    /// Shared cluster state, for inspection.
    #[must_use]
    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    /// Number of copiers created so far.
    #[must_use]
    pub fn copiers_created(&self) -> usize {
        self.copiers_created.load(Ordering::Relaxed)
    }
}

impl Backend for SimBackend {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    fn cluster(&self) -> Arc<dyn ClusterService> {
        Arc::clone(&self.cluster) as Arc<dyn ClusterService>
    }

    fn idempotent_producer(&self, spec: ProducerSpec) -> HarnessResult<Box<dyn IdempotentProducer>> {
        Ok(Box::new(SimIdempotentProducer::new(
            Arc::clone(&self.state),
            spec,
            self.sim.clone(),
            &self.faults,
        )))
    }

    fn transactional_copier(
        &self,
        spec: CopierSpec,
    ) -> HarnessResult<Box<dyn TransactionalCopier>> {
        self.copiers_created.fetch_add(1, Ordering::Relaxed);
        let stall_at = self
            .faults
            .stalled_copier
            .as_ref()
            .filter(|(id, _)| *id == spec.transactional_id)
            .map(|(_, percent)| *percent);
        Ok(Box::new(SimTransactionalCopier::new(
            Arc::clone(&self.state),
            spec,
            self.sim.clone(),
            stall_at,
        )))
    }

    fn read_committed_consumer(
        &self,
        spec: ConsumerSpec,
    ) -> HarnessResult<Box<dyn ReadCommittedConsumer>> {
        Ok(Box::new(SimReadCommittedConsumer::new(
            Arc::clone(&self.state),
            spec,
            self.sim.clone(),
        )))
    }
}
