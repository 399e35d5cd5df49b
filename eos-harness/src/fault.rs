//! Fault injection.
//!
//! Exactly one target is faulted per run. The `(FailureMode, BounceTarget)`
//! pair selects a [`FaultAction`] from [`FAULT_MATRIX`]:
//!
//! | mode \ target | brokers                          | clients                         |
//! |---------------|----------------------------------|---------------------------------|
//! | hard_bounce   | `KillBrokersAwaitDeregistration` | `BounceCopiers { clean: false }`|
//! | clean_bounce  | `RollingRestartBrokers`          | `BounceCopiers { clean: true }` |

use std::fmt;
use std::time::Duration;

use eos_core::{BounceTarget, FailureMode, NodeId};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::ScenarioConfig;
use crate::copier::CopierPool;
use crate::error::HarnessResult;
use crate::service::ClusterService;
use crate::waiter::Waiter;

/// A concrete fault strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultAction {
    /// Gracefully restart every broker, one at a time.
    RollingRestartBrokers,
    /// Kill every broker in turn, waiting for it to leave the cluster
    /// before starting it again.
    KillBrokersAwaitDeregistration,
    /// Restart each copier once per bounce round after a progress gate.
    BounceCopiers {
        /// Graceful restart if true, abrupt kill otherwise.
        clean: bool,
    },
}

impl FaultAction {
    /// Returns true if the action shuts its targets down gracefully.
    #[must_use]
    pub const fn is_clean(self) -> bool {
        match self {
            Self::RollingRestartBrokers => true,
            Self::KillBrokersAwaitDeregistration => false,
            Self::BounceCopiers { clean } => clean,
        }
    }
}

impl fmt::Display for FaultAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RollingRestartBrokers => write!(f, "rolling restart of brokers"),
            Self::KillBrokersAwaitDeregistration => write!(f, "hard kill of brokers"),
            Self::BounceCopiers { clean: true } => write!(f, "clean bounce of copiers"),
            Self::BounceCopiers { clean: false } => write!(f, "hard bounce of copiers"),
        }
    }
}

/// Strategy table indexed by `[failure mode][bounce target]`.
pub const FAULT_MATRIX: [[FaultAction; 2]; 2] = [
    // hard_bounce
    [
        FaultAction::KillBrokersAwaitDeregistration,
        FaultAction::BounceCopiers { clean: false },
    ],
    // clean_bounce
    [
        FaultAction::RollingRestartBrokers,
        FaultAction::BounceCopiers { clean: true },
    ],
];

/// Resolves a scenario pair to its fault strategy.
#[must_use]
pub const fn fault_action(mode: FailureMode, target: BounceTarget) -> FaultAction {
    let row = match mode {
        FailureMode::HardBounce => 0,
        FailureMode::CleanBounce => 1,
    };
    let column = match target {
        BounceTarget::Brokers => 0,
        BounceTarget::Clients => 1,
    };
    FAULT_MATRIX[row][column]
}

/// Record of one applied fault.
#[derive(Debug, Clone)]
pub struct FaultEvent {
    /// Time since the injector was created.
    pub at: Duration,
    /// The strategy being applied.
    pub action: FaultAction,
    /// The broker or transactional id that was bounced.
    pub target: String,
    /// Bounce round, for copier faults.
    pub round: Option<u32>,
}

impl fmt::Display for FaultEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "+{:.1}s {} -> {}", self.at.as_secs_f64(), self.action, self.target)?;
        if let Some(round) = self.round {
            write!(f, " (round {round})")?;
        }
        Ok(())
    }
}

/// Applies faults to brokers or copiers and records what it did.
pub struct FaultInjector<'a> {
    config: &'a ScenarioConfig,
    waiter: Waiter,
    started: Instant,
    events: Vec<FaultEvent>,
}

impl<'a> FaultInjector<'a> {
    /// Creates an injector. Event times are measured from here.
    #[must_use]
    pub fn new(config: &'a ScenarioConfig) -> Self {
        Self {
            config,
            waiter: Waiter::new(config.poll_interval),
            started: Instant::now(),
            events: Vec::new(),
        }
    }

    /// Applies the fault selected by `(mode, target)`.
    ///
    /// # Errors
    ///
    /// Returns the first timeout or service error hit while faulting.
    pub async fn inject(
        &mut self,
        mode: FailureMode,
        target: BounceTarget,
        cluster: &dyn ClusterService,
        pool: &mut CopierPool<'_>,
    ) -> HarnessResult<FaultAction> {
        let action = fault_action(mode, target);
        info!(%mode, %target, %action, "injecting faults");
        match action {
            FaultAction::RollingRestartBrokers | FaultAction::KillBrokersAwaitDeregistration => {
                self.inject_broker_fault(cluster, &cluster.nodes(), action.is_clean())
                    .await?;
            }
            FaultAction::BounceCopiers { clean } => {
                self.inject_client_fault(pool, clean).await?;
            }
        }
        Ok(action)
    }

    /// Bounces each broker in `nodes` in order.
    ///
    /// A clean bounce restarts the broker in place. A hard bounce kills it,
    /// waits until it has no running process and the cluster no longer lists
    /// it, then starts it again.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if a killed broker does not deregister within the
    /// cluster's deregistration latency plus slack.
    pub async fn inject_broker_fault(
        &mut self,
        cluster: &dyn ClusterService,
        nodes: &[NodeId],
        clean: bool,
    ) -> HarnessResult<()> {
        let action = if clean {
            FaultAction::RollingRestartBrokers
        } else {
            FaultAction::KillBrokersAwaitDeregistration
        };

        for &node in nodes {
            if clean {
                info!(%node, "restarting broker");
                cluster.restart_node(node, true).await?;
            } else {
                info!(%node, "killing broker");
                cluster.stop_node(node, false).await?;

                let timeout = cluster.deregistration_timeout() + self.config.deregistration_slack;
                self.waiter
                    .wait_until(
                        || cluster.pids(node).is_empty() && !cluster.is_registered(node),
                        timeout,
                        || {
                            format!(
                                "Failed to see timely deregistration of hard-killed {node} \
                                 (pids {:?}, registered {})",
                                cluster.pids(node),
                                cluster.is_registered(node)
                            )
                        },
                    )
                    .await?;

                info!(%node, "broker deregistered, starting");
                cluster.start_node(node).await?;
            }
            self.record(action, node.to_string(), None);
        }
        Ok(())
    }

    /// Bounces every copier once per round, gated on progress.
    ///
    /// Before each restart the stream must have gained the configured
    /// progress step since its last checkpoint. Streams that already finished
    /// are not restarted.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` reporting the stream's current progress if a gate is
    /// not passed in time, or a service error from the restart.
    pub async fn inject_client_fault(
        &mut self,
        pool: &mut CopierPool<'_>,
        clean: bool,
    ) -> HarnessResult<()> {
        let action = FaultAction::BounceCopiers { clean };
        let timeout = self.config.copier_progress_timeout;
        let step = self.config.bounce_progress_step;

        for round in 1..=self.config.bounce_rounds {
            for index in 0..pool.len() {
                let stream = &pool.streams()[index];
                let transactional_id = stream.transactional_id().clone();
                let target = (stream.checkpoint() + step).min(100.0);

                self.waiter
                    .wait_until(
                        || stream.progress_percent() >= target,
                        timeout,
                        || {
                            format!(
                                "{transactional_id} did not reach {target:.1}% progress in \
                                 {timeout:?}: currently at {:.1}%",
                                stream.progress_percent()
                            )
                        },
                    )
                    .await?;

                let observed = stream.progress_percent();
                if stream.is_done() {
                    warn!(%transactional_id, round, "copier already done, not bouncing");
                } else {
                    pool.restart(index, clean).await?;
                    self.record(action, transactional_id.to_string(), Some(round));
                }

                if let Some(stream) = pool.stream_mut(index) {
                    stream.set_checkpoint(observed);
                }
            }
        }
        Ok(())
    }

    /// Returns every fault applied so far.
    #[must_use]
    pub fn events(&self) -> &[FaultEvent] {
        &self.events
    }

    /// Consumes the injector, returning its events.
    #[must_use]
    pub fn into_events(self) -> Vec<FaultEvent> {
        self.events
    }

    fn record(&mut self, action: FaultAction, target: String, round: Option<u32>) {
        self.events.push(FaultEvent {
            at: self.started.elapsed(),
            action,
            target,
            round,
        });
    }
}
