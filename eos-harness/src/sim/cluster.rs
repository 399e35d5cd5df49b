//! Simulated broker fleet.

use std::time::Duration;

use async_trait::async_trait;
use eos_core::NodeId;
use tokio::time::Instant;
use tracing::{debug, info};

use super::{lock, SharedState, SimConfig};
use crate::config::ScenarioConfig;
use crate::error::HarnessResult;
use crate::service::ClusterService;

/// Brokers of the simulated cluster.
pub struct SimCluster {
    state: SharedState,
    config: ScenarioConfig,
    sim: SimConfig,
}

impl SimCluster {
    pub(crate) const fn new(state: SharedState, config: ScenarioConfig, sim: SimConfig) -> Self {
        Self { state, config, sim }
    }
}

#[async_trait]
impl ClusterService for SimCluster {
    async fn start(&self) -> HarnessResult<()> {
        {
            let mut state = lock(&self.state);
            for node in state.nodes() {
                state.start_broker(node)?;
            }
            state.create_topic(&self.config.input_topic, self.config.input_partitions);
            state.create_topic(&self.config.output_topic, self.config.output_partitions);
        }
        info!(
            brokers = self.config.num_brokers,
            input = %self.config.input_topic,
            output = %self.config.output_topic,
            "simulated cluster started"
        );
        Ok(())
    }

    fn nodes(&self) -> Vec<NodeId> {
        lock(&self.state).nodes()
    }

    async fn start_node(&self, node: NodeId) -> HarnessResult<()> {
        tokio::time::sleep(self.sim.restart_delay).await;
        let pid = lock(&self.state).start_broker(node)?;
        debug!(%node, pid, "broker started");
        Ok(())
    }

    async fn stop_node(&self, node: NodeId, clean: bool) -> HarnessResult<()> {
        if clean {
            // Controlled shutdown takes a moment before the process exits.
            tokio::time::sleep(self.sim.restart_delay).await;
        }
        let aborted = lock(&self.state).stop_broker(
            node,
            clean,
            Instant::now(),
            self.sim.session_timeout,
        )?;
        debug!(%node, clean, aborted = aborted.len(), "broker stopped");
        Ok(())
    }

    fn is_registered(&self, node: NodeId) -> bool {
        lock(&self.state).is_registered(node, Instant::now())
    }

    fn pids(&self, node: NodeId) -> Vec<u32> {
        lock(&self.state).pids(node)
    }

    fn deregistration_timeout(&self) -> Duration {
        self.sim.session_timeout
    }

    fn bootstrap_servers(&self) -> String {
        self.nodes()
            .iter()
            .map(|node| format!("{node}:9092"))
            .collect::<Vec<_>>()
            .join(",")
    }

    async fn shutdown(&self) {
        lock(&self.state).stop_all();
        debug!("simulated cluster stopped");
    }
}
