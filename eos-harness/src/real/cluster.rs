//! Broker processes.

use std::collections::BTreeMap;
use std::process::{Child, Command, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use eos_core::NodeId;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::KafkaResult;
use tracing::{debug, info, warn};

use super::worker::{Worker, STOP_NOW};
use super::{client_config, RealConfig};
use crate::config::ScenarioConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::service::ClusterService;
use crate::waiter::Waiter;

const METADATA_REFRESH: Duration = Duration::from_millis(250);

/// Where the broker list comes from.
pub(crate) trait MetadataSource: Send + 'static {
    fn broker_ids(&self, timeout: Duration) -> KafkaResult<Vec<i32>>;
}

impl MetadataSource for BaseConsumer {
    fn broker_ids(&self, timeout: Duration) -> KafkaResult<Vec<i32>> {
        let metadata = self.fetch_metadata(None, timeout)?;
        Ok(metadata.brokers().iter().map(|b| b.id()).collect())
    }
}

/// Broker ids from the last metadata fetch.
///
/// `None` until a fetch succeeds, and again after any fetch fails. An
/// unknown membership never counts as a deregistration.
#[derive(Debug, Default)]
pub(crate) struct BrokerView(Mutex<Option<Vec<i32>>>);

impl BrokerView {
    pub(crate) fn refresh(&self, source: &impl MetadataSource, timeout: Duration) {
        let ids = match source.broker_ids(timeout) {
            Ok(ids) => Some(ids),
            Err(e) => {
                debug!(error = %e, "metadata fetch failed");
                None
            }
        };
        *self.0.lock().expect("broker view lock poisoned") = ids;
    }

    pub(crate) fn registered_count(&self) -> usize {
        self.0
            .lock()
            .expect("broker view lock poisoned")
            .as_ref()
            .map_or(0, Vec::len)
    }

    pub(crate) fn is_listed(&self, id: i32) -> bool {
        self.0
            .lock()
            .expect("broker view lock poisoned")
            .as_ref()
            .map_or(true, |ids| ids.contains(&id))
    }
}

/// A cluster of broker child processes.
pub struct RealCluster {
    config: ScenarioConfig,
    real: RealConfig,
    bootstrap_servers: String,
    processes: Mutex<BTreeMap<NodeId, Child>>,
    brokers: Arc<BrokerView>,
    refresher: Mutex<Worker>,
}

impl RealCluster {
    /// Creates the cluster handle. No process is started yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata client cannot be created or its
    /// refresh thread cannot be spawned.
    pub fn new(config: ScenarioConfig, real: RealConfig) -> HarnessResult<Self> {
        let bootstrap_servers = (1..=config.num_brokers)
            .map(|id| format!("localhost:{}", port(&real, NodeId::new(u64::from(id)))))
            .collect::<Vec<_>>()
            .join(",");
        let metadata: BaseConsumer = client_config(&bootstrap_servers)
            .set("group.id", "eos-harness-metadata")
            .create()?;

        // librdkafka metadata requests block, so they stay off the runtime.
        let brokers = Arc::new(BrokerView::default());
        let mut refresher = Worker::default();
        let view = Arc::clone(&brokers);
        let timeout = real.request_timeout;
        refresher.spawn("broker-metadata".to_string(), move |stop| {
            while !stop.is_set() {
                view.refresh(&metadata, timeout);
                thread::sleep(METADATA_REFRESH);
            }
        })?;

        Ok(Self {
            config,
            real,
            bootstrap_servers,
            processes: Mutex::new(BTreeMap::new()),
            brokers,
            refresher: Mutex::new(refresher),
        })
    }

    /// Returns the bootstrap servers string.
    #[must_use]
    pub fn bootstrap_servers(&self) -> &str {
        &self.bootstrap_servers
    }

    fn command(&self, node: NodeId) -> HarnessResult<Command> {
        let data_dir = self.real.data_dir.join(node.to_string());
        std::fs::create_dir_all(&data_dir).map_err(|e| HarnessError::service("broker", e))?;

        let port = port(&self.real, node).to_string();
        let node_id = node.get().to_string();
        let data_dir = data_dir.display().to_string();

        let mut cmd = Command::new(&self.real.binary_path);
        for arg in &self.real.args {
            cmd.arg(
                arg.replace("{node_id}", &node_id)
                    .replace("{port}", &port)
                    .replace("{data_dir}", &data_dir),
            );
        }
        cmd.stdout(Stdio::null()).stderr(Stdio::null());
        Ok(cmd)
    }

    async fn create_topics(&self) -> HarnessResult<()> {
        let admin: AdminClient<DefaultClientContext> =
            client_config(&self.bootstrap_servers).create()?;
        let min_insync = self.config.min_insync_replicas.to_string();
        let replication = i32::try_from(self.config.replication_factor).unwrap_or(i32::MAX);
        let topics = [
            (&self.config.input_topic, self.config.input_partitions),
            (&self.config.output_topic, self.config.output_partitions),
        ]
        .map(|(name, partitions)| {
            NewTopic::new(
                name,
                i32::try_from(partitions).unwrap_or(i32::MAX),
                TopicReplication::Fixed(replication),
            )
            .set("min.insync.replicas", &min_insync)
        });

        let options = AdminOptions::new().operation_timeout(Some(self.real.request_timeout));
        for result in admin.create_topics(&topics, &options).await? {
            match result {
                Ok(topic) => info!(%topic, "created topic"),
                Err((topic, code)) => warn!(%topic, ?code, "topic creation failed"),
            }
        }
        Ok(())
    }
}

fn port(real: &RealConfig, node: NodeId) -> u16 {
    real.base_port + u16::try_from(node.get()).unwrap_or(0)
}

#[cfg(unix)]
fn terminate(child: &Child) -> HarnessResult<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).map_err(|e| HarnessError::service("broker", e))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(|e| HarnessError::service("broker", e))
}

#[cfg(not(unix))]
fn terminate(child: &Child) -> HarnessResult<()> {
    let _ = child;
    Err(HarnessError::service(
        "broker",
        "graceful shutdown needs unix signals",
    ))
}

#[async_trait]
impl ClusterService for RealCluster {
    async fn start(&self) -> HarnessResult<()> {
        for node in self.nodes() {
            self.start_node(node).await?;
        }

        let expected = self.config.num_brokers as usize;
        Waiter::default()
            .wait_until(
                || self.brokers.registered_count() >= expected,
                self.real.session_timeout,
                || {
                    format!(
                        "only {} of {expected} brokers registered",
                        self.brokers.registered_count()
                    )
                },
            )
            .await?;
        self.create_topics().await?;
        info!(bootstrap = %self.bootstrap_servers, "cluster started");
        Ok(())
    }

    fn nodes(&self) -> Vec<NodeId> {
        (1..=u64::from(self.config.num_brokers))
            .map(NodeId::new)
            .collect()
    }

    async fn start_node(&self, node: NodeId) -> HarnessResult<()> {
        let mut cmd = self.command(node)?;
        let child = cmd.spawn().map_err(|e| HarnessError::service("broker", e))?;
        debug!(%node, pid = child.id(), "broker spawned");
        self.processes
            .lock()
            .expect("processes lock poisoned")
            .insert(node, child);
        Ok(())
    }

    async fn stop_node(&self, node: NodeId, clean: bool) -> HarnessResult<()> {
        let child = self
            .processes
            .lock()
            .expect("processes lock poisoned")
            .remove(&node);
        let Some(mut child) = child else {
            return Ok(());
        };

        if clean {
            terminate(&child)?;
        } else {
            child.kill().map_err(|e| HarnessError::service("broker", e))?;
        }
        let status = tokio::task::spawn_blocking(move || child.wait())
            .await
            .map_err(|e| HarnessError::service("broker", e))?
            .map_err(|e| HarnessError::service("broker", e))?;
        debug!(%node, clean, %status, "broker exited");
        Ok(())
    }

    fn is_registered(&self, node: NodeId) -> bool {
        let id = i32::try_from(node.get()).unwrap_or(i32::MAX);
        self.brokers.is_listed(id)
    }

    fn pids(&self, node: NodeId) -> Vec<u32> {
        self.processes
            .lock()
            .expect("processes lock poisoned")
            .get_mut(&node)
            .and_then(|child| matches!(child.try_wait(), Ok(None)).then(|| child.id()))
            .into_iter()
            .collect()
    }

    fn deregistration_timeout(&self) -> Duration {
        self.real.session_timeout
    }

    fn bootstrap_servers(&self) -> String {
        self.bootstrap_servers.clone()
    }

    async fn shutdown(&self) {
        let mut refresher =
            std::mem::take(&mut *self.refresher.lock().expect("refresher lock poisoned"));
        refresher.stop(STOP_NOW).await;
        let children = std::mem::take(&mut *self.processes.lock().expect("processes lock poisoned"));
        for (node, mut child) in children {
            let _ = child.kill();
            let _ = child.wait();
            debug!(%node, "broker stopped");
        }
        let _ = std::fs::remove_dir_all(&self.real.data_dir);
    }
}

#[cfg(test)]
mod tests {
    use rdkafka::error::KafkaError;
    use rdkafka::types::RDKafkaErrorCode;

    use super::*;

    struct Listing(Vec<i32>);

    impl MetadataSource for Listing {
        fn broker_ids(&self, _timeout: Duration) -> KafkaResult<Vec<i32>> {
            Ok(self.0.clone())
        }
    }

    struct Unreachable;

    impl MetadataSource for Unreachable {
        fn broker_ids(&self, _timeout: Duration) -> KafkaResult<Vec<i32>> {
            Err(KafkaError::MetadataFetch(RDKafkaErrorCode::OperationTimedOut))
        }
    }

    const TIMEOUT: Duration = Duration::from_secs(5);

    #[test]
    fn test_listed_brokers_are_registered() {
        let view = BrokerView::default();
        view.refresh(&Listing(vec![1, 3]), TIMEOUT);

        assert_eq!(view.registered_count(), 2);
        assert!(view.is_listed(1));
        assert!(!view.is_listed(2));
    }

    #[test]
    fn test_failed_fetch_keeps_brokers_registered() {
        let view = BrokerView::default();
        view.refresh(&Listing(vec![1, 3]), TIMEOUT);
        view.refresh(&Unreachable, TIMEOUT);

        assert!(view.is_listed(2));
        assert_eq!(view.registered_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deregistration_wait_times_out_while_metadata_is_unreachable() {
        let view = BrokerView::default();
        view.refresh(&Unreachable, TIMEOUT);

        let err = Waiter::new(Duration::from_millis(10))
            .wait_until(
                || !view.is_listed(2),
                Duration::from_secs(1),
                || "broker 2 still registered".to_string(),
            )
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_pids_follow_the_broker_process() {
        let real = RealConfig {
            binary_path: "sleep".into(),
            args: vec!["30".to_string()],
            data_dir: std::env::temp_dir().join("eos-harness-pids"),
            request_timeout: Duration::from_millis(100),
            ..RealConfig::default()
        };
        let cluster = RealCluster::new(ScenarioConfig::default(), real).unwrap();
        let node = NodeId::new(1);
        assert!(cluster.pids(node).is_empty());

        cluster.start_node(node).await.unwrap();
        assert_eq!(cluster.pids(node).len(), 1);

        cluster.stop_node(node, false).await.unwrap();
        assert!(cluster.pids(node).is_empty());
        cluster.shutdown().await;
    }
}
