//! Real backend: broker processes and librdkafka clients.
//!
//! Brokers are child processes started from a command template. Clients run
//! their librdkafka poll loops on dedicated threads and publish what they
//! observe through shared counters, so the service trait queries stay cheap.

mod cluster;
mod consumer;
mod copier;
mod producer;
mod worker;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::error::KafkaError;

pub use cluster::RealCluster;
pub use consumer::RealReadCommittedConsumer;
pub use copier::RealTransactionalCopier;
pub use producer::RealIdempotentProducer;

use crate::config::ScenarioConfig;
use crate::error::{HarnessError, HarnessResult};
use crate::service::{
    Backend, ClusterService, ConsumerSpec, CopierSpec, IdempotentProducer, ProducerSpec,
    ReadCommittedConsumer, TransactionalCopier,
};

impl From<KafkaError> for HarnessError {
    fn from(err: KafkaError) -> Self {
        Self::service("kafka", err)
    }
}

/// How to launch and reach the broker processes.
#[derive(Debug, Clone)]
pub struct RealConfig {
    /// Broker binary.
    pub binary_path: PathBuf,
    /// Arguments; `{node_id}`, `{port}` and `{data_dir}` are substituted per broker.
    pub args: Vec<String>,
    /// Broker N listens on `base_port + N`.
    pub base_port: u16,
    /// Parent of the per-broker data directories.
    pub data_dir: PathBuf,
    /// Broker session timeout: the longest a killed broker stays registered.
    pub session_timeout: Duration,
    /// Bound on a single metadata or admin request.
    pub request_timeout: Duration,
}

impl Default for RealConfig {
    fn default() -> Self {
        Self {
            binary_path: PathBuf::from("./bin/kafka-server"),
            args: vec![
                "--node-id".to_string(),
                "{node_id}".to_string(),
                "--port".to_string(),
                "{port}".to_string(),
                "--data-dir".to_string(),
                "{data_dir}".to_string(),
            ],
            base_port: 9092,
            data_dir: PathBuf::from("/tmp/eos-harness"),
            session_timeout: Duration::from_secs(18),
            request_timeout: Duration::from_secs(5),
        }
    }
}

impl RealConfig {
    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> RealConfigBuilder {
        RealConfigBuilder::default()
    }
}

/// Builder for [`RealConfig`].
#[derive(Debug, Default)]
pub struct RealConfigBuilder {
    config: RealConfig,
}

impl RealConfigBuilder {
    /// Sets the broker binary.
    #[must_use]
    pub fn binary_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.binary_path = path.into();
        self
    }

    /// Sets the broker argument template.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the base port.
    #[must_use]
    pub const fn base_port(mut self, port: u16) -> Self {
        self.config.base_port = port;
        self
    }

    /// Sets the data directory base path.
    #[must_use]
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Sets the broker session timeout.
    #[must_use]
    pub const fn session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn build(self) -> RealConfig {
        self.config
    }
}

pub(crate) fn client_config(bootstrap_servers: &str) -> ClientConfig {
    let mut config = ClientConfig::new();
    config.set("bootstrap.servers", bootstrap_servers);
    config
}

/// Backend driving real broker processes.
pub struct RealBackend {
    config: ScenarioConfig,
    cluster: Arc<RealCluster>,
}

impl RealBackend {
    /// Creates a backend. Brokers are launched by the cluster's `start`.
    ///
    /// # Errors
    ///
    /// Returns an error if the metadata client cannot be created.
    pub fn new(config: ScenarioConfig, real: RealConfig) -> HarnessResult<Self> {
        let cluster = Arc::new(RealCluster::new(config.clone(), real)?);
        Ok(Self { config, cluster })
    }
}

impl Backend for RealBackend {
    fn name(&self) -> &'static str {
        "kafka"
    }

    fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    fn cluster(&self) -> Arc<dyn ClusterService> {
        Arc::clone(&self.cluster) as Arc<dyn ClusterService>
    }

    fn idempotent_producer(&self, spec: ProducerSpec) -> HarnessResult<Box<dyn IdempotentProducer>> {
        Ok(Box::new(RealIdempotentProducer::new(
            self.cluster.bootstrap_servers(),
            spec,
        )))
    }

    fn transactional_copier(
        &self,
        spec: CopierSpec,
    ) -> HarnessResult<Box<dyn TransactionalCopier>> {
        Ok(Box::new(RealTransactionalCopier::new(
            self.cluster.bootstrap_servers(),
            spec,
        )))
    }

    fn read_committed_consumer(
        &self,
        spec: ConsumerSpec,
    ) -> HarnessResult<Box<dyn ReadCommittedConsumer>> {
        Ok(Box::new(RealReadCommittedConsumer::new(
            self.cluster.bootstrap_servers(),
            spec,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_real_config_builder() {
        let config = RealConfig::builder()
            .binary_path("/opt/kafka/bin/broker")
            .args(["--id", "{node_id}"])
            .base_port(19092)
            .session_timeout(Duration::from_secs(6))
            .build();
        assert_eq!(config.binary_path, PathBuf::from("/opt/kafka/bin/broker"));
        assert_eq!(config.args, vec!["--id", "{node_id}"]);
        assert_eq!(config.base_port, 19092);
        assert_eq!(config.session_timeout, Duration::from_secs(6));
    }
}
