//! Scenario configuration.
//!
//! One immutable [`ScenarioConfig`] is built per run and handed to every
//! component at construction. Defaults reproduce the reference transactions
//! test: 100000 seed messages copied in transactions of 750 through two input
//! partitions into three output partitions on a three-broker cluster.

use std::time::Duration;

use eos_core::{PartitionId, TransactionalId};

use crate::error::{HarnessError, HarnessResult};

/// Immutable parameters for one scenario run.
#[derive(Debug, Clone)]
pub struct ScenarioConfig {
    /// Topic the seeder writes and the copiers read.
    pub input_topic: String,
    /// Topic the copiers write and the verifiers read.
    pub output_topic: String,
    /// Number of brokers in the cluster.
    pub num_brokers: u32,
    /// Partitions of the input topic (one copier each).
    pub input_partitions: u32,
    /// Partitions of the output topic.
    pub output_partitions: u32,
    /// Replication factor for both topics.
    pub replication_factor: u32,
    /// `min.insync.replicas` for both topics.
    pub min_insync_replicas: u32,
    /// Number of messages seeded into the input topic.
    pub seed_messages: u64,
    /// Messages per copier transaction.
    pub transaction_size: u32,
    /// Transactional id per input partition, in partition order.
    pub transactional_ids: Vec<TransactionalId>,
    /// Consumer group shared by the copiers.
    pub consumer_group: String,
    /// Group of the consumer racing the faults.
    pub concurrent_group: String,
    /// Group of the post-hoc consumer.
    pub verifying_group: String,
    /// Bound on seeding.
    pub seed_timeout: Duration,
    /// Bound on a copier reporting alive.
    pub copier_start_timeout: Duration,
    /// Bound on a copier passing a bounce progress gate.
    pub copier_progress_timeout: Duration,
    /// Bound on each copier finishing after the faults.
    pub copy_completion_timeout: Duration,
    /// Bound on a consumer observing its first message.
    pub consumer_start_timeout: Duration,
    /// Bound on draining a consumer.
    pub drain_timeout: Duration,
    /// Added to the cluster's deregistration latency when waiting for a killed broker.
    pub deregistration_slack: Duration,
    /// Bounce rounds applied to each copier.
    pub bounce_rounds: u32,
    /// Progress, in percentage points, a copier must gain between bounces.
    pub bounce_progress_step: f64,
    /// Interval between condition polls.
    pub poll_interval: Duration,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            input_topic: "input-topic".to_string(),
            output_topic: "output-topic".to_string(),
            num_brokers: 3,
            input_partitions: 2,
            output_partitions: 3,
            replication_factor: 3,
            min_insync_replicas: 2,
            seed_messages: 100_000,
            transaction_size: 750,
            transactional_ids: vec![
                TransactionalId::new("my-first-transactional-id"),
                TransactionalId::new("my-second-transactional-id"),
            ],
            consumer_group: "transactions-test-consumer-group".to_string(),
            concurrent_group: "concurrent_consumer".to_string(),
            verifying_group: "verifying_consumer".to_string(),
            seed_timeout: Duration::from_secs(10_000),
            copier_start_timeout: Duration::from_secs(10),
            copier_progress_timeout: Duration::from_secs(30),
            copy_completion_timeout: Duration::from_secs(60),
            consumer_start_timeout: Duration::from_secs(60),
            drain_timeout: Duration::from_secs(90),
            deregistration_slack: Duration::from_secs(5),
            bounce_rounds: 3,
            bounce_progress_step: 20.0,
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ScenarioConfig {
    /// Creates a builder starting from the defaults.
    #[must_use]
    pub fn builder() -> ScenarioConfigBuilder {
        ScenarioConfigBuilder::new()
    }

    /// Returns the copier assignments: each input partition with its transactional id.
    #[must_use]
    pub fn assignments(&self) -> Vec<(PartitionId, TransactionalId)> {
        self.transactional_ids
            .iter()
            .enumerate()
            .map(|(partition, id)| (PartitionId::new(partition as u64), id.clone()))
            .collect()
    }

    /// Checks the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` describing the first inconsistency found.
    pub fn validate(&self) -> HarnessResult<()> {
        let invalid = |msg: String| Err(HarnessError::InvalidConfig(msg));

        if self.num_brokers == 0 {
            return invalid("num_brokers must be at least 1".to_string());
        }
        if self.replication_factor > self.num_brokers {
            return invalid(format!(
                "replication_factor {} exceeds num_brokers {}",
                self.replication_factor, self.num_brokers
            ));
        }
        if self.min_insync_replicas == 0 || self.min_insync_replicas > self.replication_factor {
            return invalid(format!(
                "min_insync_replicas {} must be in 1..={}",
                self.min_insync_replicas, self.replication_factor
            ));
        }
        if self.input_partitions == 0 || self.output_partitions == 0 {
            return invalid("topics need at least one partition".to_string());
        }
        if self.transactional_ids.len() != self.input_partitions as usize {
            return invalid(format!(
                "{} transactional ids for {} input partitions",
                self.transactional_ids.len(),
                self.input_partitions
            ));
        }
        for (i, id) in self.transactional_ids.iter().enumerate() {
            if id.as_str().is_empty() {
                return invalid(format!("transactional id #{i} is empty"));
            }
            if self.transactional_ids[..i].contains(id) {
                return invalid(format!("transactional id '{id}' is not unique"));
            }
        }
        if self.seed_messages == 0 {
            return invalid("seed_messages must be positive".to_string());
        }
        if self.transaction_size == 0 {
            return invalid("transaction_size must be positive".to_string());
        }
        if !(self.bounce_progress_step > 0.0 && self.bounce_progress_step <= 100.0) {
            return invalid(format!(
                "bounce_progress_step {} must be in (0, 100]",
                self.bounce_progress_step
            ));
        }
        if self.poll_interval.is_zero() {
            return invalid("poll_interval must be non-zero".to_string());
        }
        Ok(())
    }
}

/// Builder for [`ScenarioConfig`].
#[derive(Debug, Default)]
pub struct ScenarioConfigBuilder {
    config: ScenarioConfig,
}

impl ScenarioConfigBuilder {
    /// Creates a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the input and output topic names.
    #[must_use]
    pub fn topics(mut self, input: impl Into<String>, output: impl Into<String>) -> Self {
        self.config.input_topic = input.into();
        self.config.output_topic = output.into();
        self
    }

    /// Sets the number of brokers.
    #[must_use]
    pub const fn brokers(mut self, count: u32) -> Self {
        self.config.num_brokers = count;
        self
    }

    /// Sets the replication factor and `min.insync.replicas`.
    #[must_use]
    pub const fn replication(mut self, factor: u32, min_insync: u32) -> Self {
        self.config.replication_factor = factor;
        self.config.min_insync_replicas = min_insync;
        self
    }

    /// Sets the output partition count.
    #[must_use]
    pub const fn output_partitions(mut self, count: u32) -> Self {
        self.config.output_partitions = count;
        self
    }

    /// Sets the copier transactional ids; one input partition is used per id.
    #[must_use]
    pub fn transactional_ids<I, T>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<TransactionalId>,
    {
        self.config.transactional_ids = ids.into_iter().map(Into::into).collect();
        self.config.input_partitions =
            u32::try_from(self.config.transactional_ids.len()).unwrap_or(u32::MAX);
        self
    }

    /// Sets the number of seeded messages.
    #[must_use]
    pub const fn seed_messages(mut self, count: u64) -> Self {
        self.config.seed_messages = count;
        self
    }

    /// Sets the copier transaction size.
    #[must_use]
    pub const fn transaction_size(mut self, size: u32) -> Self {
        self.config.transaction_size = size;
        self
    }

    /// Sets the seeding bound.
    #[must_use]
    pub const fn seed_timeout(mut self, timeout: Duration) -> Self {
        self.config.seed_timeout = timeout;
        self
    }

    /// Sets the copier start bound.
    #[must_use]
    pub const fn copier_start_timeout(mut self, timeout: Duration) -> Self {
        self.config.copier_start_timeout = timeout;
        self
    }

    /// Sets the bounce progress-gate bound.
    #[must_use]
    pub const fn copier_progress_timeout(mut self, timeout: Duration) -> Self {
        self.config.copier_progress_timeout = timeout;
        self
    }

    /// Sets the per-copier completion bound.
    #[must_use]
    pub const fn copy_completion_timeout(mut self, timeout: Duration) -> Self {
        self.config.copy_completion_timeout = timeout;
        self
    }

    /// Sets the consumer start bound.
    #[must_use]
    pub const fn consumer_start_timeout(mut self, timeout: Duration) -> Self {
        self.config.consumer_start_timeout = timeout;
        self
    }

    /// Sets the drain bound.
    #[must_use]
    pub const fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.config.drain_timeout = timeout;
        self
    }

    /// Sets the slack added to the deregistration wait.
    #[must_use]
    pub const fn deregistration_slack(mut self, slack: Duration) -> Self {
        self.config.deregistration_slack = slack;
        self
    }

    /// Sets the bounce rounds and the progress step between bounces.
    #[must_use]
    pub const fn bounces(mut self, rounds: u32, progress_step: f64) -> Self {
        self.config.bounce_rounds = rounds;
        self.config.bounce_progress_step = progress_step;
        self
    }

    /// Sets the condition poll interval.
    #[must_use]
    pub const fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Validates and returns the configuration.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if the parameters are inconsistent.
    pub fn build(self) -> HarnessResult<ScenarioConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = ScenarioConfig::default();
        assert_eq!(config.seed_messages, 100_000);
        assert_eq!(config.transaction_size, 750);
        assert_eq!(config.num_brokers, 3);
        assert_eq!(config.input_partitions, 2);
        assert_eq!(config.output_partitions, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_assignments_pair_partitions_with_ids() {
        let config = ScenarioConfig::default();
        let assignments = config.assignments();
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].0, PartitionId::new(0));
        assert_eq!(assignments[0].1.as_str(), "my-first-transactional-id");
        assert_eq!(assignments[1].0, PartitionId::new(1));
        assert_eq!(assignments[1].1.as_str(), "my-second-transactional-id");
    }

    #[test]
    fn test_builder_overrides() {
        let config = ScenarioConfig::builder()
            .seed_messages(1_000)
            .transaction_size(50)
            .transactional_ids(["a", "b", "c"])
            .poll_interval(Duration::from_millis(5))
            .build()
            .unwrap();
        assert_eq!(config.seed_messages, 1_000);
        assert_eq!(config.input_partitions, 3);
        assert_eq!(config.poll_interval, Duration::from_millis(5));
    }

    #[test]
    fn test_rejects_duplicate_transactional_ids() {
        let result = ScenarioConfig::builder().transactional_ids(["a", "a"]).build();
        assert!(matches!(result, Err(HarnessError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_replication_beyond_brokers() {
        let result = ScenarioConfig::builder().brokers(2).build();
        assert!(matches!(result, Err(HarnessError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_bad_progress_step() {
        let result = ScenarioConfig::builder().bounces(3, 0.0).build();
        assert!(result.is_err());
        let result = ScenarioConfig::builder().bounces(3, 120.0).build();
        assert!(result.is_err());
    }

    #[test]
    fn test_rejects_zero_transaction_size() {
        let result = ScenarioConfig::builder().transaction_size(0).build();
        assert!(result.is_err());
    }
}
