//! Narrow contracts for the external collaborators under test.
//!
//! The harness never reaches into broker, client or process internals. It
//! starts, stops and restarts services and polls their observable state
//! through these traits, so the same scenario runs against:
//! - Real broker processes and librdkafka clients (`real`, feature `kafka`)
//! - The in-memory simulated cluster (`sim`)
//!
//! Query methods are synchronous snapshots; they must be cheap because the
//! condition waiter calls them in tight polling loops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eos_core::{Message, NodeId, PartitionId, TransactionalId};

use crate::config::ScenarioConfig;
use crate::error::HarnessResult;

// -----------------------------------------------------------------------------
// Cluster
// -----------------------------------------------------------------------------

/// The broker fleet.
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// Starts every broker and creates the scenario topics.
    ///
    /// # Errors
    ///
    /// Returns an error if a broker or topic cannot be brought up.
    async fn start(&self) -> HarnessResult<()>;

    /// Returns the broker ids in bounce order.
    fn nodes(&self) -> Vec<NodeId>;

    /// Starts a stopped broker.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker process cannot be started.
    async fn start_node(&self, node: NodeId) -> HarnessResult<()>;

    /// Stops a broker, gracefully if `clean`, otherwise abruptly.
    ///
    /// # Errors
    ///
    /// Returns an error if the broker cannot be signalled.
    async fn stop_node(&self, node: NodeId, clean: bool) -> HarnessResult<()>;

    /// Stops and starts a broker in place.
    ///
    /// # Errors
    ///
    /// Returns an error if either step fails.
    async fn restart_node(&self, node: NodeId, clean: bool) -> HarnessResult<()> {
        self.stop_node(node, clean).await?;
        self.start_node(node).await
    }

    /// Returns true while the cluster's membership view lists the broker.
    fn is_registered(&self, node: NodeId) -> bool;

    /// Returns the process ids currently running for the broker.
    fn pids(&self, node: NodeId) -> Vec<u32>;

    /// Maximum time the membership view takes to drop a hard-killed broker.
    fn deregistration_timeout(&self) -> Duration;

    /// Returns the bootstrap address clients connect to.
    fn bootstrap_servers(&self) -> String;

    /// Stops every broker. Best effort.
    async fn shutdown(&self);
}

// -----------------------------------------------------------------------------
// Clients
// -----------------------------------------------------------------------------

/// Parameters for the seeding producer.
#[derive(Debug, Clone)]
pub struct ProducerSpec {
    /// Target topic.
    pub topic: String,
    /// Number of distinct messages to produce (`0..max_messages`).
    pub max_messages: u64,
}

/// Producer that never delivers a message twice despite internal retries.
#[async_trait]
pub trait IdempotentProducer: Send + Sync {
    /// Starts producing in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the producer cannot be created.
    async fn start(&mut self) -> HarnessResult<()>;

    /// Stops producing. Acknowledgments recorded so far are kept.
    async fn stop(&mut self);

    /// Number of acknowledged messages.
    fn num_acked(&self) -> u64;

    /// Acknowledged messages in acknowledgment order.
    fn acked(&self) -> Vec<Message>;
}

/// Parameters for one transactional copier.
#[derive(Debug, Clone)]
pub struct CopierSpec {
    /// Restart-stable transactional identity.
    pub transactional_id: TransactionalId,
    /// Topic to read.
    pub input_topic: String,
    /// The single input partition this copier owns.
    pub input_partition: PartitionId,
    /// Topic to write.
    pub output_topic: String,
    /// Consumer group whose offsets are committed inside each transaction.
    pub consumer_group: String,
    /// Messages per transaction.
    pub transaction_size: u32,
}

/// A consume-transform-produce process writing inside transactions.
#[async_trait]
pub trait TransactionalCopier: Send + Sync {
    /// The identity this copier commits under.
    fn transactional_id(&self) -> &TransactionalId;

    /// The input partition this copier reads.
    fn input_partition(&self) -> PartitionId;

    /// Starts the copy process.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be started.
    async fn start(&mut self) -> HarnessResult<()>;

    /// Stops the copy process, gracefully if `clean`, otherwise abruptly.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be signalled.
    async fn stop(&mut self, clean: bool) -> HarnessResult<()>;

    /// Stops and starts the process under the same transactional identity.
    ///
    /// # Errors
    ///
    /// Returns an error if either step fails.
    async fn restart(&mut self, clean: bool) -> HarnessResult<()> {
        self.stop(clean).await?;
        self.start().await
    }

    /// Returns true while the process runs.
    fn alive(&self) -> bool;

    /// Share of the input partition copied, in percent.
    fn progress_percent(&self) -> f64;

    /// Returns true once every input message has been copied.
    fn is_done(&self) -> bool;
}

/// Parameters for a verifying consumer.
///
/// Consumers always read committed data only, starting from the beginning
/// of the log.
#[derive(Debug, Clone)]
pub struct ConsumerSpec {
    /// Topic to read.
    pub topic: String,
    /// Consumer group.
    pub group_id: String,
}

/// Consumer with read-committed isolation.
#[async_trait]
pub trait ReadCommittedConsumer: Send + Sync {
    /// Starts consuming in the background.
    ///
    /// # Errors
    ///
    /// Returns an error if the consumer cannot be created.
    async fn start(&mut self) -> HarnessResult<()>;

    /// Stops consuming. Messages received so far are kept.
    async fn stop(&mut self);

    /// Number of messages received.
    fn num_consumed(&self) -> usize;

    /// Messages received, in receive order.
    fn messages_consumed(&self) -> Vec<Message>;
}

// -----------------------------------------------------------------------------
// Backend
// -----------------------------------------------------------------------------

/// Factory for every collaborator of one scenario run.
pub trait Backend: Send + Sync {
    /// Human-readable backend name for logs.
    fn name(&self) -> &'static str;

    /// The configuration the backend was built for.
    fn config(&self) -> &ScenarioConfig;

    /// The broker fleet.
    fn cluster(&self) -> Arc<dyn ClusterService>;

    /// Creates an idempotent producer.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be configured.
    fn idempotent_producer(&self, spec: ProducerSpec) -> HarnessResult<Box<dyn IdempotentProducer>>;

    /// Creates a transactional copier.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be configured.
    fn transactional_copier(&self, spec: CopierSpec)
        -> HarnessResult<Box<dyn TransactionalCopier>>;

    /// Creates a read-committed consumer.
    ///
    /// # Errors
    ///
    /// Returns an error if the client cannot be configured.
    fn read_committed_consumer(
        &self,
        spec: ConsumerSpec,
    ) -> HarnessResult<Box<dyn ReadCommittedConsumer>>;
}
