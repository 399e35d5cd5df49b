//! Errors returned by the simulated cluster.

use eos_core::{NodeId, TransactionalId};
use thiserror::Error;

use crate::error::HarnessError;

/// Result type for simulated cluster operations.
pub type SimResult<T> = Result<T, SimError>;

/// Errors a simulated client can receive from the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    /// Too few brokers are running to accept writes.
    #[error("not enough replicas: {running} running, {required} required")]
    NotEnoughReplicas {
        /// Brokers currently running.
        running: usize,
        /// `min.insync.replicas`.
        required: usize,
    },

    /// The topic does not exist.
    #[error("unknown topic '{0}'")]
    UnknownTopic(String),

    /// The partition does not exist.
    #[error("unknown partition {partition} of topic '{topic}'")]
    UnknownPartition {
        /// Topic name.
        topic: String,
        /// Partition number.
        partition: u32,
    },

    /// The broker id is not part of the cluster.
    #[error("unknown broker {0}")]
    UnknownBroker(NodeId),

    /// An idempotent append skipped or rewound its sequence.
    #[error("out of order sequence: expected {expected}, received {received}")]
    OutOfOrderSequence {
        /// Next sequence the partition expects.
        expected: u64,
        /// Sequence the request carried.
        received: u64,
    },

    /// A newer instance with the same transactional id has initialized.
    #[error("producer {transactional_id} fenced: epoch {epoch} superseded by {current}")]
    ProducerFenced {
        /// The fenced identity.
        transactional_id: TransactionalId,
        /// Epoch the request carried.
        epoch: u64,
        /// Current epoch.
        current: u64,
    },

    /// The open transaction was aborted by the coordinator.
    #[error("transaction of {0} was aborted by its coordinator")]
    TransactionAborted(TransactionalId),

    /// The transactional id never initialized.
    #[error("{0} has not initialized transactions")]
    NotInitialized(TransactionalId),
}

impl SimError {
    /// Returns true if the client must re-initialize rather than retry.
    #[must_use]
    pub const fn is_fenced(&self) -> bool {
        matches!(self, Self::ProducerFenced { .. })
    }
}

impl From<SimError> for HarnessError {
    fn from(err: SimError) -> Self {
        Self::service("sim", err)
    }
}
