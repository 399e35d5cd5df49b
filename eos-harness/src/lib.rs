//! EOS Harness: fault injection against exactly-once transactional copy
//!
//! Proves that a consume-transform-produce pipeline built on transactions
//! copies every input message to the output exactly once, even while
//! brokers or the copiers themselves are bounced.
//!
//! # Architecture
//!
//! A [`Scenario`] runs one cell of the failure matrix:
//! - [`MessageSeeder`] writes `0..N` to the input topic through an idempotent producer
//! - [`CopierPool`] starts one transactional copier per input partition
//! - [`ConsumptionVerifier`] runs a read-committed consumer concurrently with the copy
//! - [`FaultInjector`] bounces brokers or copiers, hard or clean
//! - The verifier drains the output topic and compares message sets
//!
//! Every collaborator sits behind a trait in [`service`], so the same
//! scenario runs against:
//! - **Simulated mode**: the in-memory cluster in [`sim`]
//! - **Real mode**: broker processes and librdkafka clients (feature `kafka`)
//!
//! # Example
//!
//! ```ignore
//! use eos_core::{BounceTarget, FailureMode};
//! use eos_harness::{Scenario, ScenarioConfig, SimBackend};
//!
//! let backend = SimBackend::new(ScenarioConfig::default());
//! let report = Scenario::new(&backend)
//!     .run(FailureMode::HardBounce, BounceTarget::Clients)
//!     .await?;
//!
//! assert_eq!(report.result.num_dups(), 0);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod copier;
mod error;
mod fault;
mod scenario;
mod seeder;
mod verifier;
mod waiter;

pub mod service;
pub mod sim;

#[cfg(feature = "kafka")]
pub mod real;

pub use config::{ScenarioConfig, ScenarioConfigBuilder};
pub use copier::{CopierPool, CopyStream};
pub use error::{HarnessError, HarnessResult, ScenarioError, Stage};
pub use fault::{fault_action, FaultAction, FaultEvent, FaultInjector, FAULT_MATRIX};
pub use scenario::{
    Scenario, ScenarioReport, ScenarioResult, ScenarioState, StateTransition,
};
pub use seeder::MessageSeeder;
pub use verifier::{ConsumerHandle, ConsumptionPath, ConsumptionVerifier, Violation, SAMPLE_LIMIT};
pub use waiter::{wait_until, Waiter, DEFAULT_POLL_INTERVAL};

// Re-export the simulated backend, the default for tests and the CLI.
pub use sim::{SimBackend, SimConfig, SimFaults};
