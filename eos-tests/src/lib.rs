//! EOS Tests - Scenario and boundary testing for the EOS harness.
//!
//! Every test here drives the simulated backend under a paused tokio clock,
//! so a full 100000-message scenario with broker kills completes in seconds
//! of real time and reproduces exactly.
//!
//! ## Test Organization
//!
//! - `matrix_tests`: the four `(FailureMode, BounceTarget)` runs with full parameters
//! - `boundary_tests`: runs that must fail at a named stage
//! - `sim_tests`: client-level exactly-once properties of the simulated cluster
//!
//! **Support Modules**:
//! - `scenarios`: reusable configurations and assertions
//!
//! ## Naming Conventions
//!
//! - Matrix tests: `test_<failure_mode>_<bounce_target>`
//! - Everything else: `test_<component>_<scenario>`
//! - Unit tests: Inline in each crate under `#[cfg(test)]`

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod scenarios;

#[cfg(test)]
mod boundary_tests;
#[cfg(test)]
mod matrix_tests;
