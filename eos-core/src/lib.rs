//! EOS Core - Data model for the exactly-once verification harness.
//!
//! This crate provides the types every other EOS crate speaks in. It does NOT
//! talk to brokers, spawn processes or poll anything - those concerns live in
//! `eos-harness` and its backends.
//!
//! # Design Principles
//!
//! - **Strongly-typed IDs**: a `NodeId` can't be passed where a `PartitionId` is expected
//! - **Set semantics for verification**: order is discarded on purpose, duplicates are counted
//! - **Explicit parameters**: the failure matrix is a pair of closed enums, not strings
//! - **No unsafe code**

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

mod error;
mod message;
mod params;
mod types;

pub use error::{Error, Result};
pub use message::{Message, MessageSet};
pub use params::{BounceTarget, FailureMode};
pub use types::{NodeId, PartitionId, TransactionalId};
