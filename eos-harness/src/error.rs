//! Harness error types.
//!
//! The harness performs no local recovery: every error aborts the scenario.
//! [`HarnessError`] says what went wrong, [`ScenarioError`] adds the stage
//! the run was in when it happened.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::verifier::Violation;

/// Result type for harness operations.
pub type HarnessResult<T> = Result<T, HarnessError>;

/// Errors that can occur while driving or judging a scenario.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A bounded wait expired before its condition held.
    #[error("timed out after {waited:?}: {description}")]
    Timeout {
        /// The unmet condition, rendered when the wait gave up.
        description: String,
        /// How long the harness waited.
        waited: Duration,
    },

    /// Post-run correctness checks failed.
    #[error("{} assertion(s) failed: {}", .violations.len(), summarize(.violations))]
    Assertion {
        /// Every violated property, in assertion order.
        violations: Vec<Violation>,
    },

    /// An external collaborator refused an operation.
    #[error("{service} error: {message}")]
    Service {
        /// Which collaborator failed.
        service: &'static str,
        /// Error message.
        message: String,
    },

    /// The scenario configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl HarnessError {
    /// Wraps a collaborator error.
    #[must_use]
    pub fn service(service: &'static str, err: impl fmt::Display) -> Self {
        Self::Service {
            service,
            message: err.to_string(),
        }
    }

    /// Returns true for a bounded-wait timeout.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Returns true for a correctness violation.
    #[must_use]
    pub const fn is_assertion(&self) -> bool {
        matches!(self, Self::Assertion { .. })
    }
}

fn summarize(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// The stage of a scenario run, as reported on failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Starting the cluster and seeding the input log.
    Seeding,
    /// Starting copiers and the concurrent consumer.
    Copying,
    /// Bouncing brokers or copiers.
    FaultInjection,
    /// Waiting for every copier to finish.
    AwaitingCompletion,
    /// Draining the concurrent and post-hoc consumers.
    Draining,
    /// Comparing message sets.
    Verification,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Seeding => "seeding",
            Self::Copying => "copying",
            Self::FaultInjection => "fault injection",
            Self::AwaitingCompletion => "awaiting copy completion",
            Self::Draining => "draining",
            Self::Verification => "verification",
        };
        f.write_str(name)
    }
}

/// A failed scenario: the first fatal error and where it happened.
#[derive(Debug, Error)]
#[error("scenario failed during {stage}: {source}")]
pub struct ScenarioError {
    /// Stage the run was in.
    pub stage: Stage,
    /// The error that aborted the run.
    pub source: HarnessError,
}

impl ScenarioError {
    /// Creates a scenario error.
    #[must_use]
    pub const fn new(stage: Stage, source: HarnessError) -> Self {
        Self { stage, source }
    }
}

/// Tags a harness result with the stage it belongs to.
pub(crate) trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, ScenarioError>;
}

impl<T> AtStage<T> for HarnessResult<T> {
    fn at(self, stage: Stage) -> Result<T, ScenarioError> {
        self.map_err(|source| ScenarioError::new(stage, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::verifier::ConsumptionPath;

    #[test]
    fn test_timeout_display() {
        let err = HarnessError::Timeout {
            description: "producer acknowledged only 10 of 100 messages".to_string(),
            waited: Duration::from_secs(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("5s"));
        assert!(msg.contains("only 10 of 100"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_assertion_display_counts_violations() {
        let err = HarnessError::Assertion {
            violations: vec![
                Violation::Duplicates {
                    path: ConsumptionPath::Output,
                    count: 3,
                },
                Violation::Duplicates {
                    path: ConsumptionPath::Concurrent,
                    count: 1,
                },
            ],
        };
        let msg = err.to_string();
        assert!(msg.starts_with("2 assertion(s) failed"));
        assert!(msg.contains("Detected 3 duplicates"));
        assert!(err.is_assertion());
    }

    #[test]
    fn test_scenario_error_names_stage() {
        let err = ScenarioError::new(
            Stage::AwaitingCompletion,
            HarnessError::service("copier", "process exited"),
        );
        assert_eq!(
            err.to_string(),
            "scenario failed during awaiting copy completion: copier error: process exited"
        );
    }
}
