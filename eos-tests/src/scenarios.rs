//! Reusable configurations and checks for scenario tests.

use std::time::Duration;

use eos_harness::{ScenarioConfig, ScenarioReport};

/// Scenario configurations.
pub mod configs {
    use super::{Duration, ScenarioConfig};

    /// Poll interval for tests; fine enough that a bounce gate never
    /// overshoots by more than a transaction or two.
    pub const TEST_POLL_INTERVAL: Duration = Duration::from_millis(10);

    /// The full matrix parameters: 100000 messages, transactions of 750,
    /// 2 input and 3 output partitions on 3 brokers.
    #[must_use]
    pub fn matrix() -> ScenarioConfig {
        ScenarioConfig {
            poll_interval: TEST_POLL_INTERVAL,
            ..ScenarioConfig::default()
        }
    }

    /// A small run with short bounds, for tests that expect a failure.
    #[must_use]
    pub fn small(seed_messages: u64) -> ScenarioConfig {
        ScenarioConfig {
            seed_messages,
            transaction_size: 100,
            seed_timeout: Duration::from_secs(5),
            copy_completion_timeout: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(10),
            poll_interval: TEST_POLL_INTERVAL,
            ..ScenarioConfig::default()
        }
    }
}

/// Seeds for reproducible simulated runs.
pub mod seeds {
    /// Seeds used for the lost-acknowledgment runs.
    pub const ACK_LOSS_SEEDS: &[u64] = &[42, 7, 0xDEAD_BEEF];
}

/// Asserts that a passed run observed `expected` messages exactly once on
/// both consumption paths.
///
/// # Panics
///
/// Panics if any count or set differs.
pub fn assert_exactly_once(report: &ScenarioReport, expected: usize) {
    let result = &report.result;
    assert_eq!(result.input_set.len(), expected, "distinct input messages");
    assert_eq!(result.num_dups(), 0, "duplicates in output");
    assert_eq!(result.num_dups_in_concurrent(), 0, "duplicates in concurrent path");
    assert_eq!(result.output_set, result.input_set, "output set");
    assert_eq!(result.concurrent_set, result.input_set, "concurrent set");
    assert!(result.violations().is_empty());
}

/// Number of fault events that hit `target`.
#[must_use]
pub fn faults_on(report: &ScenarioReport, target: &str) -> usize {
    report
        .fault_events
        .iter()
        .filter(|event| event.target == target)
        .count()
}

/// Installs a test-writer subscriber. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
