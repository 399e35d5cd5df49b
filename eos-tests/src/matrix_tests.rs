//! The failure matrix with full parameters on the simulated cluster.
//!
//! Each run seeds 100000 messages, copies them through two transactional
//! copiers in transactions of 750 and checks both consumption paths for
//! loss and duplication.

#![allow(clippy::doc_markdown)]

use std::time::Duration;

use eos_core::{BounceTarget, FailureMode};
use eos_harness::{FaultAction, Scenario, ScenarioState, SimBackend, FAULT_MATRIX};

use crate::scenarios::{assert_exactly_once, configs, faults_on, init_tracing};

const SEED_MESSAGES: usize = 100_000;
const FIRST: &str = "my-first-transactional-id";
const SECOND: &str = "my-second-transactional-id";

#[tokio::test(start_paused = true)]
async fn test_hard_bounce_clients() {
    init_tracing();
    let backend = SimBackend::new(configs::matrix());

    let report = Scenario::new(&backend)
        .run(FailureMode::HardBounce, BounceTarget::Clients)
        .await
        .unwrap();

    assert_exactly_once(&report, SEED_MESSAGES);
    assert_eq!(report.action, FaultAction::BounceCopiers { clean: false });
    assert_eq!(faults_on(&report, FIRST), 3);
    assert_eq!(faults_on(&report, SECOND), 3);
    // Identities survive restarts, so no other copier ever appears.
    assert_eq!(backend.copiers_created(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_clean_bounce_clients() {
    init_tracing();
    let backend = SimBackend::new(configs::matrix());

    let report = Scenario::new(&backend)
        .run(FailureMode::CleanBounce, BounceTarget::Clients)
        .await
        .unwrap();

    assert_exactly_once(&report, SEED_MESSAGES);
    assert_eq!(report.action, FaultAction::BounceCopiers { clean: true });
    assert_eq!(faults_on(&report, FIRST), 3);
    assert_eq!(faults_on(&report, SECOND), 3);

    // Rounds are applied in order, each copier once per round.
    let rounds: Vec<u32> = report.fault_events.iter().filter_map(|e| e.round).collect();
    assert_eq!(rounds, vec![1, 1, 2, 2, 3, 3]);
}

#[tokio::test(start_paused = true)]
async fn test_hard_bounce_brokers() {
    init_tracing();
    let backend = SimBackend::new(configs::matrix());

    let report = Scenario::new(&backend)
        .run(FailureMode::HardBounce, BounceTarget::Brokers)
        .await
        .unwrap();

    assert_exactly_once(&report, SEED_MESSAGES);
    assert_eq!(report.action, FaultAction::KillBrokersAwaitDeregistration);
    assert_eq!(report.fault_events.len(), 3);

    // Each killed broker stays registered for the 2s session timeout
    // before it may be started again.
    let session_timeout = Duration::from_secs(2);
    assert!(report.fault_events[0].at >= session_timeout);
    for pair in report.fault_events.windows(2) {
        assert!(pair[1].at - pair[0].at >= session_timeout);
    }
}

#[tokio::test(start_paused = true)]
async fn test_clean_bounce_brokers() {
    init_tracing();
    let backend = SimBackend::new(configs::matrix());

    let report = Scenario::new(&backend)
        .run(FailureMode::CleanBounce, BounceTarget::Brokers)
        .await
        .unwrap();

    assert_exactly_once(&report, SEED_MESSAGES);
    assert_eq!(report.action, FaultAction::RollingRestartBrokers);
    assert_eq!(report.fault_events.len(), 3);
    assert!(report.fault_events.iter().all(|e| e.round.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_run_walks_every_state_in_order() {
    let backend = SimBackend::new(configs::small(5_000));

    let report = Scenario::new(&backend)
        .run(FailureMode::CleanBounce, BounceTarget::Brokers)
        .await
        .unwrap();

    let states: Vec<ScenarioState> = report.transitions.iter().map(|t| t.state).collect();
    assert_eq!(
        states,
        vec![
            ScenarioState::SeedingInput,
            ScenarioState::CopyingAndConcurrentVerifying,
            ScenarioState::FaultInjected,
            ScenarioState::AwaitingCopyCompletion,
            ScenarioState::DrainingFinal,
            ScenarioState::Verifying,
            ScenarioState::Passed,
        ]
    );
    assert!(report.transitions.windows(2).all(|w| w[0].at <= w[1].at));
    assert!(report.to_string().contains("clean_bounce/brokers on sim: PASSED"));
}

#[tokio::test(start_paused = true)]
async fn test_every_matrix_cell_passes_on_a_small_run() {
    for (row, mode) in [FailureMode::HardBounce, FailureMode::CleanBounce]
        .into_iter()
        .enumerate()
    {
        for (column, target) in [BounceTarget::Brokers, BounceTarget::Clients]
            .into_iter()
            .enumerate()
        {
            let backend = SimBackend::new(configs::small(10_000));
            let report = Scenario::new(&backend).run(mode, target).await.unwrap();
            assert_exactly_once(&report, 10_000);
            assert_eq!(report.action, FAULT_MATRIX[row][column]);
        }
    }
}
