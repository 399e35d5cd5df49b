//! Runs that must fail, and must say where and why.

use std::time::Duration;

use eos_core::{BounceTarget, FailureMode};
use eos_harness::{
    HarnessError, Scenario, ScenarioConfig, SimBackend, SimConfig, SimFaults, Stage,
};

use crate::scenarios::{assert_exactly_once, configs, seeds::ACK_LOSS_SEEDS};

#[tokio::test(start_paused = true)]
async fn test_seeding_times_out_when_acks_stop() {
    let backend =
        SimBackend::new(configs::small(1_000)).with_faults(SimFaults::none().with_ack_limit(400));

    let err = Scenario::new(&backend)
        .run(FailureMode::HardBounce, BounceTarget::Clients)
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Seeding);
    assert!(err.source.is_timeout());
    let msg = err.to_string();
    assert!(msg.contains("failed to produce 1000 messages"), "{msg}");
    assert!(msg.contains("acknowledged only 400"), "{msg}");
    // The run stops before any copier exists.
    assert_eq!(backend.copiers_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_copier_is_named_on_completion_timeout() {
    let backend = SimBackend::new(configs::small(20_000))
        .with_faults(SimFaults::none().with_stalled_copier("my-second-transactional-id", 50.0));

    let err = Scenario::new(&backend)
        .run(FailureMode::CleanBounce, BounceTarget::Brokers)
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::AwaitingCompletion);
    assert!(err.source.is_timeout());
    let msg = err.to_string();
    assert!(
        msg.contains("my-second-transactional-id - failed to copy all messages"),
        "{msg}"
    );
    assert!(!msg.contains("my-first-transactional-id"), "{msg}");
}

#[tokio::test(start_paused = true)]
async fn test_stalled_copier_fails_the_bounce_gate() {
    // Stalled below the first gate: the client bounce cannot proceed.
    let config = ScenarioConfig {
        copier_progress_timeout: Duration::from_secs(3),
        ..configs::small(20_000)
    };
    let backend = SimBackend::new(config)
        .with_faults(SimFaults::none().with_stalled_copier("my-first-transactional-id", 10.0));

    let err = Scenario::new(&backend)
        .run(FailureMode::HardBounce, BounceTarget::Clients)
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::FaultInjection);
    let msg = err.to_string();
    assert!(msg.contains("my-first-transactional-id did not reach 20.0% progress"), "{msg}");
}

#[tokio::test(start_paused = true)]
async fn test_hard_kill_deregisters_within_session_timeout() {
    // No slack: the deregistration wait is bounded by the session timeout alone.
    let config = ScenarioConfig {
        deregistration_slack: Duration::ZERO,
        ..configs::small(5_000)
    };
    let backend = SimBackend::with_options(config, SimConfig::default(), SimFaults::none());

    let report = Scenario::new(&backend)
        .run(FailureMode::HardBounce, BounceTarget::Brokers)
        .await
        .unwrap();
    assert_exactly_once(&report, 5_000);
    assert_eq!(report.fault_events.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_lost_acks_do_not_duplicate_input() {
    for &seed in ACK_LOSS_SEEDS {
        let sim = SimConfig {
            seed,
            ..SimConfig::default()
        };
        let backend = SimBackend::with_options(
            configs::small(5_000),
            sim,
            SimFaults::none().with_ack_loss_rate(0.2),
        );

        let report = Scenario::new(&backend)
            .run(FailureMode::CleanBounce, BounceTarget::Brokers)
            .await
            .unwrap();

        assert_eq!(report.result.input_messages.len(), 5_000, "seed {seed}");
        assert_exactly_once(&report, 5_000);
    }
}

#[test]
fn test_invalid_config_is_rejected_before_running() {
    let err = ScenarioConfig::builder()
        .transaction_size(0)
        .build()
        .unwrap_err();
    assert!(matches!(err, HarnessError::InvalidConfig(_)));
}
