//! The scenario orchestrator.
//!
//! One run walks a fixed sequence of states:
//!
//! ```text
//! SeedingInput -> CopyingAndConcurrentVerifying -> FaultInjected
//!     -> AwaitingCopyCompletion -> DrainingFinal -> Verifying -> Passed
//! ```
//!
//! Any fatal error moves the run to `Failed` and is returned as a
//! [`ScenarioError`] naming the stage. Every service started by the run is
//! shut down before `run` returns, pass or fail.

use std::fmt;
use std::time::Duration;

use eos_core::{BounceTarget, FailureMode, Message, MessageSet};
use tokio::time::Instant;
use tracing::{error, info};

use crate::copier::CopierPool;
use crate::error::{AtStage, HarnessError, ScenarioError, Stage};
use crate::fault::{FaultAction, FaultEvent, FaultInjector};
use crate::seeder::MessageSeeder;
use crate::service::Backend;
use crate::verifier::{ConsumerHandle, ConsumptionPath, ConsumptionVerifier, Violation};

/// Orchestrator states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScenarioState {
    /// Starting the cluster and seeding the input topic.
    SeedingInput,
    /// Copiers and the concurrent consumer running.
    CopyingAndConcurrentVerifying,
    /// Faults being applied.
    FaultInjected,
    /// Waiting for every copier to finish.
    AwaitingCopyCompletion,
    /// Draining both consumers.
    DrainingFinal,
    /// Comparing message sets.
    Verifying,
    /// Every assertion held.
    Passed,
    /// A fatal error or assertion failure ended the run.
    Failed,
}

impl fmt::Display for ScenarioState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SeedingInput => "seeding_input",
            Self::CopyingAndConcurrentVerifying => "copying_and_concurrent_verifying",
            Self::FaultInjected => "fault_injected",
            Self::AwaitingCopyCompletion => "awaiting_copy_completion",
            Self::DrainingFinal => "draining_final",
            Self::Verifying => "verifying",
            Self::Passed => "passed",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A state entered at some point of the run.
#[derive(Debug, Clone, Copy)]
pub struct StateTransition {
    /// The state entered.
    pub state: ScenarioState,
    /// Time since the run started.
    pub at: Duration,
}

/// The three observed sequences and their sets.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Acknowledged input messages.
    pub input_messages: Vec<Message>,
    /// Messages received by the consumer racing the faults.
    pub concurrently_consumed_messages: Vec<Message>,
    /// Messages received by the post-hoc consumer.
    pub output_messages: Vec<Message>,
    /// Distinct input messages.
    pub input_set: MessageSet,
    /// Distinct concurrently consumed messages.
    pub concurrent_set: MessageSet,
    /// Distinct post-hoc messages.
    pub output_set: MessageSet,
}

impl ScenarioResult {
    /// Builds a result from the three sequences.
    #[must_use]
    pub fn new(
        input_messages: Vec<Message>,
        concurrently_consumed_messages: Vec<Message>,
        output_messages: Vec<Message>,
    ) -> Self {
        let input_set = MessageSet::from_sequence(&input_messages);
        let concurrent_set = MessageSet::from_sequence(&concurrently_consumed_messages);
        let output_set = MessageSet::from_sequence(&output_messages);
        Self {
            input_messages,
            concurrently_consumed_messages,
            output_messages,
            input_set,
            concurrent_set,
            output_set,
        }
    }

    /// Duplicates received by the post-hoc consumer.
    #[must_use]
    pub fn num_dups(&self) -> usize {
        self.output_set.duplicate_count()
    }

    /// Duplicates received by the concurrent consumer.
    #[must_use]
    pub fn num_dups_in_concurrent(&self) -> usize {
        self.concurrent_set.duplicate_count()
    }

    /// Every violated property.
    ///
    /// Output duplicates and output equality come first, then the same two
    /// checks for the concurrent path.
    #[must_use]
    pub fn violations(&self) -> Vec<Violation> {
        let mut violations =
            ConsumptionVerifier::check(ConsumptionPath::Output, &self.input_set, &self.output_set);
        violations.extend(ConsumptionVerifier::check(
            ConsumptionPath::Concurrent,
            &self.input_set,
            &self.concurrent_set,
        ));
        violations
    }
}

/// Everything a passed run produced.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    /// Failure mode that was applied.
    pub mode: FailureMode,
    /// Target that was faulted.
    pub target: BounceTarget,
    /// Backend the run used.
    pub backend: &'static str,
    /// Fault strategy selected for the pair.
    pub action: FaultAction,
    /// Observed messages.
    pub result: ScenarioResult,
    /// States entered, in order.
    pub transitions: Vec<StateTransition>,
    /// Faults applied, in order.
    pub fault_events: Vec<FaultEvent>,
    /// Wall time of the run.
    pub elapsed: Duration,
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}/{} on {}: PASSED in {:.1}s",
            self.mode,
            self.target,
            self.backend,
            self.elapsed.as_secs_f64()
        )?;
        writeln!(f, "  input messages:        {}", self.result.input_set.len())?;
        writeln!(
            f,
            "  concurrently consumed: {} ({} dups)",
            self.result.concurrently_consumed_messages.len(),
            self.result.num_dups_in_concurrent()
        )?;
        writeln!(
            f,
            "  output messages:       {} ({} dups)",
            self.result.output_messages.len(),
            self.result.num_dups()
        )?;
        write!(f, "  faults: {} x {}", self.fault_events.len(), self.action)?;
        for event in &self.fault_events {
            write!(f, "\n    {event}")?;
        }
        Ok(())
    }
}

struct TransitionLog {
    started: Instant,
    transitions: Vec<StateTransition>,
}

impl TransitionLog {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            transitions: Vec::new(),
        }
    }

    fn enter(&mut self, state: ScenarioState) {
        let at = self.started.elapsed();
        info!(%state, elapsed = ?at, "scenario state");
        self.transitions.push(StateTransition { state, at });
    }
}

struct Outcome {
    result: ScenarioResult,
    action: FaultAction,
    fault_events: Vec<FaultEvent>,
}

/// Drives one `(FailureMode, BounceTarget)` run against a backend.
pub struct Scenario<'a> {
    backend: &'a dyn Backend,
}

impl<'a> Scenario<'a> {
    /// Creates an orchestrator over `backend`.
    #[must_use]
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self { backend }
    }

    /// Runs the scenario to completion.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error together with the stage it happened
    /// in. Assertion failures are reported at [`Stage::Verification`] with
    /// every violated property.
    pub async fn run(
        &self,
        mode: FailureMode,
        target: BounceTarget,
    ) -> Result<ScenarioReport, ScenarioError> {
        let backend = self.backend;
        let config = backend.config();
        let cluster = backend.cluster();
        info!(%mode, %target, backend = backend.name(), "starting scenario");

        let mut log = TransitionLog::new();
        let mut pool = CopierPool::new(config);
        let mut concurrent = None;

        let outcome = self
            .drive(mode, target, &mut log, &mut pool, &mut concurrent)
            .await;

        pool.shutdown().await;
        if let Some(handle) = concurrent.as_mut() {
            handle.stop().await;
        }
        cluster.shutdown().await;

        match outcome {
            Ok(outcome) => {
                log.enter(ScenarioState::Passed);
                Ok(ScenarioReport {
                    mode,
                    target,
                    backend: backend.name(),
                    action: outcome.action,
                    result: outcome.result,
                    fault_events: outcome.fault_events,
                    elapsed: log.started.elapsed(),
                    transitions: log.transitions,
                })
            }
            Err(e) => {
                log.enter(ScenarioState::Failed);
                error!(%mode, %target, stage = %e.stage, error = %e.source, "scenario failed");
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        mode: FailureMode,
        target: BounceTarget,
        log: &mut TransitionLog,
        pool: &mut CopierPool<'a>,
        concurrent: &mut Option<ConsumerHandle>,
    ) -> Result<Outcome, ScenarioError> {
        let backend = self.backend;
        let config = backend.config();
        let cluster = backend.cluster();
        let verifier = ConsumptionVerifier::new(backend, config);

        log.enter(ScenarioState::SeedingInput);
        cluster.start().await.at(Stage::Seeding)?;
        let input_messages = MessageSeeder::new(backend, config)
            .seed(config.seed_messages, &config.input_topic)
            .await
            .at(Stage::Seeding)?;
        let expected = MessageSet::from_sequence(&input_messages).len();

        log.enter(ScenarioState::CopyingAndConcurrentVerifying);
        pool.start_all(backend, &config.assignments())
            .await
            .at(Stage::Copying)?;
        let handle = concurrent.insert(
            verifier
                .start_read_committed(&config.output_topic, &config.concurrent_group)
                .await
                .at(Stage::Copying)?,
        );

        log.enter(ScenarioState::FaultInjected);
        let mut injector = FaultInjector::new(config);
        let action = injector
            .inject(mode, target, cluster.as_ref(), pool)
            .await
            .at(Stage::FaultInjection)?;
        let fault_events = injector.into_events();

        log.enter(ScenarioState::AwaitingCopyCompletion);
        pool.await_completion(config.copy_completion_timeout)
            .await
            .at(Stage::AwaitingCompletion)?;

        log.enter(ScenarioState::DrainingFinal);
        let concurrently_consumed = verifier
            .drain(handle, expected, config.drain_timeout)
            .await
            .at(Stage::Draining)?;
        let mut verifying = verifier
            .start_read_committed(&config.output_topic, &config.verifying_group)
            .await
            .at(Stage::Draining)?;
        let output_messages = verifier
            .drain(&mut verifying, expected, config.drain_timeout)
            .await
            .at(Stage::Draining)?;

        log.enter(ScenarioState::Verifying);
        let result = ScenarioResult::new(input_messages, concurrently_consumed, output_messages);
        info!(
            input = result.input_set.len(),
            output = result.output_messages.len(),
            concurrent = result.concurrently_consumed_messages.len(),
            dups = result.num_dups(),
            concurrent_dups = result.num_dups_in_concurrent(),
            "verifying"
        );
        let violations = result.violations();
        if !violations.is_empty() {
            return Err(ScenarioError::new(
                Stage::Verification,
                HarnessError::Assertion { violations },
            ));
        }

        Ok(Outcome {
            result,
            action,
            fault_events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seq(values: impl IntoIterator<Item = u64>) -> Vec<Message> {
        values.into_iter().map(Message::new).collect()
    }

    #[test]
    fn test_result_passes_exact_copy() {
        let result = ScenarioResult::new(seq(0..10), seq((0..10).rev()), seq(0..10));
        assert_eq!(result.num_dups(), 0);
        assert_eq!(result.num_dups_in_concurrent(), 0);
        assert!(result.violations().is_empty());
    }

    #[test]
    fn test_violations_are_ordered_output_first() {
        let mut output = seq(0..10);
        output.push(Message::new(3));
        let concurrent = seq(0..9);

        let result = ScenarioResult::new(seq(0..10), concurrent, output);
        let violations = result.violations();

        assert_eq!(violations.len(), 2);
        assert_eq!(
            violations[0],
            Violation::Duplicates {
                path: ConsumptionPath::Output,
                count: 1
            }
        );
        assert!(matches!(
            violations[1],
            Violation::SetMismatch {
                path: ConsumptionPath::Concurrent,
                missing: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(ScenarioState::SeedingInput.to_string(), "seeding_input");
        assert_eq!(
            ScenarioState::CopyingAndConcurrentVerifying.to_string(),
            "copying_and_concurrent_verifying"
        );
        assert_eq!(ScenarioState::Failed.to_string(), "failed");
    }
}
