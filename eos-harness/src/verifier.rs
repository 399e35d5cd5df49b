//! Consumption verification.
//!
//! Two read-committed paths observe the output log: one started while the
//! copiers run and faults land, one started after every copier finished.
//! Each is drained to the expected count and then judged against the input
//! set with [`ConsumptionVerifier::check`].

use std::fmt;
use std::time::Duration;

use eos_core::{Message, MessageSet};
use tracing::{debug, info};

use crate::config::ScenarioConfig;
use crate::error::HarnessResult;
use crate::service::{Backend, ConsumerSpec, ReadCommittedConsumer};
use crate::waiter::Waiter;

/// Maximum number of messages listed in a set mismatch.
pub const SAMPLE_LIMIT: usize = 10;

/// Which consumer observed a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumptionPath {
    /// The consumer running alongside the faults.
    Concurrent,
    /// The consumer started after copying finished.
    Output,
}

impl fmt::Display for ConsumptionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Concurrent => write!(f, "concurrent"),
            Self::Output => write!(f, "output"),
        }
    }
}

/// A violated exactly-once property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// A consumer received some message more than once.
    Duplicates {
        /// Consumer that saw the duplicates.
        path: ConsumptionPath,
        /// Received messages beyond the distinct count.
        count: usize,
    },

    /// The consumed set differs from the input set.
    SetMismatch {
        /// Consumer whose set differs.
        path: ConsumptionPath,
        /// Distinct input messages.
        input_len: usize,
        /// Distinct consumed messages.
        observed_len: usize,
        /// Input messages never consumed.
        missing: usize,
        /// Consumed messages that were never input.
        extraneous: usize,
        /// The smallest missing messages.
        sample_missing: Vec<Message>,
        /// The smallest extraneous messages.
        sample_extraneous: Vec<Message>,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Duplicates {
                path: ConsumptionPath::Output,
                count,
            } => write!(f, "Detected {count} duplicates in the output stream"),
            Self::Duplicates {
                path: ConsumptionPath::Concurrent,
                count,
            } => write!(f, "Detected {count} duplicates in concurrently consumed messages"),
            Self::SetMismatch {
                path,
                input_len,
                observed_len,
                missing,
                extraneous,
                sample_missing,
                sample_extraneous,
            } => {
                let observed = match path {
                    ConsumptionPath::Output => "output",
                    ConsumptionPath::Concurrent => "concurrently consumed",
                };
                write!(
                    f,
                    "Input and {observed} message sets are not equal. \
                     Num input messages {input_len}. Num {observed} messages {observed_len}. \
                     Missing {missing} {sample_missing:?}, extraneous {extraneous} {sample_extraneous:?}"
                )
            }
        }
    }
}

/// A started read-committed consumer.
pub struct ConsumerHandle {
    consumer: Box<dyn ReadCommittedConsumer>,
    topic: String,
    group: String,
    drained: Option<Vec<Message>>,
}

impl ConsumerHandle {
    /// Topic being consumed.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer group.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Messages received so far.
    #[must_use]
    pub fn num_consumed(&self) -> usize {
        self.drained
            .as_ref()
            .map_or_else(|| self.consumer.num_consumed(), Vec::len)
    }

    /// Returns true once the handle has been drained and stopped.
    #[must_use]
    pub const fn is_drained(&self) -> bool {
        self.drained.is_some()
    }

    /// Stops the consumer without draining. Best effort.
    pub async fn stop(&mut self) {
        if self.drained.is_none() {
            self.consumer.stop().await;
        }
    }
}

/// Starts, drains and judges read-committed consumers.
pub struct ConsumptionVerifier<'a> {
    backend: &'a dyn Backend,
    config: &'a ScenarioConfig,
    waiter: Waiter,
}

impl<'a> ConsumptionVerifier<'a> {
    /// Creates a verifier.
    #[must_use]
    pub fn new(backend: &'a dyn Backend, config: &'a ScenarioConfig) -> Self {
        Self {
            backend,
            config,
            waiter: Waiter::new(config.poll_interval),
        }
    }

    /// Starts a read-committed consumer from the beginning of `topic`.
    ///
    /// Returns once the consumer has received at least one message.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if nothing arrives within the consumer start
    /// timeout.
    pub async fn start_read_committed(
        &self,
        topic: &str,
        group: &str,
    ) -> HarnessResult<ConsumerHandle> {
        let timeout = self.config.consumer_start_timeout;
        let mut consumer = self.backend.read_committed_consumer(ConsumerSpec {
            topic: topic.to_string(),
            group_id: group.to_string(),
        })?;
        consumer.start().await?;

        let started = self
            .waiter
            .wait_until(
                || consumer.num_consumed() > 0,
                timeout,
                || format!("consumer {group} failed to consume any messages from '{topic}' in {timeout:?}"),
            )
            .await;
        if let Err(e) = started {
            consumer.stop().await;
            return Err(e);
        }

        info!(topic, group, "read-committed consumer started");
        Ok(ConsumerHandle {
            consumer,
            topic: topic.to_string(),
            group: group.to_string(),
            drained: None,
        })
    }

    /// Waits for `expected` messages, stops the consumer and returns what it
    /// received.
    ///
    /// Draining an already drained handle returns the same sequence without
    /// waiting.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` reporting how many messages arrived if the count is
    /// not reached in time. The consumer is stopped either way.
    pub async fn drain(
        &self,
        handle: &mut ConsumerHandle,
        expected: usize,
        timeout: Duration,
    ) -> HarnessResult<Vec<Message>> {
        if let Some(drained) = &handle.drained {
            debug!(group = %handle.group, "consumer already drained");
            return Ok(drained.clone());
        }

        let consumer = &handle.consumer;
        let waited = self
            .waiter
            .wait_until(
                || consumer.num_consumed() >= expected,
                timeout,
                || {
                    format!(
                        "consumer {} consumed only {} out of {expected} messages in {timeout:?}",
                        handle.group,
                        consumer.num_consumed()
                    )
                },
            )
            .await;
        handle.consumer.stop().await;
        waited?;

        let messages = handle.consumer.messages_consumed();
        info!(group = %handle.group, consumed = messages.len(), expected, "consumer drained");
        handle.drained = Some(messages.clone());
        Ok(messages)
    }

    /// Checks one consumed set against the input set.
    ///
    /// Produces a duplicates violation if the consumer received any message
    /// twice, and a mismatch violation if the distinct sets differ.
    #[must_use]
    pub fn check(
        path: ConsumptionPath,
        input: &MessageSet,
        consumed: &MessageSet,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();

        let count = consumed.duplicate_count();
        if count > 0 {
            violations.push(Violation::Duplicates { path, count });
        }

        if input != consumed {
            let missing = input.difference(consumed);
            let extraneous = consumed.difference(input);
            violations.push(Violation::SetMismatch {
                path,
                input_len: input.len(),
                observed_len: consumed.len(),
                missing: missing.len(),
                extraneous: extraneous.len(),
                sample_missing: missing.into_iter().take(SAMPLE_LIMIT).collect(),
                sample_extraneous: extraneous.into_iter().take(SAMPLE_LIMIT).collect(),
            });
        }
        violations
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;

    fn seq(values: &[u64]) -> Vec<Message> {
        values.iter().copied().map(Message::new).collect()
    }

    #[test]
    fn test_check_passes_on_exact_copy() {
        let input = MessageSet::from_sequence(&seq(&[1, 2, 3]));
        let output = MessageSet::from_sequence(&seq(&[3, 1, 2]));
        assert!(ConsumptionVerifier::check(ConsumptionPath::Output, &input, &output).is_empty());
    }

    #[test]
    fn test_check_reports_duplicates() {
        let input = MessageSet::from_sequence(&seq(&[1, 2, 3]));
        let output = MessageSet::from_sequence(&seq(&[1, 2, 2, 3, 3]));
        let violations = ConsumptionVerifier::check(ConsumptionPath::Output, &input, &output);
        assert_eq!(
            violations,
            vec![Violation::Duplicates {
                path: ConsumptionPath::Output,
                count: 2
            }]
        );
        assert_eq!(
            violations[0].to_string(),
            "Detected 2 duplicates in the output stream"
        );
    }

    #[test]
    fn test_check_reports_missing_and_extraneous() {
        let input = MessageSet::from_sequence(&seq(&[1, 2, 3, 4]));
        let output = MessageSet::from_sequence(&seq(&[1, 2, 9]));
        let violations = ConsumptionVerifier::check(ConsumptionPath::Concurrent, &input, &output);

        assert_eq!(violations.len(), 1);
        match &violations[0] {
            Violation::SetMismatch {
                input_len,
                observed_len,
                missing,
                extraneous,
                sample_missing,
                sample_extraneous,
                ..
            } => {
                assert_eq!(*input_len, 4);
                assert_eq!(*observed_len, 3);
                assert_eq!(*missing, 2);
                assert_eq!(*extraneous, 1);
                assert_eq!(sample_missing, &seq(&[3, 4]));
                assert_eq!(sample_extraneous, &seq(&[9]));
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
        assert!(violations[0]
            .to_string()
            .starts_with("Input and concurrently consumed message sets are not equal"));
    }

    #[test]
    fn test_mismatch_sample_is_bounded() {
        let input = MessageSet::from_sequence(&(0..100).map(Message::new).collect::<Vec<_>>());
        let output = MessageSet::default();
        let violations = ConsumptionVerifier::check(ConsumptionPath::Output, &input, &output);
        match &violations[0] {
            Violation::SetMismatch {
                missing,
                sample_missing,
                ..
            } => {
                assert_eq!(*missing, 100);
                assert_eq!(sample_missing.len(), SAMPLE_LIMIT);
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }

    /// Consumer fed by the test through a shared buffer.
    pub struct ScriptedConsumer {
        pub messages: Arc<Mutex<Vec<Message>>>,
        pub stopped: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl ReadCommittedConsumer for ScriptedConsumer {
        async fn start(&mut self) -> HarnessResult<()> {
            Ok(())
        }

        async fn stop(&mut self) {
            *self.stopped.lock().unwrap() = true;
        }

        fn num_consumed(&self) -> usize {
            self.messages.lock().unwrap().len()
        }

        fn messages_consumed(&self) -> Vec<Message> {
            self.messages.lock().unwrap().clone()
        }
    }

    fn scripted_handle(messages: &Arc<Mutex<Vec<Message>>>) -> (ConsumerHandle, Arc<Mutex<bool>>) {
        let stopped = Arc::new(Mutex::new(false));
        let handle = ConsumerHandle {
            consumer: Box::new(ScriptedConsumer {
                messages: Arc::clone(messages),
                stopped: Arc::clone(&stopped),
            }),
            topic: "output-topic".to_string(),
            group: "verifying_consumer".to_string(),
            drained: None,
        };
        (handle, stopped)
    }

    async fn drain_with(
        config: &ScenarioConfig,
        handle: &mut ConsumerHandle,
        expected: usize,
    ) -> HarnessResult<Vec<Message>> {
        let waiter = Waiter::new(config.poll_interval);
        // The backend is never consulted when draining.
        let backend = crate::sim::SimBackend::new(config.clone());
        let verifier = ConsumptionVerifier {
            backend: &backend,
            config,
            waiter,
        };
        verifier.drain(handle, expected, Duration::from_secs(1)).await
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_is_idempotent() {
        let config = ScenarioConfig::default();
        let messages = Arc::new(Mutex::new(seq(&[1, 2, 3])));
        let (mut handle, stopped) = scripted_handle(&messages);

        let first = drain_with(&config, &mut handle, 3).await.unwrap();
        assert!(*stopped.lock().unwrap());
        assert!(handle.is_drained());

        // Late arrivals after the stop do not leak into a second drain.
        messages.lock().unwrap().push(Message::new(4));
        let second = drain_with(&config, &mut handle, 3).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(MessageSet::from_sequence(&first), MessageSet::from_sequence(&second));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_reports_shortfall() {
        let config = ScenarioConfig::default();
        let messages = Arc::new(Mutex::new(seq(&[1, 2])));
        let (mut handle, stopped) = scripted_handle(&messages);

        let err = drain_with(&config, &mut handle, 5).await.unwrap_err();

        assert!(err.is_timeout());
        assert!(err.to_string().contains("consumed only 2 out of 5 messages"));
        assert!(*stopped.lock().unwrap());
        assert!(!handle.is_drained());
    }
}
