//! Input seeding.

use eos_core::Message;
use tracing::info;

use crate::config::ScenarioConfig;
use crate::error::HarnessResult;
use crate::service::{Backend, ProducerSpec};
use crate::waiter::Waiter;

/// Populates the input log through an idempotent producer.
pub struct MessageSeeder<'a> {
    backend: &'a dyn Backend,
    config: &'a ScenarioConfig,
    waiter: Waiter,
}

impl<'a> MessageSeeder<'a> {
    /// Creates a seeder.
    #[must_use]
    pub fn new(backend: &'a dyn Backend, config: &'a ScenarioConfig) -> Self {
        Self {
            backend,
            config,
            waiter: Waiter::new(config.poll_interval),
        }
    }

    /// Produces `count` distinct messages to `topic`.
    ///
    /// Returns the acknowledged messages in acknowledgment order. The
    /// producer is stopped whether or not seeding succeeded.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if fewer than `count` messages are acknowledged
    /// within the seed timeout, or a service error if the producer fails.
    pub async fn seed(&self, count: u64, topic: &str) -> HarnessResult<Vec<Message>> {
        let timeout = self.config.seed_timeout;
        let mut producer = self.backend.idempotent_producer(ProducerSpec {
            topic: topic.to_string(),
            max_messages: count,
        })?;
        producer.start().await?;
        info!(topic, count, "seeding input");

        let waited = self
            .waiter
            .wait_until(
                || producer.num_acked() >= count,
                timeout,
                || {
                    format!(
                        "producer failed to produce {count} messages to '{topic}' in {timeout:?}: \
                         acknowledged only {}",
                        producer.num_acked()
                    )
                },
            )
            .await;
        producer.stop().await;
        waited?;

        let acked = producer.acked();
        info!(topic, acked = acked.len(), "seeding complete");
        Ok(acked)
    }
}
