//! Client poll threads.
//!
//! librdkafka clients are blocking, so each one runs on its own OS thread and
//! watches a stop flag between polls.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread;

use tracing::warn;

use crate::error::{HarnessError, HarnessResult};

/// Keep polling.
pub(crate) const RUN: u8 = 0;
/// Finish the unit of work in hand, then exit.
pub(crate) const STOP_GRACEFUL: u8 = 1;
/// Exit at the next check without cleaning up.
pub(crate) const STOP_NOW: u8 = 2;

/// Stop flag shared with a poll thread.
#[derive(Debug, Clone, Default)]
pub(crate) struct StopSignal(Arc<AtomicU8>);

impl StopSignal {
    pub(crate) fn get(&self) -> u8 {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn is_set(&self) -> bool {
        self.get() != RUN
    }

    pub(crate) fn is_immediate(&self) -> bool {
        self.get() == STOP_NOW
    }

    fn set(&self, signal: u8) {
        self.0.store(signal, Ordering::Release);
    }
}

/// A named poll thread.
#[derive(Debug, Default)]
pub(crate) struct Worker {
    signal: StopSignal,
    handle: Option<thread::JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn spawn<F>(&mut self, name: String, body: F) -> HarnessResult<()>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        self.signal = StopSignal::default();
        let signal = self.signal.clone();
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || body(signal))
            .map_err(|e| HarnessError::service("client", e))?;
        self.handle = Some(handle);
        Ok(())
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub(crate) async fn stop(&mut self, signal: u8) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.signal.set(signal);
        let joined = tokio::task::spawn_blocking(move || handle.join()).await;
        if !matches!(joined, Ok(Ok(()))) {
            warn!("client thread panicked");
        }
    }
}
