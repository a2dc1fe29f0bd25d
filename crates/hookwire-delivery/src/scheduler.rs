//! Periodic driver for the dispatcher.
//!
//! A single background task wakes on a fixed interval and runs one
//! dispatch tick. Ticks never overlap: the next sleep starts only after
//! the previous tick has settled every job it claimed, so a slow batch
//! stretches the cadence instead of stacking up concurrent ticks.

use std::{sync::Arc, time::Duration};

use hookwire_core::time::Clock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    dispatcher::Dispatcher,
    error::{DeliveryError, Result},
};

/// Configuration for the dispatch scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Pause between dispatch ticks.
    pub tick_interval: Duration,

    /// Extra pause after a failed tick, to stay out of tight error loops
    /// when the database is down.
    pub error_backoff: Duration,

    /// Maximum time to wait for in-flight dispatches during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(crate::DEFAULT_TICK_INTERVAL_SECS),
            error_backoff: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Owns the dispatch loop.
pub struct Scheduler {
    dispatcher: Arc<Dispatcher>,
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    cancellation_token: CancellationToken,
}

impl Scheduler {
    /// Creates a scheduler around a dispatcher.
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        config: SchedulerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { dispatcher, config, clock, cancellation_token: CancellationToken::new() }
    }

    /// Runs the dispatch loop until cancelled.
    ///
    /// The first tick fires one interval after startup, matching the
    /// cadence of steady-state operation. Cancellation between ticks stops
    /// immediately; cancellation during a tick lets the in-flight batch
    /// settle first.
    pub async fn run(&self) {
        info!(
            tick_interval_secs = self.config.tick_interval.as_secs(),
            "dispatch scheduler starting"
        );

        loop {
            if self.cancellation_token.is_cancelled() {
                break;
            }

            tokio::select! {
                () = self.clock.sleep(self.config.tick_interval) => {},
                () = self.cancellation_token.cancelled() => break,
            }

            match self.dispatcher.tick().await {
                Ok(outcome) => {
                    if !outcome.is_idle() {
                        info!(
                            claimed = outcome.claimed,
                            delivered = outcome.delivered,
                            retried = outcome.retried,
                            exhausted = outcome.exhausted,
                            skipped = outcome.skipped,
                            "dispatch tick completed"
                        );
                    }
                },
                Err(error) => {
                    error!(error = %error, "dispatch tick failed");
                    tokio::select! {
                        () = self.clock.sleep(self.config.error_backoff) => {},
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!("dispatch scheduler stopped");
    }

    /// Spawns the dispatch loop as a background task.
    ///
    /// Returns a handle used to stop it. Dropping the handle without
    /// calling [`SchedulerHandle::shutdown_graceful`] cancels the loop
    /// abruptly.
    pub fn spawn(self) -> SchedulerHandle {
        let cancellation_token = self.cancellation_token.clone();
        let shutdown_timeout = self.config.shutdown_timeout;

        let handle = tokio::spawn(async move { self.run().await });

        SchedulerHandle { handle, cancellation_token, shutdown_timeout }
    }
}

/// Handle to a running scheduler task.
pub struct SchedulerHandle {
    handle: JoinHandle<()>,
    cancellation_token: CancellationToken,
    shutdown_timeout: Duration,
}

impl SchedulerHandle {
    /// Stops the scheduler, waiting for an in-flight tick to settle.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` when the loop does not
    /// stop within the configured timeout, typically because a batch of
    /// slow endpoints is still being waited on.
    pub async fn shutdown_graceful(mut self) -> Result<()> {
        info!(
            timeout_secs = self.shutdown_timeout.as_secs(),
            "initiating graceful scheduler shutdown"
        );

        self.cancellation_token.cancel();

        match tokio::time::timeout(self.shutdown_timeout, &mut self.handle).await {
            Ok(Ok(())) => {
                info!("scheduler shutdown completed");
                Ok(())
            },
            Ok(Err(join_error)) => {
                error!(error = %join_error, "scheduler task panicked during shutdown");
                Ok(())
            },
            Err(_) => {
                error!(
                    timeout_secs = self.shutdown_timeout.as_secs(),
                    "scheduler shutdown timed out, task may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout: self.shutdown_timeout })
            },
        }
    }

    /// True once the scheduler task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        if !self.handle.is_finished() && !self.cancellation_token.is_cancelled() {
            warn!("scheduler handle dropped without graceful shutdown, cancelling loop");
            self.cancellation_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_ticks_every_minute() {
        let config = SchedulerConfig::default();

        assert_eq!(config.tick_interval, Duration::from_secs(60));
        assert_eq!(config.error_backoff, Duration::from_secs(5));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(30));
    }
}
