//! Batch dispatch of due delivery jobs.
//!
//! Each tick claims a bounded batch of due jobs, posts them to their
//! registered URLs concurrently, and settles every job exactly one way:
//! deleted on success, rescheduled on a retryable failure, or parked as
//! permanently failed once the attempt budget is spent.
//!
//! A job whose bookkeeping cannot be persisted (storage blip mid-tick) is
//! left untouched. Its claim lease expires on its own and a later tick
//! picks it up again, so at-least-once delivery holds across crashes.

use std::sync::Arc;

use hookwire_core::{
    events::{
        DeliveryEvent, EventHandler, JobDeliveredEvent, JobExhaustedEvent, NoOpEventHandler,
        RetryScheduledEvent,
    },
    models::DeliveryJob,
    time::Clock,
};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::{
    client::{ClientConfig, DeliveryClient, DeliveryRequest},
    error::{DeliveryError, Result},
    retry::{RetryDecision, RetryPolicy},
    storage::DeliveryStorage,
};

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Maximum jobs claimed per tick.
    pub batch_size: usize,

    /// HTTP client configuration.
    pub client_config: ClientConfig,

    /// Retry policy applied to failed attempts.
    pub retry_policy: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: crate::DEFAULT_BATCH_SIZE,
            client_config: ClientConfig::default(),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// What happened to the jobs claimed by one tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    /// Jobs claimed at the start of the tick.
    pub claimed: usize,
    /// Jobs acknowledged by their endpoint and removed.
    pub delivered: usize,
    /// Jobs rescheduled for a later attempt.
    pub retried: usize,
    /// Jobs parked as permanently failed.
    pub exhausted: usize,
    /// Jobs left untouched because their bookkeeping could not be
    /// persisted. The claim lease returns them to circulation.
    pub skipped: usize,
}

impl TickOutcome {
    /// True when the tick found nothing to do.
    pub fn is_idle(&self) -> bool {
        self.claimed == 0
    }
}

/// Running totals across ticks, for monitoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatcherStats {
    /// Ticks completed, idle ones included.
    pub ticks: u64,
    /// Jobs claimed across all ticks.
    pub jobs_claimed: u64,
    /// Jobs delivered and removed.
    pub jobs_delivered: u64,
    /// Failed attempts that were rescheduled.
    pub jobs_retried: u64,
    /// Jobs that ran out of attempts.
    pub jobs_exhausted: u64,
    /// Jobs left for lease expiry after a storage failure.
    pub jobs_skipped: u64,
}

enum JobOutcome {
    Delivered,
    Retried,
    Exhausted,
    Skipped,
}

/// Claims due jobs and drives them through delivery.
///
/// One dispatcher handles a whole batch concurrently; ticks themselves are
/// serialized by the scheduler that owns the dispatcher.
pub struct Dispatcher {
    storage: Arc<dyn DeliveryStorage>,
    client: DeliveryClient,
    config: DispatcherConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventHandler>,
    stats: Arc<RwLock<DispatcherStats>>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given storage.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built from the configuration.
    pub fn new(
        storage: Arc<dyn DeliveryStorage>,
        config: DispatcherConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = DeliveryClient::new(config.client_config.clone())?;

        Ok(Self {
            storage,
            client,
            config,
            clock,
            events: Arc::new(NoOpEventHandler),
            stats: Arc::new(RwLock::new(DispatcherStats::default())),
        })
    }

    /// Replaces the event handler notified about delivery outcomes.
    #[must_use]
    pub fn with_event_handler(mut self, events: Arc<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }

    /// Runs one dispatch cycle: claim due jobs, deliver them concurrently,
    /// settle each according to its outcome.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Database` when the claim itself fails. Jobs
    /// already claimed by a previous tick are unaffected; nothing was
    /// touched yet.
    pub async fn tick(&self) -> Result<TickOutcome> {
        let now = self.clock.now_utc();
        let lease = self.config.retry_policy.claim_lease();

        let jobs = self
            .storage
            .claim_due_jobs(self.config.batch_size, now, lease)
            .await
            .map_err(|e| DeliveryError::database(format!("failed to claim due jobs: {e}")))?;

        let mut outcome = TickOutcome { claimed: jobs.len(), ..TickOutcome::default() };

        if jobs.is_empty() {
            debug!("no due jobs, tick idle");
            self.record_tick(outcome).await;
            return Ok(outcome);
        }

        debug!(claimed = jobs.len(), "dispatching job batch");

        let results =
            futures::future::join_all(jobs.into_iter().map(|job| self.dispatch_job(job))).await;

        for result in results {
            match result {
                JobOutcome::Delivered => outcome.delivered += 1,
                JobOutcome::Retried => outcome.retried += 1,
                JobOutcome::Exhausted => outcome.exhausted += 1,
                JobOutcome::Skipped => outcome.skipped += 1,
            }
        }

        self.record_tick(outcome).await;
        Ok(outcome)
    }

    /// Returns running totals since the dispatcher was created.
    pub async fn stats(&self) -> DispatcherStats {
        *self.stats.read().await
    }

    async fn record_tick(&self, outcome: TickOutcome) {
        let mut stats = self.stats.write().await;
        stats.ticks += 1;
        stats.jobs_claimed += outcome.claimed as u64;
        stats.jobs_delivered += outcome.delivered as u64;
        stats.jobs_retried += outcome.retried as u64;
        stats.jobs_exhausted += outcome.exhausted as u64;
        stats.jobs_skipped += outcome.skipped as u64;
    }

    /// Drives a single claimed job through one delivery attempt.
    ///
    /// Never escalates: each job settles independently so one bad endpoint
    /// or row cannot sink the rest of the batch.
    async fn dispatch_job(&self, job: DeliveryJob) -> JobOutcome {
        let attempt_number = u32::try_from(job.attempts).unwrap_or(0).saturating_add(1);

        let target_url = match self.storage.target_url(job.registration_id).await {
            Ok(url) => url,
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    registration_id = %job.registration_id,
                    error = %e,
                    "could not resolve target URL, leaving job for lease expiry"
                );
                return JobOutcome::Skipped;
            },
        };

        let request = DeliveryRequest {
            job_id: job.id,
            target_url: target_url.clone(),
            payload: job.payload.clone(),
            attempt_number,
        };

        match self.client.deliver(&request).await {
            Ok(response) if response.is_success() => {
                self.settle_delivered(&job, &target_url, response.status, attempt_number).await
            },
            Ok(response) => {
                let error = DeliveryError::http_status(response.status);
                self.settle_failed(&job, attempt_number, &error).await
            },
            Err(error) => self.settle_failed(&job, attempt_number, &error).await,
        }
    }

    /// Removes an acknowledged job and announces the delivery.
    async fn settle_delivered(
        &self,
        job: &DeliveryJob,
        target_url: &str,
        response_status: u16,
        attempt_number: u32,
    ) -> JobOutcome {
        let delivered_at = self.clock.now_utc();

        if let Err(e) = self.storage.delete_job(job.id).await {
            // The endpoint acked but the row stayed behind. The lease will
            // expire and the job will be posted again, which at-least-once
            // permits.
            warn!(
                job_id = %job.id,
                error = %e,
                "delivered but failed to remove job, duplicate delivery possible"
            );
            return JobOutcome::Skipped;
        }

        info!(
            job_id = %job.id,
            status = response_status,
            attempt = attempt_number,
            "webhook delivered"
        );

        self.events
            .handle_event(DeliveryEvent::Delivered(JobDeliveredEvent {
                job_id: job.id,
                registration_id: job.registration_id,
                target_url: target_url.to_string(),
                response_status,
                attempt_number,
                delivered_at,
            }))
            .await;

        JobOutcome::Delivered
    }

    /// Counts a failed attempt and either reschedules the job or parks it.
    async fn settle_failed(
        &self,
        job: &DeliveryJob,
        attempt_number: u32,
        error: &DeliveryError,
    ) -> JobOutcome {
        let failed_at = self.clock.now_utc();
        let attempts = i32::try_from(attempt_number).unwrap_or(i32::MAX);

        match self.config.retry_policy.decide(attempt_number, failed_at) {
            RetryDecision::Retry { next_attempt_at } => {
                if let Err(e) = self
                    .storage
                    .record_failure(job.id, attempts, failed_at, next_attempt_at)
                    .await
                {
                    warn!(
                        job_id = %job.id,
                        error = %e,
                        "failed to persist attempt, leaving job for lease expiry"
                    );
                    return JobOutcome::Skipped;
                }

                warn!(
                    job_id = %job.id,
                    attempt = attempt_number,
                    next_attempt_at = %next_attempt_at,
                    error = %error,
                    "delivery failed, retry scheduled"
                );

                self.events
                    .handle_event(DeliveryEvent::RetryScheduled(RetryScheduledEvent {
                        job_id: job.id,
                        registration_id: job.registration_id,
                        response_status: error.response_status(),
                        attempt_number,
                        error_message: error.to_string(),
                        next_attempt_at,
                    }))
                    .await;

                JobOutcome::Retried
            },
            RetryDecision::GiveUp { reason } => {
                if let Err(e) = self.storage.mark_failed(job.id, attempts, failed_at).await {
                    warn!(
                        job_id = %job.id,
                        error = %e,
                        "failed to park exhausted job, leaving it for lease expiry"
                    );
                    return JobOutcome::Skipped;
                }

                error!(
                    job_id = %job.id,
                    attempts = attempt_number,
                    reason = %reason,
                    error = %error,
                    "delivery permanently failed"
                );

                self.events
                    .handle_event(DeliveryEvent::Exhausted(JobExhaustedEvent {
                        job_id: job.id,
                        registration_id: job.registration_id,
                        attempts: attempt_number,
                        error_message: error.to_string(),
                        failed_at,
                    }))
                    .await;

                JobOutcome::Exhausted
            },
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").field("config", &self.config).finish_non_exhaustive()
    }
}
