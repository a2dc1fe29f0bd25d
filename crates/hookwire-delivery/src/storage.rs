//! Storage abstraction layer for the dispatch pipeline.
//!
//! Provides trait-based abstractions over storage operations to enable
//! testability without database dependencies. Production implementations
//! use the concrete `hookwire_core::storage::Storage` while tests can
//! provide mock implementations for deterministic behavior validation.

use std::{future::Future, pin::Pin, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookwire_core::{
    error::Result,
    models::{DeliveryJob, JobId, JobStatus, RegistrationId, UserId, WebhookRegistration},
};

/// Storage operations required by the dispatch pipeline.
///
/// Abstracts the queue tables so enqueuing and dispatching can be tested
/// against lightweight in-memory doubles. Production uses the PostgreSQL
/// repositories behind `hookwire_core::storage::Storage`.
pub trait DeliveryStorage: Send + Sync + 'static {
    /// Looks up the registration for a user and event type.
    ///
    /// Returns `None` when the user never registered a URL for the event
    /// type, in which case no job is enqueued.
    fn find_registration(
        &self,
        user_id: UserId,
        event_type: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookRegistration>>> + Send + '_>>;

    /// Persists a new pending delivery job with zero attempts.
    fn create_job(
        &self,
        registration_id: RegistrationId,
        payload: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryJob>> + Send + '_>>;

    /// Claims due pending jobs for dispatch, oldest first.
    ///
    /// Claiming stamps `last_attempt_at = now` and pushes `next_attempt_at`
    /// to `now + lease`, so a job in flight is invisible to other claimers
    /// until the lease expires. Production uses FOR UPDATE SKIP LOCKED so
    /// concurrent claimers never hand out the same job twice.
    fn claim_due_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DeliveryJob>>> + Send + '_>>;

    /// Resolves the destination URL for a registration.
    fn target_url(
        &self,
        registration_id: RegistrationId,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Removes a delivered job from the queue.
    ///
    /// Returns false when the job was already gone.
    fn delete_job(&self, job_id: JobId)
        -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Records a failed attempt that still has retry budget left.
    ///
    /// Persists the new attempt count and when the job next becomes
    /// eligible. The job stays pending.
    fn record_failure(
        &self,
        job_id: JobId,
        attempts: i32,
        failed_at: DateTime<Utc>,
        next_attempt_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Parks a job as permanently failed after its final attempt.
    fn mark_failed(
        &self,
        job_id: JobId,
        attempts: i32,
        failed_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Finds a job by ID, if it still exists.
    ///
    /// Used for verification in tests and for monitoring job lifecycle.
    fn find_job(
        &self,
        job_id: JobId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DeliveryJob>>> + Send + '_>>;

    /// Counts jobs still awaiting delivery.
    fn count_pending(&self) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>>;
}

/// Production storage implementation using PostgreSQL.
///
/// Wraps the concrete `hookwire_core::storage::Storage` to implement the
/// `DeliveryStorage` trait. All database operations go through the
/// repository pattern for consistency and type safety.
pub struct PostgresDeliveryStorage {
    storage: Arc<hookwire_core::storage::Storage>,
}

impl PostgresDeliveryStorage {
    /// Creates a new PostgreSQL storage adapter.
    pub fn new(storage: Arc<hookwire_core::storage::Storage>) -> Self {
        Self { storage }
    }
}

impl DeliveryStorage for PostgresDeliveryStorage {
    fn find_registration(
        &self,
        user_id: UserId,
        event_type: String,
    ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookRegistration>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.registrations.find(&user_id, &event_type).await })
    }

    fn create_job(
        &self,
        registration_id: RegistrationId,
        payload: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<DeliveryJob>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.delivery_jobs.create(registration_id, &payload).await })
    }

    fn claim_due_jobs(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<DeliveryJob>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.delivery_jobs.claim_due(limit, now, lease).await })
    }

    fn target_url(
        &self,
        registration_id: RegistrationId,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage
                .registrations
                .find_by_id(registration_id)
                .await?
                .map(|registration| registration.target_url)
                .ok_or_else(|| {
                    hookwire_core::CoreError::NotFound(format!(
                        "registration {registration_id} not found"
                    ))
                })
        })
    }

    fn delete_job(
        &self,
        job_id: JobId,
    ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.delivery_jobs.delete(job_id).await })
    }

    fn record_failure(
        &self,
        job_id: JobId,
        attempts: i32,
        failed_at: DateTime<Utc>,
        next_attempt_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move {
            storage.delivery_jobs.record_failure(job_id, attempts, failed_at, next_attempt_at).await
        })
    }

    fn mark_failed(
        &self,
        job_id: JobId,
        attempts: i32,
        failed_at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.delivery_jobs.mark_failed(job_id, attempts, failed_at).await })
    }

    fn find_job(
        &self,
        job_id: JobId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<DeliveryJob>>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.delivery_jobs.find_by_id(job_id).await })
    }

    fn count_pending(&self) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
        let storage = self.storage.clone();
        Box::pin(async move { storage.delivery_jobs.count_by_status(JobStatus::Pending).await })
    }
}

pub mod mock {
    //! Mock storage implementation for testing.
    //!
    //! Provides deterministic, in-memory storage for testing enqueue and
    //! dispatch logic without database dependencies. Supports injecting
    //! failures to simulate storage outages.

    use std::{collections::HashMap, future::Future, pin::Pin, sync::Arc, time::Duration};

    use chrono::{DateTime, Utc};
    use hookwire_core::error::Result;
    use tokio::sync::RwLock;

    use super::{DeliveryJob, DeliveryStorage, JobId, JobStatus, RegistrationId, UserId,
        WebhookRegistration};

    /// Mock storage for testing dispatch logic without a database.
    ///
    /// Stores rows in-memory and mirrors the claim semantics of the real
    /// repositories: due filtering, oldest-first ordering, and lease
    /// stamping on claim.
    pub struct MockDeliveryStorage {
        jobs: Arc<RwLock<HashMap<JobId, DeliveryJob>>>,
        registrations: Arc<RwLock<HashMap<(UserId, String), WebhookRegistration>>>,
        deleted: Arc<RwLock<Vec<JobId>>>,
        claim_error: Arc<RwLock<Option<String>>>,
        create_error: Arc<RwLock<Option<String>>>,
    }

    impl MockDeliveryStorage {
        /// Creates a new mock storage with empty state.
        pub fn new() -> Self {
            Self {
                jobs: Arc::new(RwLock::new(HashMap::new())),
                registrations: Arc::new(RwLock::new(HashMap::new())),
                deleted: Arc::new(RwLock::new(Vec::new())),
                claim_error: Arc::new(RwLock::new(None)),
                create_error: Arc::new(RwLock::new(None)),
            }
        }

        /// Registers a destination URL, returning the registration ID.
        pub async fn add_registration(
            &self,
            user_id: &UserId,
            event_type: &str,
            target_url: &str,
        ) -> RegistrationId {
            let mut registrations = self.registrations.write().await;
            let key = (user_id.clone(), event_type.to_string());

            if let Some(existing) = registrations.get_mut(&key) {
                existing.target_url = target_url.to_string();
                existing.updated_at = Utc::now();
                return existing.id;
            }

            let registration = WebhookRegistration {
                id: RegistrationId::new(),
                user_id: user_id.clone(),
                event_type: event_type.to_string(),
                target_url: target_url.to_string(),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            };
            let id = registration.id;
            registrations.insert(key, registration);
            id
        }

        /// Inserts a fully built job row, as the enqueuer would.
        pub async fn insert_job(&self, job: DeliveryJob) {
            self.jobs.write().await.insert(job.id, job);
        }

        /// Injects an error for the next claim operation.
        pub async fn inject_claim_error(&self, error: impl Into<String>) {
            *self.claim_error.write().await = Some(error.into());
        }

        /// Injects an error for the next job creation.
        pub async fn inject_create_error(&self, error: impl Into<String>) {
            *self.create_error.write().await = Some(error.into());
        }

        /// Returns the current row for a job, if it still exists.
        pub async fn job(&self, job_id: JobId) -> Option<DeliveryJob> {
            self.jobs.read().await.get(&job_id).cloned()
        }

        /// Returns the IDs of jobs removed after successful delivery.
        pub async fn deleted_jobs(&self) -> Vec<JobId> {
            self.deleted.read().await.clone()
        }

        /// Counts jobs currently in pending status.
        pub async fn pending_count(&self) -> usize {
            self.jobs.read().await.values().filter(|j| j.status == JobStatus::Pending).count()
        }
    }

    impl Default for MockDeliveryStorage {
        fn default() -> Self {
            Self::new()
        }
    }

    impl DeliveryStorage for MockDeliveryStorage {
        fn find_registration(
            &self,
            user_id: UserId,
            event_type: String,
        ) -> Pin<Box<dyn Future<Output = Result<Option<WebhookRegistration>>> + Send + '_>>
        {
            let registrations = self.registrations.clone();
            Box::pin(async move {
                Ok(registrations.read().await.get(&(user_id, event_type)).cloned())
            })
        }

        fn create_job(
            &self,
            registration_id: RegistrationId,
            payload: serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<DeliveryJob>> + Send + '_>> {
            let jobs = self.jobs.clone();
            let create_error = self.create_error.clone();

            Box::pin(async move {
                if let Some(error) = create_error.write().await.take() {
                    return Err(hookwire_core::CoreError::Database(error));
                }

                let job = DeliveryJob {
                    id: JobId::new(),
                    registration_id,
                    payload,
                    status: JobStatus::Pending,
                    attempts: 0,
                    last_attempt_at: None,
                    next_attempt_at: None,
                    created_at: Utc::now(),
                };
                jobs.write().await.insert(job.id, job.clone());
                Ok(job)
            })
        }

        fn claim_due_jobs(
            &self,
            limit: usize,
            now: DateTime<Utc>,
            lease: Duration,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<DeliveryJob>>> + Send + '_>> {
            let jobs = self.jobs.clone();
            let claim_error = self.claim_error.clone();

            Box::pin(async move {
                if let Some(error) = claim_error.write().await.take() {
                    return Err(hookwire_core::CoreError::Database(error));
                }

                let lease = chrono::Duration::from_std(lease).map_err(|e| {
                    hookwire_core::CoreError::InvalidInput(format!(
                        "claim lease out of range: {e}"
                    ))
                })?;

                let mut jobs_map = jobs.write().await;

                let mut due: Vec<(DateTime<Utc>, JobId)> = jobs_map
                    .values()
                    .filter(|job| job.is_due(now))
                    .map(|job| (job.created_at, job.id))
                    .collect();
                due.sort_by_key(|&(created_at, id)| (created_at, id.0));
                due.truncate(limit);

                let mut claimed = Vec::with_capacity(due.len());
                for (_, job_id) in due {
                    if let Some(job) = jobs_map.get_mut(&job_id) {
                        job.last_attempt_at = Some(now);
                        job.next_attempt_at = Some(now + lease);
                        claimed.push(job.clone());
                    }
                }

                Ok(claimed)
            })
        }

        fn target_url(
            &self,
            registration_id: RegistrationId,
        ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
            let registrations = self.registrations.clone();
            Box::pin(async move {
                registrations
                    .read()
                    .await
                    .values()
                    .find(|r| r.id == registration_id)
                    .map(|r| r.target_url.clone())
                    .ok_or_else(|| {
                        hookwire_core::CoreError::NotFound(format!(
                            "registration {registration_id} not found"
                        ))
                    })
            })
        }

        fn delete_job(
            &self,
            job_id: JobId,
        ) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
            let jobs = self.jobs.clone();
            let deleted = self.deleted.clone();
            Box::pin(async move {
                let removed = jobs.write().await.remove(&job_id).is_some();
                if removed {
                    deleted.write().await.push(job_id);
                }
                Ok(removed)
            })
        }

        fn record_failure(
            &self,
            job_id: JobId,
            attempts: i32,
            failed_at: DateTime<Utc>,
            next_attempt_at: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let jobs = self.jobs.clone();
            Box::pin(async move {
                if let Some(job) = jobs.write().await.get_mut(&job_id) {
                    job.attempts = attempts;
                    job.last_attempt_at = Some(failed_at);
                    job.next_attempt_at = Some(next_attempt_at);
                }
                Ok(())
            })
        }

        fn mark_failed(
            &self,
            job_id: JobId,
            attempts: i32,
            failed_at: DateTime<Utc>,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            let jobs = self.jobs.clone();
            Box::pin(async move {
                if let Some(job) = jobs.write().await.get_mut(&job_id) {
                    job.status = JobStatus::Failed;
                    job.attempts = attempts;
                    job.last_attempt_at = Some(failed_at);
                    job.next_attempt_at = None;
                }
                Ok(())
            })
        }

        fn find_job(
            &self,
            job_id: JobId,
        ) -> Pin<Box<dyn Future<Output = Result<Option<DeliveryJob>>> + Send + '_>> {
            let jobs = self.jobs.clone();
            Box::pin(async move { Ok(jobs.read().await.get(&job_id).cloned()) })
        }

        fn count_pending(&self) -> Pin<Box<dyn Future<Output = Result<i64>> + Send + '_>> {
            let jobs = self.jobs.clone();
            Box::pin(async move {
                let count = jobs
                    .read()
                    .await
                    .values()
                    .filter(|j| j.status == JobStatus::Pending)
                    .count();
                Ok(count as i64)
            })
        }
    }
}
