//! Repository for delivery job database operations.
//!
//! Claiming is the concurrency-sensitive path: due jobs are selected
//! with `FOR UPDATE SKIP LOCKED` and stamped with a lease in the same
//! transaction, so overlapping ticks or multiple dispatcher processes
//! never hand the same job to two attempts.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{
    error::{CoreError, Result},
    models::{DeliveryJob, JobId, JobStatus, RegistrationId},
};

/// Repository for delivery job database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates a new pending job carrying `payload`.
    ///
    /// Fresh jobs have zero attempts and no timestamps, which makes them
    /// immediately due.
    ///
    /// # Errors
    ///
    /// Returns error if the insert fails, including foreign-key
    /// violations for a nonexistent registration.
    pub async fn create(
        &self,
        registration_id: RegistrationId,
        payload: &serde_json::Value,
    ) -> Result<DeliveryJob> {
        let job = sqlx::query_as::<_, DeliveryJob>(
            r#"
            INSERT INTO delivery_jobs
                (id, registration_id, payload, status, attempts, last_attempt_at, next_attempt_at, created_at)
            VALUES ($1, $2, $3, 'pending', 0, NULL, NULL, NOW())
            RETURNING id, registration_id, payload, status, attempts,
                      last_attempt_at, next_attempt_at, created_at
            "#,
        )
        .bind(JobId::new())
        .bind(registration_id)
        .bind(payload)
        .fetch_one(&*self.pool)
        .await?;

        Ok(job)
    }

    /// Claims due jobs for delivery processing.
    ///
    /// A job is due when it is `pending` and its `next_attempt_at` is
    /// null or has passed. Claimed rows get `last_attempt_at = now` and a
    /// `next_attempt_at` lease, so a job whose attempt is still in flight
    /// (or whose process died mid-attempt) cannot be claimed again until
    /// the lease expires.
    ///
    /// Selection is oldest-first with `FOR UPDATE SKIP LOCKED`, so
    /// concurrent claimers skip each other's rows instead of blocking.
    ///
    /// # Errors
    ///
    /// Returns error if the claim transaction fails; in that case no job
    /// state was changed.
    pub async fn claim_due(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<DeliveryJob>> {
        let lease = chrono::Duration::from_std(lease)
            .map_err(|e| CoreError::InvalidInput(format!("claim lease out of range: {e}")))?;

        let mut tx = self.pool.begin().await?;

        let job_ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            SELECT id FROM delivery_jobs
            WHERE status = 'pending'
              AND (next_attempt_at IS NULL OR next_attempt_at <= $1)
            ORDER BY created_at ASC
            LIMIT $2
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await?;

        if job_ids.is_empty() {
            tx.rollback().await?;
            return Ok(Vec::new());
        }

        let jobs = sqlx::query_as::<_, DeliveryJob>(
            r#"
            UPDATE delivery_jobs
            SET last_attempt_at = $2, next_attempt_at = $3
            WHERE id = ANY($1)
            RETURNING id, registration_id, payload, status, attempts,
                      last_attempt_at, next_attempt_at, created_at
            "#,
        )
        .bind(&job_ids)
        .bind(now)
        .bind(now + lease)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::debug!(
            claimed = jobs.len(),
            lease_secs = lease.num_seconds(),
            "Claimed due delivery jobs"
        );

        Ok(jobs)
    }

    /// Records a failed attempt for a job that still has budget.
    ///
    /// The job keeps status `pending` and becomes due again at
    /// `next_attempt_at`.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn record_failure(
        &self,
        id: JobId,
        attempts: i32,
        failed_at: DateTime<Utc>,
        next_attempt_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE delivery_jobs
            SET attempts = $2, last_attempt_at = $3, next_attempt_at = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(failed_at)
        .bind(next_attempt_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Marks a job terminally failed after its final attempt.
    ///
    /// The row is retained for audit and never selected again.
    ///
    /// # Errors
    ///
    /// Returns error if the update fails.
    pub async fn mark_failed(
        &self,
        id: JobId,
        attempts: i32,
        failed_at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE delivery_jobs
            SET status = 'failed', attempts = $2, last_attempt_at = $3, next_attempt_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(attempts)
        .bind(failed_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    /// Deletes a job after successful delivery.
    ///
    /// Returns whether a row was actually removed; deleting an
    /// already-deleted job is a harmless no-op.
    ///
    /// # Errors
    ///
    /// Returns error if the delete fails.
    pub async fn delete(&self, id: JobId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM delivery_jobs WHERE id = $1")
            .bind(id)
            .execute(&*self.pool)
            .await?;

        if result.rows_affected() == 0 {
            tracing::warn!(job_id = %id, "No rows deleted - delivery job already removed");
        }

        Ok(result.rows_affected() > 0)
    }

    /// Finds a job by ID.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: JobId) -> Result<Option<DeliveryJob>> {
        let job = sqlx::query_as::<_, DeliveryJob>(
            r#"
            SELECT id, registration_id, payload, status, attempts,
                   last_attempt_at, next_attempt_at, created_at
            FROM delivery_jobs
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(job)
    }

    /// Counts jobs in a given status, for inspection and tests.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn count_by_status(&self, status: JobStatus) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM delivery_jobs WHERE status = $1")
                .bind(status)
                .fetch_one(&*self.pool)
                .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn repository_builds_from_lazy_pool() {
        let pool = PgPool::connect_lazy("postgresql://localhost/hookwire_test")
            .expect("lazy pool creation should not fail");
        let _repo = Repository::new(Arc::new(pool));
    }

    #[test]
    fn oversized_lease_is_rejected_not_wrapped() {
        // chrono rejects durations beyond its range; make sure we map
        // that to InvalidInput instead of panicking
        let lease = Duration::from_secs(u64::MAX);
        let converted = chrono::Duration::from_std(lease);
        assert!(converted.is_err());
    }
}
