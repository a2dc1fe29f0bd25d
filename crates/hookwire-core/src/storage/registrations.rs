//! Repository for webhook registration database operations.
//!
//! A registration maps `(user_id, event_type)` to exactly one target
//! URL. Saving settings again replaces the URL in place; registrations
//! are never implicitly deleted.

use std::sync::Arc;

use sqlx::PgPool;

use crate::{
    error::{CoreError, Result},
    models::{RegistrationId, UserId, WebhookRegistration},
};

/// Repository for webhook registration database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Creates or replaces the registration for `(user_id, event_type)`.
    ///
    /// The target URL must be a well-formed absolute http(s) URL;
    /// reachability is not checked. At most one registration exists per
    /// pair, so a second upsert overwrites the first.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidInput`] for a malformed URL and
    /// [`CoreError::Database`] if the write fails.
    pub async fn upsert(
        &self,
        user_id: &UserId,
        event_type: &str,
        target_url: &str,
    ) -> Result<WebhookRegistration> {
        validate_target_url(target_url)?;

        let registration = sqlx::query_as::<_, WebhookRegistration>(
            r#"
            INSERT INTO webhook_registrations (id, user_id, event_type, target_url, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            ON CONFLICT (user_id, event_type)
            DO UPDATE SET target_url = EXCLUDED.target_url, updated_at = NOW()
            RETURNING id, user_id, event_type, target_url, created_at, updated_at
            "#,
        )
        .bind(RegistrationId::new())
        .bind(user_id)
        .bind(event_type)
        .bind(target_url)
        .fetch_one(&*self.pool)
        .await?;

        Ok(registration)
    }

    /// Finds the registration for `(user_id, event_type)`, if any.
    ///
    /// Absence is not an error: the enqueuer uses `None` to decide that
    /// no delivery job should be created.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find(
        &self,
        user_id: &UserId,
        event_type: &str,
    ) -> Result<Option<WebhookRegistration>> {
        let registration = sqlx::query_as::<_, WebhookRegistration>(
            r#"
            SELECT id, user_id, event_type, target_url, created_at, updated_at
            FROM webhook_registrations
            WHERE user_id = $1 AND event_type = $2
            "#,
        )
        .bind(user_id)
        .bind(event_type)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(registration)
    }

    /// Finds a registration by its surrogate ID.
    ///
    /// Used by the dispatcher to resolve a claimed job's target URL.
    ///
    /// # Errors
    ///
    /// Returns error if the query fails.
    pub async fn find_by_id(&self, id: RegistrationId) -> Result<Option<WebhookRegistration>> {
        let registration = sqlx::query_as::<_, WebhookRegistration>(
            r#"
            SELECT id, user_id, event_type, target_url, created_at, updated_at
            FROM webhook_registrations
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        Ok(registration)
    }
}

/// Checks that a target URL is an absolute http(s) URL with a host.
///
/// Well-formedness only; the URL is not contacted.
///
/// # Errors
///
/// Returns [`CoreError::InvalidInput`] describing what is wrong.
pub fn validate_target_url(target_url: &str) -> Result<()> {
    let parsed = url::Url::parse(target_url)
        .map_err(|e| CoreError::InvalidInput(format!("target_url is not a valid URL: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(CoreError::InvalidInput(format!(
            "target_url scheme must be http or https, got {}",
            parsed.scheme()
        )));
    }

    if parsed.host_str().is_none() {
        return Err(CoreError::InvalidInput("target_url must include a host".to_string()));
    }

    Ok(())
}
