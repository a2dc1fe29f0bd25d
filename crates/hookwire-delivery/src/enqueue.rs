//! Intake side of the delivery queue.
//!
//! Application code reports events here when something notable happens,
//! such as a tracked job changing status. If the user registered a webhook
//! for the event type, a pending delivery job is persisted for the
//! dispatcher to pick up. If not, the event is dropped silently.

use std::sync::Arc;

use hookwire_core::models::{JobId, UserId};
use tracing::{debug, warn};

use crate::storage::DeliveryStorage;

/// Enqueues delivery jobs for application events.
///
/// Cloning is cheap and shares the underlying storage handle.
#[derive(Clone)]
pub struct Enqueuer {
    storage: Arc<dyn DeliveryStorage>,
}

impl Enqueuer {
    /// Creates an enqueuer backed by the given storage.
    pub fn new(storage: Arc<dyn DeliveryStorage>) -> Self {
        Self { storage }
    }

    /// Reports an event, enqueuing a delivery job when a registration
    /// matches.
    ///
    /// Never fails: the caller's own operation already succeeded, and a
    /// webhook hiccup must not roll it back. Storage errors are logged and
    /// swallowed, which can lose the notification. Callers needing the
    /// outcome use [`try_notify`](Self::try_notify) instead.
    pub async fn notify(&self, user_id: &UserId, event_type: &str, payload: serde_json::Value) {
        match self.try_notify(user_id, event_type, payload).await {
            Ok(Some(job_id)) => {
                debug!(%user_id, event_type, %job_id, "delivery job enqueued");
            },
            Ok(None) => {
                debug!(%user_id, event_type, "no webhook registered, event dropped");
            },
            Err(e) => {
                warn!(%user_id, event_type, error = %e, "failed to enqueue delivery job");
            },
        }
    }

    /// Like [`notify`](Self::notify) but surfaces the outcome.
    ///
    /// Returns the new job's ID, or `None` when the user has no
    /// registration for the event type.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the registration lookup or job insert.
    pub async fn try_notify(
        &self,
        user_id: &UserId,
        event_type: &str,
        payload: serde_json::Value,
    ) -> hookwire_core::Result<Option<JobId>> {
        let registration = self
            .storage
            .find_registration(user_id.clone(), event_type.to_string())
            .await?;

        let Some(registration) = registration else {
            return Ok(None);
        };

        let job = self.storage.create_job(registration.id, payload).await?;
        Ok(Some(job.id))
    }
}

impl std::fmt::Debug for Enqueuer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Enqueuer").finish_non_exhaustive()
    }
}
