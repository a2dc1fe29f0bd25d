//! Delivery lifecycle events for decoupled observability.
//!
//! The dispatcher announces delivery outcomes through a handler trait so
//! that alerting or audit systems can subscribe without the queue knowing
//! about them. Terminal failures are only ever surfaced through logs and
//! these events; nothing user-facing depends on them.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{JobId, RegistrationId};

/// Events emitted by the delivery pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryEvent {
    /// A job was delivered (2xx) and its row deleted.
    Delivered(JobDeliveredEvent),

    /// An attempt failed and the job was rescheduled.
    RetryScheduled(RetryScheduledEvent),

    /// A job exhausted its attempt budget and is terminally failed.
    Exhausted(JobExhaustedEvent),
}

/// Emitted when a delivery attempt receives a 2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDeliveredEvent {
    /// Job that was delivered.
    pub job_id: JobId,

    /// Registration that received the payload.
    pub registration_id: RegistrationId,

    /// Target URL that acknowledged the delivery.
    pub target_url: String,

    /// HTTP status returned by the endpoint.
    pub response_status: u16,

    /// Which attempt succeeded (1-based).
    pub attempt_number: u32,

    /// When the delivery completed.
    pub delivered_at: DateTime<Utc>,
}

/// Emitted when an attempt fails but budget remains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryScheduledEvent {
    /// Job that failed this attempt.
    pub job_id: JobId,

    /// Registration the attempt targeted.
    pub registration_id: RegistrationId,

    /// HTTP status, when the endpoint responded at all.
    pub response_status: Option<u16>,

    /// Attempts completed so far, including this failure.
    pub attempt_number: u32,

    /// Why the attempt failed.
    pub error_message: String,

    /// When the job becomes eligible again.
    pub next_attempt_at: DateTime<Utc>,
}

/// Emitted when a job's final attempt fails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobExhaustedEvent {
    /// Job that is now terminally failed.
    pub job_id: JobId,

    /// Registration the attempts targeted.
    pub registration_id: RegistrationId,

    /// Total attempts made.
    pub attempts: u32,

    /// Error from the final attempt.
    pub error_message: String,

    /// When the budget ran out.
    pub failed_at: DateTime<Utc>,
}

/// Trait for reacting to delivery events.
///
/// Handlers must not block dispatch: failures inside a handler are the
/// handler's problem to log, never the pipeline's to propagate.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync + std::fmt::Debug {
    /// Handles a delivery event.
    async fn handle_event(&self, event: DeliveryEvent);
}

/// No-op handler used when nothing subscribes.
#[derive(Debug, Default)]
pub struct NoOpEventHandler;

impl NoOpEventHandler {
    /// Creates a new no-op event handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl EventHandler for NoOpEventHandler {
    async fn handle_event(&self, _event: DeliveryEvent) {}
}

/// Forwards each event to every subscriber concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastEventHandler {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl MulticastEventHandler {
    /// Creates a multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    /// Returns the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl EventHandler for MulticastEventHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        let futures = self.handlers.iter().map(|handler| {
            let event = event.clone();
            async move {
                handler.handle_event(event).await;
            }
        });

        // Subscriber outcomes are ignored; dispatch never depends on
        // observers
        futures::future::join_all(futures).await;
    }
}
