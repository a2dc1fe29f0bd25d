//! Durable webhook dispatch with at-least-once delivery.
//!
//! This crate implements the moving parts of the delivery queue: enqueuing
//! jobs when application events fire, claiming due jobs in batches, posting
//! them to user-registered URLs, and retrying failures on a fixed schedule
//! until the attempt budget runs out.
//!
//! # Architecture
//!
//! A single scheduler task drives the pipeline. Each tick claims a bounded
//! batch of due jobs from PostgreSQL using `FOR UPDATE SKIP LOCKED`,
//! dispatches the whole batch concurrently, and settles every job before
//! the next tick starts:
//!
//! 1. **Claim** - due pending jobs are leased, oldest first
//! 2. **Dispatch** - payloads are POSTed as JSON to their target URLs
//! 3. **Settle** - acknowledged jobs are deleted; failures are rescheduled
//!    or parked as permanently failed once attempts are exhausted
//!
//! Claiming stamps a lease on each job, so a crash mid-dispatch never
//! strands work: the lease expires and a later tick retries the job with
//! its attempt counter unchanged.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookwire_core::time::RealClock;
//! use hookwire_delivery::{
//!     Dispatcher, DispatcherConfig, PostgresDeliveryStorage, Scheduler, SchedulerConfig,
//! };
//! use sqlx::PgPool;
//!
//! # async fn example(pool: PgPool) -> Result<(), hookwire_delivery::DeliveryError> {
//! let storage = Arc::new(hookwire_core::storage::Storage::new(pool));
//! let clock = Arc::new(RealClock);
//!
//! let dispatcher = Arc::new(Dispatcher::new(
//!     Arc::new(PostgresDeliveryStorage::new(storage)),
//!     DispatcherConfig::default(),
//!     clock.clone(),
//! )?);
//!
//! let handle = Scheduler::new(dispatcher, SchedulerConfig::default(), clock).spawn();
//! // ... on shutdown:
//! handle.shutdown_graceful().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatcher;
pub mod enqueue;
pub mod error;
pub mod retry;
pub mod scheduler;
pub mod storage;

// Re-export main public API
pub use client::{ClientConfig, DeliveryClient, DeliveryRequest, DeliveryResponse};
pub use dispatcher::{Dispatcher, DispatcherConfig, DispatcherStats, TickOutcome};
pub use enqueue::Enqueuer;
pub use error::{DeliveryError, Result};
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerHandle};
pub use storage::{DeliveryStorage, PostgresDeliveryStorage};

/// Default maximum jobs claimed per dispatch tick.
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Default attempt budget per job, the initial attempt included.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default HTTP request timeout in seconds.
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10;

/// Default delay between attempts in seconds.
pub const DEFAULT_BACKOFF_WINDOW_SECS: u64 = 300;

/// Default pause between dispatch ticks in seconds.
pub const DEFAULT_TICK_INTERVAL_SECS: u64 = 60;
