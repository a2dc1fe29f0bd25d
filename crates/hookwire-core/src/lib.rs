//! Core domain types and persistence for the hookwire delivery queue.
//!
//! This crate owns what the queue remembers: webhook registrations
//! (one target URL per user and event type) and delivery jobs (queued
//! payloads with their attempt bookkeeping). It also provides the
//! ambient seams the pipeline is built on: a clock abstraction for
//! deterministic time, delivery lifecycle events for observers, and the
//! storage repositories over PostgreSQL.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use events::{DeliveryEvent, EventHandler, MulticastEventHandler, NoOpEventHandler};
pub use models::{DeliveryJob, JobId, JobStatus, RegistrationId, UserId, WebhookRegistration};
pub use time::{Clock, RealClock, TestClock};
