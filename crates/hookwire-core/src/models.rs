//! Core domain models and strongly-typed identifiers.
//!
//! Defines webhook registrations, delivery jobs, and newtype ID wrappers
//! for compile-time type safety. Includes database serialization traits
//! and the eligibility rule used by the dispatcher's due-job query.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Strongly-typed delivery job identifier.
///
/// Wraps a UUID to prevent mixing with other ID types. Jobs are created
/// by the enqueuer and this ID follows them until they are delivered
/// (row deleted) or exhausted (terminal failed).
///
/// # Example
///
/// ```
/// use hookwire_core::models::JobId;
/// let job_id = JobId::new();
/// println!("claimed job: {}", job_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    /// Creates a new random job ID.
    ///
    /// Uses UUID v4 for globally unique identifiers without coordination.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for JobId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for JobId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for JobId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed webhook registration identifier.
///
/// Delivery jobs reference their owning registration through this ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegistrationId(pub Uuid);

impl RegistrationId {
    /// Creates a new random registration ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RegistrationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RegistrationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for RegistrationId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RegistrationId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for RegistrationId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Strongly-typed user identifier.
///
/// Users live in the host application; this system treats their IDs as
/// opaque strings and never interprets them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    /// Creates a user ID from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the underlying string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl sqlx::Type<PgDb> for UserId {
    fn type_info() -> PgTypeInfo {
        <String as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for UserId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <String as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(s))
    }
}

impl sqlx::Encode<'_, PgDb> for UserId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Lifecycle state of a delivery job.
///
/// There is no persisted "delivered" state: successful jobs are deleted,
/// so the table only ever holds work to do and terminal failures kept
/// for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for a delivery attempt once due.
    ///
    /// Covers both never-attempted jobs and jobs waiting out their
    /// backoff window after a failed attempt.
    Pending,

    /// Attempt budget exhausted; terminal.
    ///
    /// The row is retained for inspection and never retried.
    Failed,
}

impl JobStatus {
    /// Returns true when no further attempts will be made.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl sqlx::Type<PgDb> for JobStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for JobStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        match s {
            "pending" => Ok(Self::Pending),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid job status: {s}").into()),
        }
    }
}

impl sqlx::Encode<'_, PgDb> for JobStatus {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <String as sqlx::Encode<PgDb>>::encode_by_ref(&self.to_string(), buf)
    }
}

/// A user's webhook subscription for one event type.
///
/// At most one registration exists per `(user_id, event_type)` pair;
/// saving integration settings again overwrites the target URL in place.
/// Registrations are never implicitly deleted, so in-flight jobs can
/// always resolve their target.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct WebhookRegistration {
    /// Unique identifier, referenced by delivery jobs.
    pub id: RegistrationId,

    /// Owning user; opaque to this system.
    pub user_id: UserId,

    /// Event type this registration subscribes to,
    /// e.g. `"job.status.changed"`.
    pub event_type: String,

    /// Absolute http(s) URL that receives the payload.
    pub target_url: String,

    /// When the registration was first created.
    pub created_at: DateTime<Utc>,

    /// When the target URL was last overwritten.
    pub updated_at: DateTime<Utc>,
}

/// One queued outbound notification.
///
/// Created by the enqueuer with a fresh payload, mutated only by the
/// dispatcher, and either deleted on a 2xx response or parked as
/// terminal `failed` once the attempt budget runs out.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeliveryJob {
    /// Unique identifier for this job.
    pub id: JobId,

    /// Registration whose target URL receives the payload.
    pub registration_id: RegistrationId,

    /// Event payload, posted verbatim as the JSON request body.
    ///
    /// Opaque to the queue; shape is an agreement between the producing
    /// business logic and the receiving endpoint.
    pub payload: serde_json::Value,

    /// Current lifecycle state.
    pub status: JobStatus,

    /// Completed delivery attempts so far. Starts at 0.
    pub attempts: i32,

    /// When the most recent attempt started or failed. Null until the
    /// first claim.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// When the job next becomes claimable. Null means immediately due.
    ///
    /// Written as a short lease at claim time and as the policy-computed
    /// backoff when a failure is recorded, so overlapping ticks never
    /// double-claim an in-flight job.
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// When the enqueuer created the job. Claims are oldest-first.
    pub created_at: DateTime<Utc>,
}

impl DeliveryJob {
    /// Eligibility rule for the dispatcher's due-job selection.
    ///
    /// Mirrors the SQL predicate exactly; the mock storage uses this to
    /// stay in lockstep with the Postgres implementation.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == JobStatus::Pending
            && self.next_attempt_at.map_or(true, |due| due <= now)
    }
}
