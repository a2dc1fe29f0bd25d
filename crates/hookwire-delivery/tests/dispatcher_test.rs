//! End-to-end dispatch scenarios against an in-memory queue and a local
//! HTTP server.
//!
//! These tests drive the dispatcher tick by tick with a virtual clock,
//! covering the full job lifecycle: delivery and removal, the retry
//! window, attempt exhaustion, batch isolation, and storage hiccups.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use hookwire_core::{
    events::{DeliveryEvent, EventHandler},
    models::{DeliveryJob, JobId, JobStatus, RegistrationId, UserId},
    time::{Clock, TestClock},
};
use hookwire_delivery::{
    storage::mock::MockDeliveryStorage, Dispatcher, DispatcherConfig,
};
use serde_json::json;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

fn pending_job(
    registration_id: RegistrationId,
    created_at: DateTime<Utc>,
) -> DeliveryJob {
    DeliveryJob {
        id: JobId::new(),
        registration_id,
        payload: json!({"jobId": "job-7", "status": "INTERVIEW", "previousStatus": "APPLIED"}),
        status: JobStatus::Pending,
        attempts: 0,
        last_attempt_at: None,
        next_attempt_at: None,
        created_at,
    }
}

fn build_dispatcher(storage: Arc<MockDeliveryStorage>, clock: &TestClock) -> Dispatcher {
    Dispatcher::new(storage, DispatcherConfig::default(), Arc::new(clock.clone()))
        .expect("dispatcher should build")
}

/// A 2xx response removes the job; later ticks find nothing.
#[tokio::test]
async fn delivered_job_is_removed_from_queue() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let user = UserId::new("user-1");
    let registration_id = storage
        .add_registration(&user, "job.status.changed", &format!("{}/hook", server.uri()))
        .await;

    let clock = TestClock::new();
    let dispatcher = build_dispatcher(storage.clone(), &clock);

    let job = pending_job(registration_id, clock.now_utc());
    storage.insert_job(job.clone()).await;

    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.retried, 0);

    assert!(storage.job(job.id).await.is_none());
    assert_eq!(storage.deleted_jobs().await, vec![job.id]);

    // Nothing left, even after plenty of time.
    clock.advance(Duration::from_secs(3600));
    assert!(dispatcher.tick().await.unwrap().is_idle());

    server.verify().await;
}

/// A failed job waits out the full backoff window before its next attempt.
#[tokio::test]
async fn failed_job_waits_out_backoff_window() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let user = UserId::new("user-2");
    let registration_id = storage
        .add_registration(&user, "job.status.changed", &format!("{}/hook", server.uri()))
        .await;

    let clock = TestClock::new();
    let dispatcher = build_dispatcher(storage.clone(), &clock);

    let t0 = clock.now_utc();
    let job = pending_job(registration_id, t0);
    storage.insert_job(job.clone()).await;

    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.retried, 1);

    let row = storage.job(job.id).await.expect("job stays queued");
    assert_eq!(row.status, JobStatus::Pending);
    assert_eq!(row.attempts, 1);
    assert_eq!(row.last_attempt_at, Some(t0));
    assert_eq!(row.next_attempt_at, Some(t0 + chrono::Duration::seconds(300)));

    // Three minutes in: still inside the window, nothing is claimed.
    clock.advance(Duration::from_secs(180));
    assert!(dispatcher.tick().await.unwrap().is_idle());

    // Past the window the job comes back and fails again.
    clock.advance(Duration::from_secs(121));
    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.retried, 1);
    assert_eq!(storage.job(job.id).await.unwrap().attempts, 2);
}

/// Five straight failures exhaust the budget and park the job.
#[tokio::test]
async fn five_consecutive_failures_park_the_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let user = UserId::new("user-3");
    let registration_id = storage
        .add_registration(&user, "job.status.changed", &format!("{}/hook", server.uri()))
        .await;

    let clock = TestClock::new();
    let dispatcher = build_dispatcher(storage.clone(), &clock);

    let job = pending_job(registration_id, clock.now_utc());
    storage.insert_job(job.clone()).await;

    for expected_attempts in 1..=4 {
        let outcome = dispatcher.tick().await.unwrap();
        assert_eq!(outcome.retried, 1, "attempt {expected_attempts} should reschedule");

        let row = storage.job(job.id).await.expect("job still queued");
        assert_eq!(row.status, JobStatus::Pending);
        assert_eq!(row.attempts, expected_attempts);

        clock.advance(Duration::from_secs(301));
    }

    // Attempt five is the last one.
    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.exhausted, 1);

    let parked = storage.job(job.id).await.expect("parked job is retained for inspection");
    assert_eq!(parked.status, JobStatus::Failed);
    assert_eq!(parked.attempts, 5);
    assert!(parked.next_attempt_at.is_none());
    assert!(storage.deleted_jobs().await.is_empty());

    // Parked means parked: no more claims, no more requests.
    clock.advance(Duration::from_secs(24 * 3600));
    assert!(dispatcher.tick().await.unwrap().is_idle());

    server.verify().await;

    let stats = dispatcher.stats().await;
    assert_eq!(stats.jobs_claimed, 5);
    assert_eq!(stats.jobs_retried, 4);
    assert_eq!(stats.jobs_exhausted, 1);
    assert_eq!(stats.jobs_delivered, 0);
}

/// An endpoint that recovers mid-retry gets the job delivered and removed.
#[tokio::test]
async fn success_on_third_attempt_removes_job() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let user = UserId::new("user-4");
    let registration_id = storage
        .add_registration(&user, "job.status.changed", &format!("{}/hook", server.uri()))
        .await;

    let clock = TestClock::new();
    let dispatcher = build_dispatcher(storage.clone(), &clock);

    let job = pending_job(registration_id, clock.now_utc());
    storage.insert_job(job.clone()).await;

    assert_eq!(dispatcher.tick().await.unwrap().retried, 1);
    clock.advance(Duration::from_secs(301));

    assert_eq!(dispatcher.tick().await.unwrap().retried, 1);
    assert_eq!(storage.job(job.id).await.unwrap().attempts, 2);
    clock.advance(Duration::from_secs(301));

    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.delivered, 1);
    assert!(storage.job(job.id).await.is_none());
    assert_eq!(storage.deleted_jobs().await, vec![job.id]);

    server.verify().await;
}

/// One failing endpoint in a batch cannot hold back the others.
#[tokio::test]
async fn batch_isolates_failing_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/healthy"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let healthy_user = UserId::new("user-healthy");
    let broken_user = UserId::new("user-broken");
    let healthy_registration = storage
        .add_registration(
            &healthy_user,
            "job.status.changed",
            &format!("{}/healthy", server.uri()),
        )
        .await;
    let broken_registration = storage
        .add_registration(&broken_user, "job.status.changed", &format!("{}/broken", server.uri()))
        .await;

    let clock = TestClock::new();
    let dispatcher = build_dispatcher(storage.clone(), &clock);

    let now = clock.now_utc();
    let healthy_job = pending_job(healthy_registration, now - chrono::Duration::minutes(2));
    let broken_job = pending_job(broken_registration, now - chrono::Duration::minutes(1));
    storage.insert_job(healthy_job.clone()).await;
    storage.insert_job(broken_job.clone()).await;

    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.claimed, 2);
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.retried, 1);

    assert!(storage.job(healthy_job.id).await.is_none());
    let still_queued = storage.job(broken_job.id).await.expect("failed job stays queued");
    assert_eq!(still_queued.attempts, 1);
    assert_eq!(still_queued.status, JobStatus::Pending);
}

/// The batch limit bounds each claim; leftovers surface next tick.
#[tokio::test]
async fn batch_size_bounds_each_claim() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .expect(3)
        .mount(&server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let user = UserId::new("user-5");
    let registration_id = storage
        .add_registration(&user, "job.status.changed", &format!("{}/hook", server.uri()))
        .await;

    let clock = TestClock::new();
    let config = DispatcherConfig { batch_size: 2, ..DispatcherConfig::default() };
    let dispatcher =
        Dispatcher::new(storage.clone(), config, Arc::new(clock.clone())).unwrap();

    let now = clock.now_utc();
    for minutes_ago in [3, 2, 1] {
        storage
            .insert_job(pending_job(registration_id, now - chrono::Duration::minutes(minutes_ago)))
            .await;
    }

    let first = dispatcher.tick().await.unwrap();
    assert_eq!(first.claimed, 2);
    assert_eq!(first.delivered, 2);

    // The third job is still due right now; the next tick picks it up.
    let second = dispatcher.tick().await.unwrap();
    assert_eq!(second.claimed, 1);
    assert_eq!(second.delivered, 1);

    server.verify().await;
}

/// A job whose registration vanished is skipped, not failed; the lease
/// brings it back later.
#[tokio::test]
async fn unresolvable_registration_leaves_job_for_lease() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let clock = TestClock::new();
    let dispatcher = build_dispatcher(storage.clone(), &clock);

    let t0 = clock.now_utc();
    let orphan = pending_job(RegistrationId::new(), t0);
    storage.insert_job(orphan.clone()).await;

    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.claimed, 1);
    assert_eq!(outcome.skipped, 1);
    assert_eq!(outcome.retried, 0);
    assert_eq!(outcome.exhausted, 0);

    // No attempt was counted; only the claim lease moved.
    let row = storage.job(orphan.id).await.expect("job not dropped");
    assert_eq!(row.attempts, 0);
    assert_eq!(row.status, JobStatus::Pending);
    assert_eq!(row.next_attempt_at, Some(t0 + chrono::Duration::seconds(300)));

    // Inside the lease the job is invisible.
    clock.advance(Duration::from_secs(100));
    assert!(dispatcher.tick().await.unwrap().is_idle());

    // After expiry it is claimed and skipped again.
    clock.advance(Duration::from_secs(201));
    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.skipped, 1);
    assert_eq!(dispatcher.stats().await.jobs_skipped, 2);
}

#[derive(Debug, Default)]
struct RecordingHandler {
    events: tokio::sync::Mutex<Vec<DeliveryEvent>>,
}

#[async_trait::async_trait]
impl EventHandler for RecordingHandler {
    async fn handle_event(&self, event: DeliveryEvent) {
        self.events.lock().await.push(event);
    }
}

/// Every settled job announces its outcome to the event handler.
#[tokio::test]
async fn events_reflect_job_outcomes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/healthy"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let healthy_user = UserId::new("user-6");
    let broken_user = UserId::new("user-7");
    let healthy_registration = storage
        .add_registration(
            &healthy_user,
            "job.status.changed",
            &format!("{}/healthy", server.uri()),
        )
        .await;
    let broken_registration = storage
        .add_registration(&broken_user, "job.status.changed", &format!("{}/broken", server.uri()))
        .await;

    let clock = TestClock::new();
    let handler = Arc::new(RecordingHandler::default());
    let dispatcher =
        Dispatcher::new(storage.clone(), DispatcherConfig::default(), Arc::new(clock.clone()))
            .unwrap()
            .with_event_handler(handler.clone());

    let now = clock.now_utc();
    let delivered_job = pending_job(healthy_registration, now - chrono::Duration::minutes(3));
    let retried_job = pending_job(broken_registration, now - chrono::Duration::minutes(2));
    let mut doomed_job = pending_job(broken_registration, now - chrono::Duration::minutes(1));
    doomed_job.attempts = 4;
    storage.insert_job(delivered_job.clone()).await;
    storage.insert_job(retried_job.clone()).await;
    storage.insert_job(doomed_job.clone()).await;

    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.delivered, 1);
    assert_eq!(outcome.retried, 1);
    assert_eq!(outcome.exhausted, 1);

    let events = handler.events.lock().await;
    assert_eq!(events.len(), 3);

    let delivered = events
        .iter()
        .find_map(|e| match e {
            DeliveryEvent::Delivered(d) => Some(d),
            _ => None,
        })
        .expect("delivered event emitted");
    assert_eq!(delivered.job_id, delivered_job.id);
    assert_eq!(delivered.response_status, 204);
    assert_eq!(delivered.attempt_number, 1);

    let retried = events
        .iter()
        .find_map(|e| match e {
            DeliveryEvent::RetryScheduled(r) => Some(r),
            _ => None,
        })
        .expect("retry event emitted");
    assert_eq!(retried.job_id, retried_job.id);
    assert_eq!(retried.response_status, Some(500));
    assert_eq!(retried.attempt_number, 1);
    assert_eq!(retried.next_attempt_at, now + chrono::Duration::seconds(300));

    let exhausted = events
        .iter()
        .find_map(|e| match e {
            DeliveryEvent::Exhausted(x) => Some(x),
            _ => None,
        })
        .expect("exhausted event emitted");
    assert_eq!(exhausted.job_id, doomed_job.id);
    assert_eq!(exhausted.attempts, 5);
}

/// A failed claim mutates nothing; the next tick proceeds normally.
#[tokio::test]
async fn claim_error_leaves_queue_untouched() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let storage = Arc::new(MockDeliveryStorage::new());
    let user = UserId::new("user-9");
    let registration_id = storage
        .add_registration(&user, "job.status.changed", &format!("{}/hook", server.uri()))
        .await;

    let clock = TestClock::new();
    let dispatcher = build_dispatcher(storage.clone(), &clock);

    let job = pending_job(registration_id, clock.now_utc());
    storage.insert_job(job.clone()).await;
    storage.inject_claim_error("connection reset by peer").await;

    let err = dispatcher.tick().await.expect_err("injected claim error surfaces");
    assert!(err.is_retryable());

    // Nothing was claimed or stamped.
    let row = storage.job(job.id).await.expect("job untouched");
    assert_eq!(row.attempts, 0);
    assert!(row.last_attempt_at.is_none());
    assert!(row.next_attempt_at.is_none());

    // The injected error is consumed; the next tick delivers.
    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.delivered, 1);
}

/// Unreachable endpoints count as failed attempts like any other.
#[tokio::test]
async fn connection_failure_counts_as_attempt() {
    let storage = Arc::new(MockDeliveryStorage::new());
    let user = UserId::new("user-8");
    // Port 1 refuses connections.
    let registration_id = storage
        .add_registration(&user, "job.status.changed", "http://127.0.0.1:1/hook")
        .await;

    let clock = TestClock::new();
    let dispatcher = build_dispatcher(storage.clone(), &clock);

    let job = pending_job(registration_id, clock.now_utc());
    storage.insert_job(job.clone()).await;

    let outcome = dispatcher.tick().await.unwrap();
    assert_eq!(outcome.retried, 1);

    let row = storage.job(job.id).await.expect("job stays queued");
    assert_eq!(row.attempts, 1);
    assert_eq!(row.status, JobStatus::Pending);
}
