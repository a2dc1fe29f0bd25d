//! Integration tests for retry scheduling.
//!
//! Walks whole retry timelines through the policy the way the dispatcher
//! does, attempt by attempt, to pin down the delivery contract: five
//! attempts, five minutes apart by default, exponential growth when
//! configured, and no schedule that ever lands inside the claim lease.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use hookwire_delivery::{BackoffStrategy, RetryDecision, RetryPolicy};

/// The default policy schedules four retries exactly five minutes after
/// each failure and gives up on the fifth attempt.
#[test]
fn default_policy_realizes_five_minute_schedule() {
    let policy = RetryPolicy::default();
    let mut failed_at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

    for attempt_number in 1..=4 {
        match policy.decide(attempt_number, failed_at) {
            RetryDecision::Retry { next_attempt_at } => {
                assert_eq!(next_attempt_at, failed_at + chrono::Duration::seconds(300));
                // The next attempt fails right when it becomes due.
                failed_at = next_attempt_at;
            },
            RetryDecision::GiveUp { reason } => {
                panic!("attempt {attempt_number} gave up early: {reason}")
            },
        }
    }

    assert!(matches!(policy.decide(5, failed_at), RetryDecision::GiveUp { .. }));
}

/// Exponential backoff doubles per attempt until the cap, then holds.
#[test]
fn exponential_policy_doubles_until_cap() {
    let policy = RetryPolicy {
        max_attempts: 8,
        base_delay: Duration::from_secs(60),
        max_delay: Duration::from_secs(480),
        jitter_factor: 0.0,
        backoff: BackoffStrategy::Exponential,
    };

    let expected = [60, 120, 240, 480, 480, 480, 480];
    for (attempt_number, expected_secs) in (1u32..).zip(expected) {
        assert_eq!(
            policy.delay_for(attempt_number),
            Duration::from_secs(expected_secs),
            "attempt {attempt_number}"
        );
    }
}

/// The give-up reason names the exhausted budget.
#[test]
fn give_up_reason_names_the_budget() {
    let policy = RetryPolicy::default();

    match policy.decide(5, Utc::now()) {
        RetryDecision::GiveUp { reason } => assert!(reason.contains('5'), "reason: {reason}"),
        RetryDecision::Retry { .. } => panic!("budget should be exhausted"),
    }
}

/// Jitter spreads retries out but can only push them later, never make
/// a job due before the base window has passed.
#[test]
fn jittered_schedule_never_lands_early() {
    let policy = RetryPolicy { jitter_factor: 0.3, ..RetryPolicy::default() };
    let failed_at = Utc::now();

    for attempt_number in 1..=4 {
        match policy.decide(attempt_number, failed_at) {
            RetryDecision::Retry { next_attempt_at } => {
                let offset = next_attempt_at - failed_at;
                assert!(offset >= chrono::Duration::seconds(300));
                assert!(offset <= chrono::Duration::seconds(390));
            },
            RetryDecision::GiveUp { reason } => {
                panic!("attempt {attempt_number} gave up early: {reason}")
            },
        }
    }
}

/// The claim lease never exceeds any possible retry delay, so a leased
/// job cannot be re-claimed before its reschedule could land.
#[test]
fn claim_lease_bounds_every_delay() {
    let policy = RetryPolicy {
        max_attempts: 10,
        base_delay: Duration::from_secs(120),
        max_delay: Duration::from_secs(3600),
        jitter_factor: 0.5,
        backoff: BackoffStrategy::Exponential,
    };

    for attempt_number in 1..=10 {
        assert!(policy.claim_lease() <= policy.delay_for(attempt_number));
    }
}

/// Backoff strategies parse from their lowercase configuration names.
#[test]
fn backoff_strategy_parses_lowercase_names() {
    let fixed: BackoffStrategy = serde_json::from_str("\"fixed\"").unwrap();
    let exponential: BackoffStrategy = serde_json::from_str("\"exponential\"").unwrap();

    assert_eq!(fixed, BackoffStrategy::Fixed);
    assert_eq!(exponential, BackoffStrategy::Exponential);
}
