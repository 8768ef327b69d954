// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

fn limiter() -> PairingRateLimiter {
    PairingRateLimiter::new(RateLimitConfig::default())
}

#[test]
fn allows_up_to_window_cap() {
    let limiter = limiter();
    for _ in 0..5 {
        assert_eq!(limiter.check_and_record("m-1"), RateLimitDecision::Allowed);
    }
    let decision = limiter.check_and_record("m-1");
    assert!(
        matches!(decision, RateLimitDecision::Limited { retry_after_secs } if (1..=60).contains(&retry_after_secs)),
        "sixth attempt must be limited, got {decision:?}"
    );
}

#[test]
fn devices_are_tracked_independently() {
    let limiter = limiter();
    for _ in 0..5 {
        assert_eq!(limiter.check_and_record("m-1"), RateLimitDecision::Allowed);
    }
    assert_eq!(limiter.check_and_record("m-2"), RateLimitDecision::Allowed);
}

// After the n-th consecutive failure the backoff is base * 2^(n-1),
// capped at the configured maximum.
#[yare::parameterized(
    first   = { 1, 5 },
    second  = { 2, 10 },
    third   = { 3, 20 },
    fourth  = { 4, 40 },
    fifth   = { 5, 80 },
    sixth   = { 6, 160 },
    seventh = { 7, 300 },
    eighth  = { 8, 300 },
)]
fn backoff_doubles_and_caps(failures: u32, expected_secs: u64) {
    let limiter = limiter();
    assert_eq!(limiter.backoff_secs(failures), expected_secs);
}

#[test]
fn failure_engages_backoff() {
    let limiter = limiter();
    assert_eq!(limiter.check_and_record("m-1"), RateLimitDecision::Allowed);
    limiter.record_failure("m-1");

    let decision = limiter.check_and_record("m-1");
    assert!(
        matches!(decision, RateLimitDecision::Limited { retry_after_secs } if (4..=5).contains(&retry_after_secs)),
        "expected backoff, got {decision:?}"
    );
    assert_eq!(limiter.consecutive_failures("m-1"), 1);
}

#[test]
fn lockout_after_threshold() {
    let limiter = limiter();
    for _ in 0..10 {
        limiter.record_failure("m-1");
    }

    let decision = limiter.check_and_record("m-1");
    // An hour, give or take rounding.
    assert!(
        matches!(decision, RateLimitDecision::Limited { retry_after_secs } if (3500..=3600).contains(&retry_after_secs)),
        "expected lockout, got {decision:?}"
    );
}

#[test]
fn success_clears_all_state() {
    let limiter = limiter();
    for _ in 0..5 {
        let _ = limiter.check_and_record("m-1");
    }
    limiter.record_failure("m-1");
    limiter.record_success("m-1");

    assert_eq!(limiter.consecutive_failures("m-1"), 0);
    assert_eq!(limiter.check_and_record("m-1"), RateLimitDecision::Allowed);
}

#[test]
fn window_slides() {
    let config = RateLimitConfig { window_ms: 0, ..RateLimitConfig::default() };
    let limiter = PairingRateLimiter::new(config);

    // With a zero-width window every attempt immediately ages out.
    for _ in 0..20 {
        assert_eq!(limiter.check_and_record("m-1"), RateLimitDecision::Allowed);
    }
}
