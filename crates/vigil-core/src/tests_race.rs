use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use rand::Rng;

use crate::domain::{Severity, SubjectId, US_PER_SEC};
use crate::rate_limit::{RateDecision, RateLimiter};
use crate::settings::RateLimitConfig;
use crate::testing::MemoryRateLimitStore;

/// Race `callers` threads for one bucket, each with a random start jitter and a clock reading
/// a few milliseconds apart. Returns the number of granted decisions.
fn race_once(callers: usize, severity: Severity) -> usize {
    let limiter = Arc::new(RateLimiter::new(
        RateLimitConfig::default(),
        Arc::new(MemoryRateLimitStore::default()),
    ));
    let barrier = Arc::new(Barrier::new(callers));
    let subject = SubjectId::new("racer");

    let handles: Vec<_> = (0..callers)
        .map(|_| {
            let limiter = limiter.clone();
            let barrier = barrier.clone();
            let subject = subject.clone();
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let jitter_us: u64 = rng.gen_range(0..500);
                let now_us = 1_000 * US_PER_SEC + rng.gen_range(0..5_000);
                barrier.wait();
                thread::sleep(Duration::from_micros(jitter_us));
                limiter.try_acquire(&subject, severity, now_us).unwrap()
            })
        })
        .collect();

    handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(RateDecision::is_granted)
        .count()
}

#[test]
fn exactly_one_winner_under_random_interleavings() {
    let mut rng = rand::thread_rng();
    for round in 0..40 {
        let callers = rng.gen_range(2..12);
        let severity = Severity::ALL[rng.gen_range(0..Severity::ALL.len())];
        assert_eq!(race_once(callers, severity), 1, "round {round} with {callers} callers");
    }
}

#[test]
fn losers_see_a_rate_limited_outcome() {
    let limiter = RateLimiter::new(RateLimitConfig::default(), Arc::new(MemoryRateLimitStore::default()));
    let subject = SubjectId::new("racer");
    assert!(limiter.try_acquire(&subject, Severity::Severe, 0).unwrap().is_granted());
    let second = limiter.try_acquire(&subject, Severity::Severe, 1).unwrap();
    assert!(!second.is_granted());
}
