//! Provider-wide failure guard.
//!
//! Transport failures and credentials given up on after rate limits count
//! towards one threshold, so a provider outage stops every key at once.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 10,
            open_timeout: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Closed,
    Open { since: Instant },
    Probing,
}

#[derive(Debug)]
struct Ledger {
    phase: Phase,
    failures: u32,
    trips: u64,
}

/// Opens after `failure_threshold` consecutive failures and rejects calls for
/// `open_timeout`; the first call after that is a probe. One success closes
/// it, a failed probe reopens it.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    ledger: Mutex<Ledger>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            ledger: Mutex::new(Ledger {
                phase: Phase::Closed,
                failures: 0,
                trips: 0,
            }),
        }
    }

    /// `false` while open; flips to probing once the cooldown has passed.
    pub fn allow_request(&self) -> bool {
        let mut ledger = self.ledger();
        match ledger.phase {
            Phase::Closed | Phase::Probing => true,
            Phase::Open { since } if since.elapsed() >= self.config.open_timeout => {
                ledger.phase = Phase::Probing;
                tracing::info!("circuit breaker probing");
                true
            }
            Phase::Open { .. } => false,
        }
    }

    pub fn record_success(&self) {
        let mut ledger = self.ledger();
        if !matches!(ledger.phase, Phase::Closed) {
            tracing::info!("circuit breaker closed");
        }
        ledger.phase = Phase::Closed;
        ledger.failures = 0;
    }

    pub fn record_failure(&self) {
        let mut ledger = self.ledger();
        ledger.failures = ledger.failures.saturating_add(1);
        let trip = match ledger.phase {
            Phase::Probing => true,
            Phase::Closed => ledger.failures >= self.config.failure_threshold,
            Phase::Open { .. } => false,
        };
        if trip {
            ledger.phase = Phase::Open {
                since: Instant::now(),
            };
            ledger.trips = ledger.trips.saturating_add(1);
            tracing::warn!(
                consecutive_failures = ledger.failures,
                open_timeout_ms = self.config.open_timeout.as_millis() as u64,
                "circuit breaker opened"
            );
        }
    }

    /// Remaining cooldown while open; zero otherwise.
    pub fn retry_after(&self) -> Duration {
        match self.ledger().phase {
            Phase::Open { since } => self.config.open_timeout.saturating_sub(since.elapsed()),
            Phase::Closed | Phase::Probing => Duration::ZERO,
        }
    }

    pub fn state(&self) -> CircuitState {
        match self.ledger().phase {
            Phase::Closed => CircuitState::Closed,
            Phase::Open { .. } => CircuitState::Open,
            Phase::Probing => CircuitState::HalfOpen,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.ledger().failures
    }

    /// Times the breaker has opened since creation.
    pub fn trips(&self) -> u64 {
        self.ledger().trips
    }

    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger
            .lock()
            .expect("circuit breaker lock is not poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_at_threshold_and_rejects() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(60),
        });

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(!breaker.allow_request());
        assert!(breaker.retry_after() > Duration::from_secs(59));
        assert_eq!(breaker.trips(), 1);
    }

    #[test]
    fn single_success_resets_the_counter() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 3,
            open_timeout: Duration::from_secs(60),
        });

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        assert_eq!(breaker.consecutive_failures(), 1);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn probe_after_cooldown_then_success_closes() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            open_timeout: Duration::from_millis(5),
        });

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(10));
        assert_eq!(breaker.retry_after(), Duration::ZERO);
        assert!(breaker.allow_request());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }

    #[test]
    fn failed_probe_reopens_immediately() {
        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            open_timeout: Duration::from_millis(5),
        });

        breaker.record_failure();
        breaker.record_failure();
        std::thread::sleep(Duration::from_millis(10));
        assert!(breaker.allow_request());

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.trips(), 2);
    }
}
