//! Credential pool with per-credential quota and health state.

use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::num::NonZeroU32;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use governor::clock::{Clock, DefaultClock};
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use serde::Serialize;

use crate::ValidationError;

type MinuteLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Per-credential limits and health policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CredentialQuota {
    pub per_minute: u32,
    pub per_day: u32,
    /// Consecutive failures after which the credential cools down.
    pub max_consecutive_failures: u32,
    pub failure_cooldown: Duration,
}

impl Default for CredentialQuota {
    fn default() -> Self {
        Self {
            per_minute: 75,
            per_day: 25_000,
            max_consecutive_failures: 5,
            failure_cooldown: Duration::from_secs(60),
        }
    }
}

/// Handle to a credential reserved for exactly one request.
#[derive(Clone)]
pub struct CredentialLease {
    index: usize,
    label: String,
    secret: String,
}

impl CredentialLease {
    pub const fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl Debug for CredentialLease {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialLease")
            .field("index", &self.index)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Result of asking the pool for a credential.
#[derive(Debug)]
pub enum Checkout {
    Ready(CredentialLease),
    /// Nothing is usable right now; the earliest candidate frees up after this delay.
    Wait(Duration),
    /// No candidate can serve a request today.
    Unavailable,
}

/// Point-in-time view of one credential, safe to log or print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialSnapshot {
    pub label: String,
    pub calls_last_24h: usize,
    pub total_calls: u64,
    pub consecutive_failures: u32,
    pub cooling: bool,
    pub daily_exhausted: bool,
    pub last_success_secs_ago: Option<u64>,
}

struct CredentialState {
    label: String,
    secret: String,
    minute: MinuteLimiter,
    day_calls: VecDeque<Instant>,
    total_calls: u64,
    consecutive_failures: u32,
    last_success: Option<Instant>,
    cooling_until: Option<Instant>,
    blocked_until: Option<Instant>,
}

impl CredentialState {
    fn prune(&mut self, now: Instant) {
        while self
            .day_calls
            .front()
            .is_some_and(|call| now.duration_since(*call) >= DAY)
        {
            self.day_calls.pop_front();
        }
        if self.cooling_until.is_some_and(|until| until <= now) {
            self.cooling_until = None;
            self.consecutive_failures = 0;
        }
        if self.blocked_until.is_some_and(|until| until <= now) {
            self.blocked_until = None;
        }
    }

    fn daily_exhausted(&self, per_day: u32) -> bool {
        self.blocked_until.is_some() || self.day_calls.len() >= per_day as usize
    }
}

struct PoolInner {
    states: Vec<CredentialState>,
    cursor: usize,
}

/// Round-robin pool of interchangeable provider credentials.
///
/// Each credential carries its own per-minute token bucket, a rolling 24h call
/// window, and a failure counter that puts it into a short cooldown.
pub struct CredentialPool {
    quota: CredentialQuota,
    inner: Mutex<PoolInner>,
}

impl Debug for CredentialPool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialPool")
            .field("quota", &self.quota)
            .field("size", &self.len())
            .finish_non_exhaustive()
    }
}

impl CredentialPool {
    pub fn new(secrets: Vec<String>, quota: CredentialQuota) -> Result<Self, ValidationError> {
        let secrets: Vec<String> = secrets
            .into_iter()
            .map(|secret| secret.trim().to_owned())
            .filter(|secret| !secret.is_empty())
            .collect();
        if secrets.is_empty() {
            return Err(ValidationError::NoCredentials);
        }

        let per_minute = NonZeroU32::new(quota.per_minute.max(1)).unwrap_or(NonZeroU32::MIN);
        let states = secrets
            .into_iter()
            .enumerate()
            .map(|(index, secret)| CredentialState {
                label: format!("credential-{}", index + 1),
                secret,
                minute: RateLimiter::direct(Quota::per_minute(per_minute)),
                day_calls: VecDeque::new(),
                total_calls: 0,
                consecutive_failures: 0,
                last_success: None,
                cooling_until: None,
                blocked_until: None,
            })
            .collect();

        Ok(Self {
            quota,
            inner: Mutex::new(PoolInner { states, cursor: 0 }),
        })
    }

    pub fn len(&self) -> usize {
        self.lock().states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// First usable credential at or after the cursor, ignoring `skip`.
    pub fn checkout(&self, skip: &[usize]) -> Checkout {
        let mut inner = self.lock();
        let count = inner.states.len();
        let start = inner.cursor;
        let mut earliest: Option<Duration> = None;

        for offset in 0..count {
            let index = (start + offset) % count;
            if skip.contains(&index) {
                continue;
            }
            match self.try_reserve(&mut inner.states[index], index) {
                Checkout::Ready(lease) => return Checkout::Ready(lease),
                Checkout::Wait(wait) => {
                    earliest = Some(earliest.map_or(wait, |current| current.min(wait)));
                }
                Checkout::Unavailable => {}
            }
        }

        earliest.map_or(Checkout::Unavailable, Checkout::Wait)
    }

    /// Reserve the given credential again, for same-credential retries.
    pub fn checkout_same(&self, index: usize) -> Checkout {
        let mut inner = self.lock();
        match inner.states.get_mut(index) {
            Some(state) => self.try_reserve(state, index),
            None => Checkout::Unavailable,
        }
    }

    /// Move the round-robin cursor past `index`.
    pub fn rotate_past(&self, index: usize) {
        let mut inner = self.lock();
        let count = inner.states.len();
        inner.cursor = (index + 1) % count;
    }

    pub fn record_success(&self, index: usize) {
        let mut inner = self.lock();
        if let Some(state) = inner.states.get_mut(index) {
            state.consecutive_failures = 0;
            state.last_success = Some(Instant::now());
        }
    }

    pub fn record_failure(&self, index: usize) {
        let mut inner = self.lock();
        let Some(state) = inner.states.get_mut(index) else {
            return;
        };
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.quota.max_consecutive_failures
            && state.cooling_until.is_none()
        {
            state.cooling_until = Some(Instant::now() + self.quota.failure_cooldown);
            tracing::warn!(
                credential = %state.label,
                consecutive_failures = state.consecutive_failures,
                "credential cooling down"
            );
        }
    }

    /// The provider reported the credential's daily allowance as spent.
    pub fn mark_daily_exhausted(&self, index: usize) {
        let mut inner = self.lock();
        if let Some(state) = inner.states.get_mut(index) {
            let until = state
                .day_calls
                .front()
                .map_or_else(|| Instant::now() + DAY, |first| *first + DAY);
            state.blocked_until = Some(until);
            tracing::warn!(credential = %state.label, "credential daily quota exhausted");
        }
    }

    /// True once no credential has daily quota left.
    pub fn all_exhausted(&self) -> bool {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.states.iter_mut().all(|state| {
            state.prune(now);
            state.daily_exhausted(self.quota.per_day)
        })
    }

    pub fn snapshot(&self) -> Vec<CredentialSnapshot> {
        let mut inner = self.lock();
        let now = Instant::now();
        inner
            .states
            .iter_mut()
            .map(|state| {
                state.prune(now);
                CredentialSnapshot {
                    label: state.label.clone(),
                    calls_last_24h: state.day_calls.len(),
                    total_calls: state.total_calls,
                    consecutive_failures: state.consecutive_failures,
                    cooling: state.cooling_until.is_some(),
                    daily_exhausted: state.daily_exhausted(self.quota.per_day),
                    last_success_secs_ago: state
                        .last_success
                        .map(|at| now.duration_since(at).as_secs()),
                }
            })
            .collect()
    }

    fn try_reserve(&self, state: &mut CredentialState, index: usize) -> Checkout {
        let now = Instant::now();
        state.prune(now);

        if state.daily_exhausted(self.quota.per_day) {
            return Checkout::Unavailable;
        }
        if let Some(until) = state.cooling_until {
            return Checkout::Wait(until.saturating_duration_since(now));
        }
        if let Err(not_until) = state.minute.check() {
            let clock = DefaultClock::default();
            return Checkout::Wait(not_until.wait_time_from(clock.now()));
        }

        state.day_calls.push_back(now);
        state.total_calls = state.total_calls.saturating_add(1);
        Checkout::Ready(CredentialLease {
            index,
            label: state.label.clone(),
            secret: state.secret.clone(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolInner> {
        self.inner
            .lock()
            .expect("credential pool lock is not poisoned")
    }
}
