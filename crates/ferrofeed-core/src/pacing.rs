//! Adaptive request pacing shared by a credential set.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Lower bound used when raising a zero delay.
const RAISE_FLOOR: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingConfig {
    pub initial_delay: Duration,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Multiplier applied on every rate-limit signal.
    pub increase_factor: f64,
    /// Multiplier applied after `decay_after` consecutive successes.
    pub decay_factor: f64,
    pub decay_after: u32,
    /// Consecutive successes before a long pause; zero disables them.
    pub long_pause_every: u32,
    pub long_pause: Duration,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(800),
            min_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(60),
            increase_factor: 1.5,
            decay_factor: 0.9,
            decay_after: 5,
            long_pause_every: 100,
            long_pause: Duration::from_secs(15),
        }
    }
}

impl PacingConfig {
    /// No spacing and no pauses.
    pub fn unpaced() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            min_delay: Duration::ZERO,
            long_pause_every: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PacerSnapshot {
    pub current_delay_ms: u64,
    pub consecutive_successes: u32,
    pub long_pauses: u64,
    pub rate_limit_signals: u64,
}

#[derive(Debug)]
struct PacerInner {
    current_delay: Duration,
    /// Slot handed to the most recent request.
    last_slot: Option<Instant>,
    consecutive_successes: u32,
    successes_since_pause: u32,
    pause_pending: bool,
    long_pauses: u64,
    rate_limit_signals: u64,
}

/// Single mutable inter-request delay.
///
/// Every caller reserves its slot under the lock and sleeps outside it. The
/// slot is `last_slot + current_delay` as of the reservation, so a raised
/// delay applies to the very next request.
#[derive(Debug)]
pub struct AdaptivePacer {
    config: PacingConfig,
    inner: Mutex<PacerInner>,
}

impl Default for AdaptivePacer {
    fn default() -> Self {
        Self::new(PacingConfig::default())
    }
}

impl AdaptivePacer {
    pub fn new(config: PacingConfig) -> Self {
        let current_delay = config
            .initial_delay
            .clamp(config.min_delay, config.max_delay.max(config.min_delay));
        Self {
            config,
            inner: Mutex::new(PacerInner {
                current_delay,
                last_slot: None,
                consecutive_successes: 0,
                successes_since_pause: 0,
                pause_pending: false,
                long_pauses: 0,
                rate_limit_signals: 0,
            }),
        }
    }

    /// Wait for the next request slot; returns how long the caller slept.
    pub async fn acquire(&self) -> Duration {
        let wait = self.reserve(Instant::now());
        if !wait.is_zero() {
            tracing::debug!(wait_ms = wait.as_millis() as u64, "pacing request");
            tokio::time::sleep(wait).await;
        }
        wait
    }

    pub fn record_success(&self) {
        let mut inner = self.lock();
        inner.consecutive_successes = inner.consecutive_successes.saturating_add(1);
        if inner.consecutive_successes >= self.config.decay_after.max(1) {
            inner.consecutive_successes = 0;
            inner.current_delay = inner
                .current_delay
                .mul_f64(self.config.decay_factor)
                .max(self.config.min_delay);
        }

        if self.config.long_pause_every > 0 {
            inner.successes_since_pause = inner.successes_since_pause.saturating_add(1);
            if inner.successes_since_pause >= self.config.long_pause_every {
                inner.successes_since_pause = 0;
                inner.pause_pending = true;
            }
        }
    }

    /// Rate-limit signal: raise the delay.
    pub fn record_failure(&self) {
        let mut inner = self.lock();
        inner.consecutive_successes = 0;
        inner.successes_since_pause = 0;
        inner.rate_limit_signals = inner.rate_limit_signals.saturating_add(1);
        let raised = if inner.current_delay.is_zero() {
            RAISE_FLOOR
        } else {
            inner.current_delay.mul_f64(self.config.increase_factor)
        };
        inner.current_delay = raised.min(self.config.max_delay);
        tracing::debug!(
            delay_ms = inner.current_delay.as_millis() as u64,
            "pacing delay raised"
        );
    }

    pub fn current_delay(&self) -> Duration {
        self.lock().current_delay
    }

    pub fn snapshot(&self) -> PacerSnapshot {
        let inner = self.lock();
        PacerSnapshot {
            current_delay_ms: inner.current_delay.as_millis() as u64,
            consecutive_successes: inner.consecutive_successes,
            long_pauses: inner.long_pauses,
            rate_limit_signals: inner.rate_limit_signals,
        }
    }

    fn reserve(&self, now: Instant) -> Duration {
        let mut inner = self.lock();
        let mut slot = inner
            .last_slot
            .map_or(now, |last| (last + inner.current_delay).max(now));
        if inner.pause_pending {
            inner.pause_pending = false;
            inner.long_pauses = inner.long_pauses.saturating_add(1);
            slot += self.config.long_pause;
            tracing::info!(
                pause_ms = self.config.long_pause.as_millis() as u64,
                "anti-throttle pause"
            );
        }
        inner.last_slot = Some(slot);
        slot.saturating_duration_since(now)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PacerInner> {
        self.inner
            .lock()
            .expect("adaptive pacer lock is not poisoned")
    }
}
