use crate::control::CancelToken;
use std::time::Duration;

/// Every 5th consecutive success steps the delay down.
const SUCCESS_STEP: u32 = 5;
/// Multiplier applied on that 5th success.
const DECAY: f64 = 0.95;
/// Multiplier applied on every failure.
const GROWTH: f64 = 1.3;

/// Adaptive inter-operation delay.
///
/// Asymmetric on purpose: the climb down is slow and the climb up is fast,
/// because hammering a throttled system costs far more than pacing a healthy
/// one too gently. `current_delay` never leaves `[base_delay, max_delay]`.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    base_delay: Duration,
    max_delay: Duration,
    current_delay: Duration,
    success_streak: u32,
    failure_streak: u32,
}

impl RateLimiter {
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        let max_delay = max_delay.max(base_delay);
        Self {
            base_delay,
            max_delay,
            current_delay: base_delay,
            success_streak: 0,
            failure_streak: 0,
        }
    }

    #[must_use]
    pub fn current_delay(&self) -> Duration {
        self.current_delay
    }

    #[must_use]
    pub fn success_streak(&self) -> u32 {
        self.success_streak
    }

    #[must_use]
    pub fn failure_streak(&self) -> u32 {
        self.failure_streak
    }

    /// Sleep for the current delay. A cooperative cancel wakes the sleep
    /// early and is not a failure; the caller re-checks the flag at its own
    /// boundary.
    pub async fn wait_if_needed(&self, cancel: &CancelToken) {
        if self.current_delay.is_zero() || cancel.is_cancelled() {
            return;
        }
        tokio::select! {
            () = tokio::time::sleep(self.current_delay) => {}
            () = cancel.cancelled() => {}
        }
    }

    pub fn on_success(&mut self) {
        self.success_streak += 1;
        if self.success_streak >= SUCCESS_STEP {
            self.current_delay = self.current_delay.mul_f64(DECAY).max(self.base_delay);
            self.success_streak = 0;
            self.failure_streak = 0;
        }
    }

    pub fn on_failure(&mut self) {
        self.failure_streak += 1;
        self.current_delay = self.current_delay.mul_f64(GROWTH).min(self.max_delay);
        self.success_streak = 0;
    }

    /// The external system said so explicitly; jump straight to the ceiling.
    pub fn on_rate_limit_signal(&mut self) {
        self.current_delay = self.max_delay;
        self.success_streak = 0;
        self.failure_streak = 0;
    }

    pub fn reset(&mut self) {
        self.current_delay = self.base_delay;
        self.success_streak = 0;
        self.failure_streak = 0;
    }
}
