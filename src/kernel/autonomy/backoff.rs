use tracing::info;

/// After this many consecutive failures the cooldown pins to the maximum.
pub const FAILURE_CEILING: u32 = 3;

/// Exponential cooldown after failed autonomous attempts.
///
/// Never disables autonomy; repeated failures only stretch the wait.
#[derive(Debug, Clone)]
pub struct AutonomyBackoff {
    base_cooldown_ms: u64,
    max_cooldown_ms: u64,
    last_attempt_at: u64,
    consecutive_failures: u32,
}

impl AutonomyBackoff {
    pub fn new(base_cooldown_ms: u64, max_cooldown_ms: u64) -> Self {
        Self {
            base_cooldown_ms,
            max_cooldown_ms,
            last_attempt_at: 0,
            consecutive_failures: 0,
        }
    }

    pub fn cooldown_ms(&self) -> u64 {
        if self.consecutive_failures >= FAILURE_CEILING {
            return self.max_cooldown_ms;
        }
        let scaled = self
            .base_cooldown_ms
            .saturating_mul(1u64 << self.consecutive_failures);
        scaled.min(self.max_cooldown_ms)
    }

    pub fn should_trigger(&self, now: u64, silence_ms: u64, min_silence_ms: u64) -> bool {
        now.saturating_sub(self.last_attempt_at) >= self.cooldown_ms() && silence_ms >= min_silence_ms
    }

    pub fn on_result(&mut self, now: u64, success: bool) {
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            info!(
                failures = self.consecutive_failures,
                cooldown_ms = self.cooldown_ms(),
                "autonomy backoff escalated"
            );
        }
        self.last_attempt_at = now;
    }

    /// Skipped without attempting; pushes the next check out without
    /// touching the failure count.
    pub fn on_noop(&mut self, now: u64) {
        self.last_attempt_at = now;
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn last_attempt_at(&self) -> u64 {
        self.last_attempt_at
    }

    pub fn reset(&mut self) {
        self.last_attempt_at = 0;
        self.consecutive_failures = 0;
    }
}
