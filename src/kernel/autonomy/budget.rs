use tracing::warn;

pub const BUDGET_WINDOW_MS: u64 = 60_000;

type ExhaustedHook = Box<dyn Fn(u32, u32) + Send + Sync>;

/// Sliding per-minute limit on autonomous attempts.
///
/// `check_budget` and `consume` are separate calls; the tick path calls
/// `consume` only after a successful check.
pub struct AutonomyBudget {
    ops_this_minute: u32,
    window_started_at: u64,
    on_exhausted: Option<ExhaustedHook>,
}

impl AutonomyBudget {
    pub fn new(now: u64) -> Self {
        Self {
            ops_this_minute: 0,
            window_started_at: now,
            on_exhausted: None,
        }
    }

    /// Called with `(ops_this_minute, limit)` whenever a check fails.
    pub fn on_exhausted<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, u32) + Send + Sync + 'static,
    {
        self.on_exhausted = Some(Box::new(hook));
        self
    }

    pub fn check_budget(&mut self, now: u64, limit: u32) -> bool {
        if now.saturating_sub(self.window_started_at) > BUDGET_WINDOW_MS {
            self.ops_this_minute = 0;
            self.window_started_at = now;
        }
        let ok = self.ops_this_minute < limit;
        if !ok {
            warn!(ops = self.ops_this_minute, limit, "autonomy budget exhausted");
            if let Some(hook) = &self.on_exhausted {
                hook(self.ops_this_minute, limit);
            }
        }
        ok
    }

    pub fn consume(&mut self) {
        self.ops_this_minute = self.ops_this_minute.saturating_add(1);
    }

    pub fn ops_this_minute(&self) -> u32 {
        self.ops_this_minute
    }

    pub fn window_started_at(&self) -> u64 {
        self.window_started_at
    }

    pub fn reset(&mut self, now: u64) {
        self.ops_this_minute = 0;
        self.window_started_at = now;
    }
}
