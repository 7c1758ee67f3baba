//! Causal trace ids.
//!
//! A tick pushes its id when it starts and pops it when it ends. Deferred
//! bus handlers push the id of the packet they are handling. Handlers
//! scheduled under different traces can finish in any order, so `pop`
//! removes by value instead of insisting on strict LIFO.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

const EXTERNAL_COUNTER_MODULUS: u64 = 1_000_000;

/// Identity of one tick's trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub tick_number: u64,
    pub started_at: u64,
    pub agent_id: Option<String>,
    pub is_user_facing: bool,
}

/// Deterministic tick trace id: `tick-{started_at}-{tick_number}`.
pub fn generate_trace_id(started_at: u64, tick_number: u64) -> String {
    format!("tick-{started_at}-{tick_number}")
}

/// Shared stack of active trace ids. Clones refer to the same stack.
#[derive(Debug, Clone, Default)]
pub struct TraceStack {
    inner: Arc<TraceInner>,
}

#[derive(Debug, Default)]
struct TraceInner {
    stack: Mutex<Vec<String>>,
    external_counter: AtomicU64,
}

impl TraceStack {
    pub fn new() -> Self {
        Self::default()
    }

    fn stack(&self) -> MutexGuard<'_, Vec<String>> {
        self.inner.stack.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, trace_id: impl Into<String>) {
        self.stack().push(trace_id.into());
    }

    /// Remove `trace_id`: the top if it matches, otherwise the last matching
    /// entry. Unknown ids are ignored.
    pub fn pop(&self, trace_id: &str) {
        let mut stack = self.stack();
        if stack.last().map(String::as_str) == Some(trace_id) {
            stack.pop();
            return;
        }
        if let Some(pos) = stack.iter().rposition(|id| id == trace_id) {
            stack.remove(pos);
        } else {
            tracing::debug!(trace_id, "pop of inactive trace ignored");
        }
    }

    pub fn current(&self) -> Option<String> {
        self.stack().last().cloned()
    }

    pub fn depth(&self) -> usize {
        self.stack().len()
    }

    /// `ext-{timestamp}-{counter}` for work completing outside any tick.
    /// The counter wraps at one million, so ids are only unique within a run.
    pub fn generate_external_trace_id(&self, timestamp: u64) -> String {
        let n = self.inner.external_counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("ext-{timestamp}-{}", n % EXTERNAL_COUNTER_MODULUS)
    }

    /// Push `trace_id` and pop it again when the returned guard drops.
    pub fn enter(&self, trace_id: impl Into<String>) -> TraceGuard {
        let trace_id = trace_id.into();
        self.push(trace_id.clone());
        TraceGuard {
            stack: self.clone(),
            trace_id,
        }
    }

    pub fn reset(&self) {
        self.stack().clear();
        self.inner.external_counter.store(0, Ordering::Relaxed);
    }
}

/// Scoped trace activation; pops by value on drop.
#[derive(Debug)]
pub struct TraceGuard {
    stack: TraceStack,
    trace_id: String,
}

impl TraceGuard {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }
}

impl Drop for TraceGuard {
    fn drop(&mut self) {
        self.stack.pop(&self.trace_id);
    }
}
