use std::sync::Arc;

use tracing::{debug, warn};

use super::bus::EventBus;
use super::event::{EventPacket, Payload, SkipReason};
use super::time::Clock;
use super::trace::{generate_trace_id, TraceContext};

const SOURCE: &str = "tick_scope";

/// Binds one tick's lifetime to its trace id.
///
/// `open` pushes the id and publishes `TICK_START`; `finalize` publishes
/// `TICK_END` and pops the id. A scope dropped without `finalize` (early
/// return, panic unwinding) finalizes itself.
pub struct TickScope {
    bus: EventBus,
    clock: Arc<dyn Clock>,
    context: TraceContext,
    finalized: bool,
}

impl TickScope {
    pub fn open(
        bus: &EventBus,
        clock: Arc<dyn Clock>,
        agent_id: Option<String>,
        tick_number: u64,
        started_at: u64,
        is_user_facing: bool,
    ) -> Self {
        let context = TraceContext {
            trace_id: generate_trace_id(started_at, tick_number),
            tick_number,
            started_at,
            agent_id,
            is_user_facing,
        };
        bus.trace().push(context.trace_id.clone());
        debug!(trace_id = %context.trace_id, tick_number, "tick scope opened");

        let scope = Self {
            bus: bus.clone(),
            clock,
            context,
            finalized: false,
        };
        scope.emit(Payload::TickStart { tick_number }, started_at);
        scope
    }

    pub fn context(&self) -> &TraceContext {
        &self.context
    }

    pub fn trace_id(&self) -> &str {
        &self.context.trace_id
    }

    pub fn finalize(mut self, skip_reason: Option<SkipReason>) {
        self.close(skip_reason);
    }

    fn close(&mut self, skip_reason: Option<SkipReason>) {
        if self.finalized {
            return;
        }
        self.finalized = true;

        let now = self.clock.now_ms();
        let duration_ms = now.saturating_sub(self.context.started_at);
        self.emit(
            Payload::TickEnd {
                tick_number: self.context.tick_number,
                duration_ms,
                skipped: skip_reason.is_some(),
                skip_reason,
            },
            now,
        );
        self.bus.trace().pop(&self.context.trace_id);
        debug!(trace_id = %self.context.trace_id, duration_ms, "tick scope closed");
    }

    fn emit(&self, payload: Payload, timestamp: u64) {
        let packet = EventPacket::new(SOURCE, payload, timestamp).with_trace(self.context.trace_id.clone());
        if self.bus.flags().tick_telemetry_sync {
            self.bus.publish_sync(packet);
        } else {
            self.bus.publish(packet);
        }
    }
}

impl Drop for TickScope {
    fn drop(&mut self) {
        if !self.finalized {
            warn!(trace_id = %self.context.trace_id, "tick scope dropped without finalize");
            self.close(None);
        }
    }
}
