use serde::{Deserialize, Serialize};

use crate::kernel::commit::BlockReason;
use crate::kernel::event::{Payload, SkipReason};
use crate::kernel::gate::GateReason;
use crate::kernel::mode::ThinkMode;

// Allowed: IDs, Tick numbers, Durations, Counts, Enums
// Forbidden: Speech text, Thoughts, Tool payloads

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TelemetryEvent {
    TickStarted {
        tick_number: u64,
    },

    TickEnded {
        tick_number: u64,
        duration_ms: u64,
        skip_reason: Option<SkipReason>,
    },

    /// Tick refused before a scope was opened
    TickRefused {
        reason: SkipReason,
    },

    Gate {
        mode: ThinkMode,
        reason: GateReason,
        should_speak: bool,
    },

    Commit {
        committed: bool,
        block_reason: Option<BlockReason>,
        deduped: bool,
    },

    AutonomyFailure {
        consecutive_failures: u32,
    },
}

impl TelemetryEvent {
    /// Content STRIPPED: speech and thought packets map to nothing.
    pub fn from_payload(payload: &Payload) -> Option<Self> {
        match payload {
            Payload::TickStart { tick_number } => Some(TelemetryEvent::TickStarted {
                tick_number: *tick_number,
            }),
            Payload::TickEnd {
                tick_number,
                duration_ms,
                skip_reason,
                ..
            } => Some(TelemetryEvent::TickEnded {
                tick_number: *tick_number,
                duration_ms: *duration_ms,
                skip_reason: *skip_reason,
            }),
            Payload::TickSkipped { reason } => Some(TelemetryEvent::TickRefused { reason: *reason }),
            Payload::GateDecision(g) => Some(TelemetryEvent::Gate {
                mode: g.mode,
                reason: g.reason,
                should_speak: g.should_speak,
            }),
            Payload::TickCommit(c) => Some(TelemetryEvent::Commit {
                committed: c.committed,
                block_reason: c.block_reason,
                deduped: c.deduped,
            }),
            Payload::AutonomyFail {
                consecutive_failures, ..
            } => Some(TelemetryEvent::AutonomyFailure {
                consecutive_failures: *consecutive_failures,
            }),
            Payload::SpeechEmitted { .. }
            | Payload::InternalThought { .. }
            | Payload::ToolResult(_)
            | Payload::Custom(_) => None,
        }
    }
}
