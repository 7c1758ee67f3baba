use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commit::{BlockReason, CommitCounters, Origin};
use super::gate::types::{GateReason, ToolResult};
use super::mode::ThinkMode;

/// Subscription key. Every payload maps to exactly one packet type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PacketType {
    /// Tick start/end/skip markers
    TickLifecycle,
    TickCommit,
    GateDecision,
    /// The single observable action of a tick
    SpeechEmitted,
    /// A winner that was never spoken (voice pressure too low)
    InternalThought,
    ToolResult,
    AutonomyTelemetry,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SkipReason {
    NoAgentId,
    Idle,
    AutonomyCooldown,
    AutonomyBudgetExhausted,
    NoCandidate,
    ProducerFailed,
}

/// Body of a `TICK_COMMIT` packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitTelemetry {
    pub agent_id: String,
    pub tick_number: Option<u64>,
    pub origin: Origin,
    pub committed: bool,
    pub blocked: bool,
    pub block_reason: Option<BlockReason>,
    pub deduped: bool,
    pub counters: CommitCounters,
}

/// Body of a `GATE_DECISION` packet. Carries ids, never speech text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateTelemetry {
    pub tick_number: u64,
    pub mode: ThinkMode,
    pub should_speak: bool,
    pub reason: GateReason,
    pub winner_id: Option<String>,
    pub loser_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Payload {
    TickStart {
        tick_number: u64,
    },
    TickEnd {
        tick_number: u64,
        duration_ms: u64,
        skipped: bool,
        skip_reason: Option<SkipReason>,
    },
    TickSkipped {
        reason: SkipReason,
    },
    TickCommit(CommitTelemetry),
    GateDecision(GateTelemetry),
    SpeechEmitted {
        agent_id: String,
        candidate_id: String,
        origin: Origin,
        text: String,
    },
    InternalThought {
        agent_id: String,
        candidate_id: String,
        thought: String,
        reason: GateReason,
    },
    ToolResult(ToolResult),
    AutonomyFail {
        tick_number: u64,
        consecutive_failures: u32,
        error: String,
    },
    Custom(serde_json::Value),
}

impl Payload {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Payload::TickStart { .. } | Payload::TickEnd { .. } | Payload::TickSkipped { .. } => {
                PacketType::TickLifecycle
            }
            Payload::TickCommit(_) => PacketType::TickCommit,
            Payload::GateDecision(_) => PacketType::GateDecision,
            Payload::SpeechEmitted { .. } => PacketType::SpeechEmitted,
            Payload::InternalThought { .. } => PacketType::InternalThought,
            Payload::ToolResult(_) => PacketType::ToolResult,
            Payload::AutonomyFail { .. } => PacketType::AutonomyTelemetry,
            Payload::Custom(_) => PacketType::Custom,
        }
    }
}

/// Wire format on the bus. Immutable once published.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPacket {
    pub id: String,
    pub trace_id: Option<String>,
    pub timestamp: u64,
    pub source: String,
    #[serde(rename = "type")]
    pub kind: PacketType,
    pub payload: Payload,
    pub priority: f32,
}

impl EventPacket {
    pub fn new(source: &str, payload: Payload, timestamp: u64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            trace_id: None,
            timestamp,
            source: source.to_string(),
            kind: payload.packet_type(),
            payload,
            priority: 0.0,
        }
    }

    pub fn with_trace(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn with_priority(mut self, priority: f32) -> Self {
        self.priority = priority;
        self
    }
}
