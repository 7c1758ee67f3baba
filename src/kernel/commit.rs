//! Tick Committer: the last gate before a winner becomes observable.
//!
//! Holds the only durable state of the tick path: per-agent last committed
//! signature. Entries are overwritten on commit and never expire.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::bus::EventBus;
use super::config::CommitConfig;
use super::event::{CommitTelemetry, EventPacket, Payload};
use super::mode::ThinkMode;

const SOURCE: &str = "tick_committer";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Autonomous,
    GoalDriven,
    Reactive,
}

impl Origin {
    pub fn from_mode(mode: ThinkMode) -> Option<Self> {
        match mode {
            ThinkMode::Reactive => Some(Origin::Reactive),
            ThinkMode::GoalDriven => Some(Origin::GoalDriven),
            ThinkMode::Autonomous => Some(Origin::Autonomous),
            ThinkMode::Idle => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    Deduped,
    Empty,
    FilteredTooShort,
    /// Rejected upstream by a style filter
    StyleGuard,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitInput {
    pub agent_id: String,
    pub trace_id: Option<String>,
    pub tick_number: Option<u64>,
    pub origin: Origin,
    pub speech_text: String,
    /// Set by callers whose own filter already rejected the text.
    pub block_reason: Option<BlockReason>,
}

impl CommitInput {
    pub fn new(agent_id: &str, origin: Origin, speech_text: &str) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            trace_id: None,
            tick_number: None,
            origin,
            speech_text: speech_text.to_string(),
            block_reason: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitResult {
    pub committed: bool,
    pub blocked: bool,
    pub block_reason: Option<BlockReason>,
    pub deduped: bool,
}

impl CommitResult {
    fn committed() -> Self {
        Self {
            committed: true,
            blocked: false,
            block_reason: None,
            deduped: false,
        }
    }

    fn blocked(reason: BlockReason) -> Self {
        Self {
            committed: false,
            blocked: true,
            block_reason: Some(reason),
            deduped: reason == BlockReason::Deduped,
        }
    }
}

/// `total_commits` counts successful commits; `blocked_commits` counts every
/// block, dedup included.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitCounters {
    pub total_commits: u64,
    pub blocked_commits: u64,
    pub deduped_commits: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct LastCommit {
    signature: String,
    committed_at: u64,
}

/// Trim, collapse internal whitespace, lowercase.
pub fn normalize_signature(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub struct TickCommitter {
    bus: EventBus,
    config: CommitConfig,
    last_by_agent: HashMap<String, LastCommit>,
    counters: CommitCounters,
}

impl TickCommitter {
    pub fn new(bus: EventBus, config: CommitConfig) -> Self {
        Self {
            bus,
            config,
            last_by_agent: HashMap::new(),
            counters: CommitCounters::default(),
        }
    }

    pub fn commit_speech(&mut self, input: CommitInput, now: u64) -> CommitResult {
        let result = self.evaluate(&input, now);

        if result.committed {
            self.counters.total_commits += 1;
            info!(agent_id = %input.agent_id, origin = ?input.origin, "speech committed");
        } else {
            self.counters.blocked_commits += 1;
            if result.deduped {
                self.counters.deduped_commits += 1;
            }
            debug!(agent_id = %input.agent_id, reason = ?result.block_reason, "speech commit blocked");
        }

        self.publish_telemetry(&input, &result, now);
        result
    }

    fn evaluate(&mut self, input: &CommitInput, now: u64) -> CommitResult {
        // (a) upstream rejection short-circuits
        if let Some(reason) = input.block_reason {
            return CommitResult::blocked(reason);
        }

        // (b)
        let signature = normalize_signature(&input.speech_text);
        if signature.is_empty() {
            return CommitResult::blocked(BlockReason::Empty);
        }

        // (c)
        if let Some(last) = self.last_by_agent.get(&input.agent_id) {
            let elapsed = now.saturating_sub(last.committed_at);
            if last.signature == signature && elapsed < self.config.dedup_window_ms {
                return CommitResult::blocked(BlockReason::Deduped);
            }
        }

        // (d)
        self.last_by_agent.insert(
            input.agent_id.clone(),
            LastCommit {
                signature,
                committed_at: now,
            },
        );
        CommitResult::committed()
    }

    fn publish_telemetry(&self, input: &CommitInput, result: &CommitResult, now: u64) {
        let payload = Payload::TickCommit(CommitTelemetry {
            agent_id: input.agent_id.clone(),
            tick_number: input.tick_number,
            origin: input.origin,
            committed: result.committed,
            blocked: result.blocked,
            block_reason: result.block_reason,
            deduped: result.deduped,
            counters: self.counters,
        });
        let mut packet = EventPacket::new(SOURCE, payload, now);
        if let Some(trace_id) = &input.trace_id {
            packet = packet.with_trace(trace_id.clone());
        }

        if self.bus.flags().tick_telemetry_sync {
            self.bus.publish_sync(packet);
        } else {
            self.bus.publish(packet);
        }
    }

    pub fn counters(&self) -> CommitCounters {
        self.counters
    }

    pub fn reset_for_testing(&mut self) {
        self.last_by_agent.clear();
        self.counters = CommitCounters::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_whitespace_and_case() {
        assert_eq!(normalize_signature("  Same \t  TEXT\n"), "same text");
        assert_eq!(normalize_signature(" \n\t "), "");
    }
}
