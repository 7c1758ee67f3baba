use std::collections::{HashMap, VecDeque};

use super::event::TelemetryEvent;
use crate::kernel::event::SkipReason;
use crate::kernel::gate::GateReason;

#[derive(Debug, Clone, Default)]
pub struct TelemetrySnapshot {
    pub tick_stats: TickStats,
    pub gate_stats: GateStats,
    pub commit_stats: CommitStats,
    pub autonomy_stats: AutonomyStats,
}

#[derive(Debug, Clone, Default)]
pub struct TickStats {
    pub started: u64,
    pub ended: u64,
    /// Ticks that ended without running a production path
    pub skipped: u64,
    /// Ticks refused before opening a scope (no agent bound)
    pub refused: u64,
    pub skip_reasons: HashMap<SkipReason, u64>,
    pub total_duration_ms: u64,
    pub avg_duration_ms: f64,
    pub max_duration_ms: u64,
}

#[derive(Debug, Clone, Default)]
pub struct GateStats {
    pub decisions: u64,
    pub spoke: u64,
    pub by_reason: HashMap<GateReason, u64>,
}

#[derive(Debug, Clone, Default)]
pub struct CommitStats {
    pub committed: u64,
    pub blocked: u64,
    pub deduped: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AutonomyStats {
    pub failures: u64,
    pub max_consecutive_failures: u32,
}

pub fn compute_snapshot(events: &VecDeque<TelemetryEvent>) -> TelemetrySnapshot {
    let mut snap = TelemetrySnapshot::default();

    for event in events {
        match event {
            TelemetryEvent::TickStarted { .. } => snap.tick_stats.started += 1,
            TelemetryEvent::TickEnded {
                duration_ms,
                skip_reason,
                ..
            } => {
                snap.tick_stats.ended += 1;
                snap.tick_stats.total_duration_ms += duration_ms;
                snap.tick_stats.max_duration_ms = snap.tick_stats.max_duration_ms.max(*duration_ms);
                if let Some(reason) = skip_reason {
                    snap.tick_stats.skipped += 1;
                    *snap.tick_stats.skip_reasons.entry(*reason).or_default() += 1;
                }
            }
            TelemetryEvent::TickRefused { reason } => {
                snap.tick_stats.refused += 1;
                *snap.tick_stats.skip_reasons.entry(*reason).or_default() += 1;
            }
            TelemetryEvent::Gate {
                reason, should_speak, ..
            } => {
                snap.gate_stats.decisions += 1;
                if *should_speak {
                    snap.gate_stats.spoke += 1;
                }
                *snap.gate_stats.by_reason.entry(*reason).or_default() += 1;
            }
            TelemetryEvent::Commit {
                committed, deduped, ..
            } => {
                if *committed {
                    snap.commit_stats.committed += 1;
                } else {
                    snap.commit_stats.blocked += 1;
                }
                if *deduped {
                    snap.commit_stats.deduped += 1;
                }
            }
            TelemetryEvent::AutonomyFailure { consecutive_failures } => {
                snap.autonomy_stats.failures += 1;
                snap.autonomy_stats.max_consecutive_failures =
                    snap.autonomy_stats.max_consecutive_failures.max(*consecutive_failures);
            }
        }
    }

    if snap.tick_stats.ended > 0 {
        snap.tick_stats.avg_duration_ms = snap.tick_stats.total_duration_ms as f64 / snap.tick_stats.ended as f64;
    }

    snap
}
