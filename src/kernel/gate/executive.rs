use tracing::debug;
use uuid::Uuid;

use super::types::*;
use crate::kernel::config::GateConfig;

const NOVELTY_WEIGHT: f64 = 0.3;
const SALIENCE_WEIGHT: f64 = 0.4;
const GOAL_RELEVANCE_WEIGHT: f64 = 0.2;
const RECENCY_WEIGHT: f64 = 0.1;
const DEFAULT_NOVELTY: f64 = 0.5;
const DEFAULT_SALIENCE: f64 = 0.5;

const SOCIAL_BUDGET_FLOOR: f64 = 0.1;
const SOCIAL_BASE_THRESHOLD: f64 = 0.6;
const SOCIAL_ABSENCE_PENALTY: f64 = 0.3;

fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// PURE FUNCTION: willingness to speak unprompted, always in [0, 1].
pub fn compute_voice_pressure(limbic: &LimbicState) -> f64 {
    let raw = (limbic.curiosity + limbic.satisfaction - limbic.fear - limbic.frustration) / 2.0 + 0.5;
    clamp01(raw)
}

/// Strength with default weights. See `ExecutiveGate::candidate_strength`.
pub fn compute_candidate_strength(candidate: &SpeechCandidate, now: u64) -> f64 {
    ExecutiveGate::default().candidate_strength(candidate, now)
}

/// Competitive-inhibition arbiter: many candidates in, at most one winner out.
#[derive(Debug, Clone, Default)]
pub struct ExecutiveGate {
    config: GateConfig,
}

impl ExecutiveGate {
    pub fn new(config: GateConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    /// `novelty*0.3 + salience*0.4 + goal_relevance*0.2 + recency*0.1`.
    /// Recency decays linearly to zero over `recency_decay_ms`.
    pub fn candidate_strength(&self, candidate: &SpeechCandidate, now: u64) -> f64 {
        let novelty = candidate.novelty().unwrap_or(DEFAULT_NOVELTY);
        let salience = candidate.salience().unwrap_or(DEFAULT_SALIENCE);
        let goal_relevance = match candidate.kind {
            CandidateKind::GoalDriven => self.config.goal_relevance_goal_driven,
            _ => self.config.goal_relevance_default,
        };
        let age = now.saturating_sub(candidate.timestamp) as f64;
        let decay = self.config.recency_decay_ms.max(1) as f64;
        let recency = (1.0 - age / decay).max(0.0);

        novelty * NOVELTY_WEIGHT
            + salience * SALIENCE_WEIGHT
            + goal_relevance * GOAL_RELEVANCE_WEIGHT
            + recency * RECENCY_WEIGHT
    }

    pub fn reactive_candidate(
        &self,
        speech: &str,
        thought: &str,
        now: u64,
        metadata: Option<CandidateMetadata>,
    ) -> SpeechCandidate {
        self.build(CandidateKind::Reactive, true, speech, thought, now, metadata)
    }

    pub fn autonomous_candidate(
        &self,
        speech: &str,
        thought: &str,
        now: u64,
        metadata: Option<CandidateMetadata>,
    ) -> SpeechCandidate {
        self.build(CandidateKind::Autonomous, false, speech, thought, now, metadata)
    }

    pub fn goal_candidate(
        &self,
        speech: &str,
        thought: &str,
        now: u64,
        goal_id: &str,
        metadata: Option<CandidateMetadata>,
    ) -> SpeechCandidate {
        let mut metadata = metadata.unwrap_or_default();
        metadata.goal_id = Some(goal_id.to_string());
        self.build(CandidateKind::GoalDriven, false, speech, thought, now, Some(metadata))
    }

    fn build(
        &self,
        kind: CandidateKind,
        is_user_response: bool,
        speech: &str,
        thought: &str,
        now: u64,
        metadata: Option<CandidateMetadata>,
    ) -> SpeechCandidate {
        let mut candidate = SpeechCandidate {
            id: Uuid::new_v4().to_string(),
            kind,
            speech_content: speech.to_string(),
            internal_thought: thought.to_string(),
            timestamp: now,
            strength: 0.0,
            is_user_response,
            metadata,
        };
        candidate.strength = self.candidate_strength(&candidate, now);
        candidate
    }

    /// PURE FUNCTION: pick at most one winner. Steps run in strict order and
    /// the first blocking step decides the reason.
    pub fn decide(&self, candidates: Vec<SpeechCandidate>, ctx: &GateContext) -> GateDecision {
        // 1. Partition. When user facing, any non-goal candidate counts as
        // reactive so a fallback can answer a finished tool call.
        let (reactive, rest): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|c| {
            c.kind == CandidateKind::Reactive
                || c.is_user_response
                || (ctx.is_user_facing && c.kind != CandidateKind::GoalDriven)
        });
        let (goal_driven, autonomous): (Vec<_>, Vec<_>) =
            rest.into_iter().partition(|c| c.kind == CandidateKind::GoalDriven);

        let mut debug = GateDebug {
            reactive_count: reactive.len(),
            autonomous_count: autonomous.len(),
            goal_driven_count: goal_driven.len(),
            ..GateDebug::default()
        };

        // 2. Reactive veto. Skips every later check.
        if !reactive.is_empty() {
            return Self::reactive_veto(reactive, autonomous, goal_driven, ctx, debug);
        }

        // 3. Silence window
        if !ctx.is_user_facing && ctx.time_since_user_input < ctx.silence_window {
            let losers = autonomous.into_iter().chain(goal_driven).collect();
            return blocked(GateReason::SilenceWindowViolated, None, losers, debug);
        }

        // 4. Competitive inhibition
        let mut pool: Vec<SpeechCandidate> = autonomous.into_iter().chain(goal_driven).collect();
        if pool.is_empty() {
            return blocked(GateReason::NoCandidates, None, pool, debug);
        }
        pool.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        let winner = pool.remove(0);
        let losers = pool;
        if !winner.has_speech() {
            let mut losers = losers;
            losers.insert(0, winner);
            return blocked(GateReason::EmptySpeech, None, losers, debug);
        }

        // 5. Voice pressure. Winner is kept so it can surface as a thought.
        let voice_pressure = compute_voice_pressure(&ctx.limbic);
        debug.voice_pressure = Some(voice_pressure);
        if voice_pressure < ctx.voice_pressure_threshold {
            return blocked(GateReason::VoicePressureLow, Some(winner), losers, debug);
        }

        // 6. Social dynamics
        if let Some(social) = &ctx.social_dynamics {
            if social.autonomy_budget < SOCIAL_BUDGET_FLOOR {
                return blocked(GateReason::SocialBudgetExhausted, Some(winner), losers, debug);
            }
            let effective = (voice_pressure - social.social_cost).max(0.0);
            let threshold = SOCIAL_BASE_THRESHOLD + (1.0 - social.user_presence_score) * SOCIAL_ABSENCE_PENALTY;
            debug.effective_pressure = Some(effective);
            debug.dynamic_threshold = Some(threshold);
            if effective < threshold {
                return blocked(GateReason::SocialCostTooHigh, Some(winner), losers, debug);
            }
        }

        // 7.
        debug!(winner = %winner.id, strength = winner.strength, "autonomous candidate won");
        GateDecision {
            should_speak: true,
            winner: Some(winner),
            reason: GateReason::AutonomousWon,
            losers,
            debug: Some(debug),
        }
    }

    fn reactive_veto(
        mut reactive: Vec<SpeechCandidate>,
        autonomous: Vec<SpeechCandidate>,
        goal_driven: Vec<SpeechCandidate>,
        ctx: &GateContext,
        debug: GateDebug,
    ) -> GateDecision {
        // Most recent wins; later entries win timestamp ties.
        let mut idx = 0;
        for (i, c) in reactive.iter().enumerate() {
            if c.timestamp >= reactive[idx].timestamp {
                idx = i;
            }
        }
        let winner = reactive.remove(idx);
        let losers: Vec<SpeechCandidate> = reactive.into_iter().chain(autonomous).chain(goal_driven).collect();

        let mismatch = ctx.is_user_facing && ctx.last_tool.as_ref().is_some_and(ToolResult::is_domain_mismatch);
        if mismatch {
            debug!(candidate = %winner.id, "reactive speech blocked on tool domain mismatch");
            let mut losers = losers;
            losers.insert(0, winner);
            return blocked(GateReason::DomainMismatch, None, losers, debug);
        }
        if !winner.has_speech() {
            let mut losers = losers;
            losers.insert(0, winner);
            return blocked(GateReason::EmptySpeech, None, losers, debug);
        }

        GateDecision {
            should_speak: true,
            winner: Some(winner),
            reason: GateReason::ReactiveVeto,
            losers,
            debug: Some(debug),
        }
    }
}

fn blocked(
    reason: GateReason,
    winner: Option<SpeechCandidate>,
    losers: Vec<SpeechCandidate>,
    debug: GateDebug,
) -> GateDecision {
    debug!(reason = reason.as_str(), "gate blocked speech");
    GateDecision {
        should_speak: false,
        winner,
        reason,
        losers,
        debug: Some(debug),
    }
}
