use serde::{Deserialize, Serialize};

use crate::kernel::config::GateConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    Reactive,
    Autonomous,
    GoalDriven,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateMetadata {
    pub source: Option<String>,
    pub goal_id: Option<String>,
    pub novelty: Option<f64>,
    pub salience: Option<f64>,
}

/// A proposed utterance. Built fresh every tick by one producer path,
/// consumed once by the gate, then dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeechCandidate {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: CandidateKind,
    pub speech_content: String,
    pub internal_thought: String,
    pub timestamp: u64,
    pub strength: f64,
    pub is_user_response: bool,
    pub metadata: Option<CandidateMetadata>,
}

impl SpeechCandidate {
    pub fn has_speech(&self) -> bool {
        !self.speech_content.trim().is_empty()
    }

    pub fn novelty(&self) -> Option<f64> {
        self.metadata.as_ref().and_then(|m| m.novelty)
    }

    pub fn salience(&self) -> Option<f64> {
        self.metadata.as_ref().and_then(|m| m.salience)
    }
}

/// Emotional snapshot. Values may exceed [0, 1] upstream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LimbicState {
    pub fear: f64,
    pub curiosity: f64,
    pub frustration: f64,
    pub satisfaction: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SocialDynamics {
    /// 0.0 - 1.0: remaining willingness to speak unprompted.
    pub autonomy_budget: f64,
    /// 0.0 - 1.0: subtracted from voice pressure.
    pub social_cost: f64,
    /// 0.0 - 1.0: 1.0 = user clearly present.
    pub user_presence_score: f64,
}

/// Outcome of the last tool call, read by the domain-mismatch check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub ok: bool,
    pub at: u64,
    pub domain_expected: Option<String>,
    pub domain_actual: Option<String>,
}

impl ToolResult {
    /// A successful call whose result is about a different subject than asked.
    pub fn is_domain_mismatch(&self) -> bool {
        if !self.ok {
            return false;
        }
        match (&self.domain_expected, &self.domain_actual) {
            (Some(expected), Some(actual)) => {
                expected.trim().to_lowercase() != actual.trim().to_lowercase()
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateContext {
    pub limbic: LimbicState,
    pub time_since_user_input: u64,
    pub silence_window: u64,
    pub voice_pressure_threshold: f64,
    pub social_dynamics: Option<SocialDynamics>,
    pub is_user_facing: bool,
    pub last_tool: Option<ToolResult>,
}

impl GateContext {
    pub fn new(limbic: LimbicState, time_since_user_input: u64) -> Self {
        Self::with_config(&GateConfig::default(), limbic, time_since_user_input)
    }

    pub fn with_config(config: &GateConfig, limbic: LimbicState, time_since_user_input: u64) -> Self {
        Self {
            limbic,
            time_since_user_input,
            silence_window: config.silence_window_ms,
            voice_pressure_threshold: config.voice_pressure_threshold,
            social_dynamics: None,
            is_user_facing: false,
            last_tool: None,
        }
    }

    pub fn user_facing(mut self, is_user_facing: bool) -> Self {
        self.is_user_facing = is_user_facing;
        self
    }

    pub fn social(mut self, social: SocialDynamics) -> Self {
        self.social_dynamics = Some(social);
        self
    }

    pub fn tool(mut self, tool: ToolResult) -> Self {
        self.last_tool = Some(tool);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateReason {
    ReactiveVeto,
    DomainMismatch,
    EmptySpeech,
    SilenceWindowViolated,
    NoCandidates,
    VoicePressureLow,
    SocialBudgetExhausted,
    SocialCostTooHigh,
    AutonomousWon,
}

impl GateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateReason::ReactiveVeto => "REACTIVE_VETO",
            GateReason::DomainMismatch => "DOMAIN_MISMATCH",
            GateReason::EmptySpeech => "EMPTY_SPEECH",
            GateReason::SilenceWindowViolated => "SILENCE_WINDOW_VIOLATED",
            GateReason::NoCandidates => "NO_CANDIDATES",
            GateReason::VoicePressureLow => "VOICE_PRESSURE_LOW",
            GateReason::SocialBudgetExhausted => "SOCIAL_BUDGET_EXHAUSTED",
            GateReason::SocialCostTooHigh => "SOCIAL_COST_TOO_HIGH",
            GateReason::AutonomousWon => "AUTONOMOUS_WON",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateDebug {
    pub reactive_count: usize,
    pub autonomous_count: usize,
    pub goal_driven_count: usize,
    pub voice_pressure: Option<f64>,
    pub effective_pressure: Option<f64>,
    pub dynamic_threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDecision {
    pub should_speak: bool,
    pub winner: Option<SpeechCandidate>,
    pub reason: GateReason,
    pub losers: Vec<SpeechCandidate>,
    pub debug: Option<GateDebug>,
}
