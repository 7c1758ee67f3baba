//! Candidate producers are external collaborators (LLM calls, goal
//! executors). The kernel only awaits them and arbitrates what they return.

use serde::{Deserialize, Serialize};

use super::error::ProducerError;
use super::gate::{ExecutiveGate, LimbicState, SpeechCandidate};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveGoal {
    pub id: String,
    pub description: String,
}

/// Read-only view handed to a producer for one tick.
#[derive(Debug, Clone)]
pub struct ProducerContext {
    pub agent_id: String,
    pub tick_number: u64,
    pub trace_id: String,
    pub now: u64,
    pub limbic: LimbicState,
    pub is_user_facing: bool,
    /// Use its constructors so candidate strength is computed once, here.
    pub gate: ExecutiveGate,
}

#[allow(async_fn_in_trait)]
pub trait CandidateProducer {
    /// Answer user input. May return several candidates; the gate picks the
    /// most recent.
    async fn reactive(&mut self, ctx: &ProducerContext, input: &str) -> Result<Vec<SpeechCandidate>, ProducerError>;

    async fn goal_driven(
        &mut self,
        ctx: &ProducerContext,
        goal: &ActiveGoal,
    ) -> Result<Option<SpeechCandidate>, ProducerError>;

    async fn autonomous(&mut self, ctx: &ProducerContext) -> Result<Option<SpeechCandidate>, ProducerError>;
}
