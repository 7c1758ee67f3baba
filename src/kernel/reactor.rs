use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::autonomy::{AutonomyBackoff, AutonomyBudget};
use super::bus::{EventBus, Subscription};
use super::commit::{CommitInput, CommitResult, Origin, TickCommitter};
use super::config::KernelConfig;
use super::error::ProducerError;
use super::event::{EventPacket, GateTelemetry, PacketType, Payload, SkipReason};
use super::gate::{ExecutiveGate, GateContext, GateDecision, GateReason, LimbicState, SocialDynamics, SpeechCandidate, ToolResult};
use super::mode::{self, ThinkMode};
use super::producer::{ActiveGoal, CandidateProducer, ProducerContext};
use super::scope::TickScope;
use super::telemetry::recorder::SharedRecorder;
use super::time::{Clock, Tick};
use super::trace::TraceStack;

const SOURCE: &str = "reactor";

/// State owned by collaborators outside the kernel (emotion model, goal
/// planner, social model). The reactor only reads it.
#[derive(Debug, Clone, Default)]
pub struct AgentSnapshot {
    pub limbic: LimbicState,
    pub social: Option<SocialDynamics>,
    pub active_goal: Option<ActiveGoal>,
}

/// Latest unconsumed tool result. Taken by the next tick.
type ToolInbox = Option<ToolResult>;

/// Everything one `run_single_step` call produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickOutcome {
    pub tick_number: Option<u64>,
    pub trace_id: Option<String>,
    pub mode: Option<ThinkMode>,
    pub decision: Option<GateDecision>,
    pub commit: Option<CommitResult>,
    pub skip_reason: Option<SkipReason>,
    pub error: Option<String>,
}

impl TickOutcome {
    fn refused(reason: SkipReason) -> Self {
        Self {
            tick_number: None,
            trace_id: None,
            mode: None,
            decision: None,
            commit: None,
            skip_reason: Some(reason),
            error: None,
        }
    }

    /// Text that actually became observable this tick.
    pub fn spoken(&self) -> Option<&str> {
        match (&self.commit, &self.decision) {
            (Some(c), Some(d)) if c.committed => d.winner.as_ref().map(|w| w.speech_content.as_str()),
            _ => None,
        }
    }
}

/// Result of one production path, before arbitration.
struct PathResult {
    candidates: Vec<SpeechCandidate>,
    skip: Option<SkipReason>,
    error: Option<ProducerError>,
}

impl PathResult {
    fn produced(candidates: Vec<SpeechCandidate>) -> Self {
        Self {
            candidates,
            skip: None,
            error: None,
        }
    }

    fn skipped(reason: SkipReason) -> Self {
        Self {
            candidates: Vec::new(),
            skip: Some(reason),
            error: None,
        }
    }

    fn failed(error: ProducerError) -> Self {
        Self {
            candidates: Vec::new(),
            skip: Some(SkipReason::ProducerFailed),
            error: Some(error),
        }
    }
}

/// Tick orchestrator. Owns every piece of mutable kernel state; the caller
/// must not run two steps concurrently.
pub struct Reactor<P: CandidateProducer> {
    agent_id: Option<String>,
    config: KernelConfig,
    clock: Arc<dyn Clock>,
    pub bus: EventBus,
    pub gate: ExecutiveGate,
    pub committer: TickCommitter,
    pub budget: AutonomyBudget,
    pub backoff: AutonomyBackoff,
    pub telemetry: SharedRecorder,
    pub snapshot: AgentSnapshot,
    pub tick: Tick,
    producer: P,
    autonomous_mode: bool,
    last_user_input_at: Option<u64>,
    tools: Arc<Mutex<ToolInbox>>,
    _subscriptions: Vec<Subscription>,
}

impl<P: CandidateProducer> Reactor<P> {
    pub fn new(config: KernelConfig, clock: Arc<dyn Clock>, producer: P) -> Self {
        let bus = EventBus::new(TraceStack::new(), config.flags);
        Self::with_bus(config, clock, bus, producer)
    }

    pub fn with_bus(config: KernelConfig, clock: Arc<dyn Clock>, bus: EventBus, producer: P) -> Self {
        let now = clock.now_ms();
        let (telemetry, mut subscriptions) = SharedRecorder::attach(&bus);

        let tools: Arc<Mutex<ToolInbox>> = Arc::new(Mutex::new(None));
        let inbox = Arc::clone(&tools);
        subscriptions.push(bus.subscribe(PacketType::ToolResult, move |packet| {
            if let Payload::ToolResult(result) = &packet.payload {
                *inbox.lock().unwrap_or_else(|e| e.into_inner()) = Some(result.clone());
            }
        }));

        Self {
            agent_id: None,
            gate: ExecutiveGate::new(config.gate),
            committer: TickCommitter::new(bus.clone(), config.commit),
            budget: AutonomyBudget::new(now),
            backoff: AutonomyBackoff::new(config.autonomy.base_cooldown_ms, config.autonomy.max_cooldown_ms),
            autonomous_mode: config.driver.autonomous_mode,
            telemetry,
            snapshot: AgentSnapshot::default(),
            tick: Tick::new(),
            producer,
            last_user_input_at: None,
            tools,
            _subscriptions: subscriptions,
            config,
            clock,
            bus,
        }
    }

    pub fn bind_agent(&mut self, agent_id: impl Into<String>) {
        self.agent_id = Some(agent_id.into());
    }

    pub fn unbind_agent(&mut self) {
        self.agent_id = None;
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn set_autonomous_mode(&mut self, enabled: bool) {
        if self.autonomous_mode != enabled {
            info!(enabled, "autonomous mode changed");
        }
        self.autonomous_mode = enabled;
    }

    pub fn autonomous_mode(&self) -> bool {
        self.autonomous_mode
    }

    pub fn producer(&self) -> &P {
        &self.producer
    }

    pub fn producer_mut(&mut self) -> &mut P {
        &mut self.producer
    }

    /// Publish a finished tool call. The next tick becomes user facing and
    /// its gate sees this result.
    pub fn report_tool_result(&self, result: ToolResult) {
        let packet = EventPacket::new(SOURCE, Payload::ToolResult(result), self.clock.now_ms());
        self.bus.publish_sync(packet);
    }

    /// Clear every governor, dedup entry and counter.
    pub fn reset_for_testing(&mut self) {
        let now = self.clock.now_ms();
        self.committer.reset_for_testing();
        self.budget.reset(now);
        self.backoff.reset();
        self.telemetry.clear();
        self.bus.clear();
        self.bus.trace().reset();
        self.last_user_input_at = None;
        *self.tools.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.tick = Tick::new();
    }

    /// One tick: scope, mode, exactly one production path, gate, commit.
    ///
    /// **KERNEL LAW**: the scope is finalized on every exit path. Goal-driven
    /// and autonomous paths never both run in one tick.
    pub async fn run_single_step(&mut self, input: Option<String>) -> TickOutcome {
        // NO_AGENT: checked before any producer access
        let Some(agent_id) = self.agent_id.clone() else {
            warn!("tick skipped: no agent bound");
            self.emit(
                EventPacket::new(SOURCE, Payload::TickSkipped { reason: SkipReason::NoAgentId }, self.clock.now_ms()),
            );
            return TickOutcome::refused(SkipReason::NoAgentId);
        };

        self.tick = self.tick.next();
        let tick_number = self.tick.frame;
        let started_at = self.clock.now_ms();
        if input.is_some() {
            self.last_user_input_at = Some(started_at);
        }

        let last_tool = self.tools.lock().unwrap_or_else(|e| e.into_inner()).take();
        let is_user_facing = input.is_some() || last_tool.is_some();

        // SCOPE_OPEN
        let scope = TickScope::open(
            &self.bus,
            Arc::clone(&self.clock),
            Some(agent_id.clone()),
            tick_number,
            started_at,
            is_user_facing,
        );
        let trace_id = scope.trace_id().to_string();

        // MODE_SELECTED
        let mode = mode::select(
            input.as_deref(),
            self.autonomous_mode,
            self.snapshot.active_goal.is_some(),
        );
        info!(tick_number, trace_id = %trace_id, ?mode, is_user_facing, "tick started");

        let ctx = ProducerContext {
            agent_id: agent_id.clone(),
            tick_number,
            trace_id: trace_id.clone(),
            now: started_at,
            limbic: self.snapshot.limbic,
            is_user_facing,
            gate: self.gate.clone(),
        };

        let path = match mode {
            ThinkMode::Reactive => {
                let text = input.unwrap_or_default();
                match self.producer.reactive(&ctx, &text).await {
                    Ok(candidates) => PathResult::produced(candidates),
                    Err(e) => {
                        warn!(tick_number, error = %e, "reactive producer failed");
                        PathResult::failed(e)
                    }
                }
            }
            ThinkMode::GoalDriven => self.run_goal_driven(&ctx).await,
            ThinkMode::Autonomous => self.run_autonomous(&ctx).await,
            ThinkMode::Idle => PathResult::skipped(SkipReason::Idle),
        };

        let mut outcome = TickOutcome {
            tick_number: Some(tick_number),
            trace_id: Some(trace_id.clone()),
            mode: Some(mode),
            decision: None,
            commit: None,
            skip_reason: path.skip,
            error: path.error.as_ref().map(ToString::to_string),
        };

        if path.skip.is_none() {
            let decision = self.arbitrate(path.candidates, &ctx, last_tool);
            self.publish_gate(&decision, tick_number, mode);
            outcome.commit = self.commit(&decision, &agent_id, &trace_id, tick_number, mode);
            outcome.decision = Some(decision);
        }

        // SCOPE_CLOSED
        scope.finalize(outcome.skip_reason);
        outcome
    }

    async fn run_goal_driven(&mut self, ctx: &ProducerContext) -> PathResult {
        let Some(goal) = self.snapshot.active_goal.clone() else {
            return PathResult::skipped(SkipReason::NoCandidate);
        };
        match self.producer.goal_driven(ctx, &goal).await {
            Ok(Some(candidate)) => PathResult::produced(vec![candidate]),
            Ok(None) => PathResult::skipped(SkipReason::NoCandidate),
            Err(e) => {
                warn!(goal_id = %goal.id, error = %e, "goal producer failed");
                PathResult::failed(e)
            }
        }
    }

    async fn run_autonomous(&mut self, ctx: &ProducerContext) -> PathResult {
        let now = ctx.now;

        // A tool-completion tick answers the user; the self-initiation
        // governors do not apply.
        if !ctx.is_user_facing {
            let silence_ms = now.saturating_sub(self.last_user_input_at.unwrap_or(0));
            if !self
                .backoff
                .should_trigger(now, silence_ms, self.config.autonomy.min_silence_ms)
            {
                debug!(silence_ms, cooldown_ms = self.backoff.cooldown_ms(), "autonomy cooling down");
                return PathResult::skipped(SkipReason::AutonomyCooldown);
            }
            if !self.budget.check_budget(now, self.config.autonomy.ops_per_minute) {
                self.backoff.on_noop(now);
                return PathResult::skipped(SkipReason::AutonomyBudgetExhausted);
            }
            self.budget.consume();
        }

        let result = self.producer.autonomous(ctx).await;
        let finished_at = self.clock.now_ms();
        match result {
            Ok(Some(candidate)) => {
                self.backoff.on_result(finished_at, true);
                PathResult::produced(vec![candidate])
            }
            Ok(None) => {
                self.backoff.on_noop(finished_at);
                PathResult::skipped(SkipReason::NoCandidate)
            }
            Err(e) => {
                self.backoff.on_result(finished_at, false);
                warn!(
                    tick_number = ctx.tick_number,
                    failures = self.backoff.consecutive_failures(),
                    error = %e,
                    "autonomous producer failed"
                );
                self.emit(EventPacket::new(
                    SOURCE,
                    Payload::AutonomyFail {
                        tick_number: ctx.tick_number,
                        consecutive_failures: self.backoff.consecutive_failures(),
                        error: e.to_string(),
                    },
                    finished_at,
                ));
                PathResult::failed(e)
            }
        }
    }

    fn arbitrate(&self, candidates: Vec<SpeechCandidate>, ctx: &ProducerContext, last_tool: Option<ToolResult>) -> GateDecision {
        let now = self.clock.now_ms();
        let since_input = now.saturating_sub(self.last_user_input_at.unwrap_or(0));
        let mut gate_ctx = GateContext::with_config(self.gate.config(), self.snapshot.limbic, since_input)
            .user_facing(ctx.is_user_facing);
        gate_ctx.social_dynamics = self.snapshot.social;
        gate_ctx.last_tool = last_tool;

        self.gate.decide(candidates, &gate_ctx)
    }

    fn publish_gate(&self, decision: &GateDecision, tick_number: u64, mode: ThinkMode) {
        let payload = Payload::GateDecision(GateTelemetry {
            tick_number,
            mode,
            should_speak: decision.should_speak,
            reason: decision.reason,
            winner_id: decision.winner.as_ref().map(|w| w.id.clone()),
            loser_count: decision.losers.len(),
        });
        self.emit(EventPacket::new(SOURCE, payload, self.clock.now_ms()));
    }

    fn commit(
        &mut self,
        decision: &GateDecision,
        agent_id: &str,
        trace_id: &str,
        tick_number: u64,
        mode: ThinkMode,
    ) -> Option<CommitResult> {
        let winner = decision.winner.as_ref()?;
        let now = self.clock.now_ms();

        if !decision.should_speak {
            if decision.reason == GateReason::VoicePressureLow {
                self.bus.publish(EventPacket::new(
                    SOURCE,
                    Payload::InternalThought {
                        agent_id: agent_id.to_string(),
                        candidate_id: winner.id.clone(),
                        thought: winner.internal_thought.clone(),
                        reason: decision.reason,
                    },
                    now,
                ));
            }
            return None;
        }

        // A veto winner answers the user whatever path produced it
        let origin = match decision.reason {
            GateReason::ReactiveVeto => Origin::Reactive,
            _ => Origin::from_mode(mode)?,
        };
        let input = CommitInput {
            agent_id: agent_id.to_string(),
            trace_id: Some(trace_id.to_string()),
            tick_number: Some(tick_number),
            origin,
            speech_text: winner.speech_content.clone(),
            block_reason: None,
        };
        let result = self.committer.commit_speech(input, now);

        if result.committed {
            self.bus.publish_sync(EventPacket::new(
                SOURCE,
                Payload::SpeechEmitted {
                    agent_id: agent_id.to_string(),
                    candidate_id: winner.id.clone(),
                    origin,
                    text: winner.speech_content.clone(),
                },
                now,
            ));
        }
        Some(result)
    }

    fn emit(&self, packet: EventPacket) {
        if self.bus.flags().tick_telemetry_sync {
            self.bus.publish_sync(packet);
        } else {
            self.bus.publish(packet);
        }
    }

    /// Async driver loop.
    ///
    /// User input triggers an immediate reactive tick. While autonomous mode
    /// is on, a single timer schedules the next self-initiated tick; once
    /// `autonomy_off` fires that timer is dropped and never re-armed. A tick
    /// already running always completes.
    pub async fn run(
        &mut self,
        mut inputs: mpsc::Receiver<String>,
        autonomy_off: CancellationToken,
        shutdown: CancellationToken,
    ) {
        let interval = Duration::from_millis(self.config.driver.tick_interval_ms);
        info!(interval_ms = self.config.driver.tick_interval_ms, "reactor loop started");

        loop {
            let autonomous = self.autonomous_mode;
            let next_tick = async move {
                if autonomous {
                    tokio::time::sleep(interval).await;
                } else {
                    std::future::pending::<()>().await;
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = autonomy_off.cancelled(), if autonomous => {
                    self.set_autonomous_mode(false);
                }
                maybe_input = inputs.recv() => match maybe_input {
                    Some(text) => {
                        let outcome = self.run_single_step(Some(text)).await;
                        debug!(skip = ?outcome.skip_reason, "reactive tick finished");
                    }
                    None => break,
                },
                _ = next_tick => {
                    let outcome = self.run_single_step(None).await;
                    debug!(skip = ?outcome.skip_reason, "scheduled tick finished");
                }
            }

            self.bus.dispatch_pending();
        }

        self.bus.dispatch_pending();
        info!("reactor loop stopped");
    }
}
