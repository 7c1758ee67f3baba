use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tickgate::kernel::bus::EventBus;
use tickgate::kernel::commit::Origin;
use tickgate::kernel::config::{FeatureFlags, KernelConfig};
use tickgate::kernel::error::ProducerError;
use tickgate::kernel::event::{EventPacket, PacketType, Payload, SkipReason};
use tickgate::kernel::gate::{GateReason, LimbicState, SpeechCandidate, ToolResult};
use tickgate::kernel::mode::ThinkMode;
use tickgate::kernel::producer::{ActiveGoal, CandidateProducer, ProducerContext};
use tickgate::kernel::time::ManualClock;
use tickgate::kernel::trace::TraceStack;
use tickgate::Reactor;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const T0: u64 = 1_700_000_000_000;

type Scripted = Result<Option<String>, ProducerError>;

/// Producer that echoes input reactively and replays scripted answers for
/// the goal and autonomous paths. An empty script means "nothing to say".
#[derive(Default)]
struct ScriptedProducer {
    reactive_calls: usize,
    goal_calls: usize,
    autonomous_calls: usize,
    goal_script: VecDeque<Scripted>,
    autonomous_script: VecDeque<Scripted>,
}

impl ScriptedProducer {
    fn then_autonomous(mut self, answer: Scripted) -> Self {
        self.autonomous_script.push_back(answer);
        self
    }

    fn then_goal(mut self, answer: Scripted) -> Self {
        self.goal_script.push_back(answer);
        self
    }
}

impl CandidateProducer for ScriptedProducer {
    async fn reactive(&mut self, ctx: &ProducerContext, input: &str) -> Result<Vec<SpeechCandidate>, ProducerError> {
        self.reactive_calls += 1;
        Ok(vec![ctx.gate.reactive_candidate(&format!("You said: {input}"), input, ctx.now, None)])
    }

    async fn goal_driven(
        &mut self,
        ctx: &ProducerContext,
        goal: &ActiveGoal,
    ) -> Result<Option<SpeechCandidate>, ProducerError> {
        self.goal_calls += 1;
        let answer = self.goal_script.pop_front().unwrap_or(Ok(None))?;
        Ok(answer.map(|text| ctx.gate.goal_candidate(&text, &goal.description, ctx.now, &goal.id, None)))
    }

    async fn autonomous(&mut self, ctx: &ProducerContext) -> Result<Option<SpeechCandidate>, ProducerError> {
        self.autonomous_calls += 1;
        let answer = self.autonomous_script.pop_front().unwrap_or(Ok(None))?;
        Ok(answer.map(|text| ctx.gate.autonomous_candidate(&text, "an idle thought", ctx.now, None)))
    }
}

fn eager() -> LimbicState {
    LimbicState {
        curiosity: 0.9,
        satisfaction: 0.8,
        ..LimbicState::default()
    }
}

fn timid() -> LimbicState {
    LimbicState {
        fear: 0.9,
        frustration: 0.9,
        ..LimbicState::default()
    }
}

fn reactor_with(config: KernelConfig, producer: ScriptedProducer) -> (Reactor<ScriptedProducer>, ManualClock) {
    let clock = ManualClock::new(T0);
    let mut reactor = Reactor::new(config, Arc::new(clock.clone()), producer);
    reactor.bind_agent("a1");
    reactor.snapshot.limbic = eager();
    (reactor, clock)
}

fn agent_reactor(producer: ScriptedProducer) -> (Reactor<ScriptedProducer>, ManualClock) {
    reactor_with(KernelConfig::default(), producer)
}

fn collect(reactor: &Reactor<ScriptedProducer>, kind: PacketType) -> Arc<Mutex<Vec<EventPacket>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _sub = reactor.bus.subscribe(kind, move |p| sink.lock().unwrap().push(p.clone()));
    seen
}

fn tick_end_reason(reactor: &Reactor<ScriptedProducer>, trace_id: &str) -> Option<Option<SkipReason>> {
    reactor.bus.history().into_iter().find_map(|p| match p.payload {
        Payload::TickEnd { skip_reason, .. } if p.trace_id.as_deref() == Some(trace_id) => Some(skip_reason),
        _ => None,
    })
}

#[tokio::test]
async fn test_no_agent_refuses_before_producers() {
    let clock = ManualClock::new(T0);
    let mut reactor = Reactor::new(KernelConfig::default(), Arc::new(clock), ScriptedProducer::default());

    let outcome = reactor.run_single_step(Some("hello".into())).await;

    assert_eq!(outcome.skip_reason, Some(SkipReason::NoAgentId));
    assert_eq!(outcome.tick_number, None);
    assert_eq!(reactor.producer().reactive_calls, 0);
    assert_eq!(reactor.bus.trace().depth(), 0, "No scope is opened for a refused tick");

    let history = reactor.bus.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].payload, Payload::TickSkipped { reason: SkipReason::NoAgentId });
    assert_eq!(reactor.telemetry.snapshot().tick_stats.refused, 1);
}

#[tokio::test]
async fn test_reactive_tick_speaks_and_closes_scope() {
    let (mut reactor, _clock) = agent_reactor(ScriptedProducer::default());
    reactor.snapshot.limbic = timid();
    let speech = collect(&reactor, PacketType::SpeechEmitted);

    let outcome = reactor.run_single_step(Some("hello".into())).await;

    assert_eq!(outcome.mode, Some(ThinkMode::Reactive));
    assert_eq!(outcome.tick_number, Some(1));
    assert_eq!(outcome.trace_id.as_deref(), Some("tick-1700000000000-1"));
    assert_eq!(outcome.decision.as_ref().map(|d| d.reason), Some(GateReason::ReactiveVeto));
    assert_eq!(outcome.spoken(), Some("You said: hello"));
    assert_eq!(outcome.skip_reason, None);

    let speech = speech.lock().unwrap();
    assert_eq!(speech.len(), 1);
    assert_eq!(speech[0].trace_id.as_deref(), Some("tick-1700000000000-1"));

    assert_eq!(reactor.bus.trace().depth(), 0);
    assert_eq!(tick_end_reason(&reactor, "tick-1700000000000-1"), Some(None));
}

#[tokio::test]
async fn test_repeated_input_is_deduped() {
    let (mut reactor, clock) = agent_reactor(ScriptedProducer::default());

    let first = reactor.run_single_step(Some("hello".into())).await;
    clock.advance(500);
    let second = reactor.run_single_step(Some("hello".into())).await;

    assert!(first.spoken().is_some());
    assert_eq!(second.spoken(), None);
    assert!(second.commit.is_some_and(|c| c.deduped));
    assert_eq!(reactor.committer.counters().deduped_commits, 1);
}

#[tokio::test]
async fn test_autonomous_tick_consumes_budget_and_speaks() {
    let (mut reactor, clock) = agent_reactor(ScriptedProducer::default().then_autonomous(Ok(Some("Did you know?".into()))));

    let outcome = reactor.run_single_step(None).await;

    assert_eq!(outcome.mode, Some(ThinkMode::Autonomous));
    assert_eq!(outcome.decision.as_ref().map(|d| d.reason), Some(GateReason::AutonomousWon));
    assert_eq!(outcome.spoken(), Some("Did you know?"));
    assert_eq!(reactor.budget.ops_this_minute(), 1);
    assert_eq!(reactor.backoff.last_attempt_at(), T0);

    // Still inside the base cooldown
    clock.advance(1_000);
    let outcome = reactor.run_single_step(None).await;
    assert_eq!(outcome.skip_reason, Some(SkipReason::AutonomyCooldown));
    assert_eq!(outcome.decision, None);
    assert_eq!(reactor.producer().autonomous_calls, 1);
    let trace_id = outcome.trace_id.unwrap_or_default();
    assert_eq!(tick_end_reason(&reactor, &trace_id), Some(Some(SkipReason::AutonomyCooldown)));
}

#[tokio::test]
async fn test_budget_exhaustion_skips_without_calling_producer() {
    let mut config = KernelConfig::default();
    config.autonomy.ops_per_minute = 1;
    config.autonomy.base_cooldown_ms = 0;
    let (mut reactor, clock) = reactor_with(
        config,
        ScriptedProducer::default()
            .then_autonomous(Ok(Some("one".into())))
            .then_autonomous(Ok(Some("two".into()))),
    );

    assert!(reactor.run_single_step(None).await.spoken().is_some());
    clock.advance(1_000);
    let outcome = reactor.run_single_step(None).await;

    assert_eq!(outcome.skip_reason, Some(SkipReason::AutonomyBudgetExhausted));
    assert_eq!(reactor.producer().autonomous_calls, 1);
    assert_eq!(reactor.backoff.last_attempt_at(), T0 + 1_000);
}

#[tokio::test]
async fn test_active_goal_suppresses_autonomy() {
    let (mut reactor, _clock) = agent_reactor(ScriptedProducer::default().then_goal(Ok(Some("Step one is done".into()))));
    reactor.snapshot.active_goal = Some(ActiveGoal {
        id: "goal-1".into(),
        description: "finish the report".into(),
    });

    let outcome = reactor.run_single_step(None).await;

    assert_eq!(outcome.mode, Some(ThinkMode::GoalDriven));
    assert_eq!(outcome.spoken(), Some("Step one is done"));
    assert_eq!(reactor.producer().goal_calls, 1);
    assert_eq!(reactor.producer().autonomous_calls, 0, "Goal and autonomous paths never both run");
    assert_eq!(reactor.budget.ops_this_minute(), 0);
}

#[tokio::test]
async fn test_goal_without_candidate_skips() {
    let (mut reactor, _clock) = agent_reactor(ScriptedProducer::default());
    reactor.snapshot.active_goal = Some(ActiveGoal {
        id: "goal-1".into(),
        description: "finish the report".into(),
    });

    let outcome = reactor.run_single_step(None).await;
    assert_eq!(outcome.skip_reason, Some(SkipReason::NoCandidate));
    assert_eq!(reactor.producer().autonomous_calls, 0);
}

#[tokio::test]
async fn test_producer_failure_feeds_backoff_and_still_closes_scope() {
    let (mut reactor, clock) = agent_reactor(
        ScriptedProducer::default()
            .then_autonomous(Err(ProducerError::Backend("boom".into())))
            .then_autonomous(Ok(Some("back again".into()))),
    );
    let failures = collect(&reactor, PacketType::AutonomyTelemetry);

    let outcome = reactor.run_single_step(None).await;

    assert_eq!(outcome.skip_reason, Some(SkipReason::ProducerFailed));
    assert!(outcome.error.as_deref().is_some_and(|e| e.contains("boom")));
    assert_eq!(reactor.backoff.consecutive_failures(), 1);
    assert_eq!(reactor.backoff.cooldown_ms(), 50_000);
    assert_eq!(reactor.bus.trace().depth(), 0);
    let trace_id = outcome.trace_id.unwrap_or_default();
    assert_eq!(tick_end_reason(&reactor, &trace_id), Some(Some(SkipReason::ProducerFailed)));

    {
        let failures = failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].trace_id.as_deref(), Some(trace_id.as_str()));
    }

    // Base cooldown is not enough after a failure
    clock.advance(25_000);
    assert_eq!(reactor.run_single_step(None).await.skip_reason, Some(SkipReason::AutonomyCooldown));

    clock.advance(25_000);
    let outcome = reactor.run_single_step(None).await;
    assert_eq!(outcome.spoken(), Some("back again"));
    assert_eq!(reactor.backoff.consecutive_failures(), 0);
}

#[tokio::test]
async fn test_idle_when_autonomy_disabled() {
    let (mut reactor, _clock) = agent_reactor(ScriptedProducer::default());
    reactor.set_autonomous_mode(false);
    reactor.snapshot.active_goal = Some(ActiveGoal {
        id: "goal-1".into(),
        description: "anything".into(),
    });

    let outcome = reactor.run_single_step(None).await;

    assert_eq!(outcome.mode, Some(ThinkMode::Idle));
    assert_eq!(outcome.skip_reason, Some(SkipReason::Idle));
    assert_eq!(reactor.producer().goal_calls + reactor.producer().autonomous_calls, 0);
}

#[tokio::test]
async fn test_silence_window_blocks_autonomous_speech() {
    let mut config = KernelConfig::default();
    // Let the governor through so the gate's own silence window decides
    config.autonomy.min_silence_ms = 0;
    let (mut reactor, clock) = reactor_with(config, ScriptedProducer::default().then_autonomous(Ok(Some("Anyway...".into()))));

    reactor.run_single_step(Some("hi".into())).await;
    clock.advance(2_000);
    let outcome = reactor.run_single_step(None).await;

    let decision = outcome.decision.expect("gate ran");
    assert!(!decision.should_speak);
    assert_eq!(decision.reason, GateReason::SilenceWindowViolated);
    assert_eq!(outcome.commit, None);
}

#[tokio::test]
async fn test_low_voice_pressure_surfaces_internal_thought() {
    let (mut reactor, _clock) = agent_reactor(ScriptedProducer::default().then_autonomous(Ok(Some("Hmm".into()))));
    reactor.snapshot.limbic = timid();
    let thoughts = collect(&reactor, PacketType::InternalThought);
    let speech = collect(&reactor, PacketType::SpeechEmitted);

    let outcome = reactor.run_single_step(None).await;

    assert_eq!(outcome.decision.map(|d| d.reason), Some(GateReason::VoicePressureLow));
    assert_eq!(outcome.commit, None);
    assert!(thoughts.lock().unwrap().is_empty(), "Thoughts are delivered on the deferred queue");

    reactor.bus.dispatch_pending();
    let thoughts = thoughts.lock().unwrap();
    assert_eq!(thoughts.len(), 1);
    assert!(matches!(
        &thoughts[0].payload,
        Payload::InternalThought { thought, .. } if thought == "an idle thought"
    ));
    assert!(speech.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_tool_result_makes_next_tick_user_facing() {
    let (mut reactor, clock) = agent_reactor(
        ScriptedProducer::default()
            .then_autonomous(Ok(Some("Here is the forecast".into())))
            .then_autonomous(Ok(Some("unprompted".into()))),
    );
    reactor.snapshot.limbic = timid();
    let commits = collect(&reactor, PacketType::TickCommit);

    reactor.run_single_step(Some("what's the weather?".into())).await;
    reactor.report_tool_result(ToolResult {
        tool: "weather".into(),
        ok: true,
        at: T0,
        domain_expected: Some("weather".into()),
        domain_actual: Some("weather".into()),
    });
    clock.advance(1_000);

    // User spoke 1s ago and voice pressure is low; the tool tick still answers
    let outcome = reactor.run_single_step(None).await;
    assert_eq!(outcome.decision.as_ref().map(|d| d.reason), Some(GateReason::ReactiveVeto));
    assert_eq!(outcome.spoken(), Some("Here is the forecast"));
    assert!(matches!(
        &commits.lock().unwrap()[1].payload,
        Payload::TickCommit(c) if c.origin == Origin::Reactive && c.committed
    ));

    // The result is consumed; the following tick is a normal autonomous one
    clock.advance(1_000);
    let outcome = reactor.run_single_step(None).await;
    assert_eq!(outcome.skip_reason, Some(SkipReason::AutonomyCooldown));
    assert_eq!(reactor.producer().autonomous_calls, 1);
}

#[tokio::test]
async fn test_tool_domain_mismatch_blocks_reply() {
    let (mut reactor, _clock) = agent_reactor(ScriptedProducer::default());
    reactor.report_tool_result(ToolResult {
        tool: "search".into(),
        ok: true,
        at: T0,
        domain_expected: Some("weather".into()),
        domain_actual: Some("sports".into()),
    });

    let outcome = reactor.run_single_step(Some("so, rain?".into())).await;
    assert_eq!(outcome.decision.as_ref().map(|d| d.reason), Some(GateReason::DomainMismatch));
    assert_eq!(outcome.spoken(), None);

    let outcome = reactor.run_single_step(Some("so, rain?".into())).await;
    assert_eq!(outcome.decision.map(|d| d.reason), Some(GateReason::ReactiveVeto));
}

#[tokio::test]
async fn test_telemetry_snapshot_tracks_ticks() {
    let (mut reactor, clock) = agent_reactor(ScriptedProducer::default());

    reactor.run_single_step(Some("hello".into())).await;
    clock.advance(100);
    reactor.run_single_step(Some("hello".into())).await;
    reactor.set_autonomous_mode(false);
    reactor.run_single_step(None).await;

    let snap = reactor.telemetry.snapshot();
    assert_eq!(snap.tick_stats.started, 3);
    assert_eq!(snap.tick_stats.ended, 3);
    assert_eq!(snap.tick_stats.skipped, 1);
    assert_eq!(snap.tick_stats.skip_reasons.get(&SkipReason::Idle), Some(&1));
    assert_eq!(snap.gate_stats.decisions, 2);
    assert_eq!(snap.gate_stats.spoke, 2);
    assert_eq!(snap.commit_stats.committed, 1);
    assert_eq!(snap.commit_stats.deduped, 1);

    reactor.reset_for_testing();
    assert!(reactor.telemetry.is_empty());
    assert_eq!(reactor.tick.frame, 0);
    assert_eq!(reactor.committer.counters().total_commits, 0);
}

#[tokio::test]
async fn test_run_loop_handles_input_until_channel_closes() {
    let mut config = KernelConfig::default();
    config.driver.autonomous_mode = false;
    let (mut reactor, _clock) = reactor_with(config, ScriptedProducer::default());
    let speech = collect(&reactor, PacketType::SpeechEmitted);

    let (tx, rx) = mpsc::channel(4);
    tx.send("hello".to_string()).await.unwrap();
    tx.send("again".to_string()).await.unwrap();
    drop(tx);

    reactor.run(rx, CancellationToken::new(), CancellationToken::new()).await;

    assert_eq!(reactor.producer().reactive_calls, 2);
    assert_eq!(speech.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_run_loop_stops_autonomy_then_shuts_down() {
    let mut config = KernelConfig::default();
    config.driver.tick_interval_ms = 5;
    let (mut reactor, _clock) = reactor_with(config, ScriptedProducer::default());

    let (_tx, rx) = mpsc::channel::<String>(4);
    let autonomy_off = CancellationToken::new();
    let shutdown = CancellationToken::new();
    {
        let autonomy_off = autonomy_off.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            autonomy_off.cancel();
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.cancel();
        });
    }

    tokio::time::timeout(Duration::from_secs(5), reactor.run(rx, autonomy_off, shutdown))
        .await
        .expect("loop should stop on shutdown");

    assert!(!reactor.autonomous_mode());
    // First scheduled tick attempts; the empty answer starts a cooldown
    assert_eq!(reactor.producer().autonomous_calls, 1);
}

#[tokio::test]
async fn test_bus_flags_drive_all_tick_telemetry() {
    let clock = ManualClock::new(T0);
    let bus = EventBus::new(TraceStack::new(), FeatureFlags::default());
    let mut reactor = Reactor::with_bus(
        KernelConfig::default(),
        Arc::new(clock),
        bus.clone(),
        ScriptedProducer::default(),
    );
    reactor.bind_agent("a1");
    bus.set_flags(FeatureFlags {
        tick_telemetry_sync: false,
        ..FeatureFlags::default()
    });

    reactor.run_single_step(Some("hello".into())).await;

    let snap = reactor.telemetry.snapshot();
    assert_eq!(
        (snap.tick_stats.started, snap.gate_stats.decisions, snap.commit_stats.committed),
        (0, 0, 0),
        "No tick telemetry is delivered inline once the bus flag is off"
    );

    bus.dispatch_pending();
    let snap = reactor.telemetry.snapshot();
    assert_eq!(snap.tick_stats.started, 1);
    assert_eq!(snap.tick_stats.ended, 1);
    assert_eq!(snap.gate_stats.decisions, 1);
    assert_eq!(snap.commit_stats.committed, 1);
}

#[tokio::test]
async fn test_async_tick_telemetry_defers_lifecycle_packets() {
    let mut config = KernelConfig::default();
    config.flags.tick_telemetry_sync = false;
    let (mut reactor, _clock) = reactor_with(config, ScriptedProducer::default());
    let lifecycle = collect(&reactor, PacketType::TickLifecycle);

    let outcome = reactor.run_single_step(Some("hello".into())).await;
    assert!(lifecycle.lock().unwrap().is_empty());

    reactor.bus.dispatch_pending();
    let trace_id = outcome.trace_id.unwrap_or_default();
    let lifecycle = lifecycle.lock().unwrap();
    assert_eq!(lifecycle.len(), 2);
    assert!(matches!(lifecycle[0].payload, Payload::TickStart { tick_number: 1 }));
    assert!(matches!(lifecycle[1].payload, Payload::TickEnd { skipped: false, .. }));
    assert!(lifecycle.iter().all(|p| p.trace_id.as_deref() == Some(trace_id.as_str())));
    assert_eq!(reactor.bus.trace().depth(), 0);
}
