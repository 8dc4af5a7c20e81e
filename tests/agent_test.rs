mod common;

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use chariot::{
    Value,
    agent::{AgentError, AgentEvent, AgentEventKind, AgentScheduler, AgentSpec, Plan, RunMode},
    event::Subscription,
    runtime::Runtime,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::time::timeout;

async fn plan_from(runtime: &Runtime, source: &str) -> Arc<Plan> {
    match runtime.run(source).await.unwrap() {
        Value::Plan(plan) => plan,
        other => panic!("expected a plan, got {}", other),
    }
}

const THERMOSTAT: &str = r#"
plan('cool', ['target'],
    func() { if (isBound(temp)) { bigger(temp, 25) } else { false } },
    func() { not(equal(mode, 'off')) },
    [
        func() { setq(note, concat('cooling from ', temp)) },
        func() { concat(note, ' to ', target) }
    ],
    func() { equal(mode, 'panic') })
"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_runs_never_exceed_the_limit() {
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let finished = Arc::new(AtomicUsize::new(0));

    let mut runtime = Runtime::new(common::fast_config());
    {
        let active = active.clone();
        let peak = peak.clone();
        runtime.register_sync("enter", move |_ctx, _args| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            Ok(Value::Null)
        });
    }
    {
        let active = active.clone();
        let finished = finished.clone();
        runtime.register_sync("leave", move |_ctx, _args| {
            active.fetch_sub(1, Ordering::SeqCst);
            finished.fetch_add(1, Ordering::SeqCst);
            Ok(Value::Null)
        });
    }
    let runtime = Arc::new(runtime);
    let plan = plan_from(
        &runtime,
        "plan('work', [], null, null, [func() { enter() sleep(60) leave() }])",
    )
    .await;

    let scheduler = AgentScheduler::new(runtime.clone());
    scheduler
        .register(
            AgentSpec::new("worker", plan)
                .with_max_concurrent_plan_runs(3)
                .with_poll_interval(Duration::from_millis(5)),
        )
        .unwrap();
    scheduler.start("worker").unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    scheduler.stop("worker").unwrap();

    assert_eq!(peak.load(Ordering::SeqCst), 3);
    assert!(finished.load(Ordering::SeqCst) >= 3);
    assert!(!scheduler.get_info("worker").unwrap().running);
}

#[tokio::test]
async fn test_belief_change_triggers_a_run() {
    let runtime = Arc::new(Runtime::new(common::fast_config()));
    let plan = plan_from(&runtime, THERMOSTAT).await;
    let scheduler = AgentScheduler::new(runtime.clone());
    scheduler
        .register(
            AgentSpec::new("thermostat", plan)
                .with_belief("mode", Value::str("auto"))
                .with_belief("target", Value::Number(21.0)),
        )
        .unwrap();
    let mut events = scheduler.subscribe();
    scheduler.start("thermostat").unwrap();
    scheduler
        .put_belief("thermostat", "temp", Value::Number(30.0))
        .unwrap();

    let finished = timeout(Duration::from_secs(2), async {
        while let Some(event) = events.receiver.recv().await {
            if event.kind == AgentEventKind::PlanRunFinished {
                return event;
            }
        }
        panic!("event stream closed");
    })
    .await
    .unwrap();
    assert_eq!(finished.agent, "thermostat");
    assert_eq!(finished.payload["executed"], serde_json::json!(true));

    scheduler.stop("thermostat").unwrap();
    let info = scheduler.get_info("thermostat").unwrap();
    assert!(info.completed_runs >= 1);
    assert_eq!(info.belief_count, 3);
}

#[tokio::test]
async fn test_run_plan_once_modes() {
    let runtime = Arc::new(Runtime::default());
    let plan = plan_from(&runtime, THERMOSTAT).await;
    let scheduler = AgentScheduler::new(runtime.clone());
    scheduler.register_plan(plan.clone());
    scheduler
        .register(
            AgentSpec::new("hvac", plan)
                .with_belief("mode", Value::str("off"))
                .with_belief("temp", Value::Number(28.0)),
        )
        .unwrap();

    let vars = HashMap::from([("target".to_string(), Value::Number(22.0))]);
    let run = |mode| scheduler.run_plan_once("cool", vars.clone(), Some("hvac"), mode);

    // guard rejects while mode is off
    assert!(!run(RunMode::Bdi).await.unwrap().executed);
    assert!(!run(RunMode::DryRun).await.unwrap().executed);

    let forced = run(RunMode::Force).await.unwrap();
    assert!(forced.executed);
    assert_eq!(forced.value, Value::str("cooling from 28 to 22"));

    scheduler.put_belief("hvac", "mode", Value::str("auto")).unwrap();
    assert!(run(RunMode::DryRun).await.unwrap().executed);
    assert!(run(RunMode::GuardOnly).await.unwrap().executed);

    // drop holds before the first step unless ignored
    scheduler.put_belief("hvac", "mode", Value::str("panic")).unwrap();
    assert!(!run(RunMode::Force).await.unwrap().executed);
    assert!(run(RunMode::ForceAll).await.unwrap().executed);
}

#[tokio::test]
async fn test_scheduler_errors() {
    let runtime = Arc::new(Runtime::default());
    let scheduler = AgentScheduler::new(runtime.clone());
    assert_eq!(
        scheduler.start("ghost"),
        Err(AgentError::AgentNotFound("ghost".into()))
    );
    assert_eq!(
        scheduler
            .run_plan_once("nothing", HashMap::new(), None, RunMode::Bdi)
            .await
            .unwrap_err(),
        AgentError::PlanNotFound("nothing".into())
    );
    assert_eq!(
        RunMode::parse_strict("sideways").unwrap_err(),
        AgentError::InvalidMode("sideways".into())
    );
    assert_eq!(RunMode::lenient("sideways"), RunMode::Bdi);
    assert_eq!(RunMode::parse_strict("FORCE-ALL").unwrap(), RunMode::ForceAll);
}

async fn next_event(
    events: &mut Subscription<AgentEvent>,
    wanted: impl Fn(&AgentEvent) -> bool,
) -> AgentEvent {
    timeout(Duration::from_secs(3), async {
        while let Some(event) = events.receiver.recv().await {
            if wanted(&event) {
                return event;
            }
        }
        panic!("event stream closed");
    })
    .await
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_in_flight_run_keeps_its_belief_snapshot() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let mut runtime = Runtime::new(common::fast_config());
    {
        let seen = seen.clone();
        runtime.register_sync("record", move |_ctx, args| {
            seen.lock().push(args[0].clone());
            Ok(Value::Null)
        });
    }
    let runtime = Arc::new(runtime);
    let plan = plan_from(
        &runtime,
        "plan('sample', [], null, null, [func() { record(temp) sleep(150) record(temp) }])",
    )
    .await;
    let scheduler = AgentScheduler::new(runtime.clone());
    scheduler
        .register(
            AgentSpec::new("sensor", plan)
                .with_belief("temp", Value::Number(30.0))
                .with_max_concurrent_plan_runs(1),
        )
        .unwrap();
    let mut events = scheduler.subscribe();
    scheduler.start("sensor").unwrap();

    next_event(&mut events, |e| e.kind == AgentEventKind::StepStarted).await;
    scheduler.put_belief("sensor", "temp", Value::Number(40.0)).unwrap();
    next_event(&mut events, |e| e.kind == AgentEventKind::PlanRunFinished).await;
    scheduler.stop("sensor").unwrap();

    let seen = seen.lock().clone();
    assert_eq!(seen[..2], [Value::Number(30.0), Value::Number(30.0)]);
    assert_eq!(
        scheduler.get_belief("sensor", "temp").unwrap(),
        Some(Value::Number(40.0))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_lets_the_running_plan_finish() {
    let runtime = Arc::new(Runtime::new(common::fast_config()));
    let plan = plan_from(&runtime, "plan('slow', [], null, null, [func() { sleep(150) 'done' }])").await;
    let scheduler = AgentScheduler::new(runtime.clone());
    scheduler.register(AgentSpec::new("slowpoke", plan)).unwrap();
    let mut events = scheduler.subscribe();
    scheduler.start("slowpoke").unwrap();

    next_event(&mut events, |e| e.kind == AgentEventKind::StepStarted).await;
    scheduler.stop("slowpoke").unwrap();

    let stopped = next_event(&mut events, |e| {
        matches!(e.kind, AgentEventKind::Stopped | AgentEventKind::PlanRunFinished)
    })
    .await;
    assert_eq!(stopped.kind, AgentEventKind::Stopped);
    assert_eq!(stopped.payload["inFlight"], serde_json::json!(1));

    let finished = next_event(&mut events, |e| e.kind == AgentEventKind::PlanRunFinished).await;
    assert_eq!(finished.payload["executed"], serde_json::json!(true));
    assert!(!scheduler.get_info("slowpoke").unwrap().running);
}

#[tokio::test]
async fn test_late_subscriber_sees_later_events() {
    let runtime = Arc::new(Runtime::new(common::fast_config()));
    let plan = plan_from(&runtime, THERMOSTAT).await;
    let scheduler = AgentScheduler::new(runtime.clone());
    scheduler
        .register(
            AgentSpec::new("thermostat", plan)
                .with_belief("mode", Value::str("auto"))
                .with_belief("target", Value::Number(21.0)),
        )
        .unwrap();
    scheduler.start("thermostat").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut events = scheduler.subscribe();
    scheduler
        .put_belief("thermostat", "temp", Value::Number(30.0))
        .unwrap();
    let belief = next_event(&mut events, |e| e.kind == AgentEventKind::BeliefSet).await;
    assert_eq!(belief.payload["key"], serde_json::json!("temp"));
    let finished = next_event(&mut events, |e| {
        e.kind == AgentEventKind::PlanRunFinished && e.payload["executed"] == serde_json::json!(true)
    })
    .await;
    assert_eq!(finished.agent, "thermostat");
    scheduler.stop("thermostat").unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_agents_are_driven_from_scripts() {
    let scheduler = AgentScheduler::scripted(Runtime::new(common::fast_config()));
    let runtime = scheduler.runtime().clone();
    let mut events = scheduler.subscribe();

    let started = runtime
        .run(
            r#"
            declare(p, 'P', plan('cool', [], func() { isBound(temp) }, null, [func() { 'cooled' }]))
            agentStartNamed('hvac', p, 2, 0.01)
            agentStartNamed('hvac', p)
            [agentBelief('hvac', 'temp', 30), agentBelief('ghost', 'temp', 1),
             belief('hvac', 'temp'), belief('hvac', 'humidity'), agentList()]
            "#,
        )
        .await
        .unwrap();
    assert_eq!(
        started.to_json(),
        serde_json::json!([true, false, 30, null, ["hvac"]])
    );
    let finished = next_event(&mut events, |e| {
        e.kind == AgentEventKind::PlanRunFinished && e.payload["executed"] == serde_json::json!(true)
    })
    .await;
    assert_eq!(finished.agent, "hvac");
    assert_eq!(scheduler.get_info("hvac").unwrap().max_concurrent_plan_runs, 2);

    let stopped = runtime
        .run("[agentStopNamed('hvac'), agentStopNamed('hvac'), length(agentList())]")
        .await
        .unwrap();
    assert_eq!(stopped.to_json(), serde_json::json!([true, true, 0]));
    assert!(!scheduler.contains("hvac"));
}

#[tokio::test]
async fn test_agent_drafts_and_one_shot_runs_from_scripts() {
    let scheduler = AgentScheduler::scripted(Runtime::new(common::fast_config()));
    let runtime = scheduler.runtime().clone();

    let result = runtime
        .run(
            r#"
            declare(seen, 'M', map())
            declare(greet, 'P', plan('greet', ['who'], func() { false }, null,
                [func() { setValue(seen, 'who', who) }]))
            declare(vars, 'M', map())
            setValue(vars, 'who', 'ann')
            declare(a, 'S', agentNew(1, 60))
            agentRegister(a, greet)
            agentStart(a)
            agentStop(a)
            [runPlanOnceBDI(greet, vars), runPlanOnceEx(greet, 'dry-run', vars),
             runPlanOnceEx(greet, 'force', vars), getValue(seen, 'who'),
             equal(getAt(agentList(), 0), a)]
            "#,
        )
        .await
        .unwrap();
    assert_eq!(
        result.to_json(),
        serde_json::json!([false, false, true, "ann", true])
    );
    let name = scheduler.list().remove(0);
    assert!(name.starts_with("agent-"));
    let info = scheduler.get_info(&name).unwrap();
    assert_eq!(info.plan, "greet");
    assert!(!info.running);

    // unparametrized runs see unbound parameters as null
    let forced = runtime
        .run(
            r#"
            declare(seen, 'M', map())
            runPlanOnce(plan('peek', ['who'], null, null, [func() { setValue(seen, 'null', isNull(who)) }]))
            getValue(seen, 'null')
            "#,
        )
        .await
        .unwrap();
    assert_eq!(forced, Value::Bool(true));

    let error = runtime
        .run("agentRegister('nobody', plan('x'))")
        .await
        .unwrap_err();
    assert!(error.to_string().contains("Agent not found: nobody"), "{}", error);
    let error = runtime.run("runPlanOnce(plan('boom', [], null, null, [func() { raise('bad step') }]))").await.unwrap_err();
    assert!(error.to_string().contains("bad step"), "{}", error);
}
