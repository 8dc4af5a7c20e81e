use std::{
    collections::HashMap,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tokio::{
    sync::{Notify, Semaphore},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, instrument, warn};

use super::{
    AgentError, AgentResult,
    event::{AgentEvent, AgentEventKind},
    plan::{Plan, PlanOutcome, RunMode},
};
use crate::{
    config::AgentConfig,
    eval::{EvalError, Evaluator},
    event::{SinkId, SinkRegistry, Subscription},
    runtime::Runtime,
    value::Value,
};

/// Agent name used in events of plan runs not bound to any agent.
const UNBOUND_AGENT: &str = "";

/// What `register` needs to create an agent. Zero concurrency or a zero
/// poll interval fall back to the scheduler's configuration.
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    pub plan: Arc<Plan>,
    pub beliefs: HashMap<String, Value>,
    pub max_concurrent_plan_runs: usize,
    pub poll_interval: Duration,
}

impl AgentSpec {
    pub fn new(name: impl Into<String>, plan: Arc<Plan>) -> Self {
        Self {
            name: name.into(),
            plan,
            beliefs: HashMap::new(),
            max_concurrent_plan_runs: 0,
            poll_interval: Duration::ZERO,
        }
    }

    pub fn with_belief(mut self, key: impl Into<String>, value: Value) -> Self {
        self.beliefs.insert(key.into(), value);
        self
    }

    pub fn with_max_concurrent_plan_runs(mut self, max: usize) -> Self {
        self.max_concurrent_plan_runs = max;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInfo {
    pub name: String,
    pub plan: String,
    pub running: bool,
    pub poll_seconds: f64,
    pub belief_count: usize,
    pub max_concurrent_plan_runs: usize,
    pub in_flight: usize,
    pub completed_runs: u64,
}

struct Agent {
    name: String,
    plan: Arc<Plan>,
    beliefs: RwLock<HashMap<String, Value>>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    poll_interval: Duration,
    in_flight: AtomicUsize,
    completed: AtomicU64,
    nudge: Notify,
}

impl Agent {
    fn emit(&self, events: &SinkRegistry<AgentEvent>, kind: AgentEventKind, payload: serde_json::Value) {
        events.publish(AgentEvent::new(&self.name, kind, payload));
    }

    /// Launches one plan run when a concurrency slot is free. Never waits
    /// for earlier runs.
    fn try_schedule(self: &Arc<Self>, evaluator: &Evaluator, events: &Arc<SinkRegistry<AgentEvent>>) {
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            debug!(agent = %self.name, "all plan-run slots busy");
            return;
        };
        // 実行開始時点の信念で初期化する
        let beliefs = self.beliefs.read().clone();
        let scope = self.plan.instance_scope(&beliefs, &HashMap::new());
        let agent = self.clone();
        let evaluator = evaluator.clone();
        let events = events.clone();

        self.in_flight.fetch_add(1, Ordering::SeqCst);
        tokio::spawn(async move {
            let emit = |kind: AgentEventKind, payload: serde_json::Value| {
                agent.emit(&events, kind, payload)
            };
            let run = agent.plan.run(&evaluator, &scope, RunMode::Bdi, &emit);
            let outcome = AssertUnwindSafe(run)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(EvalError::EvaluationPanic(format!("plan {} panicked", agent.plan.name))));
            match outcome {
                Ok(outcome) => {
                    if outcome.executed {
                        agent.completed.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Err(error) => {
                    warn!(agent = %agent.name, "plan run failed: {}", error);
                    emit(
                        AgentEventKind::Error,
                        json!({ "plan": agent.plan.name, "error": error.to_string() }),
                    );
                }
            }
            agent.in_flight.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }
}

/// Runs named agents, each re-evaluating its plan on a timer with bounded
/// concurrency. Events of every agent go to one sink registry.
pub struct AgentScheduler {
    runtime: Arc<Runtime>,
    config: AgentConfig,
    agents: Arc<DashMap<String, Arc<Agent>>>,
    running_agents: Arc<DashMap<String, JoinHandle<()>>>,
    plans: DashMap<String, Arc<Plan>>,
    events: Arc<SinkRegistry<AgentEvent>>,
}

impl AgentScheduler {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let config = runtime.config().agent.clone().normalized();
        let events = Arc::new(SinkRegistry::new(config.event_capacity));
        Self {
            runtime,
            config,
            agents: Arc::new(DashMap::new()),
            running_agents: Arc::new(DashMap::new()),
            plans: DashMap::new(),
            events,
        }
    }

    /// A scheduler that scripts running on `runtime` can drive through the
    /// agent built-ins (`agentStartNamed`, `belief`, `runPlanOnceEx` and
    /// friends). The built-ins hold the scheduler weakly.
    pub fn scripted(mut runtime: Runtime) -> Arc<Self> {
        Arc::new_cyclic(|handle| {
            runtime.builtins_mut().register_agent_control(handle.clone());
            Self::new(Arc::new(runtime))
        })
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn contains(&self, name: &str) -> bool {
        self.agents.contains_key(name)
    }

    fn agent(&self, name: &str) -> AgentResult<Arc<Agent>> {
        self.agents
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AgentError::AgentNotFound(name.to_string()))
    }

    pub fn register(&self, spec: AgentSpec) -> AgentResult<()> {
        if self.agents.contains_key(&spec.name) {
            return Err(AgentError::AgentAlreadyExists(spec.name));
        }
        let max_concurrent = match spec.max_concurrent_plan_runs {
            0 => self.config.max_concurrent_plan_runs,
            n => n,
        };
        let poll_interval = if spec.poll_interval.is_zero() {
            self.config.poll_interval
        } else {
            spec.poll_interval
        };
        let agent = Arc::new(Agent {
            name: spec.name.clone(),
            plan: spec.plan,
            beliefs: RwLock::new(spec.beliefs),
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            poll_interval,
            in_flight: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            nudge: Notify::new(),
        });
        // エージェントの登録
        self.agents.insert(spec.name, agent);
        Ok(())
    }

    /// Starts the polling loop. Starting a running agent is a no-op.
    #[instrument(level = "debug", skip(self))]
    pub fn start(&self, name: &str) -> AgentResult<()> {
        let agent = self.agent(name)?;
        if self.running_agents.contains_key(name) {
            return Ok(());
        }

        let evaluator = self.runtime.evaluator();
        let events = self.events.clone();
        let looping = agent.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(looping.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = looping.nudge.notified() => {}
                }
                looping.try_schedule(&evaluator, &events);
            }
        });
        self.running_agents.insert(name.to_string(), handle);

        info!(agent = %name, plan = %agent.plan.name, "agent started");
        agent.emit(
            &self.events,
            AgentEventKind::Started,
            json!({ "plan": agent.plan.name, "pollSeconds": agent.poll_interval.as_secs_f64() }),
        );
        Ok(())
    }

    /// Cancels future scheduling. Runs already in flight finish on their own.
    #[instrument(level = "debug", skip(self))]
    pub fn stop(&self, name: &str) -> AgentResult<()> {
        let agent = self.agent(name)?;
        if let Some((_, handle)) = self.running_agents.remove(name) {
            handle.abort();
            info!(agent = %name, "agent stopped");
            agent.emit(
                &self.events,
                AgentEventKind::Stopped,
                json!({ "inFlight": agent.in_flight.load(Ordering::SeqCst) }),
            );
        }
        Ok(())
    }

    pub fn remove(&self, name: &str) -> AgentResult<()> {
        self.stop(name)?;
        self.agents
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AgentError::AgentNotFound(name.to_string()))
    }

    /// Visible to the next run, not to runs already in flight. Nudges the
    /// agent so it does not have to wait for the next poll tick.
    pub fn put_belief(&self, name: &str, key: &str, value: Value) -> AgentResult<()> {
        let agent = self.agent(name)?;
        let payload = json!({ "key": key, "value": value.to_json() });
        agent.beliefs.write().insert(key.to_string(), value);
        agent.emit(&self.events, AgentEventKind::BeliefSet, payload);
        agent.nudge.notify_one();
        Ok(())
    }

    /// Wakes the agent's loop without changing any belief.
    pub fn publish(&self, name: &str) -> AgentResult<()> {
        self.agent(name)?.nudge.notify_one();
        Ok(())
    }

    pub fn get_beliefs(&self, name: &str) -> AgentResult<HashMap<String, Value>> {
        Ok(self.agent(name)?.beliefs.read().clone())
    }

    pub fn get_belief(&self, name: &str, key: &str) -> AgentResult<Option<Value>> {
        Ok(self.agent(name)?.beliefs.read().get(key).cloned())
    }

    pub fn get_info(&self, name: &str) -> AgentResult<AgentInfo> {
        let agent = self.agent(name)?;
        let belief_count = agent.beliefs.read().len();
        Ok(AgentInfo {
            name: agent.name.clone(),
            plan: agent.plan.name.clone(),
            running: self.running_agents.contains_key(name),
            poll_seconds: agent.poll_interval.as_secs_f64(),
            belief_count,
            max_concurrent_plan_runs: agent.max_concurrent,
            in_flight: agent.in_flight.load(Ordering::SeqCst),
            completed_runs: agent.completed.load(Ordering::SeqCst),
        })
    }

    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.agents.iter().map(|entry| entry.key().clone()).collect();
        names.sort();
        names
    }

    pub fn subscribe(&self) -> Subscription<AgentEvent> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SinkId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Makes a plan available to `run_plan_once` by name.
    pub fn register_plan(&self, plan: Arc<Plan>) {
        self.plans.insert(plan.name.clone(), plan);
    }

    /// Runs a registered plan a single time, without scheduling anything.
    /// With `agent` set, the run starts from that agent's beliefs and its
    /// events carry the agent's name.
    #[instrument(level = "debug", skip(self, vars))]
    pub async fn run_plan_once(
        &self,
        plan: &str,
        vars: HashMap<String, Value>,
        agent: Option<&str>,
        mode: RunMode,
    ) -> AgentResult<PlanOutcome> {
        let plan = self
            .plans
            .get(plan)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| AgentError::PlanNotFound(plan.to_string()))?;
        self.run_plan(plan, vars, agent, mode).await
    }

    /// `run_plan_once` for a plan value that need not be registered.
    pub async fn run_plan(
        &self,
        plan: Arc<Plan>,
        vars: HashMap<String, Value>,
        agent: Option<&str>,
        mode: RunMode,
    ) -> AgentResult<PlanOutcome> {
        let (agent_name, beliefs) = match agent {
            Some(name) => (name.to_string(), self.get_beliefs(name)?),
            None => (UNBOUND_AGENT.to_string(), HashMap::new()),
        };

        let scope = plan.instance_scope(&beliefs, &vars);
        let events = self.events.clone();
        let emit = |kind: AgentEventKind, payload: serde_json::Value| {
            events.publish(AgentEvent::new(&agent_name, kind, payload));
        };
        let evaluator = self.runtime.evaluator();
        let outcome = AssertUnwindSafe(plan.run(&evaluator, &scope, mode, &emit))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(EvalError::EvaluationPanic(format!("plan {} panicked", plan.name))));
        if let Err(error) = &outcome {
            emit(
                AgentEventKind::Error,
                json!({ "plan": plan.name, "error": error.to_string() }),
            );
        }
        Ok(outcome?)
    }

    /// Stops every agent.
    pub fn shutdown(&self) {
        for name in self.list() {
            let _ = self.stop(&name);
        }
    }
}

impl Drop for AgentScheduler {
    fn drop(&mut self) {
        for entry in self.running_agents.iter() {
            entry.value().abort();
        }
    }
}
