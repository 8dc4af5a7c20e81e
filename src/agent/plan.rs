use std::{collections::HashMap, fmt, str::FromStr, sync::Arc};

use serde::Serialize;
use serde_json::json;
use strum::{Display, EnumString};
use tracing::{debug, warn};

use super::{AgentError, AgentResult, event::AgentEventKind};
use crate::{
    eval::{EvalResult, Evaluator},
    scope::{Scope, ScopeRef},
    value::{FunctionValue, Value},
};

/// Receives the lifecycle notifications of one plan run.
pub type Emit<'a> = dyn Fn(AgentEventKind, serde_json::Value) + Send + Sync + 'a;

/// A BDI plan: optional trigger, guard and drop conditions around a sequence
/// of steps. Every part is a zero-argument closure.
///
/// Runs happen in an instance scope that is a child of the scope the plan was
/// built in, so steps see the definitions around `plan(...)`, and a binding
/// created by one step is visible to the following ones.
pub struct Plan {
    pub name: String,
    pub parameters: Vec<String>,
    pub trigger: Option<Arc<FunctionValue>>,
    pub guard: Option<Arc<FunctionValue>>,
    pub steps: Vec<Arc<FunctionValue>>,
    pub drop: Option<Arc<FunctionValue>>,
    home: ScopeRef,
    anchors: Vec<ScopeRef>,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum RunMode {
    /// Trigger and guard must hold; drop is honoured.
    #[default]
    Bdi,
    GuardOnly,
    Force,
    /// Like `Force`, and drop is ignored too.
    ForceAll,
    /// Reports whether a `Bdi` run would execute, without running steps.
    DryRun,
}

impl RunMode {
    /// Unknown or empty modes run as `Bdi`.
    pub fn lenient(mode: &str) -> Self {
        let mode = mode.trim();
        if mode.is_empty() {
            return RunMode::Bdi;
        }
        RunMode::from_str(mode).unwrap_or_else(|_| {
            warn!(mode, "unknown plan run mode, using bdi");
            RunMode::Bdi
        })
    }

    pub fn parse_strict(mode: &str) -> AgentResult<Self> {
        RunMode::from_str(mode.trim()).map_err(|_| AgentError::InvalidMode(mode.to_string()))
    }

    fn checks_trigger(self) -> bool {
        matches!(self, RunMode::Bdi | RunMode::DryRun)
    }

    fn checks_guard(self) -> bool {
        matches!(self, RunMode::Bdi | RunMode::GuardOnly | RunMode::DryRun)
    }

    fn respects_drop(self) -> bool {
        !matches!(self, RunMode::ForceAll)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlanOutcome {
    /// At least one step ran (or, for a dry run, would have).
    pub executed: bool,
    /// Value of the last step that ran.
    pub value: Value,
}

impl PlanOutcome {
    fn skipped() -> Self {
        Self {
            executed: false,
            value: Value::Null,
        }
    }
}

impl Plan {
    pub fn new(
        name: impl Into<String>,
        parameters: Vec<String>,
        trigger: Option<Arc<FunctionValue>>,
        guard: Option<Arc<FunctionValue>>,
        steps: Vec<Arc<FunctionValue>>,
        drop: Option<Arc<FunctionValue>>,
        home: &ScopeRef,
    ) -> Self {
        Self {
            name: name.into(),
            parameters,
            trigger,
            guard,
            steps,
            drop,
            home: home.clone(),
            anchors: home.ancestors(),
        }
    }

    pub fn home(&self) -> &ScopeRef {
        &self.home
    }

    /// A fresh scope for one run: beliefs first, then instance variables,
    /// which win on a name clash. Declared parameters that neither supplies
    /// are bound to null, so steps can test them with `isNull`.
    pub fn instance_scope(
        &self,
        beliefs: &HashMap<String, Value>,
        vars: &HashMap<String, Value>,
    ) -> ScopeRef {
        let scope = Scope::child(&self.home);
        for (name, value) in beliefs.iter().chain(vars) {
            scope.set_local(name, value.clone());
        }
        for parameter in &self.parameters {
            if !beliefs.contains_key(parameter) && !vars.contains_key(parameter) {
                scope.set_local(parameter, Value::Null);
            }
        }
        scope
    }

    /// One run of the plan in `scope`. Step failures abort the run and are
    /// returned; condition failures count as false and are only reported
    /// through `emit`.
    ///
    /// Once `PlanRunStarted` is emitted, `PlanRunFinished` follows on every
    /// path, carrying the error when a step failed.
    pub async fn run(
        &self,
        evaluator: &Evaluator,
        scope: &ScopeRef,
        mode: RunMode,
        emit: &Emit<'_>,
    ) -> EvalResult<PlanOutcome> {
        if mode.checks_trigger() && !self.holds("trigger", self.trigger.as_ref(), true, evaluator, scope, emit).await {
            debug!(plan = %self.name, "trigger not satisfied");
            return Ok(PlanOutcome::skipped());
        }
        if mode.checks_guard() && !self.holds("guard", self.guard.as_ref(), true, evaluator, scope, emit).await {
            debug!(plan = %self.name, "guard not satisfied");
            return Ok(PlanOutcome::skipped());
        }
        if mode == RunMode::DryRun {
            return Ok(PlanOutcome {
                executed: true,
                value: Value::Null,
            });
        }

        emit(
            AgentEventKind::PlanRunStarted,
            json!({ "plan": self.name, "mode": mode.to_string() }),
        );
        let mut outcome = PlanOutcome::skipped();
        let result = self.run_steps(evaluator, scope, mode, emit, &mut outcome).await;

        let mut payload = json!({ "plan": self.name, "executed": outcome.executed });
        match &result {
            Ok(dropped) => payload["dropped"] = json!(dropped),
            Err(error) => payload["error"] = json!(error.to_string()),
        }
        emit(AgentEventKind::PlanRunFinished, payload);
        result.map(|_| outcome)
    }

    /// Returns whether the drop condition ended the run early.
    async fn run_steps(
        &self,
        evaluator: &Evaluator,
        scope: &ScopeRef,
        mode: RunMode,
        emit: &Emit<'_>,
        outcome: &mut PlanOutcome,
    ) -> EvalResult<bool> {
        for (index, step) in self.steps.iter().enumerate() {
            if mode.respects_drop() && self.holds("drop", self.drop.as_ref(), false, evaluator, scope, emit).await {
                emit(
                    AgentEventKind::Dropped,
                    json!({ "plan": self.name, "step": index }),
                );
                return Ok(true);
            }

            emit(
                AgentEventKind::StepStarted,
                json!({ "plan": self.name, "step": index }),
            );
            let label = format!("{}[{}]", self.name, index);
            outcome.value = evaluator.run_body(&label, step, scope).await?;
            outcome.executed = true;
            emit(
                AgentEventKind::StepFinished,
                json!({ "plan": self.name, "step": index }),
            );
        }
        Ok(false)
    }

    /// Conditions run in a throwaway child of the instance scope.
    async fn holds(
        &self,
        part: &str,
        condition: Option<&Arc<FunctionValue>>,
        missing: bool,
        evaluator: &Evaluator,
        scope: &ScopeRef,
        emit: &Emit<'_>,
    ) -> bool {
        let Some(condition) = condition else {
            return missing;
        };
        let condition_scope = Scope::child(scope);
        match evaluator.run_body(part, condition, &condition_scope).await {
            Ok(value) => value.is_truthy(),
            Err(error) => {
                warn!(plan = %self.name, part, "plan condition failed: {}", error);
                emit(
                    AgentEventKind::Error,
                    json!({ "plan": self.name, "part": part, "error": error.to_string() }),
                );
                false
            }
        }
    }
}

impl fmt::Debug for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plan")
            .field("name", &self.name)
            .field("parameters", &self.parameters)
            .field("trigger", &self.trigger.is_some())
            .field("guard", &self.guard.is_some())
            .field("steps", &self.steps.len())
            .field("drop", &self.drop.is_some())
            .field("scope_chain", &(self.anchors.len() + 1))
            .finish()
    }
}
