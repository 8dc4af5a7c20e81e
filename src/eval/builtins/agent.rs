use std::{
    collections::HashMap,
    sync::{Arc, Weak},
    time::Duration,
};

use dashmap::DashMap;
use futures::FutureExt;
use uuid::Uuid;

use super::{BuiltinRegistry, expect_arity, string_arg};
use crate::{
    agent::{AgentError, AgentScheduler, AgentSpec, Plan, RunMode},
    eval::{EvalError, EvalResult},
    value::{FunctionValue, Value},
};

pub(super) fn register(registry: &mut BuiltinRegistry) {
    // plan(name, params, trigger, guard, steps, drop)
    registry.register_sync("plan", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 6)?;
        let name = string_arg(ctx.name, &args, 0)?;
        let parameters = match args.get(1) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .read()
                .iter()
                .map(|item| match item {
                    Value::Str(s) => Ok(s.clone()),
                    other => Err(EvalError::type_mismatch(ctx.name, "parameter name", other.type_name())),
                })
                .collect::<EvalResult<Vec<_>>>()?,
            Some(other) => {
                return Err(EvalError::type_mismatch(ctx.name, "array", other.type_name()));
            }
        };
        let steps = match args.get(4) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Function(step)) => vec![step.clone()],
            Some(Value::Array(items)) => items
                .read()
                .iter()
                .map(|item| function_part(ctx.name, Some(item)))
                .collect::<EvalResult<Vec<_>>>()?
                .into_iter()
                .flatten()
                .collect(),
            Some(other) => {
                return Err(EvalError::type_mismatch(ctx.name, "array of functions", other.type_name()));
            }
        };

        Ok(Value::Plan(Arc::new(Plan::new(
            name,
            parameters,
            function_part(ctx.name, args.get(2))?,
            function_part(ctx.name, args.get(3))?,
            steps,
            function_part(ctx.name, args.get(5))?,
            ctx.scope,
        ))))
    });
}

/// Settings from `agentNew` waiting for `agentRegister` to supply a plan.
#[derive(Debug, Clone, Copy)]
struct Draft {
    max_concurrent: usize,
    poll_interval: Duration,
}

/// Agent control and one-shot plan runs. Agents are addressed by name;
/// `agentNew` hands out a generated one.
pub(super) fn register_control(registry: &mut BuiltinRegistry, scheduler: Weak<AgentScheduler>) {
    let drafts: Arc<DashMap<String, Draft>> = Arc::new(DashMap::new());

    // agentNew([maxConcurrent], [pollSeconds]) -> agent name
    let pending = drafts.clone();
    registry.register_sync("agentNew", move |ctx, args| {
        expect_arity(ctx.name, &args, 0, 2)?;
        let name = format!("agent-{}", Uuid::new_v4().simple());
        pending.insert(
            name.clone(),
            Draft {
                max_concurrent: count_arg(&args, 0),
                poll_interval: seconds_arg(&args, 1),
            },
        );
        Ok(Value::Str(name))
    });

    // agentRegister(agent, plan)
    let (handle, pending) = (scheduler.clone(), drafts.clone());
    registry.register_sync("agentRegister", move |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let scheduler = upgrade(ctx.name, &handle)?;
        let name = string_arg(ctx.name, &args, 0)?;
        let plan = plan_arg(ctx.name, &args, 1)?;
        let (_, draft) = pending
            .remove(&name)
            .ok_or_else(|| control_error(ctx.name, AgentError::AgentNotFound(name.clone())))?;
        let spec = AgentSpec::new(name, plan)
            .with_max_concurrent_plan_runs(draft.max_concurrent)
            .with_poll_interval(draft.poll_interval);
        scheduler.register(spec).map_err(|e| control_error(ctx.name, e))?;
        Ok(Value::Bool(true))
    });

    let handle = scheduler.clone();
    registry.register_sync("agentStart", move |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        let scheduler = upgrade(ctx.name, &handle)?;
        let name = string_arg(ctx.name, &args, 0)?;
        scheduler.start(&name).map_err(|e| control_error(ctx.name, e))?;
        Ok(Value::Bool(true))
    });

    let handle = scheduler.clone();
    registry.register_sync("agentStop", move |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        let scheduler = upgrade(ctx.name, &handle)?;
        let name = string_arg(ctx.name, &args, 0)?;
        scheduler.stop(&name).map_err(|e| control_error(ctx.name, e))?;
        Ok(Value::Bool(true))
    });

    // agentStartNamed(name, plan[, maxConcurrent][, pollSeconds])
    // An existing agent keeps its plan and is only started.
    let handle = scheduler.clone();
    registry.register_sync("agentStartNamed", move |ctx, args| {
        expect_arity(ctx.name, &args, 2, 4)?;
        let scheduler = upgrade(ctx.name, &handle)?;
        let name = name_arg(ctx.name, &args, 0)?;
        let plan = plan_arg(ctx.name, &args, 1)?;
        if !scheduler.contains(&name) {
            let spec = AgentSpec::new(name.clone(), plan)
                .with_max_concurrent_plan_runs(count_arg(&args, 2))
                .with_poll_interval(seconds_arg(&args, 3));
            scheduler.register(spec).map_err(|e| control_error(ctx.name, e))?;
        }
        scheduler.start(&name).map_err(|e| control_error(ctx.name, e))?;
        Ok(Value::Bool(true))
    });

    // agentStopNamed(name) stops and forgets the agent; unknown names are fine
    let handle = scheduler.clone();
    registry.register_sync("agentStopNamed", move |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        let scheduler = upgrade(ctx.name, &handle)?;
        let name = name_arg(ctx.name, &args, 0)?;
        let _ = scheduler.remove(&name);
        Ok(Value::Bool(true))
    });

    let handle = scheduler.clone();
    registry.register_sync("agentList", move |ctx, args| {
        expect_arity(ctx.name, &args, 0, 0)?;
        let scheduler = upgrade(ctx.name, &handle)?;
        Ok(Value::array(scheduler.list().into_iter().map(Value::Str).collect()))
    });

    // agentPublish(name) -> false when there is no such agent
    let handle = scheduler.clone();
    registry.register_sync("agentPublish", move |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        let scheduler = upgrade(ctx.name, &handle)?;
        let name = name_arg(ctx.name, &args, 0)?;
        Ok(Value::Bool(scheduler.publish(&name).is_ok()))
    });

    // agentBelief(name, key, value) -> false when there is no such agent
    let handle = scheduler.clone();
    registry.register_sync("agentBelief", move |ctx, args| {
        expect_arity(ctx.name, &args, 3, 3)?;
        let scheduler = upgrade(ctx.name, &handle)?;
        let name = name_arg(ctx.name, &args, 0)?;
        let key = name_arg(ctx.name, &args, 1)?;
        Ok(Value::Bool(
            scheduler.put_belief(&name, &key, args[2].clone()).is_ok(),
        ))
    });

    // belief(name, key) -> value, or null
    let handle = scheduler.clone();
    registry.register_sync("belief", move |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let scheduler = upgrade(ctx.name, &handle)?;
        let name = name_arg(ctx.name, &args, 0)?;
        let key = name_arg(ctx.name, &args, 1)?;
        Ok(scheduler
            .get_belief(&name, &key)
            .ok()
            .flatten()
            .unwrap_or(Value::Null))
    });

    // runPlanOnce(plan): steps run unless drop holds; trigger and guard are skipped
    let handle = scheduler.clone();
    registry.register_async("runPlanOnce", move |args| {
        let handle = handle.clone();
        async move {
            let name = "runPlanOnce";
            expect_arity(name, &args, 1, 1)?;
            let scheduler = upgrade(name, &handle)?;
            let plan = plan_arg(name, &args, 0)?;
            scheduler
                .run_plan(plan, HashMap::new(), None, RunMode::Force)
                .await
                .map_err(|e| control_error(name, e))?;
            Ok(Value::Bool(true))
        }
        .boxed()
    });

    // runPlanOnceBDI(plan[, vars]) -> executed
    let handle = scheduler.clone();
    registry.register_async("runPlanOnceBDI", move |args| {
        let handle = handle.clone();
        async move {
            let name = "runPlanOnceBDI";
            expect_arity(name, &args, 1, 2)?;
            let scheduler = upgrade(name, &handle)?;
            let plan = plan_arg(name, &args, 0)?;
            let vars = vars_arg(args.get(1));
            let outcome = scheduler
                .run_plan(plan, vars, None, RunMode::Bdi)
                .await
                .map_err(|e| control_error(name, e))?;
            Ok(Value::Bool(outcome.executed))
        }
        .boxed()
    });

    // runPlanOnceEx(plan[, mode][, vars]) -> executed, or would execute for dry-run
    let handle = scheduler;
    registry.register_async("runPlanOnceEx", move |args| {
        let handle = handle.clone();
        async move {
            let name = "runPlanOnceEx";
            expect_arity(name, &args, 1, 3)?;
            let scheduler = upgrade(name, &handle)?;
            let plan = plan_arg(name, &args, 0)?;
            let (mode, vars) = match args.get(1) {
                Some(Value::Str(mode)) => (RunMode::lenient(mode), vars_arg(args.get(2))),
                other => (RunMode::Bdi, vars_arg(other)),
            };
            let outcome = scheduler
                .run_plan(plan, vars, None, mode)
                .await
                .map_err(|e| control_error(name, e))?;
            Ok(Value::Bool(outcome.executed))
        }
        .boxed()
    });
}

fn upgrade(name: &str, handle: &Weak<AgentScheduler>) -> EvalResult<Arc<AgentScheduler>> {
    handle
        .upgrade()
        .ok_or_else(|| EvalError::operation(name, "agent scheduler is gone"))
}

/// Step failures come back as the script error they were.
fn control_error(name: &str, error: AgentError) -> EvalError {
    match error {
        AgentError::Evaluation(error) => error,
        other => EvalError::operation(name, other.to_string()),
    }
}

fn plan_arg(name: &str, args: &[Value], index: usize) -> EvalResult<Arc<Plan>> {
    match &args[index] {
        Value::Plan(plan) => Ok(plan.clone()),
        other => Err(EvalError::type_mismatch(name, "plan", other.type_name())),
    }
}

fn name_arg(name: &str, args: &[Value], index: usize) -> EvalResult<String> {
    let value = string_arg(name, args, index)?;
    if value.is_empty() {
        return Err(EvalError::operation(name, "name must not be empty"));
    }
    Ok(value)
}

/// Zero (absent, negative or not a number) lets the scheduler's default apply.
fn count_arg(args: &[Value], index: usize) -> usize {
    match args.get(index).and_then(Value::as_number) {
        Some(n) if n >= 1.0 => n as usize,
        _ => 0,
    }
}

fn seconds_arg(args: &[Value], index: usize) -> Duration {
    match args.get(index).and_then(Value::as_number) {
        Some(n) if n > 0.0 => Duration::from_secs_f64(n),
        _ => Duration::ZERO,
    }
}

/// Anything but a map means no instance variables.
fn vars_arg(value: Option<&Value>) -> HashMap<String, Value> {
    match value {
        Some(Value::Map(entries)) => entries.read().clone(),
        _ => HashMap::new(),
    }
}

fn function_part(name: &str, value: Option<&Value>) -> EvalResult<Option<Arc<FunctionValue>>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Function(function)) => Ok(Some(function.clone())),
        Some(other) => Err(EvalError::type_mismatch(name, "function", other.type_name())),
    }
}
