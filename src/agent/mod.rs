//! # Agents
//!
//! Belief-driven agents. An agent owns a belief map and a bound [`Plan`]; its
//! polling loop launches a new plan run on every tick while fewer than
//! `max_concurrent_plan_runs` runs are in flight. Each run starts from a
//! snapshot of the beliefs taken when it is launched.
//!
//! ```text
//! put_belief ──▶ beliefs ─┐          ┌─▶ run 1 ─┐
//!                         ├─ tick ───┤          ├─▶ AgentEvent ──▶ sinks
//!               nudge ────┘          └─▶ run 2 ─┘
//! ```
//!
//! Plans are built by scripts with `plan(name, params, trigger, guard, steps,
//! drop)` and can also be run a single time through
//! [`AgentScheduler::run_plan_once`] in any [`RunMode`].

mod event;
mod plan;
mod scheduler;

use thiserror::Error;

use crate::eval::EvalError;

pub use event::{AgentEvent, AgentEventKind};
pub use plan::{Emit, Plan, PlanOutcome, RunMode};
pub use scheduler::{AgentInfo, AgentScheduler, AgentSpec};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AgentError {
    #[error("Agent not found: {0}")]
    AgentNotFound(String),
    #[error("Agent already exists: {0}")]
    AgentAlreadyExists(String),
    #[error("Plan not found: {0}")]
    PlanNotFound(String),
    #[error("Invalid plan run mode: {0}")]
    InvalidMode(String),
    #[error("Plan run failed: {0}")]
    Evaluation(#[from] EvalError),
}

pub type AgentResult<T> = Result<T, AgentError>;
