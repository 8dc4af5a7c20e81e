use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum AgentEventKind {
    Started,
    BeliefSet,
    PlanRunStarted,
    PlanRunFinished,
    StepStarted,
    StepFinished,
    Dropped,
    Error,
    Stopped,
}

/// Lifecycle notification delivered to every registered sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub agent: String,
    pub kind: AgentEventKind,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl AgentEvent {
    pub fn new(agent: impl Into<String>, kind: AgentEventKind, payload: serde_json::Value) -> Self {
        Self {
            agent: agent.into(),
            kind,
            payload,
            timestamp: Utc::now(),
        }
    }
}
