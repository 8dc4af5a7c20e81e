//! # Debugger
//!
//! A step debugger layered on the [`Evaluator`]. The evaluator calls
//! [`Debugger::checkpoint`] before every statement; everything else here is
//! driven by the session's controller from any other task.
//!
//! ```text
//!            breakpoint / pause request
//!  Running ─────────────────────────────▶ Paused ◀─────────────┐
//!     ▲                                    │  │                 │
//!     └──────────── continue ──────────────┘  └─ step over/into/out ─▶ Stepping
//!
//!  any state ── program finished or failed ──▶ Stopped
//! ```
//!
//! The paused evaluation awaits a [`watch`] channel holding the
//! [`DebugState`]; controllers resume it by moving the state away from
//! `Paused`. Debug events are fanned out through a [`SinkRegistry`], so a slow
//! observer loses events instead of stalling the program.

use std::{collections::BTreeMap, fmt, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use strum::Display;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::{
    ast::{Block, Position},
    eval::{EvalError, Evaluator},
    event::{SinkId, SinkRegistry, Subscription},
    parser,
    scope::ScopeRef,
    value::Value,
};

const CONDITION_FILE: &str = "<condition>";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DebugError {
    #[error("Invalid breakpoint request: {0}")]
    InvalidBreakpointRequest(String),
    #[error("Program is not paused")]
    NotPaused,
    #[error("Debug session has stopped")]
    Stopped,
}

pub type DebugResult<T> = Result<T, DebugError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StepMode {
    /// Next statement at the same call depth or shallower.
    Over,
    /// Next statement anywhere, including inside a call.
    Into,
    /// Next statement after the current call returns.
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "mode", rename_all = "lowercase")]
pub enum DebugState {
    Running,
    Paused,
    Stepping(StepMode),
    Stopped,
}

impl fmt::Display for DebugState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DebugState::Running => write!(f, "running"),
            DebugState::Paused => write!(f, "paused"),
            DebugState::Stepping(mode) => write!(f, "stepping ({})", mode),
            DebugState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    /// `file:line`
    pub id: String,
    pub file: String,
    pub line: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackFrame {
    pub function_name: String,
    /// Call site.
    pub file: String,
    pub line: usize,
    #[serde(skip)]
    pub scope: ScopeRef,
}

impl StackFrame {
    /// Bindings local to the frame's call scope.
    pub fn variables(&self) -> BTreeMap<String, Value> {
        self.scope.snapshot().into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum DebugEventKind {
    BreakpointHit,
    Stepped,
    Stopped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugEvent {
    #[serde(rename = "type")]
    pub kind: DebugEventKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub call_stack: Vec<StackFrame>,
    pub timestamp: DateTime<Utc>,
}

struct BreakpointEntry {
    breakpoint: Breakpoint,
    condition: Option<Arc<Block>>,
}

#[derive(Default)]
struct Session {
    breakpoints: BTreeMap<(String, usize), BreakpointEntry>,
    call_stack: Vec<StackFrame>,
    current: Option<Position>,
    last_checked: Option<Position>,
    paused_scope: Option<ScopeRef>,
    step: Option<(StepMode, usize)>,
    pause_requested: bool,
}

/// What a checkpoint decided while holding the session lock.
struct Pending {
    breakpoint: Option<Option<Arc<Block>>>,
    stepped: bool,
    requested: bool,
}

pub struct Debugger {
    session: Mutex<Session>,
    state: watch::Sender<DebugState>,
    events: SinkRegistry<DebugEvent>,
}

impl Default for Debugger {
    fn default() -> Self {
        Self::new(100)
    }
}

impl fmt::Debug for Debugger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Debugger")
            .field("state", &self.get_state())
            .field("subscribers", &self.events.len())
            .finish()
    }
}

impl Debugger {
    /// `event_capacity` bounds each event subscriber's channel.
    pub fn new(event_capacity: usize) -> Self {
        let (state, _) = watch::channel(DebugState::Running);
        Self {
            session: Mutex::new(Session::default()),
            state,
            events: SinkRegistry::new(event_capacity),
        }
    }

    pub fn set_breakpoint(
        &self,
        file: &str,
        line: usize,
        condition: Option<&str>,
    ) -> DebugResult<Breakpoint> {
        if file.trim().is_empty() {
            return Err(DebugError::InvalidBreakpointRequest(
                "file must not be empty".to_string(),
            ));
        }
        if line == 0 {
            return Err(DebugError::InvalidBreakpointRequest(
                "lines start at 1".to_string(),
            ));
        }

        let text = condition.map(str::trim).filter(|text| !text.is_empty());
        let parsed = match text {
            Some(text) => {
                let program = parser::parse_program(text, CONDITION_FILE).map_err(|e| {
                    DebugError::InvalidBreakpointRequest(format!("condition {:?}: {}", text, e))
                })?;
                (!program.body.is_empty()).then_some(program.body)
            }
            None => None,
        };

        let breakpoint = Breakpoint {
            id: format!("{}:{}", file, line),
            file: file.to_string(),
            line,
            condition: parsed.as_ref().and(text).map(str::to_string),
            enabled: true,
        };
        self.session.lock().breakpoints.insert(
            (file.to_string(), line),
            BreakpointEntry {
                breakpoint: breakpoint.clone(),
                condition: parsed,
            },
        );
        debug!(breakpoint = %breakpoint.id, "breakpoint set");
        Ok(breakpoint)
    }

    pub fn remove_breakpoint(&self, file: &str, line: usize) -> bool {
        self.session
            .lock()
            .breakpoints
            .remove(&(file.to_string(), line))
            .is_some()
    }

    pub fn enable_breakpoint(&self, file: &str, line: usize, enabled: bool) -> bool {
        match self.session.lock().breakpoints.get_mut(&(file.to_string(), line)) {
            Some(entry) => {
                entry.breakpoint.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Ordered by file, then line.
    pub fn get_breakpoints(&self) -> Vec<Breakpoint> {
        self.session
            .lock()
            .breakpoints
            .values()
            .map(|entry| entry.breakpoint.clone())
            .collect()
    }

    pub fn step_over(&self) -> DebugResult<()> {
        self.step(StepMode::Over)
    }

    pub fn step_into(&self) -> DebugResult<()> {
        self.step(StepMode::Into)
    }

    pub fn step_out(&self) -> DebugResult<()> {
        self.step(StepMode::Out)
    }

    fn step(&self, mode: StepMode) -> DebugResult<()> {
        let mut session = self.session.lock();
        match self.get_state() {
            DebugState::Paused => {}
            DebugState::Stopped => return Err(DebugError::Stopped),
            _ => return Err(DebugError::NotPaused),
        }
        session.step = Some((mode, session.call_stack.len()));
        self.state.send_replace(DebugState::Stepping(mode));
        Ok(())
    }

    /// Resumes a paused program, or cancels a step in progress.
    pub fn continue_execution(&self) -> DebugResult<()> {
        let mut session = self.session.lock();
        if self.get_state() == DebugState::Stopped {
            return Err(DebugError::Stopped);
        }
        session.step = None;
        session.pause_requested = false;
        self.state.send_replace(DebugState::Running);
        Ok(())
    }

    /// Asks the program to pause at the next statement boundary.
    pub fn pause(&self) -> DebugResult<()> {
        let mut session = self.session.lock();
        match self.get_state() {
            DebugState::Stopped => Err(DebugError::Stopped),
            DebugState::Paused => Ok(()),
            _ => {
                session.pause_requested = true;
                Ok(())
            }
        }
    }

    pub fn get_state(&self) -> DebugState {
        *self.state.borrow()
    }

    /// Outermost call first.
    pub fn get_call_stack(&self) -> Vec<StackFrame> {
        self.session.lock().call_stack.clone()
    }

    /// The statement the program is paused at, or last crossed.
    pub fn get_current_position(&self) -> Option<Position> {
        self.session.lock().current.clone()
    }

    /// Local bindings of the scope the program last paused in.
    pub fn get_variables(&self) -> BTreeMap<String, Value> {
        self.session
            .lock()
            .paused_scope
            .as_ref()
            .map(|scope| scope.snapshot().into_iter().collect())
            .unwrap_or_default()
    }

    pub fn subscribe(&self) -> Subscription<DebugEvent> {
        self.events.subscribe()
    }

    pub fn unsubscribe(&self, id: SinkId) -> bool {
        self.events.unsubscribe(id)
    }

    /// Resolves with `Paused` or `Stopped`, whichever the session reaches
    /// first.
    pub async fn wait_until_paused(&self) -> DebugState {
        let mut receiver = self.state.subscribe();
        receiver
            .wait_for(|state| matches!(state, DebugState::Paused | DebugState::Stopped))
            .await
            .map(|state| *state)
            .unwrap_or(DebugState::Stopped)
    }

    /// Statement-boundary hook. Returns once the program may run the
    /// statement at `position`.
    pub async fn checkpoint(&self, evaluator: &Evaluator, position: &Position, scope: &ScopeRef) {
        let pending = {
            let mut session = self.session.lock();
            if self.get_state() == DebugState::Stopped {
                return;
            }
            // 同じ行の後続の文では止まらない
            let continues_line = session.last_checked.as_ref().is_some_and(|previous| {
                previous.file == position.file
                    && previous.line == position.line
                    && position.column > previous.column
            });
            session.last_checked = Some(position.clone());
            session.current = Some(position.clone());
            if continues_line && !session.pause_requested {
                return;
            }

            let depth = session.call_stack.len();
            let breakpoint = session
                .breakpoints
                .get(&(position.file.clone(), position.line))
                .filter(|entry| entry.breakpoint.enabled)
                .map(|entry| entry.condition.clone());
            let stepped = match session.step {
                Some((StepMode::Over, from)) => depth <= from,
                Some((StepMode::Into, _)) => true,
                Some((StepMode::Out, from)) => depth < from,
                None => false,
            };
            Pending {
                breakpoint,
                stepped,
                requested: session.pause_requested,
            }
        };

        let hit = match pending.breakpoint {
            Some(None) => true,
            Some(Some(condition)) => self.condition_holds(evaluator, &condition, position, scope).await,
            None => false,
        };
        let kind = if hit {
            DebugEventKind::BreakpointHit
        } else if pending.stepped || pending.requested {
            DebugEventKind::Stepped
        } else {
            return;
        };
        self.pause_at(kind, position, scope).await;
    }

    /// Conditions run with no debugger attached, so they cannot pause.
    async fn condition_holds(
        &self,
        evaluator: &Evaluator,
        condition: &Block,
        position: &Position,
        scope: &ScopeRef,
    ) -> bool {
        match evaluator.detached().eval_block(condition, scope).await {
            Ok(result) => result.into_value().is_truthy(),
            Err(error) => {
                warn!(%position, "breakpoint condition failed: {}", error);
                self.publish(
                    DebugEventKind::Error,
                    format!("breakpoint condition failed: {}", error),
                    Some(position.clone()),
                    Vec::new(),
                );
                false
            }
        }
    }

    #[instrument(level = "debug", skip(self, scope))]
    async fn pause_at(&self, kind: DebugEventKind, position: &Position, scope: &ScopeRef) {
        let mut receiver = {
            let mut session = self.session.lock();
            if self.get_state() == DebugState::Stopped {
                return;
            }
            session.step = None;
            session.pause_requested = false;
            session.paused_scope = Some(scope.clone());
            let receiver = self.state.subscribe();
            self.state.send_replace(DebugState::Paused);
            let message = match kind {
                DebugEventKind::BreakpointHit => format!("breakpoint hit at {}", position),
                _ => format!("paused at {}", position),
            };
            self.publish(kind, message, Some(position.clone()), session.call_stack.clone());
            receiver
        };
        // watch の送信側は self が持つので閉じることはない
        let _ = receiver
            .wait_for(|state| *state != DebugState::Paused)
            .await;
        debug!(%position, state = %self.get_state(), "resumed");
    }

    pub fn enter_call(&self, name: &str, scope: &ScopeRef) {
        let mut session = self.session.lock();
        let (file, line) = session
            .current
            .as_ref()
            .map(|position| (position.file.clone(), position.line))
            .unwrap_or_default();
        session.call_stack.push(StackFrame {
            function_name: name.to_string(),
            file,
            line,
            scope: scope.clone(),
        });
    }

    pub fn exit_call(&self) {
        self.session.lock().call_stack.pop();
    }

    /// Terminal transition. Publishes the failure (if any) and `Stopped`,
    /// then closes every event subscription.
    pub fn mark_stopped(&self, error: Option<&EvalError>) {
        {
            let mut session = self.session.lock();
            if self.get_state() == DebugState::Stopped {
                return;
            }
            if let Some(error) = error {
                self.publish(
                    DebugEventKind::Error,
                    error.to_string(),
                    error.position().cloned(),
                    session.call_stack.clone(),
                );
            }
            session.step = None;
            session.pause_requested = false;
            session.call_stack.clear();
            self.state.send_replace(DebugState::Stopped);
            let message = match error {
                Some(_) => "program failed".to_string(),
                None => "program finished".to_string(),
            };
            self.publish(DebugEventKind::Stopped, message, session.current.clone(), Vec::new());
        }
        self.events.close_all();
        debug!("debug session stopped");
    }

    fn publish(
        &self,
        kind: DebugEventKind,
        message: String,
        position: Option<Position>,
        call_stack: Vec<StackFrame>,
    ) {
        self.events.publish(DebugEvent {
            kind,
            message,
            position,
            call_stack,
            timestamp: Utc::now(),
        });
    }
}
