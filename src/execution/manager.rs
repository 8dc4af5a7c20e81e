use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    ExecutionError, ExecutionResult,
    context::ExecutionContext,
    log_buffer::LogBuffer,
};
use crate::{
    config::ExecutionConfig,
    debugger::Debugger,
    eval::EvalError,
    runtime::Runtime,
};

type ContextMap = DashMap<String, Arc<ExecutionContext>>;

/// Owns every in-flight and recently finished execution.
///
/// `create` returns immediately; the program runs on its own tokio task with
/// the execution's [`LogBuffer`] as its log sink. A panic inside the task is
/// caught at the task boundary and recorded as an
/// [`EvalError::EvaluationPanic`].
pub struct ExecutionManager {
    runtime: Arc<Runtime>,
    contexts: Arc<ContextMap>,
    config: ExecutionConfig,
    sweeper: Mutex<Option<JoinHandle<()>>>,
    next_sequence: AtomicU64,
}

impl ExecutionManager {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        let config = runtime.config().execution.clone();
        Self {
            runtime,
            contexts: Arc::new(DashMap::new()),
            config,
            sweeper: Mutex::new(None),
            next_sequence: AtomicU64::new(0),
        }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    /// Starts `program` under the default file name and returns its id.
    /// Must be called from within a tokio runtime.
    pub fn create(&self, owner_id: &str, program: &str) -> String {
        let file = self.config.default_file.clone();
        self.create_with_file(owner_id, program, &file)
    }

    pub fn create_with_file(&self, owner_id: &str, program: &str, file: &str) -> String {
        self.spawn(owner_id, program, file, None)
    }

    /// Like `create`, with a fresh debugger attached to the run. On a
    /// multi-threaded runtime the program may pass a line before a
    /// breakpoint set afterwards exists; use `create_with_debugger` to
    /// arm breakpoints first.
    pub fn create_debug_session(&self, owner_id: &str, program: &str, file: &str) -> (String, Arc<Debugger>) {
        let debugger = Arc::new(Debugger::new(self.runtime.config().debugger.event_capacity));
        let id = self.create_with_debugger(owner_id, program, file, debugger.clone());
        (id, debugger)
    }

    pub fn create_with_debugger(
        &self,
        owner_id: &str,
        program: &str,
        file: &str,
        debugger: Arc<Debugger>,
    ) -> String {
        self.spawn(owner_id, program, file, Some(debugger))
    }

    #[instrument(level = "debug", skip(self, program, debugger))]
    fn spawn(&self, owner_id: &str, program: &str, file: &str, debugger: Option<Arc<Debugger>>) -> String {
        let id = Uuid::new_v4().to_string();
        let logs = Arc::new(LogBuffer::new(
            self.config.log_capacity,
            self.config.subscriber_capacity,
        ));
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst);
        let context = Arc::new(
            ExecutionContext::new(id.clone(), owner_id, program, file, logs.clone())
                .with_sequence(sequence),
        );
        self.contexts.insert(id.clone(), context.clone());

        let runtime = self.runtime.clone();
        tokio::spawn(async move {
            info!(execution = %context.id(), owner = %context.owner_id(), "execution started");
            let mut evaluator = runtime.evaluator().with_log_sink(logs);
            if let Some(debugger) = debugger.clone() {
                evaluator = evaluator.with_debugger(debugger);
            }
            let run = runtime.run_with(&evaluator, context.program(), context.file());
            let outcome = match AssertUnwindSafe(run).catch_unwind().await {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(execution = %context.id(), "evaluation panicked: {}", message);
                    let error = EvalError::EvaluationPanic(message);
                    if let Some(debugger) = &debugger {
                        debugger.mark_stopped(Some(&error));
                    }
                    Err(error)
                }
            };
            let ok = outcome.is_ok();
            context.mark_done(outcome);
            info!(execution = %context.id(), ok, "execution finished");
        });
        id
    }

    pub fn get(&self, id: &str) -> ExecutionResult<Arc<ExecutionContext>> {
        self.contexts
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ExecutionError::ExecutionNotFound(id.to_string()))
    }

    /// Forgets the execution. A still-running program keeps running; only
    /// its handle is gone.
    pub fn remove(&self, id: &str) -> ExecutionResult<Arc<ExecutionContext>> {
        self.contexts
            .remove(id)
            .map(|(_, context)| context)
            .ok_or_else(|| ExecutionError::ExecutionNotFound(id.to_string()))
    }

    pub fn list_for_owner(&self, owner_id: &str) -> Vec<Arc<ExecutionContext>> {
        let mut contexts: Vec<_> = self
            .contexts
            .iter()
            .filter(|entry| entry.value().owner_id() == owner_id)
            .map(|entry| entry.value().clone())
            .collect();
        contexts.sort_by_key(|context| (context.started_at(), context.sequence()));
        contexts
    }

    pub fn len(&self) -> usize {
        self.contexts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contexts.is_empty()
    }

    /// Drops finished executions whose completion is older than the
    /// retention window. Returns how many were removed.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        sweep(&self.contexts, now, self.config.retention)
    }

    /// Runs `sweep_expired` every `sweep_interval` until `shutdown` or drop.
    pub fn start_sweeper(&self) {
        let mut slot = self.sweeper.lock();
        if slot.is_some() {
            return;
        }
        let contexts = self.contexts.clone();
        let interval = self.config.sweep_interval;
        let retention = self.config.retention;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 最初の tick は即座に完了する
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = sweep(&contexts, Utc::now(), retention);
                if removed > 0 {
                    debug!(removed, "swept finished executions");
                }
            }
        }));
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }
}

impl Drop for ExecutionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sweep(contexts: &ContextMap, now: DateTime<Utc>, retention: std::time::Duration) -> usize {
    let retention = TimeDelta::from_std(retention).unwrap_or(TimeDelta::MAX);
    let before = contexts.len();
    contexts.retain(|_, context| {
        match (context.is_done(), context.completed_at()) {
            (true, Some(completed_at)) => now - completed_at <= retention,
            _ => true,
        }
    });
    before.saturating_sub(contexts.len())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
