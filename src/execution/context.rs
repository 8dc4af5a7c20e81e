use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

use super::log_buffer::{LogBuffer, LogStream};
use crate::{
    eval::{EvalError, EvalResult},
    value::Value,
};

/// One submitted program run.
///
/// `done` flips from false to true exactly once, under the same lock that
/// records the result, so readers never see a finished context without its
/// outcome. Waiters are released through a watch channel that only ever
/// transitions to `true`.
#[derive(Debug)]
pub struct ExecutionContext {
    id: String,
    owner_id: String,
    program: String,
    file: String,
    started_at: DateTime<Utc>,
    sequence: u64,
    completion: Mutex<Completion>,
    done_signal: watch::Sender<bool>,
    logs: Arc<LogBuffer>,
}

#[derive(Debug, Default)]
struct Completion {
    done: bool,
    completed_at: Option<DateTime<Utc>>,
    result: Option<Value>,
    error: Option<EvalError>,
}

/// Serializable snapshot of an execution for relaying to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub id: String,
    pub owner_id: String,
    pub file: String,
    pub done: bool,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl ExecutionContext {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        program: impl Into<String>,
        file: impl Into<String>,
        logs: Arc<LogBuffer>,
    ) -> Self {
        let (done_signal, _) = watch::channel(false);
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            program: program.into(),
            file: file.into(),
            started_at: Utc::now(),
            sequence: 0,
            completion: Mutex::new(Completion::default()),
            done_signal,
            logs,
        }
    }

    /// Creation order within a manager, for ordering contexts whose
    /// `started_at` ties.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn file(&self) -> &str {
        &self.file
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn logs(&self) -> &Arc<LogBuffer> {
        &self.logs
    }

    /// Records the outcome. Only the first call has any effect; it returns
    /// whether this call was the one that completed the context.
    pub fn mark_done(&self, outcome: EvalResult<Value>) -> bool {
        let mut completion = self.completion.lock();
        if completion.done {
            return false;
        }
        match outcome {
            Ok(value) => completion.result = Some(value),
            Err(error) => completion.error = Some(error),
        }
        completion.completed_at = Some(Utc::now());
        completion.done = true;
        self.done_signal.send_replace(true);
        true
    }

    pub fn is_done(&self) -> bool {
        self.completion.lock().done
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completion.lock().completed_at
    }

    pub fn result(&self) -> Option<Value> {
        self.completion.lock().result.clone()
    }

    pub fn error(&self) -> Option<EvalError> {
        self.completion.lock().error.clone()
    }

    /// Resolves once the execution has completed. Any number of tasks may
    /// wait at once.
    pub async fn wait(&self) {
        let mut receiver = self.done_signal.subscribe();
        // the sender lives as long as self, so this cannot fail
        let _ = receiver.wait_for(|done| *done).await;
    }

    pub fn get_result(&self) -> ExecutionReport {
        let completion = self.completion.lock();
        ExecutionReport {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            file: self.file.clone(),
            done: completion.done,
            started_at: self.started_at,
            completed_at: completion.completed_at,
            result: completion.result.as_ref().map(Value::to_json),
            error: completion.error.as_ref().map(ToString::to_string),
        }
    }

    pub fn stream_logs(&self) -> LogStream {
        self.logs.attach()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn context() -> Arc<ExecutionContext> {
        Arc::new(ExecutionContext::new(
            "exec-1",
            "owner",
            "1",
            "main.ch",
            Arc::new(LogBuffer::new(10, 10)),
        ))
    }

    #[tokio::test]
    async fn test_mark_done_once() {
        let ctx = context();
        assert!(ctx.mark_done(Ok(Value::Number(1.0))));
        let first = ctx.completed_at();

        assert!(!ctx.mark_done(Err(EvalError::UserScriptError("late".into()))));
        assert_eq!(ctx.result(), Some(Value::Number(1.0)));
        assert_eq!(ctx.error(), None);
        assert_eq!(ctx.completed_at(), first);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_completion_has_single_winner() {
        let ctx = context();
        let mut handles = Vec::new();
        for i in 0..16 {
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                ctx.mark_done(Ok(Value::Number(i as f64)))
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
        assert!(ctx.is_done());
    }

    #[tokio::test]
    async fn test_many_waiters_are_released() {
        let ctx = context();
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let ctx = ctx.clone();
                tokio::spawn(async move { ctx.wait().await })
            })
            .collect();

        ctx.mark_done(Ok(Value::Null));
        for waiter in waiters {
            waiter.await.unwrap();
        }
        // 完了後の wait は即座に戻る
        ctx.wait().await;
    }

    #[test]
    fn test_report_serializes() {
        let ctx = context();
        ctx.mark_done(Err(EvalError::UserScriptError("bad".into())));
        let json = serde_json::to_value(ctx.get_result()).unwrap();
        assert_eq!(json["done"], serde_json::json!(true));
        assert_eq!(json["error"], serde_json::json!("Script error: bad"));
        assert!(json["result"].is_null());
    }
}
