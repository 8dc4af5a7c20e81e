use std::sync::Arc;

use crate::{
    execution::{LogLevel, LogSink},
    scope::ScopeRef,
};

/// What a synchronous built-in can see of the call it is serving.
pub struct CallContext<'a> {
    pub name: &'a str,
    pub scope: &'a ScopeRef,
    log_sink: Option<&'a Arc<dyn LogSink>>,
}

impl<'a> CallContext<'a> {
    pub fn new(name: &'a str, scope: &'a ScopeRef, log_sink: Option<&'a Arc<dyn LogSink>>) -> Self {
        Self {
            name,
            scope,
            log_sink,
        }
    }

    /// Writes to the attached per-execution sink, or to `tracing` when the
    /// evaluator runs without one.
    pub fn log(&self, level: LogLevel, message: String) {
        match self.log_sink {
            Some(sink) => sink.log(level, message),
            None => match level {
                LogLevel::Debug => tracing::debug!(target: "chariot::script", "{}", message),
                LogLevel::Info => tracing::info!(target: "chariot::script", "{}", message),
                LogLevel::Warn => tracing::warn!(target: "chariot::script", "{}", message),
                LogLevel::Error => tracing::error!(target: "chariot::script", "{}", message),
            },
        }
    }
}
