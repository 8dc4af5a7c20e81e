//! # Executions
//!
//! Fire-and-forget program runs. [`ExecutionManager::create`] hands back an
//! id right away; the program runs on a tokio task and everything it logs is
//! kept in a bounded [`LogBuffer`] that clients can read back or follow live.
//!
//! ```text
//! create(owner, program) ──▶ id
//!        │
//!        └─ tokio task: parse → evaluate ─┬─▶ ExecutionContext::mark_done
//!                                          └─▶ LogBuffer ──▶ LogStream(s)
//! ```
//!
//! Finished executions are kept for the configured retention window and then
//! removed by the sweeper.

mod context;
mod log_buffer;
mod manager;

use thiserror::Error;

pub use context::{ExecutionContext, ExecutionReport};
pub use log_buffer::{LogBuffer, LogEntry, LogLevel, LogSink, LogStream};
pub use manager::ExecutionManager;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExecutionError {
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
}

pub type ExecutionResult<T> = Result<T, ExecutionError>;
