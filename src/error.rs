use thiserror::Error;

use crate::agent::AgentError;
use crate::debugger::DebugError;
use crate::eval::EvalError;
use crate::execution::ExecutionError;
use crate::parser::ParseError;
use crate::serializer::SerializationError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    // eval error
    #[error("Eval error: {0}")]
    Eval(#[from] EvalError),
    #[error("Debug error: {0}")]
    Debug(#[from] DebugError),
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

// エラー作成用のヘルパー関数
impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
