use thiserror::Error;

use crate::{
    ast::Position,
    parser::ParseError,
    scope::ScopeError,
    value::{TreeError, formats::FormatError},
};

pub type EvalResult<T> = Result<T, EvalError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Unbound identifier: {0}")]
    UnboundIdentifier(String),
    #[error("Arity mismatch in {function}: expected {expected} arguments, got {actual}")]
    ArityMismatch {
        function: String,
        expected: String,
        actual: usize,
    },
    #[error("Type mismatch in {function}: expected {expected}, got {actual}")]
    TypeMismatch {
        function: String,
        expected: String,
        actual: String,
    },
    #[error("Variable already declared: {0}")]
    AlreadyDeclared(String),
    /// Raised by the script itself through `raise(...)`.
    #[error("Script error: {0}")]
    UserScriptError(String),
    #[error("Call depth limit of {0} exceeded")]
    CallDepthExceeded(usize),
    #[error("Evaluation panic: {0}")]
    EvaluationPanic(String),
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("{operation} failed: {message}")]
    Operation { operation: String, message: String },
    #[error("{source} (at {position})")]
    Located {
        position: Position,
        source: Box<EvalError>,
    },
}

impl EvalError {
    pub fn operation(operation: impl Into<String>, message: impl Into<String>) -> Self {
        EvalError::Operation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn type_mismatch(
        function: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        EvalError::TypeMismatch {
            function: function.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Attaches a source position unless one is already present. The
    /// innermost statement wins.
    pub fn at(self, position: &Position) -> Self {
        match self {
            located @ EvalError::Located { .. } => located,
            other => EvalError::Located {
                position: position.clone(),
                source: Box::new(other),
            },
        }
    }

    /// The error with any position wrapper removed.
    pub fn root(&self) -> &EvalError {
        match self {
            EvalError::Located { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            EvalError::Located { position, .. } => Some(position),
            _ => None,
        }
    }
}

impl From<ScopeError> for EvalError {
    fn from(error: ScopeError) -> Self {
        match error {
            ScopeError::UnboundIdentifier(name) => EvalError::UnboundIdentifier(name),
            ScopeError::AlreadyDeclared(name) => EvalError::AlreadyDeclared(name),
            ScopeError::TypeMismatch {
                name,
                expected,
                actual,
            } => EvalError::TypeMismatch {
                function: name,
                expected,
                actual,
            },
        }
    }
}

impl From<TreeError> for EvalError {
    fn from(error: TreeError) -> Self {
        EvalError::operation("tree", error.to_string())
    }
}

impl From<FormatError> for EvalError {
    fn from(error: FormatError) -> Self {
        EvalError::operation("format", error.to_string())
    }
}
