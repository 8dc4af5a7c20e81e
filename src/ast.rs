//! # Chariot AST
//!
//! The parsed form of a Chariot program. The language is call-oriented: apart
//! from the control structures (`if`, `while`, `switch`) and function
//! literals (`func`), every construct is a call `name(args...)`.
//!
//! Statements carry a [`Position`]; the evaluator reports errors against it and
//! the debugger matches breakpoints on its `(file, line)` pair.

use std::{fmt, sync::Arc};

use serde::{Deserialize, Serialize};

pub const DEFAULT_FILE: &str = "main.ch";

/// A location in Chariot source, 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A whole program: the top-level block of one source file.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub file: String,
    pub body: Arc<Block>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
}

impl Block {
    pub fn new(statements: Vec<Statement>) -> Self {
        Self { statements }
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub expression: Expression,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Literal),
    Identifier(String),
    Array(Vec<Expression>),
    Call {
        name: String,
        arguments: Vec<Expression>,
    },
    /// A `{ ... }` written directly after a call's argument list. Evaluates to
    /// a parameterless closure over the current scope.
    Block(Arc<Block>),
    If {
        condition: Box<Expression>,
        then_branch: Arc<Block>,
        /// Either another `If` (for `else if`) or a `Block`.
        else_branch: Option<Box<Expression>>,
    },
    While {
        condition: Box<Expression>,
        body: Arc<Block>,
    },
    Switch {
        subject: Option<Box<Expression>>,
        cases: Vec<SwitchCase>,
        default: Option<Arc<Block>>,
    },
    Function {
        parameters: Vec<String>,
        body: Arc<Block>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub condition: Expression,
    pub body: Arc<Block>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Boolean(bool),
    Number(f64),
    Str(String),
}

impl Expression {
    pub fn call(name: impl Into<String>, arguments: Vec<Expression>) -> Self {
        Expression::Call {
            name: name.into(),
            arguments,
        }
    }

    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Expression::Identifier(name) => Some(name),
            _ => None,
        }
    }
}
