//! # Evaluator
//!
//! Interprets a parsed [`Program`](crate::ast::Program) against a
//! [`Scope`](crate::scope::Scope). Calls resolve in this order:
//!
//! 1. special forms (`declare`, `declareGlobal`, `setq`, `assign`, `isBound`,
//!    `unset`, `call`, `break`, `continue`, `return`), which see their first
//!    argument as a name rather than evaluating it;
//! 2. built-ins from the [`BuiltinRegistry`];
//! 3. user functions bound in scope.
//!
//! Every error names the failing operation and, once it crosses a statement
//! boundary, carries that statement's position.

mod builtins;
mod context;
mod error;
mod evaluator;

pub use builtins::{AsyncBuiltin, Builtin, BuiltinRegistry, SyncBuiltin};
pub use context::CallContext;
pub use error::{EvalError, EvalResult};
pub use evaluator::{ControlFlow, Evaluator, StatementResult};
