//! # Built-in Functions
//!
//! Built-ins are resolved by name before any user-defined function. Most are
//! synchronous and receive a [`CallContext`]; the few that need to wait (for
//! example `sleep`) are registered as async and return a boxed future.
//!
//! ```
//! use chariot::eval::{BuiltinRegistry, EvalResult};
//! use chariot::value::Value;
//!
//! let mut registry = BuiltinRegistry::standard();
//! registry.register_sync("double", |_ctx, args| -> EvalResult<Value> {
//!     let n = args.first().and_then(Value::as_number).unwrap_or(0.0);
//!     Ok(Value::Number(n * 2.0))
//! });
//! assert!(registry.contains("double"));
//! assert!(registry.contains("logPrint"));
//! ```

mod agent;
mod arith;
mod collections;
mod system;
mod tree;
mod values;

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use futures::future::BoxFuture;

use super::{CallContext, EvalError, EvalResult};
use crate::{
    agent::AgentScheduler,
    value::{ArrayRef, MapRef, TreeNode, Value},
};

pub type SyncBuiltin = Arc<dyn Fn(&CallContext<'_>, Vec<Value>) -> EvalResult<Value> + Send + Sync>;
pub type AsyncBuiltin = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, EvalResult<Value>> + Send + Sync>;

#[derive(Clone)]
pub enum Builtin {
    Sync(SyncBuiltin),
    Async(AsyncBuiltin),
}

#[derive(Clone, Default)]
pub struct BuiltinRegistry {
    functions: HashMap<String, Builtin>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the standard catalogue.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        values::register(&mut registry);
        arith::register(&mut registry);
        collections::register(&mut registry);
        tree::register(&mut registry);
        system::register(&mut registry);
        agent::register(&mut registry);
        registry
    }

    pub fn register_sync<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&CallContext<'_>, Vec<Value>) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.to_string(), Builtin::Sync(Arc::new(function)));
    }

    pub fn register_async<F>(&mut self, name: &str, function: F)
    where
        F: Fn(Vec<Value>) -> BoxFuture<'static, EvalResult<Value>> + Send + Sync + 'static,
    {
        self.functions
            .insert(name.to_string(), Builtin::Async(Arc::new(function)));
    }

    /// Adds the built-ins that drive `scheduler` from scripts. See
    /// [`AgentScheduler::scripted`](crate::agent::AgentScheduler::scripted).
    pub fn register_agent_control(&mut self, scheduler: Weak<AgentScheduler>) {
        agent::register_control(self, scheduler);
    }

    pub fn get(&self, name: &str) -> Option<&Builtin> {
        self.functions.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.functions.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

// ---------------------------------------------------------------------------
// argument helpers shared by the catalogue
// ---------------------------------------------------------------------------

pub(crate) fn expect_arity(name: &str, args: &[Value], min: usize, max: usize) -> EvalResult<()> {
    if args.len() < min || args.len() > max {
        let expected = match (min, max) {
            (min, max) if min == max => min.to_string(),
            (min, usize::MAX) => format!("at least {}", min),
            (min, max) => format!("{} to {}", min, max),
        };
        return Err(EvalError::ArityMismatch {
            function: name.to_string(),
            expected,
            actual: args.len(),
        });
    }
    Ok(())
}

fn mismatch(name: &str, expected: &str, value: &Value) -> EvalError {
    EvalError::type_mismatch(name, expected, value.type_name())
}

pub(crate) fn number_arg(name: &str, args: &[Value], index: usize) -> EvalResult<f64> {
    match &args[index] {
        Value::Number(n) => Ok(*n),
        other => Err(mismatch(name, "number", other)),
    }
}

pub(crate) fn index_arg(name: &str, args: &[Value], index: usize) -> EvalResult<usize> {
    let n = number_arg(name, args, index)?;
    if n < 0.0 || n.fract() != 0.0 {
        return Err(EvalError::operation(
            name,
            format!("invalid index {}", n),
        ));
    }
    Ok(n as usize)
}

pub(crate) fn string_arg(name: &str, args: &[Value], index: usize) -> EvalResult<String> {
    match &args[index] {
        Value::Str(s) => Ok(s.clone()),
        other => Err(mismatch(name, "string", other)),
    }
}

pub(crate) fn tree_arg(name: &str, args: &[Value], index: usize) -> EvalResult<TreeNode> {
    match &args[index] {
        Value::Tree(node) => Ok(node.clone()),
        other => Err(mismatch(name, "tree", other)),
    }
}

pub(crate) fn array_arg(name: &str, args: &[Value], index: usize) -> EvalResult<ArrayRef> {
    match &args[index] {
        Value::Array(items) => Ok(items.clone()),
        other => Err(mismatch(name, "array", other)),
    }
}

pub(crate) fn map_arg(name: &str, args: &[Value], index: usize) -> EvalResult<MapRef> {
    match &args[index] {
        Value::Map(entries) => Ok(entries.clone()),
        other => Err(mismatch(name, "map", other)),
    }
}

/// Optional trailing boolean; absent or null means `default`.
pub(crate) fn flag_arg(args: &[Value], index: usize, default: bool) -> bool {
    match args.get(index) {
        None | Some(Value::Null) => default,
        Some(value) => value.is_truthy(),
    }
}
