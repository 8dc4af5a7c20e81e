//! # Runtime
//!
//! A [`Runtime`] bundles what every evaluation of a program shares: the
//! built-in registry, the bootstrap scope at the root of every program's scope
//! chain, and the configuration. Execution managers, debuggers and agent
//! schedulers are all built on top of one.
//!
//! Each run gets a fresh program scope as a child of the bootstrap scope, so
//! top-level `declare`s of one run never leak into another. `declareGlobal`
//! writes to the bootstrap scope itself and is visible to later runs on the
//! same runtime.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    ast::Program,
    config::RuntimeConfig,
    eval::{BuiltinRegistry, CallContext, EvalResult, Evaluator},
    parser,
    scope::{Scope, ScopeRef},
    value::Value,
};

pub struct Runtime {
    builtins: Arc<BuiltinRegistry>,
    bootstrap: ScopeRef,
    config: RuntimeConfig,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Self::with_builtins(config, BuiltinRegistry::standard())
    }

    pub fn with_builtins(config: RuntimeConfig, builtins: BuiltinRegistry) -> Self {
        let bootstrap = Scope::new_root();
        bootstrap.set_local("chariotVersion", Value::str(env!("CARGO_PKG_VERSION")));
        Self {
            builtins: Arc::new(builtins),
            bootstrap,
            config,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn builtins(&self) -> &Arc<BuiltinRegistry> {
        &self.builtins
    }

    /// Mutable access to the registry, copying it first if an evaluator
    /// still shares it.
    pub fn builtins_mut(&mut self) -> &mut BuiltinRegistry {
        Arc::make_mut(&mut self.builtins)
    }

    pub fn bootstrap(&self) -> &ScopeRef {
        &self.bootstrap
    }

    /// Adds a host function. Evaluators created before the call keep the
    /// registry they were created with.
    pub fn register_sync<F>(&mut self, name: &str, function: F)
    where
        F: Fn(&CallContext<'_>, Vec<Value>) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.builtins_mut().register_sync(name, function);
    }

    pub fn parse(&self, source: &str, file: &str) -> EvalResult<Program> {
        Ok(parser::parse_program(source, file)?)
    }

    pub fn evaluator(&self) -> Evaluator {
        Evaluator::new(self.builtins.clone())
            .with_max_call_depth(self.config.execution.max_call_depth)
    }

    /// A fresh scope for one program run.
    pub fn program_scope(&self) -> ScopeRef {
        Scope::child(&self.bootstrap)
    }

    /// Parses and runs `source` as the configured default file.
    pub async fn run(&self, source: &str) -> EvalResult<Value> {
        let file = self.config.execution.default_file.clone();
        self.run_with(&self.evaluator(), source, &file).await
    }

    /// Parses and runs `source` with `evaluator`. An attached debugger
    /// always ends up `Stopped`, also when the source does not parse.
    #[instrument(level = "debug", skip(self, evaluator, source))]
    pub async fn run_with(&self, evaluator: &Evaluator, source: &str, file: &str) -> EvalResult<Value> {
        let program = match self.parse(source, file) {
            Ok(program) => program,
            Err(error) => {
                if let Some(debugger) = evaluator.debugger() {
                    debugger.mark_stopped(Some(&error));
                }
                return Err(error);
            }
        };
        let scope = self.program_scope();
        let result = evaluator.evaluate_program(&program, &scope).await;
        debug!(ok = result.is_ok(), "program finished");
        result
    }

    pub async fn run_program(&self, program: &Program, scope: &ScopeRef) -> EvalResult<Value> {
        self.evaluator().evaluate_program(program, scope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::EvalError;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_runs_are_isolated_but_globals_persist() {
        let runtime = Runtime::default();
        runtime
            .run("declare(local, 'N', 1)\ndeclareGlobal(shared, 'N', 2)")
            .await
            .unwrap();

        let error = runtime.run("local").await.unwrap_err();
        assert_eq!(error.root(), &EvalError::UnboundIdentifier("local".into()));
        assert_eq!(runtime.run("shared").await.unwrap(), Value::Number(2.0));
    }

    #[tokio::test]
    async fn test_parse_error_is_reported() {
        let runtime = Runtime::default();
        assert!(matches!(
            runtime.run("logPrint('a'").await,
            Err(EvalError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_parse_error_stops_attached_debugger() {
        let runtime = Runtime::default();
        let debugger = Arc::new(crate::debugger::Debugger::default());
        let evaluator = runtime.evaluator().with_debugger(debugger.clone());
        let result = runtime.run_with(&evaluator, "logPrint('a'", "main.ch").await;
        assert!(matches!(result, Err(EvalError::Parse(_))));
        assert_eq!(debugger.get_state(), crate::debugger::DebugState::Stopped);
    }

    #[tokio::test]
    async fn test_host_function() {
        let mut runtime = Runtime::default();
        runtime.register_sync("answer", |_ctx, _args| Ok(Value::Number(42.0)));
        assert_eq!(runtime.run("answer()").await.unwrap(), Value::Number(42.0));
        assert_eq!(runtime.run("chariotVersion").await.unwrap(), Value::str(env!("CARGO_PKG_VERSION")));
    }
}
