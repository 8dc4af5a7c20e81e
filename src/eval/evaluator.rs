use std::{str::FromStr, sync::Arc};

use async_recursion::async_recursion;
use tracing::instrument;

use super::{
    CallContext, EvalError, EvalResult,
    builtins::{Builtin, BuiltinRegistry},
};
use crate::{
    ast::{Block, Expression, Literal, Program, Statement, SwitchCase},
    config::default_max_call_depth,
    debugger::Debugger,
    execution::LogSink,
    scope::{Scope, ScopeRef},
    value::{FunctionValue, TypeCode, Value},
};

/// 文の評価結果を表す型
#[derive(Debug, Clone, PartialEq)]
pub enum StatementResult {
    Value(Value),
    Control(ControlFlow),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    Break,
    Continue,
    Return(Value),
}

impl StatementResult {
    /// Control that escapes to the top of a program or function body ends it;
    /// only `return` carries a value out.
    pub fn into_value(self) -> Value {
        match self {
            StatementResult::Value(value) => value,
            StatementResult::Control(ControlFlow::Return(value)) => value,
            StatementResult::Control(_) => Value::Null,
        }
    }
}

/// Evaluates expressions and hands back a value, or returns early from the
/// enclosing function with any control flow it produced.
macro_rules! value_of {
    ($result:expr) => {
        match $result {
            StatementResult::Value(value) => value,
            control => return Ok(control),
        }
    };
}

/// Walks a parsed program against a scope.
///
/// An evaluator is cheap to clone: it holds the shared built-in registry and
/// optional attachments. With no debugger attached the statement loop does a
/// single `Option` check per statement.
///
/// `depth` counts the user-function calls between the program and the code
/// this evaluator is running; every call hands a copy one level deeper to the
/// callee, so concurrent runs sharing a clone never see each other's depth.
#[derive(Clone)]
pub struct Evaluator {
    builtins: Arc<BuiltinRegistry>,
    debugger: Option<Arc<Debugger>>,
    log_sink: Option<Arc<dyn LogSink>>,
    depth: usize,
    max_call_depth: usize,
}

impl Evaluator {
    pub fn new(builtins: Arc<BuiltinRegistry>) -> Self {
        Self {
            builtins,
            debugger: None,
            log_sink: None,
            depth: 0,
            max_call_depth: default_max_call_depth(),
        }
    }

    pub fn with_max_call_depth(mut self, max_call_depth: usize) -> Self {
        self.max_call_depth = max_call_depth;
        self
    }

    pub fn with_debugger(mut self, debugger: Arc<Debugger>) -> Self {
        self.debugger = Some(debugger);
        self
    }

    pub fn with_log_sink(mut self, log_sink: Arc<dyn LogSink>) -> Self {
        self.log_sink = Some(log_sink);
        self
    }

    /// Same registry and log sink, no debugger.
    pub fn detached(&self) -> Self {
        Self {
            builtins: self.builtins.clone(),
            debugger: None,
            log_sink: self.log_sink.clone(),
            depth: self.depth,
            max_call_depth: self.max_call_depth,
        }
    }

    pub fn debugger(&self) -> Option<&Arc<Debugger>> {
        self.debugger.as_ref()
    }

    pub fn builtins(&self) -> &Arc<BuiltinRegistry> {
        &self.builtins
    }

    /// Top level entry point. An attached debugger is moved to `Stopped`
    /// when the program finishes, successfully or not.
    #[instrument(level = "debug", skip_all, fields(file = %program.file))]
    pub async fn evaluate_program(&self, program: &Program, scope: &ScopeRef) -> EvalResult<Value> {
        let result = self
            .eval_block(&program.body, scope)
            .await
            .map(StatementResult::into_value);
        if let Some(debugger) = &self.debugger {
            debugger.mark_stopped(result.as_ref().err());
        }
        result
    }

    /// Blocks run in the scope they are given. Break, continue and return
    /// propagate to the enclosing loop or call.
    pub async fn eval_block(&self, block: &Block, scope: &ScopeRef) -> EvalResult<StatementResult> {
        let mut last = Value::Null;
        for statement in &block.statements {
            match self.eval_statement(statement, scope).await? {
                StatementResult::Value(value) => last = value,
                control => return Ok(control),
            }
        }
        Ok(StatementResult::Value(last))
    }

    pub async fn eval_statement(
        &self,
        statement: &Statement,
        scope: &ScopeRef,
    ) -> EvalResult<StatementResult> {
        if let Some(debugger) = &self.debugger {
            // breakpoint conditions evaluate blocks again
            Box::pin(debugger.checkpoint(self, &statement.position, scope)).await;
        }
        self.eval_expression(&statement.expression, scope)
            .await
            .map_err(|e| e.at(&statement.position))
    }

    /// Evaluates a single expression for its value, e.g. a breakpoint
    /// condition.
    pub async fn eval_value(&self, expression: &Expression, scope: &ScopeRef) -> EvalResult<Value> {
        self.eval_expression(expression, scope)
            .await
            .map(StatementResult::into_value)
    }

    #[async_recursion]
    pub async fn eval_expression(
        &self,
        expression: &Expression,
        scope: &ScopeRef,
    ) -> EvalResult<StatementResult> {
        let value = match expression {
            Expression::Literal(literal) => literal_value(literal),
            Expression::Identifier(name) => scope.lookup(name)?,
            Expression::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(value_of!(self.eval_expression(item, scope).await?));
                }
                Value::array(values)
            }
            Expression::Block(body) => {
                Value::Function(Arc::new(FunctionValue::new(Vec::new(), body.clone(), scope.clone())))
            }
            Expression::Function { parameters, body } => Value::Function(Arc::new(
                FunctionValue::new(parameters.clone(), body.clone(), scope.clone()),
            )),
            Expression::If {
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = value_of!(self.eval_expression(condition, scope).await?);
                if condition.is_truthy() {
                    return self.eval_block(then_branch, scope).await;
                }
                return match else_branch.as_deref() {
                    Some(Expression::Block(body)) => self.eval_block(body, scope).await,
                    Some(other) => self.eval_expression(other, scope).await,
                    None => Ok(StatementResult::Value(Value::Null)),
                };
            }
            Expression::While { condition, body } => {
                return self.eval_while(condition, body, scope).await;
            }
            Expression::Switch {
                subject,
                cases,
                default,
            } => {
                return self
                    .eval_switch(subject.as_deref(), cases, default.as_deref(), scope)
                    .await;
            }
            Expression::Call { name, arguments } => {
                return self.eval_call(name, arguments, scope).await;
            }
        };
        Ok(StatementResult::Value(value))
    }

    async fn eval_while(
        &self,
        condition: &Expression,
        body: &Block,
        scope: &ScopeRef,
    ) -> EvalResult<StatementResult> {
        let mut last = Value::Null;
        loop {
            let test = value_of!(self.eval_expression(condition, scope).await?);
            if !test.is_truthy() {
                break;
            }
            match self.eval_block(body, scope).await? {
                StatementResult::Value(value) => last = value,
                StatementResult::Control(ControlFlow::Break) => break,
                StatementResult::Control(ControlFlow::Continue) => continue,
                ret @ StatementResult::Control(ControlFlow::Return(_)) => return Ok(ret),
            }
        }
        Ok(StatementResult::Value(last))
    }

    async fn eval_switch(
        &self,
        subject: Option<&Expression>,
        cases: &[SwitchCase],
        default: Option<&Block>,
        scope: &ScopeRef,
    ) -> EvalResult<StatementResult> {
        let subject = match subject {
            Some(expression) => Some(value_of!(self.eval_expression(expression, scope).await?)),
            None => None,
        };
        for case in cases {
            let candidate = value_of!(self.eval_expression(&case.condition, scope).await?);
            let matched = match &subject {
                Some(subject) => *subject == candidate,
                None => candidate.is_truthy(),
            };
            if matched {
                return self.eval_block(&case.body, scope).await;
            }
        }
        match default {
            Some(body) => self.eval_block(body, scope).await,
            None => Ok(StatementResult::Value(Value::Null)),
        }
    }

    async fn eval_arguments(
        &self,
        arguments: &[Expression],
        scope: &ScopeRef,
    ) -> EvalResult<Result<Vec<Value>, StatementResult>> {
        let mut values = Vec::with_capacity(arguments.len());
        for argument in arguments {
            match self.eval_expression(argument, scope).await? {
                StatementResult::Value(value) => values.push(value),
                control => return Ok(Err(control)),
            }
        }
        Ok(Ok(values))
    }

    async fn eval_call(
        &self,
        name: &str,
        arguments: &[Expression],
        scope: &ScopeRef,
    ) -> EvalResult<StatementResult> {
        match name {
            "declare" | "declareGlobal" => {
                return self.eval_declare(name, arguments, scope).await;
            }
            "setq" | "assign" => {
                check_arity(name, arguments.len(), 2, 2)?;
                let target = binding_name(name, &arguments[0])?;
                let value = value_of!(self.eval_expression(&arguments[1], scope).await?);
                if name == "setq" {
                    scope.setq(target, value.clone())?;
                } else {
                    scope.assign(target, value.clone())?;
                }
                return Ok(StatementResult::Value(value));
            }
            "isBound" | "bound" => {
                check_arity(name, arguments.len(), 1, 1)?;
                let target = binding_name(name, &arguments[0])?;
                return Ok(StatementResult::Value(Value::Bool(scope.is_bound(target))));
            }
            "unset" => {
                check_arity(name, arguments.len(), 1, 1)?;
                let target = binding_name(name, &arguments[0])?;
                return Ok(StatementResult::Value(Value::Bool(scope.remove(target))));
            }
            "break" => return Ok(StatementResult::Control(ControlFlow::Break)),
            "continue" => return Ok(StatementResult::Control(ControlFlow::Continue)),
            "return" => {
                check_arity(name, arguments.len(), 0, 1)?;
                let value = match arguments.first() {
                    Some(argument) => value_of!(self.eval_expression(argument, scope).await?),
                    None => Value::Null,
                };
                return Ok(StatementResult::Control(ControlFlow::Return(value)));
            }
            _ => {}
        }

        let mut args = match self.eval_arguments(arguments, scope).await? {
            Ok(values) => values,
            Err(control) => return Ok(control),
        };

        if name == "call" {
            if args.is_empty() {
                return Err(EvalError::ArityMismatch {
                    function: name.to_string(),
                    expected: "at least 1".to_string(),
                    actual: 0,
                });
            }
            let target = args.remove(0);
            let function = target
                .as_function()
                .cloned()
                .ok_or_else(|| EvalError::type_mismatch(name, "function", target.type_name()))?;
            let value = self.call_function("<anonymous>", &function, args).await?;
            return Ok(StatementResult::Value(value));
        }

        if let Some(builtin) = self.builtins.get(name) {
            let value = match builtin {
                Builtin::Sync(function) => {
                    let ctx = CallContext::new(name, scope, self.log_sink.as_ref());
                    function(&ctx, args)?
                }
                Builtin::Async(function) => function(args).await?,
            };
            return Ok(StatementResult::Value(value));
        }

        match scope.lookup(name) {
            Ok(Value::Function(function)) => {
                let value = self.call_function(name, &function, args).await?;
                Ok(StatementResult::Value(value))
            }
            Ok(other) => Err(EvalError::type_mismatch(name, "function", other.type_name())),
            Err(_) => Err(EvalError::UnboundIdentifier(name.to_string())),
        }
    }

    /// `declare(name, type, value?)` and `declareGlobal(name, type, value?)`.
    async fn eval_declare(
        &self,
        form: &str,
        arguments: &[Expression],
        scope: &ScopeRef,
    ) -> EvalResult<StatementResult> {
        check_arity(form, arguments.len(), 2, 3)?;
        let target = binding_name(form, &arguments[0])?;
        let code = value_of!(self.eval_expression(&arguments[1], scope).await?);
        let type_code = code
            .as_str()
            .and_then(|code| TypeCode::from_str(code).ok())
            .ok_or_else(|| EvalError::type_mismatch(form, "type code", code.to_string()))?;
        let value = match arguments.get(2) {
            Some(argument) => value_of!(self.eval_expression(argument, scope).await?),
            None => type_code.default_value(),
        };

        if form == "declareGlobal" {
            scope.declare_global(target, Some(type_code), value.clone())?;
        } else {
            scope.declare_typed(target, type_code, value.clone())?;
        }
        Ok(StatementResult::Value(value))
    }

    /// Binds arguments positionally in a child of the closure's scope.
    /// Parameters without an argument stay unbound. Fails instead of
    /// recursing once `max_call_depth` calls are already active.
    pub async fn call_function(
        &self,
        name: &str,
        function: &Arc<FunctionValue>,
        args: Vec<Value>,
    ) -> EvalResult<Value> {
        if self.depth >= self.max_call_depth {
            return Err(EvalError::CallDepthExceeded(self.max_call_depth));
        }
        if args.len() > function.parameters.len() {
            return Err(EvalError::ArityMismatch {
                function: name.to_string(),
                expected: format!("at most {}", function.parameters.len()),
                actual: args.len(),
            });
        }
        let call_scope = Scope::child(&function.closure);
        for (parameter, value) in function.parameters.iter().zip(args) {
            call_scope.set_local(parameter, value);
        }
        let callee = Self {
            depth: self.depth + 1,
            ..self.clone()
        };
        callee.run_body(name, function, &call_scope).await
    }

    /// Runs a function body in a scope the caller prepared.
    pub async fn run_body(
        &self,
        name: &str,
        function: &FunctionValue,
        scope: &ScopeRef,
    ) -> EvalResult<Value> {
        if let Some(debugger) = &self.debugger {
            debugger.enter_call(name, scope);
        }
        let result = self.eval_block(&function.body, scope).await;
        if let Some(debugger) = &self.debugger {
            debugger.exit_call();
        }
        result.map(StatementResult::into_value)
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Null => Value::Null,
        Literal::Boolean(b) => Value::Bool(*b),
        Literal::Number(n) => Value::Number(*n),
        Literal::Str(s) => Value::Str(s.clone()),
    }
}

/// Special forms take the name they bind as a bare identifier, or as a
/// string literal.
fn binding_name<'a>(form: &str, expression: &'a Expression) -> EvalResult<&'a str> {
    match expression {
        Expression::Identifier(name) => Ok(name),
        Expression::Literal(Literal::Str(name)) => Ok(name),
        _ => Err(EvalError::type_mismatch(form, "identifier", "expression")),
    }
}

fn check_arity(name: &str, actual: usize, min: usize, max: usize) -> EvalResult<()> {
    if actual < min || actual > max {
        return Err(EvalError::ArityMismatch {
            function: name.to_string(),
            expected: if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            },
            actual,
        });
    }
    Ok(())
}
