use super::{BuiltinRegistry, expect_arity};
use crate::{
    eval::{EvalError, EvalResult},
    value::Value,
};

pub(super) fn register(registry: &mut BuiltinRegistry) {
    registry.register_sync("typeOf", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::str(args[0].type_name()))
    });
    registry.register_sync("clone", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(args[0].deep_clone())
    });
    registry.register_sync("equal", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        Ok(Value::Bool(args[0] == args[1]))
    });
    registry.register_sync("toString", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Str(args[0].to_string()))
    });
    registry.register_sync("toNumber", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        to_number(ctx.name, &args[0])
    });
    registry.register_sync("isNull", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Bool(args[0].is_null()))
    });
}

fn to_number(name: &str, value: &Value) -> EvalResult<Value> {
    match value {
        Value::Number(n) => Ok(Value::Number(*n)),
        Value::Bool(b) => Ok(Value::Number(if *b { 1.0 } else { 0.0 })),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Number)
            .map_err(|_| EvalError::operation(name, format!("'{}' is not a number", s))),
        other => Err(EvalError::type_mismatch(name, "number, bool or string", other.type_name())),
    }
}
