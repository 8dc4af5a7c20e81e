use std::cmp::Ordering;

use super::{BuiltinRegistry, expect_arity, number_arg};
use crate::{
    eval::{EvalError, EvalResult},
    value::Value,
};

pub(super) fn register(registry: &mut BuiltinRegistry) {
    registry.register_sync("add", |ctx, args| {
        expect_arity(ctx.name, &args, 2, usize::MAX)?;
        fold_numbers(ctx.name, &args, |a, b| a + b)
    });
    registry.register_sync("sub", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        Ok(Value::Number(
            number_arg(ctx.name, &args, 0)? - number_arg(ctx.name, &args, 1)?,
        ))
    });
    registry.register_sync("mul", |ctx, args| {
        expect_arity(ctx.name, &args, 2, usize::MAX)?;
        fold_numbers(ctx.name, &args, |a, b| a * b)
    });
    registry.register_sync("div", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let divisor = nonzero(ctx.name, number_arg(ctx.name, &args, 1)?)?;
        Ok(Value::Number(number_arg(ctx.name, &args, 0)? / divisor))
    });
    registry.register_sync("mod", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let divisor = nonzero(ctx.name, number_arg(ctx.name, &args, 1)?)?;
        Ok(Value::Number(number_arg(ctx.name, &args, 0)? % divisor))
    });
    registry.register_sync("bigger", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        Ok(Value::Bool(compare(ctx.name, &args[0], &args[1])? == Ordering::Greater))
    });
    registry.register_sync("smaller", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        Ok(Value::Bool(compare(ctx.name, &args[0], &args[1])? == Ordering::Less))
    });
    registry.register_sync("and", |ctx, args| {
        expect_arity(ctx.name, &args, 1, usize::MAX)?;
        Ok(Value::Bool(args.iter().all(Value::is_truthy)))
    });
    registry.register_sync("or", |ctx, args| {
        expect_arity(ctx.name, &args, 1, usize::MAX)?;
        Ok(Value::Bool(args.iter().any(Value::is_truthy)))
    });
    registry.register_sync("not", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Bool(!args[0].is_truthy()))
    });
    registry.register_sync("concat", |_ctx, args| {
        Ok(Value::Str(args.iter().map(Value::to_string).collect()))
    });
}

fn fold_numbers(name: &str, args: &[Value], op: fn(f64, f64) -> f64) -> EvalResult<Value> {
    let mut acc = number_arg(name, args, 0)?;
    for index in 1..args.len() {
        acc = op(acc, number_arg(name, args, index)?);
    }
    Ok(Value::Number(acc))
}

fn nonzero(name: &str, divisor: f64) -> EvalResult<f64> {
    if divisor == 0.0 {
        return Err(EvalError::operation(name, "division by zero"));
    }
    Ok(divisor)
}

fn compare(name: &str, left: &Value, right: &Value) -> EvalResult<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a
            .partial_cmp(b)
            .ok_or_else(|| EvalError::operation(name, "cannot compare NaN")),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        (a, b) => Err(EvalError::type_mismatch(
            name,
            "two numbers or two strings",
            format!("{} and {}", a.type_name(), b.type_name()),
        )),
    }
}
