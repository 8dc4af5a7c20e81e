use std::{str::FromStr, time::Duration};

use futures::FutureExt;

use super::{BuiltinRegistry, expect_arity, number_arg};
use crate::{
    eval::EvalError,
    execution::LogLevel,
    value::Value,
};

pub(super) fn register(registry: &mut BuiltinRegistry) {
    registry.register_sync("logPrint", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 2)?;
        let level = match args.get(1) {
            Some(Value::Str(level)) => LogLevel::from_str(level).unwrap_or_default(),
            _ => LogLevel::default(),
        };
        ctx.log(level, args[0].to_string());
        Ok(Value::Null)
    });
    registry.register_sync("raise", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Err(EvalError::UserScriptError(args[0].to_string()))
    });
    registry.register_sync("now", |ctx, args| {
        expect_arity(ctx.name, &args, 0, 0)?;
        Ok(Value::Str(chrono::Utc::now().to_rfc3339()))
    });
    registry.register_async("sleep", |args| {
        async move {
            expect_arity("sleep", &args, 1, 1)?;
            let millis = number_arg("sleep", &args, 0)?;
            if millis > 0.0 {
                tokio::time::sleep(Duration::from_millis(millis as u64)).await;
            }
            Ok(Value::Null)
        }
        .boxed()
    });
}
