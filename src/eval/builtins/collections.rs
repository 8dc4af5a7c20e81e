//! Arrays and maps. Both are shared handles, so mutating built-ins return the
//! same handle they were given.

use std::collections::HashMap;

use super::{
    BuiltinRegistry, array_arg, expect_arity, index_arg, map_arg, string_arg,
};
use crate::{
    eval::{EvalError, EvalResult},
    value::Value,
};

pub(super) fn register(registry: &mut BuiltinRegistry) {
    // arrays
    registry.register_sync("array", |_ctx, args| Ok(Value::array(args)));
    registry.register_sync("addTo", |ctx, args| {
        expect_arity(ctx.name, &args, 2, usize::MAX)?;
        let items = array_arg(ctx.name, &args, 0)?;
        items.write().extend(args[1..].iter().cloned());
        Ok(args[0].clone())
    });
    registry.register_sync("getAt", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let index = index_arg(ctx.name, &args, 1)?;
        match &args[0] {
            Value::Array(items) => items
                .read()
                .get(index)
                .cloned()
                .ok_or_else(|| out_of_range(ctx.name, index)),
            Value::Tree(node) => node
                .child(index)
                .map(Value::Tree)
                .ok_or_else(|| out_of_range(ctx.name, index)),
            other => Err(EvalError::type_mismatch(ctx.name, "array or tree", other.type_name())),
        }
    });
    registry.register_sync("setAt", |ctx, args| {
        expect_arity(ctx.name, &args, 3, 3)?;
        let items = array_arg(ctx.name, &args, 0)?;
        let index = index_arg(ctx.name, &args, 1)?;
        let mut items = items.write();
        let slot = items
            .get_mut(index)
            .ok_or_else(|| out_of_range(ctx.name, index))?;
        *slot = args[2].clone();
        Ok(args[0].clone())
    });
    registry.register_sync("removeAt", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let items = array_arg(ctx.name, &args, 0)?;
        let index = index_arg(ctx.name, &args, 1)?;
        let mut items = items.write();
        if index >= items.len() {
            return Err(out_of_range(ctx.name, index));
        }
        Ok(items.remove(index))
    });
    registry.register_sync("length", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        let len = match &args[0] {
            Value::Array(items) => items.read().len(),
            Value::Map(entries) => entries.read().len(),
            Value::Str(s) => s.chars().count(),
            Value::Tree(node) => node.child_count(),
            other => {
                return Err(EvalError::type_mismatch(
                    ctx.name,
                    "array, map, string or tree",
                    other.type_name(),
                ));
            }
        };
        Ok(Value::Number(len as f64))
    });
    registry.register_sync("slice", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 3)?;
        slice(ctx.name, &args)
    });

    // maps
    registry.register_sync("map", |ctx, args| {
        if args.len() % 2 != 0 {
            return Err(EvalError::ArityMismatch {
                function: ctx.name.to_string(),
                expected: "an even number of".to_string(),
                actual: args.len(),
            });
        }
        let mut entries = HashMap::new();
        for pair in args.chunks(2) {
            let key = match &pair[0] {
                Value::Str(s) => s.clone(),
                other => return Err(EvalError::type_mismatch(ctx.name, "string key", other.type_name())),
            };
            entries.insert(key, pair[1].clone());
        }
        Ok(Value::map(entries))
    });
    registry.register_sync("setValue", |ctx, args| {
        expect_arity(ctx.name, &args, 3, 3)?;
        let entries = map_arg(ctx.name, &args, 0)?;
        let key = string_arg(ctx.name, &args, 1)?;
        entries.write().insert(key, args[2].clone());
        Ok(args[0].clone())
    });
    registry.register_sync("getValue", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 3)?;
        let entries = map_arg(ctx.name, &args, 0)?;
        let key = string_arg(ctx.name, &args, 1)?;
        let found = entries.read().get(&key).cloned();
        Ok(found.unwrap_or_else(|| args.get(2).cloned().unwrap_or_default()))
    });
    registry.register_sync("hasKey", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let entries = map_arg(ctx.name, &args, 0)?;
        let key = string_arg(ctx.name, &args, 1)?;
        let present = entries.read().contains_key(&key);
        Ok(Value::Bool(present))
    });
    registry.register_sync("keys", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        let entries = map_arg(ctx.name, &args, 0)?;
        let mut keys: Vec<String> = entries.read().keys().cloned().collect();
        keys.sort();
        Ok(Value::array(keys.into_iter().map(Value::Str).collect()))
    });
    registry.register_sync("removeKey", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let entries = map_arg(ctx.name, &args, 0)?;
        let key = string_arg(ctx.name, &args, 1)?;
        let removed = entries.write().remove(&key).is_some();
        Ok(Value::Bool(removed))
    });
}

fn out_of_range(name: &str, index: usize) -> EvalError {
    EvalError::operation(name, format!("index {} out of range", index))
}

/// `slice(x, start, end?)` on arrays (shallow copy) or strings, with `end`
/// clamped to the length.
fn slice(name: &str, args: &[Value]) -> EvalResult<Value> {
    let start = index_arg(name, args, 1)?;
    let end = match args.get(2) {
        None | Some(Value::Null) => None,
        Some(_) => Some(index_arg(name, args, 2)?),
    };
    match &args[0] {
        Value::Array(items) => {
            let items = items.read();
            let end = end.unwrap_or(items.len()).min(items.len());
            if start > end {
                return Err(out_of_range(name, start));
            }
            Ok(Value::array(items[start..end].to_vec()))
        }
        Value::Str(s) => {
            let chars: Vec<char> = s.chars().collect();
            let end = end.unwrap_or(chars.len()).min(chars.len());
            if start > end {
                return Err(out_of_range(name, start));
            }
            Ok(Value::Str(chars[start..end].iter().collect()))
        }
        other => Err(EvalError::type_mismatch(name, "array or string", other.type_name())),
    }
}
