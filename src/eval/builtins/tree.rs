use regex::Regex;

use super::{BuiltinRegistry, expect_arity, flag_arg, string_arg, tree_arg};
use crate::{
    eval::{EvalError, EvalResult},
    value::{NodeKind, TreeNode, Value, formats},
};

pub(super) fn register(registry: &mut BuiltinRegistry) {
    registry.register_sync("create", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 2)?;
        let name = string_arg(ctx.name, &args, 0)?;
        match args.get(1) {
            None | Some(Value::Null) => Ok(Value::Tree(TreeNode::new(name))),
            Some(Value::Map(entries)) => {
                Ok(Value::Tree(formats::map_to_tree(&name, &entries.read())))
            }
            Some(other) => Err(EvalError::type_mismatch(ctx.name, "map", other.type_name())),
        }
    });
    registry.register_sync("addChild", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let parent = tree_arg(ctx.name, &args, 0)?;
        let child = tree_arg(ctx.name, &args, 1)?;
        parent.add_child(&child)?;
        Ok(args[0].clone())
    });
    registry.register_sync("removeChild", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let parent = tree_arg(ctx.name, &args, 0)?;
        let child = tree_arg(ctx.name, &args, 1)?;
        parent.remove_child(&child)?;
        Ok(args[0].clone())
    });
    registry.register_sync("getChildren", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        let node = tree_arg(ctx.name, &args, 0)?;
        Ok(Value::array(node.children().into_iter().map(Value::Tree).collect()))
    });
    registry.register_sync("getName", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Str(tree_arg(ctx.name, &args, 0)?.name()))
    });
    registry.register_sync("setName", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        tree_arg(ctx.name, &args, 0)?.set_name(string_arg(ctx.name, &args, 1)?);
        Ok(args[0].clone())
    });
    registry.register_sync("getAttribute", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let node = tree_arg(ctx.name, &args, 0)?;
        Ok(node
            .attribute(&string_arg(ctx.name, &args, 1)?)
            .unwrap_or_default())
    });
    registry.register_sync("setAttribute", |ctx, args| {
        expect_arity(ctx.name, &args, 3, 3)?;
        let node = tree_arg(ctx.name, &args, 0)?;
        node.set_attribute(string_arg(ctx.name, &args, 1)?, args[2].clone());
        Ok(args[0].clone())
    });
    registry.register_sync("getText", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(tree_arg(ctx.name, &args, 0)?
            .text()
            .map(Value::Str)
            .unwrap_or_default())
    });
    registry.register_sync("setText", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let node = tree_arg(ctx.name, &args, 0)?;
        let text = match &args[1] {
            Value::Null => None,
            other => Some(other.to_string()),
        };
        node.set_text(text);
        Ok(args[0].clone())
    });
    registry.register_sync("getParent", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(tree_arg(ctx.name, &args, 0)?
            .parent()
            .map(Value::Tree)
            .unwrap_or_default())
    });
    registry.register_sync("findByName", |ctx, args| {
        expect_arity(ctx.name, &args, 2, 2)?;
        let node = tree_arg(ctx.name, &args, 0)?;
        Ok(node
            .find(&string_arg(ctx.name, &args, 1)?)
            .map(Value::Tree)
            .unwrap_or_default())
    });
    registry.register_sync("searchAttribute", |ctx, args| {
        expect_arity(ctx.name, &args, 3, 4)?;
        search_attribute(ctx.name, &args)
    });
    registry.register_sync("nodePath", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Str(tree_arg(ctx.name, &args, 0)?.path()))
    });
    registry.register_sync("nodeDepth", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Number(tree_arg(ctx.name, &args, 0)?.depth() as f64))
    });

    // formats
    registry.register_sync("parseJSON", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Tree(formats::parse_json(&string_arg(ctx.name, &args, 0)?)?))
    });
    registry.register_sync("toJSON", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 2)?;
        let pretty = flag_arg(&args, 1, false);
        let rendered = match &args[0] {
            Value::Tree(node) => formats::to_json_string(node, pretty)?,
            other => {
                let json = other.to_json();
                let result = if pretty {
                    serde_json::to_string_pretty(&json)
                } else {
                    serde_json::to_string(&json)
                };
                result.map_err(|e| EvalError::operation(ctx.name, e.to_string()))?
            }
        };
        Ok(Value::Str(rendered))
    });
    registry.register_sync("parseYAML", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Tree(formats::parse_yaml(&string_arg(ctx.name, &args, 0)?)?))
    });
    registry.register_sync("toYAML", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Str(formats::to_yaml(&tree_arg(ctx.name, &args, 0)?)?))
    });
    registry.register_sync("parseCSV", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 2)?;
        let text = string_arg(ctx.name, &args, 0)?;
        Ok(Value::Tree(formats::parse_csv(&text, flag_arg(&args, 1, true))?))
    });
    registry.register_sync("toCSV", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Str(formats::to_csv(&tree_arg(ctx.name, &args, 0)?)))
    });
    registry.register_sync("xmlNode", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        let source = string_arg(ctx.name, &args, 0)?;
        if source.trim_start().starts_with('<') {
            Ok(Value::Tree(formats::parse_xml(&source)?))
        } else {
            Ok(Value::Tree(TreeNode::with_kind(NodeKind::Xml, source)))
        }
    });
    registry.register_sync("parseXML", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Tree(formats::parse_xml(&string_arg(ctx.name, &args, 0)?)?))
    });
    registry.register_sync("toXML", |ctx, args| {
        expect_arity(ctx.name, &args, 1, 1)?;
        Ok(Value::Str(formats::to_xml(&tree_arg(ctx.name, &args, 0)?)))
    });
}

/// `searchAttribute(node, key, value, regex?)`: equality by default, or a
/// regular expression match against the rendered attribute when `regex` is
/// truthy.
fn search_attribute(name: &str, args: &[Value]) -> EvalResult<Value> {
    let node = tree_arg(name, args, 0)?;
    let key = string_arg(name, args, 1)?;
    let hits = if flag_arg(args, 3, false) {
        let pattern = Regex::new(&args[2].to_string())
            .map_err(|e| EvalError::operation(name, e.to_string()))?;
        node.search_regex(&key, &pattern)
    } else {
        let expected = &args[2];
        node.search(&key, |value| value == expected || value.to_string() == expected.to_string())
    };
    Ok(Value::array(hits.into_iter().map(Value::Tree).collect()))
}
