//! # Value Model
//!
//! [`Value`] is the closed set of things a Chariot program can hold in a
//! variable. Scalars (`Null`, `Bool`, `Number`, `Str`) are plain data;
//! `Array`, `Map` and `Tree` are shared handles, so two bindings of the same
//! array see each other's mutations until one of them calls `clone(...)`
//! ([`Value::deep_clone`]). `Function` and `Plan` are immutable once built and
//! are shared as well.
//!
//! Shared containers live behind `parking_lot` locks: built-ins mutate them
//! synchronously and never hold a guard across an `.await`.

pub mod formats;
pub mod tree;

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize, Serializer};
use strum::{Display, EnumString};

use crate::{agent::Plan, ast::Block, scope::ScopeRef};

pub use tree::{NodeKind, TreeError, TreeNode, TreeSnapshot};

pub type ArrayRef = Arc<RwLock<Vec<Value>>>;
pub type MapRef = Arc<RwLock<HashMap<String, Value>>>;

/// Copies made so far during one deep clone, keyed by the address of the
/// source container.
pub(crate) type CloneMemo = HashMap<usize, Value>;

/// Rendering stops descending past this depth so self-containing arrays and
/// maps cannot recurse forever.
const MAX_RENDER_DEPTH: usize = 32;

// 値の型システム
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Array(ArrayRef),
    Map(MapRef),
    Function(Arc<FunctionValue>),
    Tree(TreeNode),
    Plan(Arc<Plan>),
}

/// A closure: parameter names, a body, and the scope it was defined in.
pub struct FunctionValue {
    pub parameters: Vec<String>,
    pub body: Arc<Block>,
    pub closure: ScopeRef,
    // scopes only link to their parents weakly; the closure keeps its chain alive
    anchors: Vec<ScopeRef>,
}

impl FunctionValue {
    pub fn new(parameters: Vec<String>, body: Arc<Block>, closure: ScopeRef) -> Self {
        let anchors = closure.ancestors();
        Self {
            parameters,
            body,
            closure,
            anchors,
        }
    }

    pub fn arity(&self) -> usize {
        self.parameters.len()
    }

    pub fn scope_chain_len(&self) -> usize {
        self.anchors.len() + 1
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionValue")
            .field("parameters", &self.parameters)
            .field("statements", &self.body.statements.len())
            .finish()
    }
}

impl Value {
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    pub fn array(items: Vec<Value>) -> Self {
        Value::Array(Arc::new(RwLock::new(items)))
    }

    pub fn map(entries: HashMap<String, Value>) -> Self {
        Value::Map(Arc::new(RwLock::new(entries)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
            Value::Function(_) => "function",
            Value::Tree(_) => "tree",
            Value::Plan(_) => "plan",
        }
    }

    /// `null`, `false`, `0` and `""` are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Str(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_tree(&self) -> Option<&TreeNode> {
        match self {
            Value::Tree(node) => Some(node),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Arc<FunctionValue>> {
        match self {
            Value::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Independent copy of shared containers, recursively. Functions and plans
    /// are immutable and stay shared.
    ///
    /// A container reached twice is copied once, so aliasing inside the value,
    /// self-containing arrays included, is reproduced in the copy.
    pub fn deep_clone(&self) -> Value {
        self.deep_clone_with(&mut CloneMemo::new())
    }

    pub(crate) fn deep_clone_with(&self, memo: &mut CloneMemo) -> Value {
        match self {
            Value::Array(items) => {
                let key = Arc::as_ptr(items) as usize;
                if let Some(copy) = memo.get(&key) {
                    return copy.clone();
                }
                let copy: ArrayRef = Arc::new(RwLock::new(Vec::new()));
                memo.insert(key, Value::Array(copy.clone()));
                let source = items.read_recursive().clone();
                let cloned = source.iter().map(|v| v.deep_clone_with(memo)).collect();
                *copy.write() = cloned;
                Value::Array(copy)
            }
            Value::Map(entries) => {
                let key = Arc::as_ptr(entries) as usize;
                if let Some(copy) = memo.get(&key) {
                    return copy.clone();
                }
                let copy: MapRef = Arc::new(RwLock::new(HashMap::new()));
                memo.insert(key, Value::Map(copy.clone()));
                let source = entries.read_recursive().clone();
                let cloned = source
                    .iter()
                    .map(|(k, v)| (k.clone(), v.deep_clone_with(memo)))
                    .collect();
                *copy.write() = cloned;
                Value::Map(copy)
            }
            Value::Tree(node) => Value::Tree(node.deep_clone_with(memo)),
            other => other.clone(),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        self.to_json_at(0)
    }

    fn to_json_at(&self, depth: usize) -> serde_json::Value {
        use serde_json::Value as Json;
        if depth > MAX_RENDER_DEPTH {
            return Json::String("...".to_string());
        }
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Number(n) if is_integral(*n) => Json::from(*n as i64),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(
                items
                    .read_recursive()
                    .iter()
                    .map(|v| v.to_json_at(depth + 1))
                    .collect(),
            ),
            Value::Map(entries) => Json::Object(
                entries
                    .read_recursive()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json_at(depth + 1)))
                    .collect(),
            ),
            Value::Tree(node) => formats::tree_to_json(node),
            Value::Function(_) | Value::Plan(_) => Json::String(self.to_string()),
        }
    }

    /// JSON objects become maps and JSON arrays become arrays.
    pub fn from_json(json: &serde_json::Value) -> Value {
        use serde_json::Value as Json;
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::array(items.iter().map(Value::from_json).collect()),
            Json::Object(entries) => Value::map(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::from_json(v)))
                    .collect(),
            ),
        }
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        if depth > MAX_RENDER_DEPTH {
            return write!(f, "...");
        }
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", format_number(*n)),
            Value::Str(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.read_recursive().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    item.render(f, depth + 1)?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                let entries = entries.read_recursive();
                let mut keys: Vec<_> = entries.keys().collect();
                keys.sort();
                write!(f, "{{")?;
                for (i, key) in keys.into_iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: ", key)?;
                    entries[key].render(f, depth + 1)?;
                }
                write!(f, "}}")
            }
            Value::Function(function) => {
                write!(f, "<function({})>", function.parameters.join(", "))
            }
            Value::Tree(node) => write!(f, "TreeNode({})", node.name()),
            Value::Plan(plan) => write!(f, "Plan({})", plan.name),
        }
    }
}

fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15
}

/// Integral values print without a fractional part.
pub fn format_number(n: f64) -> String {
    if is_integral(n) {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "Str({:?})", s),
            Value::Null => write!(f, "Null"),
            other => write!(f, "{}({})", variant_label(other), other),
        }
    }
}

fn variant_label(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Bool",
        Value::Number(_) => "Number",
        Value::Str(_) => "Str",
        Value::Array(_) => "Array",
        Value::Map(_) => "Map",
        Value::Function(_) => "Function",
        Value::Tree(_) => "Tree",
        Value::Plan(_) => "Plan",
    }
}

/// Scalars compare by value, shared structures by identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Tree(a), Value::Tree(b)) => a.ptr_eq(b),
            (Value::Plan(a), Value::Plan(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<TreeNode> for Value {
    fn from(node: TreeNode) -> Self {
        Value::Tree(node)
    }
}

/// Declared type of a binding, written as a one-letter code in scripts:
/// `declare(x, 'N', 5)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize)]
pub enum TypeCode {
    #[strum(serialize = "N")]
    Number,
    #[strum(serialize = "S")]
    String,
    #[strum(serialize = "L")]
    Boolean,
    #[strum(serialize = "A")]
    Array,
    #[strum(serialize = "M")]
    Map,
    #[strum(serialize = "J")]
    Json,
    #[strum(serialize = "T")]
    Tree,
    #[strum(serialize = "X")]
    Xml,
    #[strum(serialize = "Y")]
    Yaml,
    #[strum(serialize = "F")]
    Function,
    #[strum(serialize = "P")]
    Plan,
    #[strum(serialize = "V")]
    Any,
}

impl TypeCode {
    pub fn default_value(self) -> Value {
        match self {
            TypeCode::Number => Value::Number(0.0),
            TypeCode::String => Value::Str(String::new()),
            TypeCode::Boolean => Value::Bool(false),
            TypeCode::Array => Value::array(Vec::new()),
            TypeCode::Map => Value::map(HashMap::new()),
            TypeCode::Json => Value::Tree(formats::empty_json()),
            TypeCode::Tree => Value::Tree(TreeNode::new("root")),
            TypeCode::Xml => Value::Tree(TreeNode::with_kind(NodeKind::Xml, "root")),
            TypeCode::Yaml => Value::Tree(TreeNode::with_kind(NodeKind::Yaml, "root")),
            TypeCode::Function | TypeCode::Plan | TypeCode::Any => Value::Null,
        }
    }

    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (TypeCode::Any, _) => true,
            (TypeCode::Number, Value::Number(_)) => true,
            (TypeCode::String, Value::Str(_)) => true,
            (TypeCode::Boolean, Value::Bool(_)) => true,
            (TypeCode::Array, Value::Array(_)) => true,
            (TypeCode::Map, Value::Map(_)) => true,
            (TypeCode::Tree, Value::Tree(_)) => true,
            (TypeCode::Json, Value::Tree(node)) => *node.kind() == NodeKind::Json,
            (TypeCode::Xml, Value::Tree(node)) => *node.kind() == NodeKind::Xml,
            (TypeCode::Yaml, Value::Tree(node)) => *node.kind() == NodeKind::Yaml,
            (TypeCode::Function, Value::Function(_) | Value::Null) => true,
            (TypeCode::Plan, Value::Plan(_) | Value::Null) => true,
            _ => false,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            TypeCode::Number => "number",
            TypeCode::String => "string",
            TypeCode::Boolean => "bool",
            TypeCode::Array => "array",
            TypeCode::Map => "map",
            TypeCode::Json => "JSON tree",
            TypeCode::Tree => "tree",
            TypeCode::Xml => "XML tree",
            TypeCode::Yaml => "YAML tree",
            TypeCode::Function => "function",
            TypeCode::Plan => "plan",
            TypeCode::Any => "any",
        }
    }
}
