//! Lexical environments.
//!
//! A [`Scope`] maps identifiers to [`Binding`]s and links weakly to its
//! parent. Lookups and assignments walk outward through the chain; declares
//! only ever touch the scope they are called on. The root of a chain is the
//! runtime's bootstrap scope, which is where `declareGlobal` writes.

use std::{
    collections::HashMap,
    sync::{Arc, Weak},
};

use parking_lot::RwLock;
use thiserror::Error;

use crate::value::{TypeCode, Value};

pub type ScopeRef = Arc<Scope>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScopeError {
    #[error("Unbound identifier: {0}")]
    UnboundIdentifier(String),
    #[error("Variable already declared in this scope: {0}")]
    AlreadyDeclared(String),
    #[error("Type mismatch for '{name}': expected {expected}, got {actual}")]
    TypeMismatch {
        name: String,
        expected: String,
        actual: String,
    },
}

pub type ScopeResult<T> = Result<T, ScopeError>;

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    /// `None` for untyped bindings (function parameters, `setq` creations).
    pub type_code: Option<TypeCode>,
}

#[derive(Debug, Default)]
pub struct Scope {
    bindings: RwLock<HashMap<String, Binding>>,
    parent: Option<Weak<Scope>>,
}

impl Scope {
    pub fn new_root() -> ScopeRef {
        Arc::new(Scope::default())
    }

    pub fn child(parent: &ScopeRef) -> ScopeRef {
        Arc::new(Scope {
            bindings: RwLock::new(HashMap::new()),
            parent: Some(Arc::downgrade(parent)),
        })
    }

    pub fn parent(&self) -> Option<ScopeRef> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Live ancestors, nearest first.
    pub fn ancestors(&self) -> Vec<ScopeRef> {
        let mut result = Vec::new();
        let mut current = self.parent();
        while let Some(scope) = current {
            current = scope.parent();
            result.push(scope);
        }
        result
    }

    /// The outermost live scope of the chain.
    pub fn global(self: &Arc<Self>) -> ScopeRef {
        self.ancestors().pop().unwrap_or_else(|| self.clone())
    }

    pub fn depth(&self) -> usize {
        1 + self.ancestors().len()
    }

    pub fn declare(&self, name: &str, value: Value) -> ScopeResult<()> {
        self.insert_new(name, Binding {
            value,
            type_code: None,
        })
    }

    pub fn declare_typed(&self, name: &str, type_code: TypeCode, value: Value) -> ScopeResult<()> {
        check_type(name, Some(type_code), &value)?;
        self.insert_new(name, Binding {
            value,
            type_code: Some(type_code),
        })
    }

    fn insert_new(&self, name: &str, binding: Binding) -> ScopeResult<()> {
        let mut bindings = self.bindings.write();
        if bindings.contains_key(name) {
            return Err(ScopeError::AlreadyDeclared(name.to_string()));
        }
        bindings.insert(name.to_string(), binding);
        Ok(())
    }

    /// Creates or overwrites a binding in the root scope.
    pub fn declare_global(
        self: &Arc<Self>,
        name: &str,
        type_code: Option<TypeCode>,
        value: Value,
    ) -> ScopeResult<()> {
        check_type(name, type_code, &value)?;
        self.global()
            .bindings
            .write()
            .insert(name.to_string(), Binding { value, type_code });
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> ScopeResult<Value> {
        self.find_binding(name)
            .map(|binding| binding.value)
            .ok_or_else(|| ScopeError::UnboundIdentifier(name.to_string()))
    }

    pub fn find_binding(&self, name: &str) -> Option<Binding> {
        // 現在のスコープで検索
        if let Some(binding) = self.bindings.read().get(name) {
            return Some(binding.clone());
        }
        self.ancestors()
            .iter()
            .find_map(|scope| scope.bindings.read().get(name).cloned())
    }

    pub fn is_bound(&self, name: &str) -> bool {
        self.find_binding(name).is_some()
    }

    pub fn is_local(&self, name: &str) -> bool {
        self.bindings.read().contains_key(name)
    }

    /// Mutates the nearest existing binding, respecting its declared type.
    pub fn assign(&self, name: &str, value: Value) -> ScopeResult<()> {
        if try_assign(self, name, &value)? {
            return Ok(());
        }
        for scope in self.ancestors() {
            if try_assign(&scope, name, &value)? {
                return Ok(());
            }
        }
        Err(ScopeError::UnboundIdentifier(name.to_string()))
    }

    /// `assign`, falling back to an untyped local binding when the name is
    /// not bound anywhere.
    pub fn setq(&self, name: &str, value: Value) -> ScopeResult<()> {
        match self.assign(name, value.clone()) {
            Err(ScopeError::UnboundIdentifier(_)) => {
                self.set_local(name, value);
                Ok(())
            }
            other => other,
        }
    }

    /// Overwrites (or creates) an untyped binding in this scope only.
    pub fn set_local(&self, name: &str, value: Value) {
        self.bindings.write().insert(name.to_string(), Binding {
            value,
            type_code: None,
        });
    }

    /// Removes the nearest binding of `name`. Returns whether one existed.
    pub fn remove(&self, name: &str) -> bool {
        if self.bindings.write().remove(name).is_some() {
            return true;
        }
        self.ancestors()
            .iter()
            .any(|scope| scope.bindings.write().remove(name).is_some())
    }

    /// Local bindings only.
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.bindings
            .read()
            .iter()
            .map(|(name, binding)| (name.clone(), binding.value.clone()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.bindings.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn check_type(name: &str, type_code: Option<TypeCode>, value: &Value) -> ScopeResult<()> {
    match type_code {
        Some(code) if !code.accepts(value) => Err(ScopeError::TypeMismatch {
            name: name.to_string(),
            expected: code.describe().to_string(),
            actual: value.type_name().to_string(),
        }),
        _ => Ok(()),
    }
}

fn try_assign(scope: &Scope, name: &str, value: &Value) -> ScopeResult<bool> {
    let mut bindings = scope.bindings.write();
    match bindings.get_mut(name) {
        Some(binding) => {
            check_type(name, binding.type_code, value)?;
            binding.value = value.clone();
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_declare_then_lookup() {
        let scope = Scope::new_root();
        scope.declare("x", Value::Number(1.0)).unwrap();
        assert_eq!(scope.lookup("x").unwrap(), Value::Number(1.0));
        assert_eq!(
            scope.lookup("y"),
            Err(ScopeError::UnboundIdentifier("y".into()))
        );
    }

    #[test]
    fn test_redeclare_same_scope_fails_but_shadowing_works() {
        let root = Scope::new_root();
        root.declare("x", Value::Number(1.0)).unwrap();
        assert_eq!(
            root.declare("x", Value::Number(2.0)),
            Err(ScopeError::AlreadyDeclared("x".into()))
        );

        let child = Scope::child(&root);
        child.declare("x", Value::Number(3.0)).unwrap();
        assert_eq!(child.lookup("x").unwrap(), Value::Number(3.0));
        assert_eq!(root.lookup("x").unwrap(), Value::Number(1.0));
    }

    #[test]
    fn test_assign_walks_to_nearest_binding() {
        let root = Scope::new_root();
        root.declare_typed("x", TypeCode::Number, Value::Number(5.0))
            .unwrap();
        let child = Scope::child(&root);

        child.assign("x", Value::Number(10.0)).unwrap();
        assert_eq!(root.lookup("x").unwrap(), Value::Number(10.0));
        assert!(!child.is_local("x"));

        assert_eq!(
            child.assign("nope", Value::Null),
            Err(ScopeError::UnboundIdentifier("nope".into()))
        );
    }

    #[test]
    fn test_assign_respects_declared_type() {
        let root = Scope::new_root();
        root.declare_typed("x", TypeCode::Number, Value::Number(5.0))
            .unwrap();
        assert!(matches!(
            root.assign("x", Value::str("ten")),
            Err(ScopeError::TypeMismatch { .. })
        ));
        assert_eq!(root.lookup("x").unwrap(), Value::Number(5.0));
    }

    #[test]
    fn test_setq_creates_locally_when_unbound() {
        let root = Scope::new_root();
        let child = Scope::child(&root);
        child.setq("y", Value::Bool(true)).unwrap();
        assert!(child.is_local("y"));
        assert!(!root.is_bound("y"));
    }

    #[test]
    fn test_declare_global_goes_to_root() {
        let root = Scope::new_root();
        let child = Scope::child(&root);
        let grandchild = Scope::child(&child);

        grandchild
            .declare_global("g", Some(TypeCode::String), Value::str("a"))
            .unwrap();
        grandchild
            .declare_global("g", Some(TypeCode::String), Value::str("b"))
            .unwrap();

        assert!(root.is_local("g"));
        assert_eq!(child.lookup("g").unwrap(), Value::str("b"));
        assert_eq!(grandchild.depth(), 3);
    }

    #[test]
    fn test_dropped_parent_is_not_visible() {
        let root = Scope::new_root();
        root.declare("x", Value::Null).unwrap();
        let child = Scope::child(&root);
        drop(root);
        assert!(!child.is_bound("x"));
        assert!(child.parent().is_none());
    }

    #[test]
    fn test_remove_nearest() {
        let root = Scope::new_root();
        root.declare("x", Value::Number(1.0)).unwrap();
        let child = Scope::child(&root);
        assert!(child.remove("x"));
        assert!(!root.is_bound("x"));
        assert!(!child.remove("x"));
    }
}
