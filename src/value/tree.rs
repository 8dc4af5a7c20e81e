//! Hierarchical tree nodes.
//!
//! Every structured format the language manipulates (JSON, XML, YAML, CSV,
//! maps, external query results) is imported into the same [`TreeNode`]
//! shape: a name, string-keyed attributes, ordered children, a weak parent
//! link and optional text. The backing format is kept as a [`NodeKind`] tag so
//! exporters know how to render a node back out, while `find`, `search`,
//! `walk`, `path` and `depth` are written once against the common surface.
//!
//! Nodes are shared handles. Cloning a `TreeNode` clones the handle; use
//! [`TreeNode::deep_clone`] for an independent copy.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{Arc, Weak},
};

use parking_lot::{Mutex, RwLock};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use super::{CloneMemo, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NodeKind {
    #[strum(serialize = "tree")]
    Tree,
    #[strum(serialize = "json")]
    Json,
    #[strum(serialize = "map")]
    Map,
    #[strum(serialize = "xml")]
    Xml,
    #[strum(serialize = "yaml")]
    Yaml,
    #[strum(serialize = "csv")]
    Csv,
    /// Rows returned by an external data source, tagged with where they came from.
    #[strum(serialize = "query_result")]
    QueryResult { source: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    #[error("Cannot add '{child}' under '{parent}': node would become its own ancestor")]
    Cycle { parent: String, child: String },
    #[error("Node '{child}' is not a child of '{parent}'")]
    NotAChild { parent: String, child: String },
}

pub type TreeResult<T> = Result<T, TreeError>;

/// Held by every edit that relinks nodes, so an ancestor check and the move
/// it guards cannot interleave with another move.
static STRUCTURE: Mutex<()> = parking_lot::const_mutex(());

#[derive(Clone)]
pub struct TreeNode {
    inner: Arc<NodeInner>,
}

struct NodeInner {
    kind: NodeKind,
    state: RwLock<NodeState>,
}

struct NodeState {
    name: String,
    attributes: HashMap<String, Value>,
    children: Vec<TreeNode>,
    parent: Weak<NodeInner>,
    text: Option<String>,
}

impl TreeNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_kind(NodeKind::Tree, name)
    }

    pub fn with_kind(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(NodeInner {
                kind,
                state: RwLock::new(NodeState {
                    name: name.into(),
                    attributes: HashMap::new(),
                    children: Vec::new(),
                    parent: Weak::new(),
                    text: None,
                }),
            }),
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.inner.kind
    }

    pub fn name(&self) -> String {
        self.inner.state.read().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.state.write().name = name.into();
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.inner.state.read().attributes.get(key).cloned()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) {
        self.inner.state.write().attributes.insert(key.into(), value);
    }

    pub fn remove_attribute(&self, key: &str) -> Option<Value> {
        self.inner.state.write().attributes.remove(key)
    }

    pub fn attributes(&self) -> HashMap<String, Value> {
        self.inner.state.read().attributes.clone()
    }

    pub fn text(&self) -> Option<String> {
        self.inner.state.read().text.clone()
    }

    pub fn set_text(&self, text: Option<String>) {
        self.inner.state.write().text = text;
    }

    pub fn children(&self) -> Vec<TreeNode> {
        self.inner.state.read().children.clone()
    }

    pub fn child(&self, index: usize) -> Option<TreeNode> {
        self.inner.state.read().children.get(index).cloned()
    }

    pub fn child_count(&self) -> usize {
        self.inner.state.read().children.len()
    }

    pub fn parent(&self) -> Option<TreeNode> {
        self.inner
            .state
            .read()
            .parent
            .upgrade()
            .map(|inner| TreeNode { inner })
    }

    pub fn ptr_eq(&self, other: &TreeNode) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Appends `child`, detaching it from any previous parent first.
    /// Rejects the call if `child` is `self` or one of its ancestors.
    ///
    /// The child's parent link stays locked while it moves, so readers see
    /// either the old parent or the new one.
    pub fn add_child(&self, child: &TreeNode) -> TreeResult<()> {
        let _structure = STRUCTURE.lock();
        if self.ptr_eq(child) || self.ancestors().iter().any(|a| a.ptr_eq(child)) {
            return Err(TreeError::Cycle {
                parent: self.name(),
                child: child.name(),
            });
        }

        // 子 → 親の順にロックする
        let mut link = child.inner.state.write();
        let old_parent = link.parent.upgrade();
        link.parent = Arc::downgrade(&self.inner);
        match old_parent {
            Some(old) if Arc::ptr_eq(&old, &self.inner) => {
                let mut state = self.inner.state.write();
                state.children.retain(|c| !c.ptr_eq(child));
                state.children.push(child.clone());
            }
            Some(old) => {
                old.state.write().children.retain(|c| !c.ptr_eq(child));
                self.inner.state.write().children.push(child.clone());
            }
            None => self.inner.state.write().children.push(child.clone()),
        }
        Ok(())
    }

    pub fn remove_child(&self, child: &TreeNode) -> TreeResult<()> {
        let _structure = STRUCTURE.lock();
        let removed = !self.ptr_eq(child) && {
            let mut link = child.inner.state.write();
            let mut state = self.inner.state.write();
            let before = state.children.len();
            state.children.retain(|c| !c.ptr_eq(child));
            let removed = before != state.children.len();
            if removed {
                link.parent = Weak::new();
            }
            removed
        };
        if !removed {
            return Err(TreeError::NotAChild {
                parent: self.name(),
                child: child.name(),
            });
        }
        Ok(())
    }

    /// Parent first, root last.
    pub fn ancestors(&self) -> Vec<TreeNode> {
        let mut result = Vec::new();
        let mut current = self.parent();
        while let Some(node) = current {
            current = node.parent();
            result.push(node);
        }
        result
    }

    pub fn root(&self) -> TreeNode {
        self.ancestors().pop().unwrap_or_else(|| self.clone())
    }

    /// Zero for a root node.
    pub fn depth(&self) -> usize {
        self.ancestors().len()
    }

    /// Slash separated names from the root, e.g. `/root/items/item`.
    pub fn path(&self) -> String {
        let mut names: Vec<String> = self.ancestors().iter().map(TreeNode::name).collect();
        names.reverse();
        names.push(self.name());
        format!("/{}", names.join("/"))
    }

    /// Pre-order traversal including `self`.
    pub fn walk(&self, visit: &mut dyn FnMut(&TreeNode)) {
        visit(self);
        for child in self.children() {
            child.walk(visit);
        }
    }

    pub fn find(&self, name: &str) -> Option<TreeNode> {
        if self.name() == name {
            return Some(self.clone());
        }
        self.children().iter().find_map(|child| child.find(name))
    }

    pub fn find_all(&self, name: &str) -> Vec<TreeNode> {
        let mut found = Vec::new();
        self.walk(&mut |node| {
            if node.name() == name {
                found.push(node.clone());
            }
        });
        found
    }

    /// Nodes whose attribute `key` satisfies `predicate`.
    pub fn search(&self, key: &str, predicate: impl Fn(&Value) -> bool) -> Vec<TreeNode> {
        let mut found = Vec::new();
        self.walk(&mut |node| {
            if node.attribute(key).is_some_and(|v| predicate(&v)) {
                found.push(node.clone());
            }
        });
        found
    }

    /// Attribute search where the rendered attribute value matches `pattern`.
    pub fn search_regex(&self, key: &str, pattern: &Regex) -> Vec<TreeNode> {
        self.search(key, |value| pattern.is_match(&value.to_string()))
    }

    /// Independent copy of this subtree. The copy has no parent.
    pub fn deep_clone(&self) -> TreeNode {
        self.deep_clone_with(&mut CloneMemo::new())
    }

    pub(crate) fn deep_clone_with(&self, memo: &mut CloneMemo) -> TreeNode {
        let key = Arc::as_ptr(&self.inner) as usize;
        if let Some(Value::Tree(copy)) = memo.get(&key) {
            return copy.clone();
        }
        let copy = TreeNode::with_kind(self.kind().clone(), self.name());
        memo.insert(key, Value::Tree(copy.clone()));

        // attributes may point back at this node
        let (attributes, text) = {
            let source = self.inner.state.read();
            (source.attributes.clone(), source.text.clone())
        };
        let attributes = attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.deep_clone_with(memo)))
            .collect();
        {
            let mut target = copy.inner.state.write();
            target.attributes = attributes;
            target.text = text;
        }
        for child in self.children() {
            let child_copy = child.deep_clone_with(memo);
            child_copy.inner.state.write().parent = Arc::downgrade(&copy.inner);
            copy.inner.state.write().children.push(child_copy);
        }
        copy
    }

    pub fn snapshot(&self) -> TreeSnapshot {
        let (name, attributes, text) = {
            let state = self.inner.state.read();
            let attributes = state
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), v.to_json()))
                .collect();
            (state.name.clone(), attributes, state.text.clone())
        };
        TreeSnapshot {
            kind: self.kind().clone(),
            name,
            attributes,
            text,
            children: self.children().iter().map(TreeNode::snapshot).collect(),
        }
    }

    pub fn from_snapshot(snapshot: &TreeSnapshot) -> TreeNode {
        let node = TreeNode::with_kind(snapshot.kind.clone(), snapshot.name.clone());
        {
            let mut state = node.inner.state.write();
            state.attributes = snapshot
                .attributes
                .iter()
                .map(|(k, v)| (k.clone(), Value::from_json(v)))
                .collect();
            state.text = snapshot.text.clone();
        }
        for child in &snapshot.children {
            let child = TreeNode::from_snapshot(child);
            child.inner.state.write().parent = Arc::downgrade(&node.inner);
            node.inner.state.write().children.push(child);
        }
        node
    }

    pub fn structurally_equal(&self, other: &TreeNode) -> bool {
        self.snapshot() == other.snapshot()
    }
}

impl fmt::Debug for TreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.read_recursive();
        f.debug_struct("TreeNode")
            .field("kind", &self.inner.kind)
            .field("name", &state.name)
            .field("attributes", &state.attributes.len())
            .field("children", &state.children.len())
            .finish()
    }
}

/// Plain-data image of a subtree. Attribute maps are ordered so two snapshots
/// of equal trees serialize identically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub kind: NodeKind,
    pub name: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub children: Vec<TreeSnapshot>,
}
