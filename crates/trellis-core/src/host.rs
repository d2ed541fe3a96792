//! The host tree contract and an in-memory host used by tests and demos.

use std::cell::RefCell;
use std::fmt::Write as _;

use indexmap::IndexMap;
use thiserror::Error;

use crate::collections::map::HashMap;
use crate::node::{AttrValue, Event, Listener};

/// Opaque reference to a node owned by the host tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostHandle(usize);

impl HostHandle {
    pub fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> usize {
        self.0
    }
}

/// Returned by [`HostAdapter::bind_event`]; hands the binding back on unbind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UnbindToken(u64);

impl UnbindToken {
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("host node {handle:?} missing")]
    Missing { handle: HostHandle },
    #[error("host node {child:?} is not a child of {parent:?}")]
    NotAChild {
        parent: HostHandle,
        child: HostHandle,
    },
    #[error("host does not support `{operation}`")]
    Unsupported { operation: &'static str },
    #[error("host tree is already borrowed")]
    Busy,
    #[error("component has no host node yet")]
    Unresolved,
}

/// Operations the engine needs from the platform tree.
///
/// Nodes created by the engine start detached. `insert_child` places a node
/// so that it ends at `index` among its siblings; a node that is already a
/// child of `parent` is moved, and indices past the end append.
/// `remove_child` and `replace_child` release the removed node together with
/// its descendants, so the engine never touches a removed handle again.
pub trait HostAdapter {
    fn create_node(&mut self, tag: &str) -> Result<HostHandle, HostError>;
    fn create_text_node(&mut self, value: &str) -> Result<HostHandle, HostError>;
    fn create_placeholder(&mut self) -> Result<HostHandle, HostError>;
    fn set_attribute(
        &mut self,
        handle: HostHandle,
        key: &str,
        value: &AttrValue,
    ) -> Result<(), HostError>;
    fn remove_attribute(&mut self, handle: HostHandle, key: &str) -> Result<(), HostError>;
    fn insert_child(
        &mut self,
        parent: HostHandle,
        child: HostHandle,
        index: usize,
    ) -> Result<(), HostError>;
    fn remove_child(&mut self, parent: HostHandle, child: HostHandle) -> Result<(), HostError>;
    fn replace_child(
        &mut self,
        parent: HostHandle,
        new_child: HostHandle,
        old_child: HostHandle,
    ) -> Result<(), HostError>;
    fn set_text_content(&mut self, handle: HostHandle, value: &str) -> Result<(), HostError>;
    fn bind_event(
        &mut self,
        handle: HostHandle,
        event: &str,
        listener: Listener,
    ) -> Result<UnbindToken, HostError>;
    fn unbind_event(&mut self, token: UnbindToken) -> Result<(), HostError>;

    /// Imperative attributes (`focus`, `blur`, `click`, `checked`, `selected`)
    /// are commands rather than state; hosts without such behaviour reject them.
    fn apply_imperative(
        &mut self,
        handle: HostHandle,
        name: &str,
        value: bool,
    ) -> Result<(), HostError> {
        let _ = (handle, name, value);
        Err(HostError::Unsupported {
            operation: "apply_imperative",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HostNodeKind {
    Element { tag: String },
    Text { value: String },
    Placeholder,
}

#[derive(Debug, Clone)]
pub struct HostNode {
    pub kind: HostNodeKind,
    pub attributes: IndexMap<String, AttrValue>,
    pub children: Vec<HostHandle>,
    pub parent: Option<HostHandle>,
    pub imperatives: Vec<(String, bool)>,
}

impl HostNode {
    fn new(kind: HostNodeKind) -> Self {
        Self {
            kind,
            attributes: IndexMap::new(),
            children: Vec::new(),
            parent: None,
            imperatives: Vec::new(),
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            HostNodeKind::Element { tag } => Some(tag),
            _ => None,
        }
    }
}

/// One recorded host mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum HostOp {
    CreateNode { handle: HostHandle, tag: String },
    CreateText { handle: HostHandle, value: String },
    CreatePlaceholder { handle: HostHandle },
    SetAttribute { handle: HostHandle, key: String, value: AttrValue },
    RemoveAttribute { handle: HostHandle, key: String },
    InsertChild { parent: HostHandle, child: HostHandle, index: usize },
    RemoveChild { parent: HostHandle, child: HostHandle },
    ReplaceChild { parent: HostHandle, new_child: HostHandle, old_child: HostHandle },
    SetText { handle: HostHandle, value: String },
    BindEvent { handle: HostHandle, event: String },
    UnbindEvent { handle: HostHandle, event: String },
    Imperative { handle: HostHandle, name: String, value: bool },
}

struct Binding {
    handle: HostHandle,
    event: String,
    listener: Listener,
}

/// Arena-backed host tree that records every mutation it receives.
#[derive(Default)]
pub struct MemoryHost {
    nodes: Vec<Option<HostNode>>,
    bindings: HashMap<UnbindToken, Binding>,
    next_token: u64,
    log: Vec<HostOp>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a detached element to mount into. Not recorded in the log.
    pub fn create_container(&mut self, tag: &str) -> HostHandle {
        self.alloc(HostNodeKind::Element {
            tag: tag.to_owned(),
        })
    }

    pub fn node(&self, handle: HostHandle) -> Option<&HostNode> {
        self.nodes.get(handle.0).and_then(Option::as_ref)
    }

    pub fn children(&self, handle: HostHandle) -> &[HostHandle] {
        self.node(handle)
            .map(|node| node.children.as_slice())
            .unwrap_or(&[])
    }

    /// Number of live nodes.
    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn log(&self) -> &[HostOp] {
        &self.log
    }

    pub fn take_log(&mut self) -> Vec<HostOp> {
        std::mem::take(&mut self.log)
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.len()
    }

    pub fn listener(&self, handle: HostHandle, event: &str) -> Option<Listener> {
        self.bindings
            .values()
            .find(|binding| binding.handle == handle && binding.event == event)
            .map(|binding| binding.listener.clone())
    }

    /// Invokes the listener bound for `event` on `handle`, if any. The host is
    /// released before the listener runs so it may trigger renders.
    pub fn emit(
        host: &RefCell<Self>,
        handle: HostHandle,
        event: Event,
    ) -> anyhow::Result<bool> {
        let listener = host.borrow().listener(handle, event.name());
        match listener {
            Some(listener) => {
                let event = event.with_target(handle);
                listener.call(&event)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Depth-first search below `root` for the first element whose attribute
    /// `key` equals `value`.
    pub fn find_by_attribute(
        &self,
        root: HostHandle,
        key: &str,
        value: &AttrValue,
    ) -> Option<HostHandle> {
        let node = self.node(root)?;
        if node.attributes.get(key) == Some(value) {
            return Some(root);
        }
        node.children
            .iter()
            .find_map(|child| self.find_by_attribute(*child, key, value))
    }

    /// Concatenated text of every text node below `root`.
    pub fn text_content(&self, root: HostHandle) -> String {
        let mut output = String::new();
        self.collect_text(root, &mut output);
        output
    }

    fn collect_text(&self, handle: HostHandle, output: &mut String) {
        let Some(node) = self.node(handle) else {
            return;
        };
        if let HostNodeKind::Text { value } = &node.kind {
            output.push_str(value);
        }
        for child in &node.children {
            self.collect_text(*child, output);
        }
    }

    pub fn dump_tree(&self, root: HostHandle) -> String {
        let mut output = String::new();
        self.dump_node(&mut output, root, 0);
        output
    }

    fn dump_node(&self, output: &mut String, handle: HostHandle, depth: usize) {
        let indent = "  ".repeat(depth);
        let Some(node) = self.node(handle) else {
            let _ = writeln!(output, "{indent}[{}] (missing)", handle.0);
            return;
        };
        match &node.kind {
            HostNodeKind::Element { tag } => {
                let _ = write!(output, "{indent}[{}] <{tag}", handle.0);
                for (key, value) in &node.attributes {
                    let _ = write!(output, " {key}=\"{value}\"");
                }
                let _ = writeln!(output, ">");
            }
            HostNodeKind::Text { value } => {
                let _ = writeln!(output, "{indent}[{}] {value:?}", handle.0);
            }
            HostNodeKind::Placeholder => {
                let _ = writeln!(output, "{indent}[{}] <!-- -->", handle.0);
            }
        }
        for child in &node.children {
            self.dump_node(output, *child, depth + 1);
        }
    }

    fn alloc(&mut self, kind: HostNodeKind) -> HostHandle {
        let handle = HostHandle(self.nodes.len());
        self.nodes.push(Some(HostNode::new(kind)));
        handle
    }

    fn node_mut(&mut self, handle: HostHandle) -> Result<&mut HostNode, HostError> {
        self.nodes
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(HostError::Missing { handle })
    }

    fn detach(&mut self, child: HostHandle) -> Result<(), HostError> {
        let parent = self.node_mut(child)?.parent.take();
        if let Some(parent) = parent {
            self.node_mut(parent)?.children.retain(|c| *c != child);
        }
        Ok(())
    }

    fn release(&mut self, handle: HostHandle) {
        let children = match self.nodes.get_mut(handle.0).and_then(Option::take) {
            Some(node) => node.children,
            None => return,
        };
        self.bindings.retain(|_, binding| binding.handle != handle);
        for child in children {
            self.release(child);
        }
    }

    fn ensure_child(&self, parent: HostHandle, child: HostHandle) -> Result<(), HostError> {
        let node = self.node(child).ok_or(HostError::Missing { handle: child })?;
        if node.parent == Some(parent) {
            Ok(())
        } else {
            Err(HostError::NotAChild { parent, child })
        }
    }
}

impl HostAdapter for MemoryHost {
    fn create_node(&mut self, tag: &str) -> Result<HostHandle, HostError> {
        let handle = self.alloc(HostNodeKind::Element {
            tag: tag.to_owned(),
        });
        self.log.push(HostOp::CreateNode {
            handle,
            tag: tag.to_owned(),
        });
        Ok(handle)
    }

    fn create_text_node(&mut self, value: &str) -> Result<HostHandle, HostError> {
        let handle = self.alloc(HostNodeKind::Text {
            value: value.to_owned(),
        });
        self.log.push(HostOp::CreateText {
            handle,
            value: value.to_owned(),
        });
        Ok(handle)
    }

    fn create_placeholder(&mut self) -> Result<HostHandle, HostError> {
        let handle = self.alloc(HostNodeKind::Placeholder);
        self.log.push(HostOp::CreatePlaceholder { handle });
        Ok(handle)
    }

    fn set_attribute(
        &mut self,
        handle: HostHandle,
        key: &str,
        value: &AttrValue,
    ) -> Result<(), HostError> {
        self.node_mut(handle)?
            .attributes
            .insert(key.to_owned(), value.clone());
        self.log.push(HostOp::SetAttribute {
            handle,
            key: key.to_owned(),
            value: value.clone(),
        });
        Ok(())
    }

    fn remove_attribute(&mut self, handle: HostHandle, key: &str) -> Result<(), HostError> {
        self.node_mut(handle)?.attributes.shift_remove(key);
        self.log.push(HostOp::RemoveAttribute {
            handle,
            key: key.to_owned(),
        });
        Ok(())
    }

    fn insert_child(
        &mut self,
        parent: HostHandle,
        child: HostHandle,
        index: usize,
    ) -> Result<(), HostError> {
        self.node_mut(parent)?;
        self.detach(child)?;
        let siblings = &mut self.node_mut(parent)?.children;
        let index = index.min(siblings.len());
        siblings.insert(index, child);
        self.node_mut(child)?.parent = Some(parent);
        self.log.push(HostOp::InsertChild {
            parent,
            child,
            index,
        });
        Ok(())
    }

    fn remove_child(&mut self, parent: HostHandle, child: HostHandle) -> Result<(), HostError> {
        self.ensure_child(parent, child)?;
        self.detach(child)?;
        self.release(child);
        self.log.push(HostOp::RemoveChild { parent, child });
        Ok(())
    }

    fn replace_child(
        &mut self,
        parent: HostHandle,
        new_child: HostHandle,
        old_child: HostHandle,
    ) -> Result<(), HostError> {
        self.ensure_child(parent, old_child)?;
        self.detach(new_child)?;
        let siblings = &mut self.node_mut(parent)?.children;
        let Some(position) = siblings.iter().position(|c| *c == old_child) else {
            return Err(HostError::NotAChild {
                parent,
                child: old_child,
            });
        };
        siblings[position] = new_child;
        self.node_mut(new_child)?.parent = Some(parent);
        self.node_mut(old_child)?.parent = None;
        self.release(old_child);
        self.log.push(HostOp::ReplaceChild {
            parent,
            new_child,
            old_child,
        });
        Ok(())
    }

    fn set_text_content(&mut self, handle: HostHandle, value: &str) -> Result<(), HostError> {
        match &mut self.node_mut(handle)?.kind {
            HostNodeKind::Text { value: current } => {
                *current = value.to_owned();
            }
            _ => {
                return Err(HostError::Unsupported {
                    operation: "set_text_content on a non-text node",
                })
            }
        }
        self.log.push(HostOp::SetText {
            handle,
            value: value.to_owned(),
        });
        Ok(())
    }

    fn bind_event(
        &mut self,
        handle: HostHandle,
        event: &str,
        listener: Listener,
    ) -> Result<UnbindToken, HostError> {
        self.node_mut(handle)?;
        self.next_token += 1;
        let token = UnbindToken(self.next_token);
        self.bindings.insert(
            token,
            Binding {
                handle,
                event: event.to_owned(),
                listener,
            },
        );
        self.log.push(HostOp::BindEvent {
            handle,
            event: event.to_owned(),
        });
        Ok(token)
    }

    fn unbind_event(&mut self, token: UnbindToken) -> Result<(), HostError> {
        // released subtrees drop their bindings eagerly, so a missing token is fine
        if let Some(binding) = self.bindings.remove(&token) {
            self.log.push(HostOp::UnbindEvent {
                handle: binding.handle,
                event: binding.event,
            });
        }
        Ok(())
    }

    fn apply_imperative(
        &mut self,
        handle: HostHandle,
        name: &str,
        value: bool,
    ) -> Result<(), HostError> {
        self.node_mut(handle)?
            .imperatives
            .push((name.to_owned(), value));
        self.log.push(HostOp::Imperative {
            handle,
            name: name.to_owned(),
            value,
        });
        Ok(())
    }
}
