//! Immutable node descriptors produced by views.

use std::fmt;
use std::hash::Hash;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::component::{AnyProps, ComponentDef};
use crate::hash::hash_key;
use crate::host::HostHandle;

/// Hashed identity of a keyed node among its siblings.
pub type Key = u64;

/// Attribute names the host treats as commands instead of stored state.
pub const IMPERATIVE_ATTRIBUTES: [&str; 5] = ["focus", "blur", "click", "checked", "selected"];

pub(crate) fn is_imperative(name: &str, value: &AttrValue) -> bool {
    matches!(value, AttrValue::Bool(_)) && IMPERATIVE_ATTRIBUTES.contains(&name)
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl AttrValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            AttrValue::Bool(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrValue::Text(value) => f.write_str(value),
            AttrValue::Bool(value) => write!(f, "{value}"),
            AttrValue::Int(value) => write!(f, "{value}"),
            AttrValue::Float(value) => write!(f, "{value}"),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        AttrValue::Text(value.to_owned())
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        AttrValue::Text(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        AttrValue::Bool(value)
    }
}

impl From<i32> for AttrValue {
    fn from(value: i32) -> Self {
        AttrValue::Int(value.into())
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        AttrValue::Int(value)
    }
}

impl From<usize> for AttrValue {
    fn from(value: usize) -> Self {
        AttrValue::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for AttrValue {
    fn from(value: f64) -> Self {
        AttrValue::Float(value)
    }
}

/// Payload handed to listeners.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Event {
    name: String,
    target: Option<HostHandle>,
    value: Option<String>,
}

impl Event {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target: None,
            value: None,
        }
    }

    pub fn with_target(mut self, target: HostHandle) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> Option<HostHandle> {
        self.target
    }

    pub fn value(&self) -> Option<&str> {
        self.value.as_deref()
    }
}

type ListenerFn = dyn Fn(&Event) -> anyhow::Result<()>;

/// Event callback. Two listeners are equal only if they share the same closure.
#[derive(Clone)]
pub struct Listener(Rc<ListenerFn>);

impl Listener {
    pub fn new(f: impl Fn(&Event) -> anyhow::Result<()> + 'static) -> Self {
        Self(Rc::new(f))
    }

    pub fn call(&self, event: &Event) -> anyhow::Result<()> {
        (self.0)(event)
    }
}

impl PartialEq for Listener {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::addr_eq(Rc::as_ptr(&self.0), Rc::as_ptr(&other.0))
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Listener({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// A description of what should be on screen.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Node {
    #[default]
    Nothing,
    Text {
        value: String,
    },
    Element(Element),
    Component(ComponentNode),
}

impl Node {
    pub fn key(&self) -> Option<Key> {
        match self {
            Node::Element(element) => element.key,
            Node::Component(component) => component.key,
            Node::Nothing | Node::Text { .. } => None,
        }
    }

    pub fn kind_name(&self) -> &str {
        match self {
            Node::Nothing => "nothing",
            Node::Text { .. } => "text",
            Node::Element(element) => &element.tag,
            Node::Component(component) => component.name(),
        }
    }
}

pub fn nothing() -> Node {
    Node::Nothing
}

pub fn text(value: impl Into<String>) -> Node {
    Node::Text {
        value: value.into(),
    }
}

pub fn element(tag: impl Into<String>) -> Element {
    Element::new(tag)
}

impl From<&str> for Node {
    fn from(value: &str) -> Self {
        text(value)
    }
}

impl From<String> for Node {
    fn from(value: String) -> Self {
        text(value)
    }
}

impl<T: Into<Node>> From<Option<T>> for Node {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or_default()
    }
}

impl From<Element> for Node {
    fn from(value: Element) -> Self {
        Node::Element(value)
    }
}

impl From<ComponentNode> for Node {
    fn from(value: ComponentNode) -> Self {
        Node::Component(value)
    }
}

/// Host element descriptor. Attribute order is preserved for the host.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    pub(crate) tag: String,
    pub(crate) key: Option<Key>,
    pub(crate) attributes: IndexMap<String, AttrValue>,
    pub(crate) listeners: IndexMap<String, Listener>,
    pub(crate) children: Vec<Node>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            key: None,
            attributes: IndexMap::new(),
            listeners: IndexMap::new(),
            children: Vec::new(),
        }
    }

    pub fn key<K: Hash + ?Sized>(mut self, key: &K) -> Self {
        self.key = Some(hash_key(key));
        self
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    /// Shorthand for a boolean attribute such as `checked` or `focus`.
    pub fn flag(self, name: impl Into<String>, on: bool) -> Self {
        self.attr(name, AttrValue::Bool(on))
    }

    /// Binds `event` (`"click"`, `"input"`, ...). A leading `on` is dropped, so
    /// `on("onclick", ..)` and `on("click", ..)` are the same binding.
    pub fn on(
        mut self,
        event: &str,
        listener: impl Fn(&Event) -> anyhow::Result<()> + 'static,
    ) -> Self {
        let name = event.strip_prefix("on").unwrap_or(event).to_ascii_lowercase();
        self.listeners.insert(name, Listener::new(listener));
        self
    }

    pub fn listener(mut self, event: &str, listener: Listener) -> Self {
        let name = event.strip_prefix("on").unwrap_or(event).to_ascii_lowercase();
        self.listeners.insert(name, listener);
        self
    }

    pub fn child(mut self, child: impl Into<Node>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn attribute(&self, name: &str) -> Option<&AttrValue> {
        self.attributes.get(name)
    }

    pub fn child_nodes(&self) -> &[Node] {
        &self.children
    }
}

/// An invocation of a component with props and passed-in children.
#[derive(Clone)]
pub struct ComponentNode {
    pub(crate) def: Rc<ComponentDef>,
    pub(crate) props: Rc<dyn AnyProps>,
    pub(crate) children: Rc<[Node]>,
    pub(crate) key: Option<Key>,
    pub(crate) force: bool,
}

impl ComponentNode {
    pub(crate) fn new(def: Rc<ComponentDef>, props: Rc<dyn AnyProps>) -> Self {
        Self {
            def,
            props,
            children: Rc::from(Vec::new()),
            key: None,
            force: false,
        }
    }

    pub fn key<K: Hash + ?Sized>(mut self, key: &K) -> Self {
        self.key = Some(hash_key(key));
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        self.children = children.into_iter().map(Into::into).collect();
        self
    }

    /// Re-render even if props and children compare equal.
    pub fn force_update(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }
}

impl PartialEq for ComponentNode {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.def, &other.def)
            && self.key == other.key
            && self.props.same_props(&*other.props)
            && self.children == other.children
    }
}

impl fmt::Debug for ComponentNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentNode")
            .field("name", &self.def.name)
            .field("key", &self.key)
            .field("children", &self.children)
            .field("force", &self.force)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_children_flatten_to_nothing() {
        let tree: Node = element("ul")
            .child(None::<Node>)
            .child(Some("item"))
            .into();
        let Node::Element(list) = tree else {
            panic!("expected an element");
        };
        assert_eq!(list.child_nodes()[0], Node::Nothing);
        assert_eq!(list.child_nodes()[1], text("item"));
    }

    #[test]
    fn listener_equality_is_by_identity() {
        let shared = Listener::new(|_| Ok(()));
        let a: Node = element("button").listener("click", shared.clone()).into();
        let b: Node = element("button").listener("onClick", shared).into();
        let c: Node = element("button").on("click", |_| Ok(())).into();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn keys_are_structural() {
        let a: Node = element("li").key("first").into();
        let b: Node = element("li").key(&String::from("first")).into();
        assert_eq!(a.key(), b.key());
        assert!(text("x").key().is_none());
    }

    #[test]
    fn only_boolean_commands_are_imperative() {
        assert!(is_imperative("focus", &AttrValue::Bool(true)));
        assert!(!is_imperative("focus", &AttrValue::from("yes")));
        assert!(!is_imperative("title", &AttrValue::Bool(true)));
    }
}
