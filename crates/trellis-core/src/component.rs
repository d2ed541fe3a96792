//! Component definitions and the factories views use to invoke them.

use std::any::Any;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::collections::map::HashMap;
use crate::hooks::Scope;
use crate::node::{ComponentNode, Node};
use crate::Error;

pub(crate) type ViewFn = dyn Fn(&mut Scope<'_>, &dyn Any) -> anyhow::Result<Node>;

/// Type-erased props with structural equality.
pub(crate) trait AnyProps: Any {
    fn as_any(&self) -> &dyn Any;
    fn same_props(&self, other: &dyn AnyProps) -> bool;
}

impl<P: PartialEq + 'static> AnyProps for P {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_props(&self, other: &dyn AnyProps) -> bool {
        other
            .as_any()
            .downcast_ref::<P>()
            .is_some_and(|other| other == self)
    }
}

/// A named view function. Identity is the allocation, not the name.
pub struct ComponentDef {
    pub(crate) name: String,
    pub(crate) view: Box<ViewFn>,
}

impl fmt::Debug for ComponentDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentDef")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Typed handle for creating nodes of one component.
pub struct ComponentFactory<P> {
    def: Rc<ComponentDef>,
    _props: PhantomData<fn(P)>,
}

impl<P> Clone for ComponentFactory<P> {
    fn clone(&self) -> Self {
        Self {
            def: Rc::clone(&self.def),
            _props: PhantomData,
        }
    }
}

impl<P> fmt::Debug for ComponentFactory<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentFactory")
            .field(&self.def.name)
            .finish()
    }
}

impl<P: PartialEq + 'static> ComponentFactory<P> {
    pub fn create(&self, props: P) -> ComponentNode {
        ComponentNode::new(Rc::clone(&self.def), Rc::new(props))
    }

    pub fn with_children<I>(&self, props: P, children: I) -> ComponentNode
    where
        I: IntoIterator,
        I::Item: Into<Node>,
    {
        self.create(props).children(children)
    }

    /// Component descriptor matched by `key` among its siblings.
    pub fn keyed<K: Hash + ?Sized>(&self, key: &K, props: P) -> ComponentNode {
        self.create(props).key(key)
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Whether both factories came from the same `define` call.
    pub fn same_definition<Q>(&self, other: &ComponentFactory<Q>) -> bool {
        Rc::ptr_eq(&self.def, &other.def)
    }
}

/// Defines a component from a view function.
///
/// The view receives a [`Scope`] for hooks and passed-in children plus the
/// props of the current invocation, and returns the node to reconcile.
pub fn define<P, F>(name: impl Into<String>, view: F) -> ComponentFactory<P>
where
    P: PartialEq + 'static,
    F: Fn(&mut Scope<'_>, &P) -> anyhow::Result<Node> + 'static,
{
    let name = name.into();
    let label = name.clone();
    let erased = move |scope: &mut Scope<'_>, props: &dyn Any| -> anyhow::Result<Node> {
        let props = props
            .downcast_ref::<P>()
            .ok_or_else(|| anyhow::anyhow!("props of `{label}` have an unexpected type"))?;
        view(scope, props)
    };
    ComponentFactory {
        def: Rc::new(ComponentDef {
            name,
            view: Box::new(erased),
        }),
        _props: PhantomData,
    }
}

/// Name-indexed set of definitions; a name may only be registered once.
#[derive(Default)]
pub struct ComponentRegistry {
    entries: HashMap<String, Rc<ComponentDef>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define<P, F>(
        &mut self,
        name: impl Into<String>,
        view: F,
    ) -> Result<ComponentFactory<P>, Error>
    where
        P: PartialEq + 'static,
        F: Fn(&mut Scope<'_>, &P) -> anyhow::Result<Node> + 'static,
    {
        let name = name.into();
        if self.entries.contains_key(&name) {
            return Err(Error::DuplicateDefinition { name });
        }
        let factory = define(name.clone(), view);
        self.entries.insert(name, Rc::clone(&factory.def));
        Ok(factory)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
