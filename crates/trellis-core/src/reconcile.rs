//! Diffing node descriptors against what is already mounted.

use std::cell::RefCell;
use std::mem;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::collections::map::HashMap;
use crate::host::{HostError, HostHandle, UnbindToken};
use crate::instance::Instance;
use crate::node::{is_imperative, AttrValue, ComponentNode, Element, Key, Listener, Node};
use crate::runtime::RuntimeInner;
use crate::Error;

/// Where a subtree is being reconciled.
#[derive(Clone, Copy)]
pub(crate) struct Context<'a> {
    owner: Option<&'a Rc<Instance>>,
    host_parent: HostHandle,
}

impl<'a> Context<'a> {
    pub(crate) fn root(container: HostHandle) -> Self {
        Self {
            owner: None,
            host_parent: container,
        }
    }

    pub(crate) fn owned_by(instance: &'a Rc<Instance>) -> Self {
        Self {
            owner: Some(instance),
            host_parent: instance.host_parent(),
        }
    }

    fn within(self, host_parent: HostHandle) -> Self {
        Self {
            owner: self.owner,
            host_parent,
        }
    }
}

/// The mounted counterpart of a [`Node`].
pub(crate) enum Mounted {
    Nothing { handle: HostHandle },
    Text { value: String, handle: HostHandle },
    Element(MountedElement),
    Component(Rc<Instance>),
}

pub(crate) struct MountedElement {
    pub(crate) tag: String,
    pub(crate) key: Option<Key>,
    pub(crate) handle: HostHandle,
    pub(crate) attributes: IndexMap<String, AttrValue>,
    pub(crate) listeners: IndexMap<String, Binding>,
    pub(crate) children: Vec<Mounted>,
}

/// A host binding whose listener can be swapped without rebinding.
pub(crate) struct Binding {
    slot: Rc<RefCell<Listener>>,
    pub(crate) token: UnbindToken,
}

impl Mounted {
    /// Host node this subtree renders to; components resolve through their
    /// rendition.
    pub(crate) fn host_handle(&self) -> Result<HostHandle, HostError> {
        match self {
            Mounted::Nothing { handle } | Mounted::Text { handle, .. } => Ok(*handle),
            Mounted::Element(element) => Ok(element.handle),
            Mounted::Component(instance) => instance.host_node().ok_or(HostError::Unresolved),
        }
    }

    pub(crate) fn key(&self) -> Option<Key> {
        match self {
            Mounted::Element(element) => element.key,
            Mounted::Component(instance) => instance.key(),
            Mounted::Nothing { .. } | Mounted::Text { .. } => None,
        }
    }

    /// Whether `node` can be reconciled into this subtree instead of
    /// replacing it.
    fn matches(&self, node: &Node) -> bool {
        if self.key() != node.key() {
            return false;
        }
        match (self, node) {
            (Mounted::Nothing { .. }, Node::Nothing) => true,
            (Mounted::Text { .. }, Node::Text { .. }) => true,
            (Mounted::Element(mounted), Node::Element(element)) => mounted.tag == element.tag,
            (Mounted::Component(instance), Node::Component(component)) => {
                Rc::ptr_eq(&instance.def, &component.def)
            }
            _ => false,
        }
    }
}

fn trampoline(slot: &Rc<RefCell<Listener>>) -> Listener {
    let slot = Rc::clone(slot);
    Listener::new(move |event| {
        let current = slot.borrow().clone();
        current.call(event)
    })
}

type Salvage = (Error, Option<Mounted>);

impl RuntimeInner {
    /// Builds host nodes for `node`. The returned subtree is detached.
    pub(crate) fn mount_node(self: &Rc<Self>, ctx: Context<'_>, node: Node) -> Result<Mounted, Error> {
        match node {
            Node::Nothing => Ok(Mounted::Nothing {
                handle: self.create_placeholder()?,
            }),
            Node::Text { value } => {
                let handle = self.create_text_node(&value)?;
                Ok(Mounted::Text { value, handle })
            }
            Node::Element(element) => self.mount_element(ctx, element).map(Mounted::Element),
            Node::Component(component) => {
                let instance = Instance::new(
                    self.next_instance_id(),
                    component,
                    ctx.owner,
                    ctx.host_parent,
                    self.handle(),
                );
                log::debug!("mounting `{}` #{}", instance.name(), instance.id());
                self.mount_instance(&instance)?;
                Ok(Mounted::Component(instance))
            }
        }
    }

    fn mount_element(self: &Rc<Self>, ctx: Context<'_>, element: Element) -> Result<MountedElement, Error> {
        let Element {
            tag,
            key,
            attributes,
            listeners,
            children,
        } = element;
        let handle = self.create_node(&tag)?;
        let mut mounted = MountedElement {
            tag,
            key,
            handle,
            attributes: IndexMap::new(),
            listeners: IndexMap::new(),
            children: Vec::with_capacity(children.len()),
        };
        let outcome = self
            .diff_attributes(&mut mounted, attributes)
            .and_then(|()| self.diff_listeners(&mut mounted, listeners))
            .and_then(|()| {
                let ctx = ctx.within(handle);
                for (index, child) in children.into_iter().enumerate() {
                    let child = self.mount_node(ctx, child)?;
                    let child_handle = child.host_handle();
                    mounted.children.push(child);
                    self.insert_child(handle, child_handle?, index)?;
                }
                Ok(())
            });
        match outcome {
            Ok(()) => Ok(mounted),
            Err(err) => {
                self.unmount_element(&mounted);
                Err(err)
            }
        }
    }

    /// Brings `mounted` in line with `node`, reusing host nodes where the
    /// kinds agree.
    pub(crate) fn reconcile(
        self: &Rc<Self>,
        ctx: Context<'_>,
        mounted: &mut Mounted,
        node: Node,
    ) -> Result<(), Error> {
        if !mounted.matches(&node) {
            return self.replace(ctx, mounted, node);
        }
        match (mounted, node) {
            (Mounted::Text { value, handle }, Node::Text { value: next }) => {
                if *value != next {
                    self.set_text_content(*handle, &next)?;
                    *value = next;
                }
                Ok(())
            }
            (Mounted::Element(element), Node::Element(next)) => {
                self.reconcile_element(ctx, element, next)
            }
            (Mounted::Component(instance), Node::Component(next)) => {
                self.reconcile_component(instance, next)
            }
            _ => Ok(()),
        }
    }

    /// Mounts `node`, tears the old subtree down, then swaps the host nodes.
    fn replace(self: &Rc<Self>, ctx: Context<'_>, mounted: &mut Mounted, node: Node) -> Result<(), Error> {
        log::debug!("replacing subtree with `{}`", node.kind_name());
        let fresh = self.mount_node(ctx, node)?;
        let new_handle = fresh.host_handle()?;
        let old_handle = mounted.host_handle()?;
        let old = mem::replace(mounted, fresh);
        self.unmount(&old);
        self.replace_child(ctx.host_parent, new_handle, old_handle)
    }

    fn reconcile_component(
        self: &Rc<Self>,
        instance: &Rc<Instance>,
        next: ComponentNode,
    ) -> Result<(), Error> {
        if instance.receive(next) || instance.is_dirty() {
            self.update_instance(instance)
        } else {
            log::debug!("`{}` #{} unchanged, skipping", instance.name(), instance.id());
            Ok(())
        }
    }

    fn reconcile_element(
        self: &Rc<Self>,
        ctx: Context<'_>,
        mounted: &mut MountedElement,
        next: Element,
    ) -> Result<(), Error> {
        let Element {
            key,
            attributes,
            listeners,
            children,
            ..
        } = next;
        mounted.key = key;
        self.diff_attributes(mounted, attributes)?;
        self.diff_listeners(mounted, listeners)?;
        self.reconcile_children(ctx.within(mounted.handle), mounted, children)
    }

    fn diff_attributes(
        &self,
        mounted: &mut MountedElement,
        next: IndexMap<String, AttrValue>,
    ) -> Result<(), Error> {
        for (name, value) in &next {
            if mounted.attributes.get(name) == Some(value) {
                continue;
            }
            if is_imperative(name, value) {
                if let Some(on) = value.as_bool() {
                    self.batch
                        .borrow_mut()
                        .imperatives
                        .push((mounted.handle, name.clone(), on));
                }
            } else {
                self.set_attribute(mounted.handle, name, value)?;
            }
        }
        for (name, value) in &mounted.attributes {
            if !next.contains_key(name) && !is_imperative(name, value) {
                self.remove_attribute(mounted.handle, name)?;
            }
        }
        mounted.attributes = next;
        Ok(())
    }

    fn diff_listeners(
        &self,
        mounted: &mut MountedElement,
        next: IndexMap<String, Listener>,
    ) -> Result<(), Error> {
        let stale: Vec<String> = mounted
            .listeners
            .keys()
            .filter(|event| !next.contains_key(*event))
            .cloned()
            .collect();
        for event in stale {
            if let Some(binding) = mounted.listeners.shift_remove(&event) {
                self.unbind_event(mounted.handle, &event, binding.token)?;
            }
        }
        for (event, listener) in next {
            if let Some(binding) = mounted.listeners.get(&event) {
                *binding.slot.borrow_mut() = listener;
                continue;
            }
            let slot = Rc::new(RefCell::new(listener));
            let token = self.bind_event(mounted.handle, &event, trampoline(&slot))?;
            mounted.listeners.insert(event, Binding { slot, token });
        }
        Ok(())
    }

    /// Keyed children match by key wherever they moved; unkeyed children
    /// match the unkeyed child at the same index.
    fn reconcile_children(
        self: &Rc<Self>,
        ctx: Context<'_>,
        mounted: &mut MountedElement,
        next: Vec<Node>,
    ) -> Result<(), Error> {
        let previous = mem::take(&mut mounted.children);
        let mut by_key: HashMap<Key, usize> = HashMap::new();
        for (position, child) in previous.iter().enumerate() {
            if let Some(key) = child.key() {
                by_key.entry(key).or_insert(position);
            }
        }
        let mut old: Vec<Option<Mounted>> = previous.into_iter().map(Some).collect();
        let mut work: Vec<(Node, Option<(usize, Mounted)>)> = Vec::with_capacity(next.len());
        for (index, node) in next.into_iter().enumerate() {
            let position = match node.key() {
                Some(key) => by_key.remove(&key),
                None => old
                    .get(index)
                    .and_then(Option::as_ref)
                    .filter(|child| child.key().is_none())
                    .map(|_| index),
            };
            let matched = position.and_then(|p| old[p].take().map(|child| (p, child)));
            work.push((node, matched));
        }

        // host order of the reused children before anything moves
        let mut survivors: Vec<(usize, HostHandle)> = Vec::new();
        for (_, matched) in &work {
            if let Some((position, child)) = matched {
                survivors.push((*position, child.host_handle()?));
            }
        }
        survivors.sort_unstable_by_key(|(position, _)| *position);
        let mut order: Vec<HostHandle> = survivors.into_iter().map(|(_, handle)| handle).collect();

        let mut stale = old.into_iter().flatten();
        while let Some(child) = stale.next() {
            if let Err(err) = self.discard(ctx.host_parent, &child) {
                mounted.children.extend(stale);
                mounted
                    .children
                    .extend(work.into_iter().filter_map(|(_, m)| m.map(|(_, child)| child)));
                return Err(err);
            }
        }

        let mut work = work.into_iter();
        let mut outcome = Ok(());
        for (index, (node, matched)) in work.by_ref().enumerate() {
            match self.place_child(ctx, &mut order, index, node, matched) {
                Ok(child) => mounted.children.push(child),
                Err((err, salvaged)) => {
                    mounted.children.extend(salvaged);
                    outcome = Err(err);
                    break;
                }
            }
        }
        if outcome.is_err() {
            mounted
                .children
                .extend(work.filter_map(|(_, matched)| matched.map(|(_, child)| child)));
        }
        outcome
    }

    /// Reconciles or mounts one child and moves its host node to `index`.
    /// `order` mirrors the host parent's child list.
    fn place_child(
        self: &Rc<Self>,
        ctx: Context<'_>,
        order: &mut Vec<HostHandle>,
        index: usize,
        node: Node,
        matched: Option<(usize, Mounted)>,
    ) -> Result<Mounted, Salvage> {
        let child = match matched {
            Some((_, mut child)) => {
                let before = match child.host_handle() {
                    Ok(handle) => handle,
                    Err(err) => return Err((err.into(), Some(child))),
                };
                if let Err(err) = self.reconcile(ctx, &mut child, node) {
                    return Err((err, Some(child)));
                }
                let after = match child.host_handle() {
                    Ok(handle) => handle,
                    Err(err) => return Err((err.into(), Some(child))),
                };
                if after != before {
                    if let Some(slot) = order.iter_mut().find(|handle| **handle == before) {
                        *slot = after;
                    }
                }
                child
            }
            None => self.mount_node(ctx, node).map_err(|err| (err, None))?,
        };
        let handle = match child.host_handle() {
            Ok(handle) => handle,
            Err(err) => return Err((err.into(), Some(child))),
        };
        let current = order.iter().position(|existing| *existing == handle);
        if current != Some(index) {
            if let Some(current) = current {
                order.remove(current);
            }
            order.insert(index.min(order.len()), handle);
            if let Err(err) = self.insert_child(ctx.host_parent, handle, index) {
                return Err((err, Some(child)));
            }
        }
        Ok(child)
    }

    fn discard(&self, parent: HostHandle, child: &Mounted) -> Result<(), Error> {
        let handle = child.host_handle()?;
        self.unmount(child);
        self.remove_child(parent, handle)
    }
}
