use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};

use crate::component::{AnyProps, ComponentDef};
use crate::dispatch;
use crate::hooks::{EffectKind, ErrorHandlerFn, HookSlots, RenderPredicate};
use crate::host::HostHandle;
use crate::node::{ComponentNode, Key, Node};
use crate::reconcile::Mounted;
use crate::runtime::{RuntimeHandle, RuntimeInner};
use crate::Error;

/// Identifies an instance within the runtime that mounted it.
pub type InstanceId = usize;

/// An instance with an error handler, paired with that handler.
pub(crate) type Boundary = (Rc<Instance>, ErrorHandlerFn);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Mounting,
    Committed,
    Updating,
    Unmounting,
    Destroyed,
}

pub(crate) type PendingUpdate = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// Live state behind one mounted component.
pub(crate) struct Instance {
    id: InstanceId,
    pub(crate) def: Rc<ComponentDef>,
    key: Option<Key>,
    runtime: RuntimeHandle,
    parent: Option<Weak<Instance>>,
    host_parent: HostHandle,
    props: RefCell<Rc<dyn AnyProps>>,
    children: RefCell<Rc<[Node]>>,
    pub(crate) hooks: RefCell<HookSlots>,
    updates: RefCell<VecDeque<PendingUpdate>>,
    depth: Cell<usize>,
    lifecycle: Cell<Lifecycle>,
    mounted: Cell<bool>,
    dirty: Cell<bool>,
    forced: Cell<bool>,
    failure: RefCell<Option<Error>>,
    recovering: Cell<bool>,
    error_handler: RefCell<Option<ErrorHandlerFn>>,
    render_decision: RefCell<Option<RenderPredicate>>,
    rendition: RefCell<Option<Mounted>>,
}

impl Instance {
    pub(crate) fn new(
        id: InstanceId,
        node: ComponentNode,
        parent: Option<&Rc<Instance>>,
        host_parent: HostHandle,
        runtime: RuntimeHandle,
    ) -> Rc<Self> {
        Rc::new(Self {
            id,
            def: node.def,
            key: node.key,
            runtime,
            parent: parent.map(Rc::downgrade),
            host_parent,
            props: RefCell::new(node.props),
            children: RefCell::new(node.children),
            hooks: RefCell::new(HookSlots::default()),
            updates: RefCell::new(VecDeque::new()),
            depth: Cell::new(0),
            lifecycle: Cell::new(Lifecycle::Uninitialized),
            mounted: Cell::new(false),
            dirty: Cell::new(false),
            forced: Cell::new(node.force),
            failure: RefCell::new(None),
            recovering: Cell::new(false),
            error_handler: RefCell::new(None),
            render_decision: RefCell::new(None),
            rendition: RefCell::new(None),
        })
    }

    pub(crate) fn id(&self) -> InstanceId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.def.name
    }

    pub(crate) fn key(&self) -> Option<Key> {
        self.key
    }

    pub(crate) fn runtime(&self) -> Option<Rc<RuntimeInner>> {
        self.runtime.upgrade()
    }

    pub(crate) fn parent(&self) -> Option<Rc<Instance>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn host_parent(&self) -> HostHandle {
        self.host_parent
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.get()
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: Lifecycle) {
        self.lifecycle.set(lifecycle);
    }

    /// False once teardown has started.
    pub(crate) fn is_active(&self) -> bool {
        !matches!(
            self.lifecycle.get(),
            Lifecycle::Unmounting | Lifecycle::Destroyed
        )
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.mounted.get()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty.get()
    }

    pub(crate) fn mark_dirty(&self) {
        self.dirty.set(true);
    }

    pub(crate) fn clear_dirty(&self) {
        self.dirty.set(false);
    }

    pub(crate) fn force(&self) {
        self.forced.set(true);
    }

    pub(crate) fn take_forced(&self) -> bool {
        self.forced.replace(false)
    }

    pub(crate) fn props(&self) -> Rc<dyn AnyProps> {
        Rc::clone(&self.props.borrow())
    }

    pub(crate) fn children(&self) -> Rc<[Node]> {
        Rc::clone(&self.children.borrow())
    }

    /// Takes the inputs of a new invocation at the same position. Returns
    /// whether the instance has to render for them.
    pub(crate) fn receive(&self, node: ComponentNode) -> bool {
        let same = self.props.borrow().same_props(&*node.props)
            && *self.children.borrow() == node.children;
        if !same {
            *self.props.borrow_mut() = node.props;
            *self.children.borrow_mut() = node.children;
        }
        if node.force {
            self.forced.set(true);
        }
        !same || node.force
    }

    pub(crate) fn enqueue(&self, update: PendingUpdate) {
        self.updates.borrow_mut().push_back(update);
    }

    /// Runs queued update functions. A failing update is kept and raised by
    /// the next render of this instance.
    pub(crate) fn apply_updates(&self) {
        loop {
            let next = self.updates.borrow_mut().pop_front();
            let Some(update) = next else {
                break;
            };
            if let Err(err) = update() {
                let mut failure = self.failure.borrow_mut();
                if failure.is_none() {
                    *failure = Some(Error::from_view(self.name(), err));
                }
            }
        }
    }

    pub(crate) fn take_failure(&self) -> Option<Error> {
        self.failure.borrow_mut().take()
    }

    pub(crate) fn clear_updates(&self) {
        self.updates.borrow_mut().clear();
        self.failure.borrow_mut().take();
    }

    pub(crate) fn set_error_handler(&self, handler: ErrorHandlerFn) {
        *self.error_handler.borrow_mut() = Some(handler);
    }

    /// Nearest error handler, starting with this instance.
    pub(crate) fn find_error_handler(self: &Rc<Self>) -> Option<Boundary> {
        Self::boundary_from(Some(Rc::clone(self)))
    }

    /// Nearest error handler above this instance.
    pub(crate) fn enclosing_error_handler(&self) -> Option<Boundary> {
        Self::boundary_from(self.parent())
    }

    /// Walks up from `cursor`. A boundary whose replacement is being mounted
    /// ends the walk: failures inside the replacement belong to the code
    /// mounting it.
    fn boundary_from(mut cursor: Option<Rc<Instance>>) -> Option<Boundary> {
        while let Some(instance) = cursor {
            if instance.recovering.get() {
                return None;
            }
            let handler = instance.error_handler.borrow().clone();
            if let Some(handler) = handler {
                return Some((instance, handler));
            }
            cursor = instance.parent();
        }
        None
    }

    pub(crate) fn set_render_decision(&self, predicate: RenderPredicate) {
        *self.render_decision.borrow_mut() = Some(predicate);
    }

    pub(crate) fn allows_render(&self) -> bool {
        let predicate = self.render_decision.borrow().clone();
        match predicate {
            Some(predicate) => predicate(self.props().as_any()),
            None => true,
        }
    }

    pub(crate) fn with_rendition<R>(&self, f: impl FnOnce(Option<&Mounted>) -> R) -> R {
        f(self.rendition.borrow().as_ref())
    }

    pub(crate) fn take_rendition(&self) -> Option<Mounted> {
        self.rendition.borrow_mut().take()
    }

    pub(crate) fn set_rendition(&self, rendition: Mounted) {
        *self.rendition.borrow_mut() = Some(rendition);
    }

    pub(crate) fn host_node(&self) -> Option<HostHandle> {
        self.rendition
            .borrow()
            .as_ref()
            .and_then(|rendition| rendition.host_handle().ok())
    }

    pub(crate) fn has_pending_effects(&self, kind: EffectKind) -> bool {
        self.hooks.borrow().has_pending(kind)
    }

    pub(crate) fn seal_hooks(&self) {
        self.hooks.borrow_mut().seal();
    }

    /// Marks the current rendition as committed and points refs at it.
    pub(crate) fn finish_commit(&self) {
        self.mounted.set(true);
        self.lifecycle.set(Lifecycle::Committed);
        self.hooks.borrow().attach_refs(self.host_node());
    }
}

/// Counts nested dispatches against one instance for as long as it lives.
pub(crate) struct DepthGuard<'a> {
    instance: &'a Instance,
    depth: usize,
}

impl<'a> DepthGuard<'a> {
    pub(crate) fn enter(instance: &'a Instance) -> Self {
        let depth = instance.depth.get() + 1;
        instance.depth.set(depth);
        Self { instance, depth }
    }

    pub(crate) fn is_outermost(&self) -> bool {
        self.depth == 1
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.instance
            .depth
            .set(self.instance.depth.get().saturating_sub(1));
    }
}

/// Marks a boundary while its handler's replacement is mounted.
pub(crate) struct RecoveryGuard<'a>(&'a Instance);

impl<'a> RecoveryGuard<'a> {
    pub(crate) fn enter(boundary: &'a Instance) -> Self {
        boundary.recovering.set(true);
        Self(boundary)
    }
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.0.recovering.set(false);
    }
}

/// Weak handle to a mounted component.
#[derive(Clone)]
pub struct InstanceHandle {
    instance: Weak<Instance>,
}

impl InstanceHandle {
    pub(crate) fn new(instance: &Rc<Instance>) -> Self {
        Self {
            instance: Rc::downgrade(instance),
        }
    }

    /// Runs `update` as part of a dispatch to this instance and re-renders
    /// it. Errors from `update` go to the nearest error handler.
    pub fn dispatch(
        &self,
        update: impl FnOnce() -> anyhow::Result<()> + 'static,
    ) -> Result<(), Error> {
        match self.instance.upgrade() {
            Some(instance) => dispatch::dispatch(&instance, Some(Box::new(update))),
            None => Ok(()),
        }
    }

    /// Re-renders the instance, ignoring its render decision.
    pub fn force_update(&self) -> Result<(), Error> {
        match self.instance.upgrade() {
            Some(instance) => {
                instance.force();
                dispatch::dispatch(&instance, None)
            }
            None => Ok(()),
        }
    }

    pub fn lifecycle(&self) -> Option<Lifecycle> {
        self.instance.upgrade().map(|instance| instance.lifecycle())
    }

    pub fn is_mounted(&self) -> bool {
        self.instance
            .upgrade()
            .is_some_and(|instance| instance.is_mounted() && instance.is_active())
    }

    pub fn host_node(&self) -> Option<HostHandle> {
        self.instance
            .upgrade()
            .and_then(|instance| instance.host_node())
    }

    pub fn id(&self) -> Option<InstanceId> {
        self.instance.upgrade().map(|instance| instance.id())
    }
}

impl std::fmt::Debug for InstanceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.instance.upgrade() {
            Some(instance) => f
                .debug_struct("InstanceHandle")
                .field("name", &instance.name())
                .field("id", &instance.id())
                .field("lifecycle", &instance.lifecycle())
                .finish(),
            None => f.write_str("InstanceHandle(dropped)"),
        }
    }
}
