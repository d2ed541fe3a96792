use std::cell::{Cell, RefCell, RefMut};
use std::collections::VecDeque;
use std::rc::{Rc, Weak};
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::host::{HostAdapter, HostError, HostHandle, UnbindToken};
use crate::instance::{Instance, InstanceId};
use crate::node::{AttrValue, Listener};
use crate::platform::{DefaultScheduler, Scheduler};
use crate::Error;

pub(crate) enum Deferred {
    Effects(Weak<Instance>),
    Task(Box<dyn FnOnce() + 'static>),
}

/// Work collected while one outermost operation runs.
#[derive(Default)]
pub(crate) struct Batch {
    /// Instances in render order; passive effects flush in this order.
    pub(crate) visited: Vec<Rc<Instance>>,
    /// Instances whose rendition is in place, children before parents.
    pub(crate) committed: Vec<Rc<Instance>>,
    pub(crate) imperatives: Vec<(HostHandle, String, bool)>,
}

pub(crate) struct RuntimeInner {
    host: Rc<RefCell<dyn HostAdapter>>,
    scheduler: Arc<dyn Scheduler>,
    pub(crate) config: RuntimeConfig,
    pub(crate) busy: Cell<usize>,
    pub(crate) pending: RefCell<VecDeque<Weak<Instance>>>,
    pub(crate) deferred: RefCell<VecDeque<Deferred>>,
    pub(crate) batch: RefCell<Batch>,
    next_instance_id: Cell<InstanceId>,
}

impl RuntimeInner {
    fn new(
        host: Rc<RefCell<dyn HostAdapter>>,
        scheduler: Arc<dyn Scheduler>,
        config: RuntimeConfig,
    ) -> Self {
        Self {
            host,
            scheduler,
            config,
            busy: Cell::new(0),
            pending: RefCell::new(VecDeque::new()),
            deferred: RefCell::new(VecDeque::new()),
            batch: RefCell::new(Batch::default()),
            next_instance_id: Cell::new(1),
        }
    }

    pub(crate) fn handle(self: &Rc<Self>) -> RuntimeHandle {
        RuntimeHandle(Rc::downgrade(self))
    }

    pub(crate) fn next_instance_id(&self) -> InstanceId {
        let id = self.next_instance_id.get();
        self.next_instance_id.set(id + 1);
        id
    }

    pub(crate) fn request_tick(&self) {
        self.scheduler.request_tick();
    }

    pub(crate) fn enqueue_task(&self, task: Box<dyn FnOnce() + 'static>) {
        self.deferred.borrow_mut().push_back(Deferred::Task(task));
        self.request_tick();
    }

    pub(crate) fn has_deferred(&self) -> bool {
        !self.deferred.borrow().is_empty()
    }

    fn host(&self) -> Result<RefMut<'_, dyn HostAdapter + 'static>, HostError> {
        self.host.try_borrow_mut().map_err(|_| HostError::Busy)
    }

    fn trace(&self, op: std::fmt::Arguments<'_>) {
        if self.config.trace_mutations {
            log::trace!("host: {op}");
        }
    }

    pub(crate) fn create_node(&self, tag: &str) -> Result<HostHandle, Error> {
        let handle = self.host()?.create_node(tag)?;
        self.trace(format_args!("create <{tag}> as {handle:?}"));
        Ok(handle)
    }

    pub(crate) fn create_text_node(&self, value: &str) -> Result<HostHandle, Error> {
        let handle = self.host()?.create_text_node(value)?;
        self.trace(format_args!("create text {value:?} as {handle:?}"));
        Ok(handle)
    }

    pub(crate) fn create_placeholder(&self) -> Result<HostHandle, Error> {
        let handle = self.host()?.create_placeholder()?;
        self.trace(format_args!("create placeholder {handle:?}"));
        Ok(handle)
    }

    pub(crate) fn set_attribute(
        &self,
        handle: HostHandle,
        key: &str,
        value: &AttrValue,
    ) -> Result<(), Error> {
        self.host()?.set_attribute(handle, key, value)?;
        self.trace(format_args!("{handle:?}.{key} = {value}"));
        Ok(())
    }

    pub(crate) fn remove_attribute(&self, handle: HostHandle, key: &str) -> Result<(), Error> {
        self.host()?.remove_attribute(handle, key)?;
        self.trace(format_args!("{handle:?}.{key} removed"));
        Ok(())
    }

    pub(crate) fn insert_child(
        &self,
        parent: HostHandle,
        child: HostHandle,
        index: usize,
    ) -> Result<(), Error> {
        self.host()?.insert_child(parent, child, index)?;
        self.trace(format_args!("insert {child:?} into {parent:?} at {index}"));
        Ok(())
    }

    pub(crate) fn remove_child(&self, parent: HostHandle, child: HostHandle) -> Result<(), Error> {
        self.host()?.remove_child(parent, child)?;
        self.trace(format_args!("remove {child:?} from {parent:?}"));
        Ok(())
    }

    pub(crate) fn replace_child(
        &self,
        parent: HostHandle,
        new_child: HostHandle,
        old_child: HostHandle,
    ) -> Result<(), Error> {
        self.host()?.replace_child(parent, new_child, old_child)?;
        self.trace(format_args!(
            "replace {old_child:?} with {new_child:?} in {parent:?}"
        ));
        Ok(())
    }

    pub(crate) fn set_text_content(&self, handle: HostHandle, value: &str) -> Result<(), Error> {
        self.host()?.set_text_content(handle, value)?;
        self.trace(format_args!("{handle:?} text = {value:?}"));
        Ok(())
    }

    pub(crate) fn bind_event(
        &self,
        handle: HostHandle,
        event: &str,
        listener: Listener,
    ) -> Result<UnbindToken, Error> {
        let token = self.host()?.bind_event(handle, event, listener)?;
        self.trace(format_args!("bind {event} on {handle:?}"));
        Ok(token)
    }

    pub(crate) fn unbind_event(
        &self,
        handle: HostHandle,
        event: &str,
        token: UnbindToken,
    ) -> Result<(), Error> {
        self.host()?.unbind_event(token)?;
        self.trace(format_args!("unbind {event} on {handle:?}"));
        Ok(())
    }

    pub(crate) fn apply_imperative(
        &self,
        handle: HostHandle,
        name: &str,
        value: bool,
    ) -> Result<(), Error> {
        self.host()?.apply_imperative(handle, name, value)?;
        self.trace(format_args!("{name}({value}) on {handle:?}"));
        Ok(())
    }
}

/// Owns the host adapter, the scheduler, and every queue of one component
/// tree. Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

impl Runtime {
    pub fn new<H: HostAdapter + 'static>(
        host: Rc<RefCell<H>>,
        scheduler: Arc<dyn Scheduler>,
        config: RuntimeConfig,
    ) -> Self {
        let host: Rc<RefCell<dyn HostAdapter>> = host;
        Self {
            inner: Rc::new(RuntimeInner::new(host, scheduler, config)),
        }
    }

    /// Runtime with the polling scheduler and configuration from the
    /// environment.
    pub fn with_host<H: HostAdapter + 'static>(host: Rc<RefCell<H>>) -> Self {
        Self::new(host, Arc::new(DefaultScheduler), RuntimeConfig::from_env())
    }

    pub fn handle(&self) -> RuntimeHandle {
        self.inner.handle()
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Whether passive effects or deferred tasks are waiting for a tick.
    pub fn has_deferred_work(&self) -> bool {
        self.inner.has_deferred()
    }

    pub fn schedule_deferred(&self, task: impl FnOnce() + 'static) {
        self.inner.enqueue_task(Box::new(task));
    }

    /// Runs everything queued for the next tick. Work queued while running
    /// waits for the tick after.
    pub fn run_deferred(&self) -> Result<(), Error> {
        self.inner.run_deferred()
    }

    pub(crate) fn inner(&self) -> &Rc<RuntimeInner> {
        &self.inner
    }
}

/// Weak reference to a [`Runtime`]; every call is a no-op once it is gone.
#[derive(Clone)]
pub struct RuntimeHandle(Weak<RuntimeInner>);

impl RuntimeHandle {
    pub(crate) fn upgrade(&self) -> Option<Rc<RuntimeInner>> {
        self.0.upgrade()
    }

    pub fn schedule_deferred(&self, task: impl FnOnce() + 'static) {
        if let Some(inner) = self.0.upgrade() {
            inner.enqueue_task(Box::new(task));
        }
    }

    pub fn run_deferred(&self) -> Result<(), Error> {
        match self.0.upgrade() {
            Some(inner) => inner.run_deferred(),
            None => Ok(()),
        }
    }

    pub fn has_deferred_work(&self) -> bool {
        self.0
            .upgrade()
            .map(|inner| inner.has_deferred())
            .unwrap_or(false)
    }

    pub fn is_alive(&self) -> bool {
        self.0.strong_count() > 0
    }
}

impl std::fmt::Debug for RuntimeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RuntimeHandle")
            .field(&self.is_alive())
            .finish()
    }
}
