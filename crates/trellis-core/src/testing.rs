use std::cell::{Ref, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::host::{HostHandle, HostOp, MemoryHost};
use crate::node::{AttrValue, Event, Node};
use crate::platform::Scheduler;
use crate::root::{mount, RootHandle};
use crate::runtime::Runtime;
use crate::Error;

/// Scheduler that only counts how often a tick was requested.
#[derive(Debug, Default)]
pub struct CountingScheduler {
    ticks: AtomicUsize,
}

impl CountingScheduler {
    pub fn requests(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

impl Scheduler for CountingScheduler {
    fn request_tick(&self) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
    }
}

/// Headless harness for exercising component trees in tests.
///
/// `RenderTestRule` owns an in-memory host and a runtime with a counting
/// scheduler, mounts content into a `root` container, and exposes helpers
/// for firing events and flushing deferred work.
pub struct RenderTestRule {
    host: Rc<RefCell<MemoryHost>>,
    scheduler: Arc<CountingScheduler>,
    runtime: Runtime,
    container: HostHandle,
    root: Option<RootHandle>,
}

impl RenderTestRule {
    const MAX_TICKS: usize = 64;

    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        let host = Rc::new(RefCell::new(MemoryHost::new()));
        let container = host.borrow_mut().create_container("root");
        let scheduler = Arc::new(CountingScheduler::default());
        let runtime = Runtime::new(Rc::clone(&host), scheduler.clone(), config);
        Self {
            host,
            scheduler,
            runtime,
            container,
            root: None,
        }
    }

    /// Mounts `node` on first use and reconciles against it afterwards.
    pub fn set_content(&mut self, node: impl Into<Node>) -> Result<(), Error> {
        match self.root.as_mut() {
            Some(root) => root.update(node),
            None => {
                self.root = Some(mount(&self.runtime, node, self.container)?);
                Ok(())
            }
        }
    }

    /// Runs one tick worth of passive effects and deferred tasks.
    pub fn flush_effects(&mut self) -> Result<(), Error> {
        self.runtime.run_deferred()
    }

    /// Flushes ticks until nothing is queued.
    pub fn pump_until_idle(&mut self) -> Result<(), Error> {
        for _ in 0..Self::MAX_TICKS {
            if !self.runtime.has_deferred_work() {
                break;
            }
            self.runtime.run_deferred()?;
        }
        Ok(())
    }

    pub fn unmount(&mut self) -> Result<(), Error> {
        match self.root.as_mut() {
            Some(root) => {
                let outcome = root.unmount();
                self.root = None;
                outcome
            }
            None => Ok(()),
        }
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn host(&self) -> Ref<'_, MemoryHost> {
        self.host.borrow()
    }

    pub fn shared_host(&self) -> Rc<RefCell<MemoryHost>> {
        Rc::clone(&self.host)
    }

    pub fn container(&self) -> HostHandle {
        self.container
    }

    pub fn root_node(&self) -> Option<HostHandle> {
        self.root.as_ref().and_then(RootHandle::host_node)
    }

    /// Text content of the whole container.
    pub fn text(&self) -> String {
        self.host.borrow().text_content(self.container)
    }

    pub fn dump(&self) -> String {
        self.host.borrow().dump_tree(self.container)
    }

    pub fn take_ops(&self) -> Vec<HostOp> {
        self.host.borrow_mut().take_log()
    }

    pub fn tick_requests(&self) -> usize {
        self.scheduler.requests()
    }

    pub fn find(&self, key: &str, value: impl Into<AttrValue>) -> Option<HostHandle> {
        self.host
            .borrow()
            .find_by_attribute(self.container, key, &value.into())
    }

    /// Fires `event` on `handle`. Returns whether a listener was bound.
    pub fn fire(&self, handle: HostHandle, event: Event) -> anyhow::Result<bool> {
        MemoryHost::emit(&self.host, handle, event)
    }

    /// Clicks the element whose `id` attribute is `id`.
    pub fn click(&self, id: &str) -> anyhow::Result<()> {
        let handle = self
            .find("id", id)
            .ok_or_else(|| anyhow::anyhow!("no element with id `{id}`"))?;
        if self.fire(handle, Event::new("click"))? {
            Ok(())
        } else {
            Err(anyhow::anyhow!("`{id}` has no click listener"))
        }
    }
}

impl Default for RenderTestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` against a fresh [`RenderTestRule`].
pub fn run_test_render<R>(f: impl FnOnce(&mut RenderTestRule) -> R) -> R {
    let mut rule = RenderTestRule::new();
    f(&mut rule)
}
