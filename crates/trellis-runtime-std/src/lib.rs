//! Standard runtime services backed by Rust's `std` library.
//!
//! [`StdScheduler`] records tick requests in an atomic flag and can wake an
//! event loop through a registered waker. [`StdRuntime`] bundles it with a
//! [`trellis_core::Runtime`] and drives deferred work until the tree is idle.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use trellis_core::{Error, HostAdapter, Runtime, RuntimeConfig, RuntimeHandle, Scheduler};

type Waker = Arc<dyn Fn() + Send + Sync + 'static>;

/// Scheduler that remembers tick requests until the event loop takes them.
pub struct StdScheduler {
    tick_requested: AtomicBool,
    tick_waker: RwLock<Option<Waker>>,
}

impl StdScheduler {
    pub fn new() -> Self {
        Self {
            tick_requested: AtomicBool::new(false),
            tick_waker: RwLock::new(None),
        }
    }

    /// Returns whether a tick has been requested since the last call.
    pub fn take_tick_request(&self) -> bool {
        self.tick_requested.swap(false, Ordering::SeqCst)
    }

    /// Registers a waker invoked whenever a tick is requested.
    pub fn set_tick_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        *self
            .tick_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(waker));
    }

    pub fn clear_tick_waker(&self) {
        *self
            .tick_waker
            .write()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }

    fn wake(&self) {
        let waker = self
            .tick_waker
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(waker) = waker {
            waker();
        }
    }
}

impl Default for StdScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StdScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdScheduler")
            .field("tick_requested", &self.tick_requested.load(Ordering::SeqCst))
            .finish()
    }
}

impl Scheduler for StdScheduler {
    fn request_tick(&self) {
        self.tick_requested.store(true, Ordering::SeqCst);
        self.wake();
    }
}

/// A runtime wired to a [`StdScheduler`].
#[derive(Clone)]
pub struct StdRuntime {
    scheduler: Arc<StdScheduler>,
    runtime: Runtime,
}

impl StdRuntime {
    /// Default tick budget for [`StdRuntime::run_until_idle`].
    pub const MAX_TICKS: usize = 128;

    /// Creates a runtime for `host` configured from the environment.
    pub fn new<H: HostAdapter + 'static>(host: Rc<RefCell<H>>) -> Self {
        Self::with_config(host, RuntimeConfig::from_env())
    }

    pub fn with_config<H: HostAdapter + 'static>(
        host: Rc<RefCell<H>>,
        config: RuntimeConfig,
    ) -> Self {
        let scheduler = Arc::new(StdScheduler::default());
        let runtime = Runtime::new(host, scheduler.clone(), config);
        Self { scheduler, runtime }
    }

    pub fn runtime(&self) -> Runtime {
        self.runtime.clone()
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn scheduler(&self) -> Arc<StdScheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Returns whether a tick has been requested since the last call.
    pub fn take_tick_request(&self) -> bool {
        self.scheduler.take_tick_request()
    }

    pub fn set_tick_waker(&self, waker: impl Fn() + Send + Sync + 'static) {
        self.scheduler.set_tick_waker(waker);
    }

    pub fn clear_tick_waker(&self) {
        self.scheduler.clear_tick_waker();
    }

    /// Runs one tick if one was requested or work is queued. Returns whether
    /// anything ran.
    pub fn tick(&self) -> Result<bool, Error> {
        let requested = self.scheduler.take_tick_request();
        if !requested && !self.runtime.has_deferred_work() {
            return Ok(false);
        }
        self.runtime.run_deferred()?;
        Ok(true)
    }

    /// Ticks until no work is left or [`Self::MAX_TICKS`] ticks have run.
    /// Returns the number of ticks.
    pub fn run_until_idle(&self) -> Result<usize, Error> {
        let mut ticks = 0;
        while ticks < Self::MAX_TICKS && self.tick()? {
            ticks += 1;
        }
        if self.runtime.has_deferred_work() {
            log::warn!("runtime still busy after {ticks} ticks; effects keep rescheduling");
        }
        Ok(ticks)
    }
}

impl fmt::Debug for StdRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdRuntime")
            .field("scheduler", &self.scheduler)
            .field("runtime", &self.runtime.handle())
            .finish()
    }
}
