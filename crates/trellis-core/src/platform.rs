//! Platform hooks the runtime delegates to.
//!
//! The engine never sleeps or spawns threads itself. Passive effects and
//! deferred tasks are queued on the runtime, and the platform is asked for a
//! tick through [`Scheduler::request_tick`]. Whoever drives the platform loop
//! then calls [`Runtime::run_deferred`](crate::Runtime::run_deferred).

/// Requests ticks from the host platform.
///
/// Implementations must be safe to share with other threads so that an
/// event loop can be woken from outside the runtime's thread.
pub trait Scheduler: Send + Sync {
    /// Ask for `run_deferred` to be called soon. Repeated requests before the
    /// tick may be coalesced.
    fn request_tick(&self);
}

/// Scheduler that drops tick requests; the owner polls instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultScheduler;

impl Scheduler for DefaultScheduler {
    fn request_tick(&self) {}
}
