//! Update dispatch, rendering, and the commit batch.
//!
//! Every state change funnels through [`dispatch`]. A per-instance depth
//! counter tells the outermost dispatch apart from ones raised while that
//! instance is already rendering; nested ones only apply their update and
//! mark the instance dirty, and the outermost one re-renders until the
//! instance settles. Dispatches that arrive while any other render or
//! effect flush is running are queued and picked up by the operation that
//! is already in progress before it returns.

use std::mem;
use std::rc::Rc;

use crate::hooks::{Cleanup, EffectKind, EffectScope, Scope};
use crate::host::HostError;
use crate::instance::{DepthGuard, Instance, Lifecycle, PendingUpdate, RecoveryGuard};
use crate::node::Node;
use crate::reconcile::{Context, Mounted};
use crate::runtime::{Deferred, RuntimeInner};
use crate::Error;

pub(crate) fn dispatch(instance: &Rc<Instance>, update: Option<PendingUpdate>) -> Result<(), Error> {
    match instance.runtime() {
        Some(runtime) => runtime.dispatch(instance, update),
        None => Ok(()),
    }
}

/// Whether `instance` sits in the host tree: it was already mounted, or every
/// instance between it and a mounted one committed in this batch.
fn is_attached(instance: &Rc<Instance>, committed: &[Rc<Instance>]) -> bool {
    let mut cursor = Rc::clone(instance);
    loop {
        if cursor.is_mounted() {
            return true;
        }
        match cursor.parent() {
            Some(parent) if committed.iter().any(|done| Rc::ptr_eq(done, &parent)) => {
                cursor = parent;
            }
            _ => return false,
        }
    }
}

/// Marks the runtime busy for as long as an outermost operation runs.
struct BusyGuard<'a>(&'a RuntimeInner);

impl<'a> BusyGuard<'a> {
    fn enter(runtime: &'a RuntimeInner) -> Self {
        runtime.busy.set(runtime.busy.get() + 1);
        Self(runtime)
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.busy.set(self.0.busy.get().saturating_sub(1));
    }
}

impl RuntimeInner {
    pub(crate) fn is_busy(&self) -> bool {
        self.busy.get() > 0
    }

    fn schedule_render(&self, instance: &Rc<Instance>) {
        self.pending.borrow_mut().push_back(Rc::downgrade(instance));
    }

    fn next_pending(&self) -> Option<Rc<Instance>> {
        loop {
            let next = self.pending.borrow_mut().pop_front()?;
            if let Some(instance) = next.upgrade() {
                return Some(instance);
            }
        }
    }

    pub(crate) fn dispatch(
        self: &Rc<Self>,
        instance: &Rc<Instance>,
        update: Option<PendingUpdate>,
    ) -> Result<(), Error> {
        match instance.lifecycle() {
            Lifecycle::Destroyed => {
                log::warn!(
                    "ignoring update for destroyed `{}` #{}",
                    instance.name(),
                    instance.id()
                );
                return Ok(());
            }
            Lifecycle::Unmounting => {
                log::debug!("ignoring update for unmounting `{}`", instance.name());
                return Ok(());
            }
            _ => {}
        }
        if let Some(update) = update {
            instance.enqueue(update);
        }
        let guard = DepthGuard::enter(instance);
        instance.apply_updates();
        instance.mark_dirty();
        if !guard.is_outermost() {
            log::debug!(
                "coalesced update for `{}` #{} into the running render",
                instance.name(),
                instance.id()
            );
            return Ok(());
        }
        drop(guard);
        self.schedule_render(instance);
        if self.is_busy() {
            log::debug!("deferred update for `{}` until the current batch settles", instance.name());
            return Ok(());
        }
        log::debug!("dispatch to `{}` #{}", instance.name(), instance.id());
        self.run_batch(|_| Ok(()))
    }

    /// Runs `seed`, then renders every queued instance and runs layout
    /// effects until nothing is left, then hands passive effects to the
    /// scheduler.
    pub(crate) fn run_batch(
        self: &Rc<Self>,
        seed: impl FnOnce(&Rc<Self>) -> Result<(), Error>,
    ) -> Result<(), Error> {
        let outcome = {
            let _busy = BusyGuard::enter(self);
            seed(self).and_then(|()| self.settle())
        };
        if outcome.is_err() && !self.is_busy() {
            self.salvage_batch();
        }
        self.schedule_passive_effects();
        outcome
    }

    /// After an unhandled failure, instances whose output reached the host
    /// tree still finish their commit and run their layout effects; their
    /// passive effects stay queued for the next tick. Instances first mounted
    /// into a subtree that was never attached are dropped with it.
    fn salvage_batch(self: &Rc<Self>) {
        let (committed, visited) = {
            let mut batch = self.batch.borrow_mut();
            (mem::take(&mut batch.committed), mem::take(&mut batch.visited))
        };
        let attached =
            |instance: &Rc<Instance>| instance.is_active() && is_attached(instance, &committed);
        let finished: Vec<Rc<Instance>> = committed
            .iter()
            .filter(|instance| attached(*instance))
            .cloned()
            .collect();
        let kept: Vec<Rc<Instance>> = visited
            .into_iter()
            .filter(|instance| attached(instance))
            .collect();
        self.batch.borrow_mut().visited = kept;
        if let Err(err) = self.apply_imperatives() {
            log::error!("imperative update after a failed batch dropped: {err}");
        }
        for instance in finished {
            instance.finish_commit();
            if let Err(err) = self.run_effects(&instance, EffectKind::Layout) {
                log::error!("layout effect after a failed batch dropped: {err}");
            }
        }
    }

    fn settle(self: &Rc<Self>) -> Result<(), Error> {
        let mut rounds = 0;
        loop {
            while let Some(instance) = self.next_pending() {
                let ready = instance.is_active()
                    && instance.is_dirty()
                    && instance.with_rendition(|rendition| rendition.is_some());
                if ready {
                    self.update_instance(&instance)?;
                }
            }
            self.apply_imperatives()?;
            let committed = mem::take(&mut self.batch.borrow_mut().committed);
            if committed.is_empty() {
                if self.pending.borrow().is_empty() {
                    return Ok(());
                }
                continue;
            }
            rounds += 1;
            if rounds > self.config.max_render_passes {
                // layout effects keep scheduling renders that commit again
                return Err(Error::RenderLoop {
                    component: committed
                        .last()
                        .map(|instance| instance.name().to_owned())
                        .unwrap_or_default(),
                    passes: rounds - 1,
                });
            }
            self.run_layout_effects(committed)?;
        }
    }

    fn apply_imperatives(&self) -> Result<(), Error> {
        let queued = mem::take(&mut self.batch.borrow_mut().imperatives);
        for (handle, name, value) in queued {
            match self.apply_imperative(handle, &name, value) {
                Ok(()) => {}
                Err(Error::Host(HostError::Unsupported { operation })) => {
                    log::warn!("host ignored `{name}` on {handle:?}: `{operation}` unsupported");
                }
                Err(Error::Host(HostError::Missing { .. })) => {
                    log::debug!("skipped `{name}` on {handle:?}; node already removed");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn run_layout_effects(self: &Rc<Self>, committed: Vec<Rc<Instance>>) -> Result<(), Error> {
        for instance in committed {
            if !instance.is_active() {
                continue;
            }
            instance.finish_commit();
            if let Err(err) = self.run_effects(&instance, EffectKind::Layout) {
                self.recover(&instance, err)?;
            }
        }
        Ok(())
    }

    fn schedule_passive_effects(&self) {
        if self.is_busy() {
            return;
        }
        let visited = mem::take(&mut self.batch.borrow_mut().visited);
        let mut scheduled = false;
        for instance in visited {
            if instance.is_active() && instance.has_pending_effects(EffectKind::Passive) {
                self.deferred
                    .borrow_mut()
                    .push_back(Deferred::Effects(Rc::downgrade(&instance)));
                scheduled = true;
            }
        }
        if scheduled {
            self.request_tick();
        }
    }

    /// Flushes the passive effects and tasks queued before this call.
    pub(crate) fn run_deferred(self: &Rc<Self>) -> Result<(), Error> {
        if self.is_busy() {
            return Ok(());
        }
        let queued: Vec<Deferred> = self.deferred.borrow_mut().drain(..).collect();
        if queued.is_empty() {
            return Ok(());
        }
        self.run_batch(|runtime| {
            let mut queued = queued.into_iter();
            while let Some(job) = queued.next() {
                let outcome = match job {
                    Deferred::Effects(instance) => match instance.upgrade() {
                        Some(instance) if instance.is_active() => runtime
                            .run_effects(&instance, EffectKind::Passive)
                            .or_else(|err| runtime.recover(&instance, err)),
                        _ => Ok(()),
                    },
                    Deferred::Task(task) => {
                        task();
                        Ok(())
                    }
                };
                if let Err(err) = outcome {
                    let mut deferred = runtime.deferred.borrow_mut();
                    for (offset, job) in queued.enumerate() {
                        deferred.insert(offset, job);
                    }
                    return Err(err);
                }
            }
            Ok(())
        })
    }

    /// Renders a mounted instance and reconciles its rendition in place.
    /// Failures go to the nearest error handler.
    pub(crate) fn update_instance(self: &Rc<Self>, instance: &Rc<Instance>) -> Result<(), Error> {
        match self.rerender(instance) {
            Ok(()) => Ok(()),
            Err(err) => self.recover(instance, err),
        }
    }

    fn rerender(self: &Rc<Self>, instance: &Rc<Instance>) -> Result<(), Error> {
        let guard = DepthGuard::enter(instance);
        instance.apply_updates();
        if let Some(err) = instance.take_failure() {
            instance.clear_dirty();
            return Err(err);
        }
        let forced = instance.take_forced();
        if instance.is_mounted() && !forced && !instance.allows_render() {
            instance.clear_dirty();
            log::debug!("`{}` declined to render", instance.name());
            return Ok(());
        }
        instance.set_lifecycle(Lifecycle::Updating);
        let node = self.render(instance)?;
        let mut rendition = instance
            .take_rendition()
            .ok_or(Error::Host(HostError::Unresolved))?;
        let outcome = self.reconcile(Context::owned_by(instance), &mut rendition, node);
        instance.set_rendition(rendition);
        outcome?;
        self.committed(instance);
        drop(guard);
        Ok(())
    }

    /// First render of a new instance. The rendition is left detached for
    /// the caller to insert.
    pub(crate) fn mount_instance(self: &Rc<Self>, instance: &Rc<Instance>) -> Result<(), Error> {
        let outcome = {
            let _guard = DepthGuard::enter(instance);
            instance.set_lifecycle(Lifecycle::Mounting);
            self.render(instance).and_then(|node| {
                let rendition = self.mount_node(Context::owned_by(instance), node)?;
                instance.set_rendition(rendition);
                self.committed(instance);
                Ok(())
            })
        };
        match outcome {
            Ok(()) => Ok(()),
            Err(err) => self.recover(instance, err),
        }
    }

    fn committed(&self, instance: &Rc<Instance>) {
        instance.seal_hooks();
        self.batch
            .borrow_mut()
            .committed
            .push(Rc::clone(instance));
        // updated by a descendant while its rendition was reconciled
        if instance.is_dirty() {
            self.schedule_render(instance);
        }
    }

    /// Calls the view until it stops updating its own state.
    fn render(self: &Rc<Self>, instance: &Rc<Instance>) -> Result<Node, Error> {
        self.batch.borrow_mut().visited.push(Rc::clone(instance));
        let props = instance.props();
        let children = instance.children();
        let limit = self.config.max_render_passes;
        for pass in 1..=limit {
            instance.clear_dirty();
            let node = {
                let mut hooks = instance.hooks.borrow_mut();
                hooks.begin();
                let output = {
                    let mut scope = Scope::new(&mut hooks, instance, &children);
                    (instance.def.view)(&mut scope, (*props).as_any())
                };
                let node = output.map_err(|err| Error::from_view(instance.name(), err))?;
                hooks
                    .finish()
                    .map_err(|mismatch| mismatch.into_error(instance.name()))?;
                node
            };
            if let Some(err) = instance.take_failure() {
                return Err(err);
            }
            if !instance.is_dirty() {
                return Ok(node);
            }
            log::debug!(
                "`{}` updated itself while rendering; starting pass {}",
                instance.name(),
                pass + 1
            );
        }
        Err(Error::RenderLoop {
            component: instance.name().to_owned(),
            passes: limit,
        })
    }

    /// Runs the due effects of one kind: every due cleanup first, newest
    /// first, then the bodies in registration order.
    pub(crate) fn run_effects(&self, instance: &Rc<Instance>, kind: EffectKind) -> Result<(), Error> {
        let mut due = instance.hooks.borrow_mut().take_due(kind);
        if due.is_empty() {
            return Ok(());
        }
        for effect in due.iter_mut().rev() {
            if let Some(cleanup) = effect.cleanup.take() {
                self.run_cleanup(instance, cleanup);
            }
        }
        let scope = EffectScope::new(instance.host_node());
        let mut due = due.into_iter();
        while let Some(effect) = due.next() {
            match (effect.body)(&scope) {
                Ok(cleanup) => instance
                    .hooks
                    .borrow_mut()
                    .store_cleanup(effect.index, cleanup),
                Err(err) => {
                    let mut hooks = instance.hooks.borrow_mut();
                    hooks.forget_deps(effect.index);
                    for skipped in due {
                        hooks.forget_deps(skipped.index);
                    }
                    return Err(Error::from_effect(instance.name(), err));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn run_cleanup(&self, instance: &Instance, cleanup: Cleanup) {
        if let Err(source) = cleanup.run() {
            let err = Error::Cleanup {
                component: instance.name().to_owned(),
                source,
            };
            log::error!("{err}");
        }
    }

    /// Hands `err` to the nearest error handler and mounts its replacement
    /// where the failing instance's output was. If the replacement fails to
    /// mount, the next handler up gets that failure. Without a handler the
    /// error keeps travelling up.
    pub(crate) fn recover(self: &Rc<Self>, instance: &Rc<Instance>, err: Error) -> Result<(), Error> {
        instance.hooks.borrow_mut().discard_pending();
        instance.clear_dirty();
        let mut err = err;
        let mut boundary = instance.find_error_handler();
        while let Some((owner, handler)) = boundary {
            log::warn!(
                "`{}` #{} failed, showing the output of `{}`'s error handler: {err}",
                instance.name(),
                instance.id(),
                owner.name()
            );
            let replacement = handler(&err);
            let mounted = {
                let _recovering = RecoveryGuard::enter(&owner);
                self.mount_node(Context::owned_by(instance), replacement)
            };
            match mounted {
                Ok(fresh) => return self.show_fallback(instance, fresh),
                Err(failure) => {
                    log::warn!("error handler output of `{}` failed: {failure}", owner.name());
                    err = failure;
                    boundary = owner.enclosing_error_handler();
                }
            }
        }
        Err(err)
    }

    fn show_fallback(&self, instance: &Rc<Instance>, fresh: Mounted) -> Result<(), Error> {
        if let Some(old) = instance.take_rendition() {
            let old_handle = old.host_handle();
            self.unmount(&old);
            self.replace_child(instance.host_parent(), fresh.host_handle()?, old_handle?)?;
        }
        instance.set_rendition(fresh);
        self.batch
            .borrow_mut()
            .committed
            .push(Rc::clone(instance));
        Ok(())
    }
}
