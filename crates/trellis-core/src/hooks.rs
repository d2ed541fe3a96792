//! Per-instance hook storage and the [`Scope`] views call hooks through.
//!
//! Slots are matched to hook calls purely by position. The first committed
//! render fixes the sequence; later renders must call the same hooks, with
//! the same value types, in the same order.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::dispatch;
use crate::host::HostHandle;
use crate::instance::{Instance, InstanceHandle};
use crate::node::Node;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    State,
    Effect,
    LayoutEffect,
    Memo,
    Ref,
    ErrorHandler,
    RenderDecision,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookKind::State => "state",
            HookKind::Effect => "effect",
            HookKind::LayoutEffect => "layout effect",
            HookKind::Memo => "memo",
            HookKind::Ref => "ref",
            HookKind::ErrorHandler => "error handler",
            HookKind::RenderDecision => "render decision",
        })
    }
}

/// When an effect runs relative to the commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    /// Synchronously after the host tree is updated, before control returns.
    Layout,
    /// Deferred to the runtime's next tick.
    Passive,
}

impl EffectKind {
    fn hook_kind(self) -> HookKind {
        match self {
            EffectKind::Layout => HookKind::LayoutEffect,
            EffectKind::Passive => HookKind::Effect,
        }
    }
}

trait DepValue: Any {
    fn as_any(&self) -> &dyn Any;
    fn same_value(&self, other: &dyn DepValue) -> bool;
}

impl<T: PartialEq + 'static> DepValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn same_value(&self, other: &dyn DepValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }
}

enum DepsRepr {
    Always,
    Once,
    Values(Box<dyn DepValue>),
}

/// Dependency list of an effect or memo.
pub struct Deps(DepsRepr);

impl Deps {
    /// Re-run after every render.
    pub fn always() -> Self {
        Deps(DepsRepr::Always)
    }

    /// Run after the first commit only.
    pub fn once() -> Self {
        Deps(DepsRepr::Once)
    }

    /// Re-run whenever `values` differs from the previous render's. Use a
    /// tuple for several values.
    pub fn on<T: PartialEq + 'static>(values: T) -> Self {
        Deps(DepsRepr::Values(Box::new(values)))
    }

    pub(crate) fn changed_since(&self, previous: Option<&Deps>) -> bool {
        let Some(previous) = previous else {
            return true;
        };
        match (&self.0, &previous.0) {
            (DepsRepr::Always, _) => true,
            (DepsRepr::Once, DepsRepr::Once) => false,
            (DepsRepr::Values(next), DepsRepr::Values(prev)) => !next.same_value(prev.as_ref()),
            _ => true,
        }
    }
}

impl fmt::Debug for Deps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            DepsRepr::Always => f.write_str("Deps::Always"),
            DepsRepr::Once => f.write_str("Deps::Once"),
            DepsRepr::Values(_) => f.write_str("Deps::Values(..)"),
        }
    }
}

type CleanupFn = Box<dyn FnOnce() -> anyhow::Result<()>>;

/// What an effect leaves behind to undo itself.
#[derive(Default)]
pub struct Cleanup(Option<CleanupFn>);

impl Cleanup {
    pub fn none() -> Self {
        Cleanup(None)
    }

    pub fn new(f: impl FnOnce() + 'static) -> Self {
        Cleanup(Some(Box::new(move || {
            f();
            Ok(())
        })))
    }

    pub fn fallible(f: impl FnOnce() -> anyhow::Result<()> + 'static) -> Self {
        Cleanup(Some(Box::new(f)))
    }

    pub fn is_none(&self) -> bool {
        self.0.is_none()
    }

    pub(crate) fn run(self) -> anyhow::Result<()> {
        match self.0 {
            Some(f) => f(),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cleanup").field(&self.0.is_some()).finish()
    }
}

/// Handed to effect bodies.
pub struct EffectScope {
    host_node: Option<HostHandle>,
}

impl EffectScope {
    pub(crate) fn new(host_node: Option<HostHandle>) -> Self {
        Self { host_node }
    }

    /// The host node the component currently renders to.
    pub fn host_node(&self) -> Option<HostHandle> {
        self.host_node
    }

    pub fn on_cleanup(&self, f: impl FnOnce() + 'static) -> Cleanup {
        Cleanup::new(f)
    }
}

pub(crate) type EffectBody = Box<dyn FnOnce(&EffectScope) -> anyhow::Result<Cleanup>>;
pub(crate) type ErrorHandlerFn = Rc<dyn Fn(&Error) -> Node>;
pub(crate) type RenderPredicate = Rc<dyn Fn(&dyn Any) -> bool>;

pub(crate) struct StateCell<T> {
    value: RefCell<T>,
}

impl<T: Clone> StateCell<T> {
    fn new(value: T) -> Self {
        Self {
            value: RefCell::new(value),
        }
    }

    fn get(&self) -> T {
        self.value.borrow().clone()
    }

    fn replace(&self, value: T) {
        *self.value.borrow_mut() = value;
    }
}

/// Schedules updates to one state slot.
pub struct Setter<T> {
    cell: Rc<StateCell<T>>,
    owner: Weak<Instance>,
}

impl<T> Clone for Setter<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
            owner: Weak::clone(&self.owner),
        }
    }
}

impl<T> PartialEq for Setter<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T> fmt::Debug for Setter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Setter").finish_non_exhaustive()
    }
}

impl<T: Clone + 'static> Setter<T> {
    pub fn set(&self, value: T) -> Result<(), Error> {
        self.try_update(move |_| Ok(value))
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T + 'static) -> Result<(), Error> {
        self.try_update(move |current| Ok(f(current)))
    }

    /// Like [`Setter::update`], but the update function may fail; the failure
    /// is reported to the owning component's nearest error handler.
    pub fn try_update(
        &self,
        f: impl FnOnce(&T) -> anyhow::Result<T> + 'static,
    ) -> Result<(), Error> {
        let Some(owner) = self.owner.upgrade() else {
            return Ok(());
        };
        let cell = Rc::clone(&self.cell);
        dispatch::dispatch(
            &owner,
            Some(Box::new(move || {
                let next = f(&cell.get())?;
                cell.replace(next);
                Ok(())
            })),
        )
    }

    /// The latest value, including updates not yet rendered.
    pub fn get(&self) -> T {
        self.cell.get()
    }
}

struct RefSlot<T> {
    current: RefCell<T>,
    node: Rc<Cell<Option<HostHandle>>>,
}

/// Mutable box that survives renders without scheduling any.
pub struct RefHandle<T> {
    inner: Rc<RefSlot<T>>,
}

impl<T> Clone for RefHandle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T> RefHandle<T> {
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.inner.current.borrow().clone()
    }

    pub fn set(&self, value: T) {
        *self.inner.current.borrow_mut() = value;
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.inner.current.borrow())
    }

    pub fn with_mut<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.inner.current.borrow_mut())
    }

    /// Host node of the owning component, set once it has committed.
    pub fn node(&self) -> Option<HostHandle> {
        self.inner.node.get()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

pub(crate) struct EffectCell {
    kind: EffectKind,
    deps: Option<Deps>,
    cleanup: Option<Cleanup>,
    pending: Option<EffectBody>,
}

pub(crate) enum Slot {
    State(Rc<dyn Any>),
    Effect(EffectCell),
    Memo {
        deps: Option<Deps>,
        value: Option<Rc<dyn Any>>,
    },
    Ref {
        value: Rc<dyn Any>,
        node: Rc<Cell<Option<HostHandle>>>,
    },
    ErrorHandler,
    RenderDecision,
}

impl Slot {
    fn kind(&self) -> HookKind {
        match self {
            Slot::State(_) => HookKind::State,
            Slot::Effect(cell) => cell.kind.hook_kind(),
            Slot::Memo { .. } => HookKind::Memo,
            Slot::Ref { .. } => HookKind::Ref,
            Slot::ErrorHandler => HookKind::ErrorHandler,
            Slot::RenderDecision => HookKind::RenderDecision,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Mismatch {
    pub(crate) slot: usize,
    pub(crate) expected: Option<HookKind>,
    pub(crate) found: Option<HookKind>,
}

impl Mismatch {
    pub(crate) fn into_error(self, component: &str) -> Error {
        Error::HookOrderMismatch {
            component: component.to_owned(),
            slot: self.slot,
            expected: self.expected,
            found: self.found,
        }
    }
}

/// Due effect pulled out of its slot so the body can run without holding
/// the slot store.
pub(crate) struct DueEffect {
    pub(crate) index: usize,
    pub(crate) cleanup: Option<Cleanup>,
    pub(crate) body: EffectBody,
}

#[derive(Default)]
pub(crate) struct HookSlots {
    slots: Vec<Slot>,
    cursor: usize,
    sealed: bool,
}

impl HookSlots {
    pub(crate) fn begin(&mut self) {
        self.cursor = 0;
    }

    fn claim(
        &mut self,
        kind: HookKind,
        create: impl FnOnce() -> Slot,
    ) -> Result<&mut Slot, Mismatch> {
        let index = self.cursor;
        if let Some(existing) = self.slots.get(index) {
            let recorded = existing.kind();
            if recorded != kind {
                return Err(Mismatch {
                    slot: index,
                    expected: Some(recorded),
                    found: Some(kind),
                });
            }
        } else if self.sealed {
            return Err(Mismatch {
                slot: index,
                expected: None,
                found: Some(kind),
            });
        } else {
            self.slots.push(create());
        }
        self.cursor += 1;
        Ok(&mut self.slots[index])
    }

    /// Checks that this render consumed every slot the sequence fixed.
    pub(crate) fn finish(&mut self) -> Result<(), Mismatch> {
        if self.cursor < self.slots.len() {
            if self.sealed {
                return Err(Mismatch {
                    slot: self.cursor,
                    expected: Some(self.slots[self.cursor].kind()),
                    found: None,
                });
            }
            self.slots.truncate(self.cursor);
        }
        Ok(())
    }

    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn has_pending(&self, kind: EffectKind) -> bool {
        self.slots.iter().any(|slot| {
            matches!(slot, Slot::Effect(cell) if cell.kind == kind && cell.pending.is_some())
        })
    }

    pub(crate) fn take_due(&mut self, kind: EffectKind) -> Vec<DueEffect> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Effect(cell) if cell.kind == kind => {
                    cell.pending.take().map(|body| DueEffect {
                        index,
                        cleanup: cell.cleanup.take(),
                        body,
                    })
                }
                _ => None,
            })
            .collect()
    }

    pub(crate) fn store_cleanup(&mut self, index: usize, cleanup: Cleanup) {
        if let Some(Slot::Effect(cell)) = self.slots.get_mut(index) {
            cell.cleanup = Some(cleanup);
        }
    }

    /// Makes the effect at `index` run again after the next render.
    pub(crate) fn forget_deps(&mut self, index: usize) {
        if let Some(Slot::Effect(cell)) = self.slots.get_mut(index) {
            cell.deps = None;
        }
    }

    /// Drops effect bodies queued by a render that did not commit.
    pub(crate) fn discard_pending(&mut self) {
        for slot in &mut self.slots {
            if let Slot::Effect(cell) = slot {
                if cell.pending.take().is_some() {
                    cell.deps = None;
                }
            }
        }
    }

    /// Cleanups in teardown order: layout effects, then passive effects,
    /// each in reverse registration order.
    pub(crate) fn take_cleanups(&mut self) -> Vec<Cleanup> {
        let mut cleanups = Vec::new();
        for kind in [EffectKind::Layout, EffectKind::Passive] {
            for slot in self.slots.iter_mut().rev() {
                if let Slot::Effect(cell) = slot {
                    if cell.kind != kind {
                        continue;
                    }
                    cell.pending = None;
                    if let Some(cleanup) = cell.cleanup.take() {
                        cleanups.push(cleanup);
                    }
                }
            }
        }
        cleanups
    }

    pub(crate) fn attach_refs(&self, node: Option<HostHandle>) {
        for slot in &self.slots {
            if let Slot::Ref { node: cell, .. } = slot {
                cell.set(node);
            }
        }
    }
}

/// Hook context for one render of one component.
pub struct Scope<'a> {
    hooks: &'a mut HookSlots,
    instance: &'a Rc<Instance>,
    children: &'a [Node],
}

impl<'a> Scope<'a> {
    pub(crate) fn new(
        hooks: &'a mut HookSlots,
        instance: &'a Rc<Instance>,
        children: &'a [Node],
    ) -> Self {
        Self {
            hooks,
            instance,
            children,
        }
    }

    /// Children passed to this invocation.
    pub fn children(&self) -> &[Node] {
        self.children
    }

    pub fn component_name(&self) -> &str {
        self.instance.name()
    }

    /// Handle for scheduling updates to this instance from outside a hook.
    pub fn handle(&self) -> InstanceHandle {
        InstanceHandle::new(self.instance)
    }

    fn claim(&mut self, kind: HookKind, create: impl FnOnce() -> Slot) -> Result<&mut Slot, Error> {
        let instance: &Instance = self.instance;
        self.hooks
            .claim(kind, create)
            .map_err(|mismatch| mismatch.into_error(instance.name()))
    }

    fn type_mismatch(&self, kind: HookKind) -> Error {
        Mismatch {
            slot: self.hooks.cursor.saturating_sub(1),
            expected: Some(kind),
            found: Some(kind),
        }
        .into_error(self.instance.name())
    }

    pub fn use_state<T: Clone + 'static>(
        &mut self,
        init: impl FnOnce() -> T,
    ) -> Result<(T, Setter<T>), Error> {
        let stored = match self.claim(HookKind::State, || {
            Slot::State(Rc::new(StateCell::new(init())))
        })? {
            Slot::State(stored) => Rc::clone(stored),
            _ => return Err(self.type_mismatch(HookKind::State)),
        };
        let cell = stored
            .downcast::<StateCell<T>>()
            .map_err(|_| self.type_mismatch(HookKind::State))?;
        let setter = Setter {
            cell: Rc::clone(&cell),
            owner: Rc::downgrade(self.instance),
        };
        Ok((cell.get(), setter))
    }

    /// Runs `body` on the runtime's next tick after a commit whose `deps`
    /// changed.
    pub fn use_effect(
        &mut self,
        deps: Deps,
        body: impl FnOnce(&EffectScope) -> anyhow::Result<Cleanup> + 'static,
    ) -> Result<(), Error> {
        self.effect(EffectKind::Passive, deps, Box::new(body))
    }

    /// Runs `body` synchronously after the host tree is updated.
    pub fn use_layout_effect(
        &mut self,
        deps: Deps,
        body: impl FnOnce(&EffectScope) -> anyhow::Result<Cleanup> + 'static,
    ) -> Result<(), Error> {
        self.effect(EffectKind::Layout, deps, Box::new(body))
    }

    fn effect(&mut self, kind: EffectKind, deps: Deps, body: EffectBody) -> Result<(), Error> {
        let hook = kind.hook_kind();
        let Slot::Effect(cell) = self.claim(hook, || {
            Slot::Effect(EffectCell {
                kind,
                deps: None,
                cleanup: None,
                pending: None,
            })
        })?
        else {
            return Err(self.type_mismatch(hook));
        };
        // a later pass of the same render replaces a body that has not run yet
        if cell.pending.is_some() || deps.changed_since(cell.deps.as_ref()) {
            cell.deps = Some(deps);
            cell.pending = Some(body);
        }
        Ok(())
    }

    pub fn use_memo<T: 'static>(
        &mut self,
        deps: Deps,
        compute: impl FnOnce() -> T,
    ) -> Result<Rc<T>, Error> {
        let Slot::Memo {
            deps: previous,
            value,
        } = self.claim(HookKind::Memo, || Slot::Memo {
            deps: None,
            value: None,
        })?
        else {
            return Err(self.type_mismatch(HookKind::Memo));
        };
        let cached = match value {
            Some(stored) => match Rc::clone(stored).downcast::<T>() {
                Ok(cached) => Some(cached),
                Err(_) => None,
            },
            None => None,
        };
        if let Some(cached) = cached {
            if !deps.changed_since(previous.as_ref()) {
                return Ok(cached);
            }
        }
        let fresh = Rc::new(compute());
        *value = Some(Rc::clone(&fresh) as Rc<dyn Any>);
        *previous = Some(deps);
        Ok(fresh)
    }

    pub fn use_ref<T: 'static>(&mut self, init: impl FnOnce() -> T) -> Result<RefHandle<T>, Error> {
        let stored = match self.claim(HookKind::Ref, || {
            let node = Rc::new(Cell::new(None));
            let value: Rc<dyn Any> = Rc::new(RefSlot {
                current: RefCell::new(init()),
                node: Rc::clone(&node),
            });
            Slot::Ref { value, node }
        })? {
            Slot::Ref { value, .. } => Rc::clone(value),
            _ => return Err(self.type_mismatch(HookKind::Ref)),
        };
        let inner = stored
            .downcast::<RefSlot<T>>()
            .map_err(|_| self.type_mismatch(HookKind::Ref))?;
        Ok(RefHandle { inner })
    }

    /// Makes this instance an error boundary for its own failures and those
    /// of its descendants. `handler` returns the node to show instead.
    pub fn use_error_handler(
        &mut self,
        handler: impl Fn(&Error) -> Node + 'static,
    ) -> Result<(), Error> {
        self.claim(HookKind::ErrorHandler, || Slot::ErrorHandler)?;
        self.instance.set_error_handler(Rc::new(handler));
        Ok(())
    }

    /// Gates later renders: when `predicate` returns `false` for the incoming
    /// props, the render is skipped and the previous output kept.
    pub fn use_render_decision<P: 'static>(
        &mut self,
        predicate: impl Fn(&P) -> bool + 'static,
    ) -> Result<(), Error> {
        self.claim(HookKind::RenderDecision, || Slot::RenderDecision)?;
        self.instance
            .set_render_decision(Rc::new(move |props: &dyn Any| {
                props.downcast_ref::<P>().map_or(true, &predicate)
            }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deps_compare_by_value() {
        assert!(Deps::on(1).changed_since(None));
        assert!(!Deps::on((1, "a")).changed_since(Some(&Deps::on((1, "a")))));
        assert!(Deps::on((1, "a")).changed_since(Some(&Deps::on((2, "a")))));
        assert!(Deps::on(1u8).changed_since(Some(&Deps::on(1u16))));
        assert!(!Deps::once().changed_since(Some(&Deps::once())));
        assert!(Deps::always().changed_since(Some(&Deps::always())));
    }

    #[test]
    fn slots_reject_a_different_kind_at_the_same_position() {
        let mut hooks = HookSlots::default();
        hooks.begin();
        hooks.claim(HookKind::ErrorHandler, || Slot::ErrorHandler).unwrap();
        hooks.finish().unwrap();
        hooks.seal();

        hooks.begin();
        let mismatch = hooks
            .claim(HookKind::Memo, || Slot::ErrorHandler)
            .err()
            .unwrap();
        assert_eq!(mismatch.slot, 0);
        assert_eq!(mismatch.found, Some(HookKind::Memo));
    }

    #[test]
    fn sealed_slots_reject_extra_and_missing_hooks() {
        let mut hooks = HookSlots::default();
        hooks.begin();
        hooks.claim(HookKind::ErrorHandler, || Slot::ErrorHandler).unwrap();
        hooks.finish().unwrap();
        hooks.seal();

        hooks.begin();
        assert_eq!(
            hooks.finish(),
            Err(Mismatch {
                slot: 0,
                expected: Some(HookKind::ErrorHandler),
                found: None,
            })
        );

        hooks.begin();
        hooks.claim(HookKind::ErrorHandler, || Slot::ErrorHandler).unwrap();
        let extra = hooks
            .claim(HookKind::RenderDecision, || Slot::RenderDecision)
            .err()
            .unwrap();
        assert_eq!(extra.expected, None);
    }

    #[test]
    fn unsealed_slots_shrink_to_the_last_render() {
        let mut hooks = HookSlots::default();
        hooks.begin();
        hooks.claim(HookKind::ErrorHandler, || Slot::ErrorHandler).unwrap();
        hooks.claim(HookKind::RenderDecision, || Slot::RenderDecision).unwrap();
        hooks.begin();
        hooks.claim(HookKind::ErrorHandler, || Slot::ErrorHandler).unwrap();
        hooks.finish().unwrap();
        assert_eq!(hooks.len(), 1);
    }

    #[test]
    fn teardown_runs_layout_cleanups_first_in_reverse() {
        let order = Rc::new(RefCell::new(Vec::new()));
        let mut hooks = HookSlots::default();
        hooks.begin();
        for (label, kind) in [
            ("passive-0", EffectKind::Passive),
            ("layout-1", EffectKind::Layout),
            ("passive-2", EffectKind::Passive),
            ("layout-3", EffectKind::Layout),
        ] {
            let slot = hooks
                .claim(kind.hook_kind(), || {
                    Slot::Effect(EffectCell {
                        kind,
                        deps: None,
                        cleanup: None,
                        pending: None,
                    })
                })
                .unwrap();
            if let Slot::Effect(cell) = slot {
                let order = Rc::clone(&order);
                cell.cleanup = Some(Cleanup::new(move || order.borrow_mut().push(label)));
            }
        }

        for cleanup in hooks.take_cleanups() {
            cleanup.run().unwrap();
        }

        assert_eq!(
            *order.borrow(),
            vec!["layout-3", "layout-1", "passive-2", "passive-0"]
        );
    }
}
