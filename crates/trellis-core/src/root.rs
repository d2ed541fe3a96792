use std::rc::Rc;

use crate::host::HostHandle;
use crate::node::Node;
use crate::reconcile::{Context, Mounted};
use crate::runtime::Runtime;
use crate::Error;

/// A tree mounted into a host container.
pub struct RootHandle {
    runtime: Runtime,
    container: HostHandle,
    root: Option<Mounted>,
}

/// Mounts `node` as the last child of `container`, runs layout effects, and
/// queues passive effects for the next tick.
pub fn mount(
    runtime: &Runtime,
    node: impl Into<Node>,
    container: HostHandle,
) -> Result<RootHandle, Error> {
    let inner = Rc::clone(runtime.inner());
    let node = node.into();
    let mut mounted = None;
    let outcome = inner.run_batch(|rt| {
        let root = rt.mount_node(Context::root(container), node)?;
        let handle = root.host_handle();
        mounted = Some(root);
        rt.insert_child(container, handle?, usize::MAX)
    });
    match outcome {
        Ok(()) => Ok(RootHandle {
            runtime: runtime.clone(),
            container,
            root: mounted,
        }),
        Err(err) => {
            if let Some(root) = mounted {
                inner.unmount(&root);
            }
            log::error!("mounting into {container:?} failed: {err}");
            Err(err)
        }
    }
}

impl RootHandle {
    /// Reconciles the mounted tree against `node`.
    pub fn update(&mut self, node: impl Into<Node>) -> Result<(), Error> {
        let inner = Rc::clone(self.runtime.inner());
        let container = self.container;
        let node = node.into();
        let Some(root) = self.root.as_mut() else {
            log::warn!("update on an unmounted root in {container:?} ignored");
            return Ok(());
        };
        inner
            .run_batch(|rt| rt.reconcile(Context::root(container), root, node))
            .inspect_err(|err| log::error!("update of {container:?} failed: {err}"))
    }

    /// Runs passive effects and deferred tasks queued so far.
    pub fn flush_effects(&self) -> Result<(), Error> {
        self.runtime.run_deferred()
    }

    /// Tears the tree down and detaches it from the container.
    pub fn unmount(&mut self) -> Result<(), Error> {
        let Some(root) = self.root.take() else {
            return Ok(());
        };
        let container = self.container;
        Rc::clone(self.runtime.inner()).run_batch(|rt| {
            let handle = root.host_handle();
            rt.unmount(&root);
            rt.remove_child(container, handle?)
        })
    }

    pub fn is_mounted(&self) -> bool {
        self.root.is_some()
    }

    /// Host node the root currently renders to.
    pub fn host_node(&self) -> Option<HostHandle> {
        self.root
            .as_ref()
            .and_then(|root| root.host_handle().ok())
    }

    pub fn container(&self) -> HostHandle {
        self.container
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }
}
