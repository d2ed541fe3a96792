//! Teardown of mounted subtrees.
//!
//! Children are torn down before their parents. Effect cleanups run while
//! the host nodes are still attached; detaching is left to the caller, which
//! removes the subtree's root in one host operation.

use std::rc::Rc;

use crate::instance::{Instance, Lifecycle};
use crate::reconcile::{Mounted, MountedElement};
use crate::runtime::RuntimeInner;

impl RuntimeInner {
    pub(crate) fn unmount(&self, mounted: &Mounted) {
        match mounted {
            Mounted::Nothing { .. } | Mounted::Text { .. } => {}
            Mounted::Element(element) => self.unmount_element(element),
            Mounted::Component(instance) => self.unmount_instance(instance),
        }
    }

    pub(crate) fn unmount_element(&self, element: &MountedElement) {
        for child in &element.children {
            self.unmount(child);
        }
        for (event, binding) in &element.listeners {
            if let Err(err) = self.unbind_event(element.handle, event, binding.token) {
                log::warn!("failed to unbind `{event}` from {:?}: {err}", element.handle);
            }
        }
    }

    fn unmount_instance(&self, instance: &Rc<Instance>) {
        if !instance.is_active() {
            return;
        }
        log::debug!("unmounting `{}` #{}", instance.name(), instance.id());
        instance.set_lifecycle(Lifecycle::Unmounting);
        instance.with_rendition(|rendition| {
            if let Some(rendition) = rendition {
                self.unmount(rendition);
            }
        });
        let cleanups = instance.hooks.borrow_mut().take_cleanups();
        for cleanup in cleanups {
            self.run_cleanup(instance, cleanup);
        }
        instance.clear_updates();
        instance.set_lifecycle(Lifecycle::Destroyed);
    }
}
