#![doc = r"Core reconciliation engine and hook runtime for declarative component trees."]

mod collections;
pub mod component;
pub mod config;
mod dispatch;
pub mod error;
pub mod hash;
pub mod hooks;
pub mod host;
mod instance;
mod lifecycle;
pub mod node;
pub mod platform;
mod reconcile;
pub mod root;
pub mod runtime;
pub mod testing;

pub use component::{define, ComponentFactory, ComponentRegistry};
pub use config::RuntimeConfig;
pub use error::{Error, ErrorKind};
pub use hash::hash_key;
pub use hooks::{Cleanup, Deps, EffectKind, EffectScope, HookKind, RefHandle, Scope, Setter};
pub use host::{HostAdapter, HostError, HostHandle, HostNode, HostNodeKind, HostOp, MemoryHost, UnbindToken};
pub use instance::{InstanceHandle, InstanceId, Lifecycle};
pub use node::{element, nothing, text, AttrValue, ComponentNode, Element, Event, Key, Listener, Node};
pub use platform::{DefaultScheduler, Scheduler};
pub use root::{mount, RootHandle};
pub use runtime::{Runtime, RuntimeHandle};

pub mod prelude {
    pub use crate::hooks::{Cleanup, Deps, Scope};
    pub use crate::node::{element, nothing, text, Node};
    pub use crate::{define, mount, Error, Runtime};
}

#[cfg(test)]
#[path = "tests/hook_tests.rs"]
mod hook_tests;

#[cfg(test)]
#[path = "tests/reconcile_tests.rs"]
mod reconcile_tests;

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod dispatch_tests;

#[cfg(test)]
#[path = "tests/boundary_tests.rs"]
mod boundary_tests;
