//! Testing utilities and harness for trellis component trees.

pub use trellis_core::testing::*;

pub mod prelude {
    pub use trellis_core::prelude::*;
    pub use trellis_core::testing::*;
    pub use trellis_core::{ErrorKind, Event, HostOp};
}
