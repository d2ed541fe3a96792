use core::hash::Hash;
use std::hash::Hasher;

use crate::node::Key;

#[cfg(feature = "std-hash")]
pub mod default {
    pub use std::collections::hash_map::DefaultHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        DefaultHasher::new()
    }
}

#[cfg(not(feature = "std-hash"))]
pub mod default {
    pub use ahash::AHasher as DefaultHasher;

    #[inline]
    pub fn new() -> DefaultHasher {
        DefaultHasher::default()
    }
}

/// hash an application key with whichever default hasher is active
#[inline]
pub fn hash_key<T: Hash + ?Sized>(value: &T) -> Key {
    let mut hasher = default::new();
    value.hash(&mut hasher);
    hasher.finish()
}
