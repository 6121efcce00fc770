//! The lock-free resizable split-ordered hash table (LFHT).
//!
//! A [`Lfht`] is a set of `{key, value}` nodes threaded onto a single
//! singly-linked list, kept in bit-reversed hash order so that growing or
//! shrinking the bucket array only ever inserts or removes dummy sentinel
//! nodes — no user node is ever moved or rehashed. Traversal, insertion, and
//! removal never block; the only lock in the whole structure serializes the
//! rare resize operation against itself, not against readers or other
//! writers.
//!
//! Reclamation (when it's safe to actually free a node physically unlinked
//! by `del`/`replace`) is delegated to a pluggable [`RcuFlavor`]; this
//! crate's own [`crate::gp::GpEngine`] is one such flavor, reachable through
//! its blanket `impl RcuFlavor for Arc<GpEngine>`.

mod bits;
mod counts;
mod flavor;
mod node;
mod ops;
mod table;

pub use flavor::RcuFlavor;
pub use ops::{AddUnique, Iter, OwnedNode};
pub use table::Lfht;

use crate::config::Flags;
use crate::error::LfhtError;

impl<K, V, F: RcuFlavor> Lfht<K, V, F> {
    /// Build an empty table. `hash_fn(key, seed)` must be a pure function
    /// of its arguments; `cmp_fn` must agree with it (equal keys must hash
    /// equal). `init_size`, if nonzero, must be a power of two; `0` is
    /// shorthand for the minimum table size.
    pub fn create(
        flavor: F,
        hash_fn: impl Fn(&K, u64) -> u64 + Send + Sync + 'static,
        cmp_fn: impl Fn(&K, &K) -> bool + Send + Sync + 'static,
        seed: u64,
        init_size: usize,
        flags: Flags,
        thread_attr: F::ThreadAttr,
    ) -> Result<Lfht<K, V, F>, LfhtError> {
        if init_size != 0 && !init_size.is_power_of_two() {
            return Err(LfhtError::InvalidArg);
        }
        let table = Lfht::new_empty(
            flavor,
            Box::new(hash_fn),
            Box::new(cmp_fn),
            seed,
            flags,
            thread_attr,
        );
        if init_size > 1 {
            table.resize(init_size);
        }
        Ok(table)
    }
}
