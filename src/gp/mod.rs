//! The grace-period engine: reader registration, read-side critical
//! sections, and the `synchronize`/`defer` writer primitives that the hash
//! table in [`crate::lfht`] uses to reclaim memory safely.
//!
//! Readers never take a lock and never perform an atomic read-modify-write;
//! the writer alone pays for synchronization, using a two-phase parity flip
//! (see [`GpEngine::synchronize`]) to detect when every pre-existing critical
//! section has ended.

mod reader;
mod registry;
mod writer;

pub use reader::{ReadGuard, ReaderHandle};
pub use writer::GpEngine;
