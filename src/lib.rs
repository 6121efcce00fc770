//! A userspace quiescent-state-based RCU library: a grace-period engine
//! for wait-free reads with a single synchronizing writer, and a lock-free
//! resizable hash table built on top of it.
//!
//! Two pieces:
//! - [`gp`] — the grace-period engine. Readers register once, then enter
//!   and leave read-side critical sections without taking a lock or
//!   performing an atomic read-modify-write. A writer calls
//!   [`gp::GpEngine::synchronize`] to block until every critical section
//!   active at the time of the call has ended, or
//!   [`gp::GpEngine::defer`] to run a reclamation callback once that's true
//!   without blocking the caller.
//! - [`lfht`] — a lock-free, resizable hash table ([`lfht::Lfht`]) built
//!   entirely out of [`gp`] primitives (or any other [`lfht::RcuFlavor`]).
//!   Growing or shrinking the bucket array only inserts or removes dummy
//!   sentinel nodes; no user node is ever rehashed or moved.
//!
//! ```
//! use qsbr_rcu::config::Flags;
//! use qsbr_rcu::gp::GpEngine;
//! use qsbr_rcu::lfht::Lfht;
//! use std::sync::Arc;
//!
//! let engine = Arc::new(GpEngine::new());
//! let table: Lfht<u32, &'static str, Arc<GpEngine>> = Lfht::create(
//!     Arc::clone(&engine),
//!     |k, seed| (*k as u64).wrapping_mul(0x9E3779B97F4A7C15).wrapping_add(seed),
//!     |a, b| a == b,
//!     0,
//!     0,
//!     Flags::AUTO_RESIZE,
//!     (),
//! )
//! .unwrap();
//!
//! // Every traversal runs inside a registered reader's critical section.
//! let reader = engine.register_reader();
//! {
//!     let _guard = reader.read_lock();
//!     table.add(1, "one");
//!     assert_eq!(table.lookup(&1).map(|it| *it.value()), Some("one"));
//! }
//! ```

pub mod config;
pub mod error;
pub mod gp;
pub mod lfht;
mod types;
