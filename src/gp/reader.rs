use crate::gp::registry::ReaderSlots;
use crate::gp::writer::{GpEngine, COUNT_UNIT, NEST_MASK};
use crate::types::*;

/// A thread's membership in a [`GpEngine`]'s reader set.
///
/// One `ReaderHandle` should be created per thread that needs to enter read-
/// side critical sections; it is not `Sync`, since the counter it owns is
/// only ever written by the thread that holds it (the writer only reads it).
/// Dropping it leaves the reader set, matching `register_reader` /
/// `unregister_reader` from the engine's public contract.
pub struct ReaderHandle {
    registry: ReaderSlots,
    key: usize,
    counter: Arc<AtomicUsize>,
    engine: GpEngine,
    // Keeps ReaderHandle from being Sync without relying on an unstable
    // auto-trait opt-out; the counter's plain load/store fast path is only
    // sound if a single thread ever touches it.
    _not_sync: std::cell::UnsafeCell<()>,
}

/// Delimits a read-side critical section. Dropping it is `read_unlock()`.
pub struct ReadGuard<'r> {
    counter: &'r AtomicUsize,
}

impl ReaderHandle {
    pub(crate) fn new(
        registry: ReaderSlots,
        key: usize,
        counter: Arc<AtomicUsize>,
        engine: GpEngine,
    ) -> ReaderHandle {
        ReaderHandle {
            registry,
            key,
            counter,
            engine,
            _not_sync: std::cell::UnsafeCell::new(()),
        }
    }

    /// Enter a (possibly nested) read-side critical section.
    ///
    /// The fast path is a plain load and store of this thread's own counter:
    /// no atomic read-modify-write, no loads of other threads' state, and no
    /// blocking, as required of the engine's reader side.
    pub fn read_lock(&self) -> ReadGuard<'_> {
        let old = self.counter.load(Ordering::Relaxed);
        let new = if (old & NEST_MASK) == 0 {
            // First entry: publish the parity currently in force. This
            // single store is the reader's publication point; the writer's
            // `synchronize()` relies on seeing it (eventually, via its own
            // fence-coercion) to know this critical section started no
            // earlier than the parity it observes.
            let parity = self.engine.load_parity();
            COUNT_UNIT | parity
        } else {
            // Nested entry: bump the nesting count, leave the parity bit
            // exactly as it was on first entry.
            old + COUNT_UNIT
        };
        self.counter.store(new, Ordering::Release);
        fence(Ordering::SeqCst);

        ReadGuard {
            counter: &self.counter,
        }
    }

    /// Non-RAII equivalent of `read_lock`/drop, for callers that must thread
    /// enter/exit through a trait object (see `crate::lfht::flavor::RcuFlavor`).
    /// Prefer `read_lock` directly; this exists only for that adaptation.
    pub(crate) fn enter(&self) {
        std::mem::forget(self.read_lock());
    }

    /// Counterpart to `enter`. Panics under the same conditions `ReadGuard`'s
    /// drop does if called without a matching `enter`.
    pub(crate) fn exit(&self) {
        let old = self.counter.load(Ordering::Relaxed);
        assert!(
            (old & NEST_MASK) != 0,
            "read_unlock called without a matching read_lock"
        );
        self.counter.store(old - COUNT_UNIT, Ordering::Release);
    }

    #[cfg(test)]
    pub(crate) fn debug_force_unlock(&self) {
        let old = self.counter.load(Ordering::Relaxed);
        assert!(
            (old & NEST_MASK) != 0,
            "read_unlock called without a matching read_lock"
        );
    }
}

impl Drop for ReaderHandle {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.counter.load(Ordering::Relaxed) & NEST_MASK,
            0,
            "unregister_reader called while a read-side critical section was still open"
        );
        self.registry.lock().remove(self.key);
        log::trace!("gp: unregistered reader (slot {})", self.key);
    }
}

impl<'r> Drop for ReadGuard<'r> {
    /// `read_unlock()`: decrements the nesting count without touching the
    /// parity bit, per the engine's reader-exit contract.
    fn drop(&mut self) {
        let old = self.counter.load(Ordering::Relaxed);
        assert!(
            (old & NEST_MASK) != 0,
            "read_unlock called without a matching read_lock"
        );
        self.counter.store(old - COUNT_UNIT, Ordering::Release);
    }
}
