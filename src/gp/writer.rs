use crate::config::GpEngineConfig;
use crate::error::GpError;
use crate::gp::reader::ReaderHandle;
use crate::gp::registry::{ReaderSlots, INITIAL_READER_CAPACITY};
use crate::types::*;
use slab::Slab;
use std::sync::mpsc;
use std::thread;

/// Bit 0 of a reader's counter carries the last-observed global parity.
pub(crate) const PARITY_BIT: usize = 1;
/// Every nested `read_lock` adds one unit here; a reader is outside any
/// critical section iff the bits above `PARITY_BIT` are all zero.
pub(crate) const COUNT_UNIT: usize = 2;
pub(crate) const NEST_MASK: usize = !PARITY_BIT;

type DeferredFn = Box<dyn FnOnce() + Send>;

struct Inner {
    readers: ReaderSlots,
    global_parity: AtomicUsize,
    writer_mutex: Mutex<()>,
    config: GpEngineConfig,
    shutting_down: AtomicBool,
    defer_tx: mpsc::Sender<DeferredFn>,
}

/// Process- (or handle-) wide grace-period engine: reader registration,
/// read-side critical sections, and the `synchronize`/`defer` writer
/// primitives described in the crate's module docs.
///
/// Cloning a `GpEngine` is cheap (an `Arc` bump) and yields a handle to the
/// same underlying registry, mirroring how `AsLockHandle` is cloned in the
/// teacher crate to hand every thread its own front door onto shared state.
pub struct GpEngine {
    inner: Arc<Inner>,
}

impl Clone for GpEngine {
    fn clone(&self) -> GpEngine {
        GpEngine {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for GpEngine {
    fn default() -> GpEngine {
        GpEngine::new()
    }
}

impl GpEngine {
    /// Create a new engine with no registered readers, and start its
    /// deferred-callback worker thread.
    pub fn new() -> GpEngine {
        GpEngine::with_config(GpEngineConfig::default())
    }

    pub fn with_config(config: GpEngineConfig) -> GpEngine {
        let (defer_tx, defer_rx) = mpsc::channel::<DeferredFn>();
        let inner = Arc::new(Inner {
            readers: Arc::new(Mutex::new(Slab::with_capacity(INITIAL_READER_CAPACITY))),
            global_parity: AtomicUsize::new(0),
            writer_mutex: Mutex::new(()),
            config,
            shutting_down: AtomicBool::new(false),
            defer_tx,
        });

        // The worker only holds a weak-ish lifetime on the engine: it shares
        // the same Inner, so the channel closing (Inner's drop drops
        // `defer_tx`) is what lets this thread's `recv` return an error and
        // exit. We don't join it; it is a fire-and-forget deferred-callback
        // worker, same spirit as `call_rcu`'s dedicated worker context.
        let worker_inner = Arc::clone(&inner);
        thread::spawn(move || defer_worker_loop(worker_inner, defer_rx));

        GpEngine { inner }
    }

    /// Join the reader set. Returns `Err(GpError::ShuttingDown)` if called
    /// after the engine has begun tearing down (undefined per the crate's
    /// documented lifecycle, but we choose to fail closed rather than hand
    /// back a handle into a registry that may no longer be scanned).
    pub fn try_register_reader(&self) -> Result<ReaderHandle, GpError> {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            return Err(GpError::ShuttingDown);
        }
        Ok(self.register_reader())
    }

    /// Join the reader set. Panics if the engine is shutting down; use
    /// [`GpEngine::try_register_reader`] to handle that case explicitly.
    pub fn register_reader(&self) -> ReaderHandle {
        assert!(
            !self.inner.shutting_down.load(Ordering::Acquire),
            "register_reader called on a GpEngine that is shutting down"
        );
        let counter = Arc::new(AtomicUsize::new(0));
        let key = self.inner.readers.lock().insert(Arc::clone(&counter));
        log::trace!("gp: registered reader (slot {})", key);
        ReaderHandle::new(Arc::clone(&self.inner.readers), key, counter, self.clone())
    }

    pub(crate) fn load_parity(&self) -> usize {
        self.inner.global_parity.load(Ordering::Acquire)
    }

    /// Block until every read-side critical section that began before this
    /// call was made has ended.
    ///
    /// Implements the two-phase parity flip from the crate's grace-period
    /// algorithm: a single flip cannot distinguish a reader that sampled the
    /// parity just before the flip from one that will sample it just after,
    /// so we flip twice, waiting out stragglers after each flip.
    pub fn synchronize(&self) {
        let _writer_guard = self.inner.writer_mutex.lock();

        // Full fence visible to every registered reader before we touch the
        // parity bit they will read on their next `read_lock`.
        fence(Ordering::SeqCst);

        for _ in 0..2 {
            let new_parity = self.inner.global_parity.fetch_xor(1, Ordering::AcqRel) ^ 1;
            log::trace!("gp: synchronize flip -> parity {}", new_parity);
            self.wait_for_quiescence(new_parity);
        }

        fence(Ordering::SeqCst);
    }

    fn wait_for_quiescence(&self, new_parity: usize) {
        // Snapshot the reader set under the lock, then release it: the
        // busy-wait below must not itself hold the registry mutex, since a
        // new reader or a departing one needs to be able to lock it (e.g. on
        // `ReaderHandle::drop`) while we spin.
        let snapshot: Vec<Arc<AtomicUsize>> = self
            .inner
            .readers
            .lock()
            .iter()
            .map(|(_, counter)| Arc::clone(counter))
            .collect();

        for counter in snapshot {
            let mut spins = 0u32;
            loop {
                let v = counter.load(Ordering::Acquire);
                if (v & NEST_MASK) == 0 || (v & PARITY_BIT) == new_parity {
                    break;
                }
                spins += 1;
                if spins >= self.inner.config.spin_iterations_before_yield {
                    thread::yield_now();
                    spins = 0;
                } else {
                    spin_loop();
                }
            }
        }
    }

    /// Arrange for `f` to run, on the engine's dedicated worker thread, after
    /// some future grace period elapses.
    pub fn defer<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // A closed channel means the engine is already being torn down; per
        // the crate's documented lifecycle, destroying the engine with
        // readers or pending work outstanding is undefined, so dropping the
        // callback here is an acceptable fate, not a silent correctness bug.
        let _ = self.inner.defer_tx.send(Box::new(f));
    }
}

fn defer_worker_loop(inner: Arc<Inner>, rx: mpsc::Receiver<DeferredFn>) {
    loop {
        let first = match rx.recv() {
            Ok(f) => f,
            Err(_) => return, // channel closed: engine dropped.
        };
        let mut batch = vec![first];
        while let Ok(f) = rx.try_recv() {
            batch.push(f);
        }

        log::debug!("gp: defer worker waiting out grace period for {} callback(s)", batch.len());
        GpEngine {
            inner: Arc::clone(&inner),
        }
        .synchronize();

        for f in batch {
            f();
        }
    }
}

impl Drop for GpEngine {
    fn drop(&mut self) {
        // Only the last handle actually tears anything down; earlier clones
        // just decrement the Arc refcount.
        if Arc::strong_count(&self.inner) == 1 {
            self.inner.shutting_down.store(true, Ordering::Release);
        }
    }
}
