//! The RCU plug-in interface: the nine operations a reclamation scheme must
//! provide for [`crate::lfht::Lfht`] to be built on top of it, generalizing
//! the table away from any one grace-period implementation.

use crate::gp::{GpEngine, ReaderHandle};
use crate::types::Arc;

/// A reclamation scheme usable under [`crate::lfht::Lfht`].
///
/// Mirrors the distilled spec's nine-operation function-pointer table:
/// `register_thread`/`unregister_thread`, `read_lock`/`read_unlock`,
/// `thread_online`/`thread_offline`, `synchronize_rcu`, `call_rcu`, and a
/// thread-creation attribute used when the table spawns resize-partition
/// worker threads.
pub trait RcuFlavor: Clone + Send + Sync + 'static {
    /// Per-thread registration handle, e.g. `gp::ReaderHandle`.
    type Reader: Send;
    /// Passed to resize worker threads at spawn time; stands in for the
    /// distilled ABI's thread-creation attribute pointer.
    type ThreadAttr: Default + Clone + Send + 'static;

    fn register_thread(&self) -> Self::Reader;
    fn unregister_thread(&self, reader: Self::Reader);
    fn read_lock(&self, reader: &Self::Reader);
    fn read_unlock(&self, reader: &Self::Reader);
    /// Leave the reader set's "might be mid-RCS" population without fully
    /// unregistering. A worker thread that performs no traversals while
    /// running resize work should call this before taking the resize mutex
    /// so that its own `synchronize_rcu` cannot wait on itself.
    fn thread_online(&self, reader: &Self::Reader);
    fn thread_offline(&self, reader: &Self::Reader);
    fn synchronize_rcu(&self);
    fn call_rcu(&self, f: Box<dyn FnOnce() + Send>);
}

/// The flavor this crate's own tests and benches use: `GpEngine` wrapped in
/// an `Arc` so it can be cloned freely and shared by every worker thread the
/// table spawns.
impl RcuFlavor for Arc<GpEngine> {
    type Reader = ReaderHandle;
    type ThreadAttr = ();

    fn register_thread(&self) -> ReaderHandle {
        self.register_reader()
    }

    fn unregister_thread(&self, reader: ReaderHandle) {
        drop(reader);
    }

    fn read_lock(&self, reader: &ReaderHandle) {
        reader.enter();
    }

    fn read_unlock(&self, reader: &ReaderHandle) {
        reader.exit();
    }

    fn thread_online(&self, _reader: &ReaderHandle) {
        // `GpEngine::synchronize` only waits on readers mid-RCS; a
        // registered reader that is between critical sections is already
        // invisible to it, so there is no separate online/offline state to
        // toggle here.
    }

    fn thread_offline(&self, _reader: &ReaderHandle) {}

    fn synchronize_rcu(&self) {
        self.synchronize();
    }

    fn call_rcu(&self, f: Box<dyn FnOnce() + Send>) {
        self.defer(f);
    }
}
