use crate::types::*;
use slab::Slab;

/// The shared state of all registered readers: one slot per reader, holding
/// the `Arc` to that reader's thread-local counter. Shared between every
/// `ReaderHandle` (which removes its own slot on drop) and the writer (which
/// scans the slab to wait out a grace period).
pub(crate) type ReaderSlots = Arc<Mutex<Slab<Arc<AtomicUsize>>>>;

/// Initial capacity for the reader slab. Matches the teacher crate's
/// `ReaderEpochInfos` sizing; growing past this just reallocates the slab,
/// it is not a hard cap.
pub(crate) const INITIAL_READER_CAPACITY: usize = 128;
