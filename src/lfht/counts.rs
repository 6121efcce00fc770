//! Per-shard approximate node counting (distilled spec 4.2.7).
//!
//! Every `add`/`del` bumps a relaxed, cache-line-padded counter local to a
//! shard picked by the calling thread's id; every `2^COMMIT_ORDER` local
//! updates the shard folds its accumulated delta into the single global
//! approximate count. Readers of the approximate count (resize-threshold
//! checks) never block on writers.

use crate::config::COMMIT_ORDER;
use crate::types::{AtomicIsize, AtomicUsize, Ordering};
use crossbeam_utils::CachePadded;

struct Shard {
    delta: CachePadded<AtomicIsize>,
    pending: CachePadded<AtomicUsize>,
}

/// Sharded approximate counter. Falls back to a single shard when the host
/// reports one CPU (or `num_cpus` can't tell).
pub(crate) struct Counters {
    shards: Box<[Shard]>,
    approx: AtomicIsize,
}

impl Counters {
    pub(crate) fn new() -> Counters {
        let n = num_cpus::get().max(1);
        let shards = (0..n)
            .map(|_| Shard {
                delta: CachePadded::new(AtomicIsize::new(0)),
                pending: CachePadded::new(AtomicUsize::new(0)),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Counters {
            shards,
            approx: AtomicIsize::new(0),
        }
    }

    fn shard(&self) -> &Shard {
        // A cheap, stable-enough-for-sharding thread identifier: the address
        // of a thread-local byte is unique per thread for its lifetime.
        thread_local! {
            static TOKEN: u8 = 0;
        }
        let idx = TOKEN.with(|t| (t as *const u8 as usize) % self.shards.len());
        &self.shards[idx]
    }

    fn bump(&self, delta: isize) {
        let shard = self.shard();
        shard.delta.fetch_add(delta, Ordering::Relaxed);
        let commits = shard.pending.fetch_add(1, Ordering::Relaxed) + 1;
        if commits % (1usize << COMMIT_ORDER) == 0 {
            let batched = shard.delta.swap(0, Ordering::Relaxed);
            self.approx.fetch_add(batched, Ordering::Relaxed);
        }
    }

    pub(crate) fn add(&self) {
        self.bump(1);
    }

    pub(crate) fn del(&self) {
        self.bump(-1);
    }

    /// The approximate count before the most recent batch boundary; may
    /// briefly lag the exact count after a burst of unbatched updates.
    pub(crate) fn approx_before(&self) -> i64 {
        let mut total: i64 = self.approx.load(Ordering::Relaxed) as i64;
        for shard in self.shards.iter() {
            total += shard.delta.load(Ordering::Relaxed) as i64;
        }
        total
    }
}
