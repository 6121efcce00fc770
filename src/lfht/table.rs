//! The table descriptor: order table, size, resize bookkeeping, and the
//! internal scan/insert primitive shared by `add`/`add_unique`/`add_replace`
//! and by resize's dummy linking.

use crate::config::{Flags, CHAIN_LEN_RESIZE_THRESHOLD, MAX_ORDER, MIN_TABLE_SIZE};
use crate::error::LfhtError;
use crate::lfht::bits::bucket_order_and_sub;
use crate::lfht::counts::Counters;
use crate::lfht::flavor::RcuFlavor;
use crate::lfht::node::{is_removed, ptr_of, reclaim, Node, NodeKind};
use crate::types::*;
use std::ptr;
use std::sync::atomic::AtomicPtr;

fn order_len(order: usize) -> usize {
    if order == 0 {
        1
    } else {
        1usize << (order - 1)
    }
}

fn bucket_base(order: usize) -> usize {
    if order == 0 {
        0
    } else {
        1usize << (order - 1)
    }
}

/// The lock-free, resizable split-ordered hash table.
///
/// Generic over the reclamation scheme via [`RcuFlavor`]; `create` with
/// `Arc<gp::GpEngine>` for the flavor this crate's own grace-period engine
/// provides.
pub struct Lfht<K, V, F: RcuFlavor> {
    pub(crate) flavor: F,
    hash_fn: Box<dyn Fn(&K, u64) -> u64 + Send + Sync>,
    cmp_fn: Box<dyn Fn(&K, &K) -> bool + Send + Sync>,
    seed: u64,
    pub(crate) flags: Flags,
    pub(crate) thread_attr: F::ThreadAttr,

    pub(crate) size: AtomicUsize,
    resize_target: AtomicUsize,
    pub(crate) resize_initiated: AtomicBool,
    pub(crate) in_progress_resize: AtomicBool,
    pub(crate) in_progress_destroy: AtomicBool,
    pub(crate) resize_mutex: Mutex<()>,

    order_table: Vec<AtomicPtr<AtomicPtr<Node<K, V>>>>,
    pub(crate) counts: Counters,
}

unsafe impl<K: Send, V: Send, F: RcuFlavor> Send for Lfht<K, V, F> {}
unsafe impl<K: Send + Sync, V: Send + Sync, F: RcuFlavor> Sync for Lfht<K, V, F> {}

impl<K, V, F: RcuFlavor> Lfht<K, V, F> {
    pub(crate) fn new_empty(
        flavor: F,
        hash_fn: Box<dyn Fn(&K, u64) -> u64 + Send + Sync>,
        cmp_fn: Box<dyn Fn(&K, &K) -> bool + Send + Sync>,
        seed: u64,
        flags: Flags,
        thread_attr: F::ThreadAttr,
    ) -> Lfht<K, V, F> {
        let order_table = (0..=MAX_ORDER)
            .map(|_| AtomicPtr::new(ptr::null_mut()))
            .collect();
        let table = Lfht {
            flavor,
            hash_fn,
            cmp_fn,
            seed,
            flags,
            thread_attr,
            size: AtomicUsize::new(0),
            resize_target: AtomicUsize::new(0),
            resize_initiated: AtomicBool::new(false),
            in_progress_resize: AtomicBool::new(false),
            in_progress_destroy: AtomicBool::new(false),
            resize_mutex: Mutex::new(()),
            order_table,
            counts: Counters::new(),
        };
        // Bootstrap: order 0 always exists, even for a size-1 table, as the
        // unconditional head of the split-ordered list.
        table.alloc_order(0);
        let head = Node::<K, V>::new_dummy_boxed(0);
        let head_raw = Box::into_raw(head);
        table.order_slot(0, 0).store(head_raw, Ordering::Release);
        table.size.store(1, Ordering::Release);
        table
    }

    pub(crate) fn hash_of(&self, key: &K) -> u64 {
        (self.hash_fn)(key, self.seed)
    }

    pub(crate) fn keys_equal(&self, a: &K, b: &K) -> bool {
        (self.cmp_fn)(a, b)
    }

    pub fn size(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    fn alloc_order(&self, order: usize) {
        let len = order_len(order);
        let slots: Vec<AtomicPtr<Node<K, V>>> =
            (0..len).map(|_| AtomicPtr::new(ptr::null_mut())).collect();
        let boxed = slots.into_boxed_slice();
        let raw = Box::into_raw(boxed) as *mut AtomicPtr<Node<K, V>>;
        self.order_table[order].store(raw, Ordering::Release);
    }

    fn order_slot(&self, order: usize, sub: usize) -> &AtomicPtr<Node<K, V>> {
        debug_assert!(sub < order_len(order));
        let base = self.order_table[order].load(Ordering::Acquire);
        debug_assert!(!base.is_null(), "order {order} not yet allocated");
        unsafe { &*base.add(sub) }
    }

    /// The dummy anchoring `bucket`, per the order-table addressing scheme.
    pub(crate) fn dummy_for_bucket(&self, bucket: usize) -> *const Node<K, V> {
        let (order, sub) = bucket_order_and_sub(bucket);
        self.order_slot(order, sub).load(Ordering::Acquire)
    }

    pub(crate) fn bucket_for_hash(&self, hash: u64) -> usize {
        let size = self.size();
        (hash as usize) & (size - 1)
    }

    /// Scan the bucket chain starting at `start`, helping unlink any
    /// `REMOVED` node encountered, until finding the first node whose
    /// reverse-hash exceeds `reverse_hash`. Returns `(prev, cur)` such that
    /// `prev.reverse_hash <= reverse_hash < cur.reverse_hash` (or `cur` is
    /// the end sentinel).
    pub(crate) fn scan_to(
        &self,
        start: *const Node<K, V>,
        reverse_hash: u64,
    ) -> (*const Node<K, V>, *const Node<K, V>) {
        let (prev, cur, _) = self.scan_to_inner(start, reverse_hash, false);
        (prev, cur)
    }

    /// Like `scan_to`, but stops at the first node whose reverse-hash is
    /// `>=` (rather than strictly `>`) the target — what `lookup` needs to
    /// land on the first node that could possibly match.
    pub(crate) fn scan_to_ge(
        &self,
        start: *const Node<K, V>,
        reverse_hash: u64,
    ) -> (*const Node<K, V>, *const Node<K, V>) {
        let (prev, cur, _) = self.scan_to_inner(start, reverse_hash, true);
        (prev, cur)
    }

    /// `scan_to`, plus the number of distinct reverse-hash transitions among
    /// non-dummy nodes visited along the way — the chain-length feedback
    /// `add` uses to decide whether to request a lazy grow.
    pub(crate) fn scan_to_counted(
        &self,
        start: *const Node<K, V>,
        reverse_hash: u64,
    ) -> (*const Node<K, V>, *const Node<K, V>, usize) {
        self.scan_to_inner(start, reverse_hash, false)
    }

    fn scan_to_inner(
        &self,
        start: *const Node<K, V>,
        reverse_hash: u64,
        inclusive: bool,
    ) -> (*const Node<K, V>, *const Node<K, V>, usize) {
        'restart: loop {
            let mut prev = start;
            let mut chain_len = 0usize;
            let mut last_rh: Option<u64> = None;
            loop {
                let prev_node = unsafe { &*prev };
                let next_word = prev_node.next.load(Ordering::Acquire);
                let cur = ptr_of::<K, V>(next_word);
                if cur.is_null() {
                    return (prev, cur, chain_len);
                }
                let cur_node = unsafe { &*cur };
                let cur_next_word = cur_node.next.load(Ordering::Acquire);
                if is_removed(cur_next_word) {
                    // Help unlink: CAS prev.next from cur to cur's successor,
                    // preserving prev's own dummy flag.
                    let new_word = prev_node.link_word(ptr_of::<K, V>(cur_next_word));
                    if prev_node
                        .next
                        .compare_exchange(
                            next_word,
                            new_word,
                            Ordering::AcqRel,
                            Ordering::Acquire,
                        )
                        .is_err()
                    {
                        continue 'restart;
                    }
                    continue;
                }
                let stop = if inclusive {
                    cur_node.reverse_hash >= reverse_hash
                } else {
                    cur_node.reverse_hash > reverse_hash
                };
                if stop {
                    return (prev, cur, chain_len);
                }
                if !cur_node.is_dummy() && last_rh != Some(cur_node.reverse_hash) {
                    chain_len += 1;
                    last_rh = Some(cur_node.reverse_hash);
                }
                prev = cur;
            }
        }
    }

    /// Link `new` into the chain starting at `start`. Returns the raw
    /// pointer on success.
    ///
    /// Tie-break on equal reverse-hash is automatic: `scan_to` stops at the
    /// first node whose reverse-hash strictly exceeds the target, so a node
    /// being inserted with a reverse-hash equal to an existing dummy's is
    /// placed after it, and a dummy being inserted (whose reverse-hash is
    /// unique among dummies, since `bit_reverse` is injective) never ties
    /// with anything.
    pub(crate) fn link(&self, start: *const Node<K, V>, new: Box<Node<K, V>>) -> *const Node<K, V> {
        let new_raw = Box::into_raw(new);
        loop {
            let (prev, cur) = self.scan_to(start, unsafe { (*new_raw).reverse_hash });
            let prev_node = unsafe { &*prev };
            let new_node = unsafe { &*new_raw };
            new_node.next.store(new_node.link_word(cur), Ordering::Release);
            let expected = prev_node.next.load(Ordering::Acquire);
            if ptr_of::<K, V>(expected) != cur {
                continue; // prev's chain moved since the scan; retry.
            }
            let desired = prev_node.link_word(new_raw);
            if prev_node
                .next
                .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return new_raw;
            }
        }
    }

    /// Install the dummies for one new order and publish the larger size.
    /// Called with the resize mutex held; `reader` is the calling thread's
    /// own registration, entered for each link so the splice is visible to
    /// concurrent `synchronize_rcu` the way any other mutator's would be.
    pub(crate) fn link_new_order(&self, order: usize, reader: &F::Reader) {
        self.alloc_order(order);
        let base = bucket_base(order);
        let len = order_len(order);
        for sub in 0..len {
            let bucket = base + sub;
            let parent_bucket = sub; // bucket with its top bit cleared
            self.flavor.read_lock(reader);
            let start = self.dummy_for_bucket(parent_bucket);
            let dummy = Node::<K, V>::new_dummy_boxed(bucket);
            let raw = self.link(start, dummy);
            self.flavor.read_unlock(reader);
            self.order_slot(order, sub)
                .store(raw as *mut Node<K, V>, Ordering::Release);
        }
        self.size.store(1usize << order, Ordering::Release);
    }

    /// Unlink and free the dummies of the top order. Called with the resize
    /// mutex held, after `synchronize_rcu` has run once with the smaller
    /// size already published.
    pub(crate) fn unlink_top_order(&self, order: usize, reader: &F::Reader) {
        let base = bucket_base(order);
        let len = order_len(order);
        for sub in 0..len {
            let bucket = base + sub;
            let parent_bucket = sub;
            self.flavor.read_lock(reader);
            let start = self.dummy_for_bucket(parent_bucket);
            let dummy_raw = self.order_slot(order, sub).load(Ordering::Acquire);
            let dummy = unsafe { &*dummy_raw };
            assert!(dummy.is_dummy(), "shrink encountered a non-dummy at the removed order");
            let old_next = dummy.next.load(Ordering::Acquire);
            let flagged = Node::<K, V>::removed_word(old_next);
            // Dummies are uncontended at this point (size already shrank,
            // and a synchronize_rcu separates us from any straggling
            // reader), so a single CAS attempt that must succeed.
            dummy
                .next
                .compare_exchange(old_next, flagged, Ordering::AcqRel, Ordering::Acquire)
                .expect("dummy removal raced a concurrent mutation during shrink");
            // Physically unlink it: scanning from its parent toward its own
            // reverse-hash passes through the now-REMOVED dummy, and
            // `scan_to` helps-unlink any REMOVED node it passes over.
            let _ = self.scan_to(start, dummy.reverse_hash);
            self.flavor.read_unlock(reader);
        }
        self.resize_target.store(bucket_base(order), Ordering::Relaxed);
        self.order_table[order].store(ptr::null_mut(), Ordering::Release);

        // Defer freeing the dummy array and its nodes until this grace
        // period elapses; nothing should still be walking through them.
        let raw_nodes: Vec<*mut Node<K, V>> = (0..len)
            .map(|sub| self.dummy_array_slot_raw(order, sub))
            .collect();
        self.flavor.call_rcu(Box::new(move || {
            for raw in raw_nodes {
                unsafe { reclaim(raw) };
            }
        }));
    }

    fn dummy_array_slot_raw(&self, order: usize, sub: usize) -> *mut Node<K, V> {
        self.order_slot(order, sub).load(Ordering::Acquire) as *mut Node<K, V>
    }

    pub(crate) fn request_resize(&self, target: usize) {
        self.resize_target.store(target, Ordering::Relaxed);
        if self
            .resize_initiated
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let flavor = self.flavor.clone();
            // SAFETY-adjacent: `request_resize` is only reachable from
            // within an active RCS (add's chain-length feedback) or from a
            // counting threshold crossing, so the actual resize must run
            // later, off the caller's stack, via `call_rcu` just like the
            // distilled spec's lazy-resize work item.
            let this = self as *const Lfht<K, V, F>;
            flavor.call_rcu(Box::new(move || {
                // Safety: the table outlives every deferred callback because
                // `destroy` refuses to run while any are outstanding — see
                // `in_progress_destroy`.
                let table = unsafe { &*this };
                table.run_resize();
            }));
        }
    }

    fn run_resize(&self) {
        if self.in_progress_destroy.load(Ordering::Acquire) {
            return;
        }
        if self
            .in_progress_resize
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let target = self.resize_target.load(Ordering::Relaxed).max(MIN_TABLE_SIZE);
        self.resize_to(target);
        self.resize_initiated.store(false, Ordering::Release);
        self.in_progress_resize.store(false, Ordering::Release);
    }

    /// Block until the table has been grown or shrunk to `target_size`
    /// (must be a power of two). Serializes on `resize_mutex`.
    pub fn resize(&self, target_size: usize) {
        assert!(target_size.is_power_of_two());
        self.resize_to(target_size.max(MIN_TABLE_SIZE));
    }

    fn resize_to(&self, target_size: usize) {
        // Register this thread's own reader for the duration of the resize
        // and take it offline before taking the resize mutex: the shrink
        // path below calls `synchronize_rcu` while the mutex is held, and a
        // reader that is still "online" (eligible to be mid-RCS) would make
        // that call wait on itself.
        let reader = self.flavor.register_thread();
        self.flavor.thread_offline(&reader);

        let _guard = self.resize_mutex.lock();
        let old_size = self.size();
        let old_top = old_size.trailing_zeros() as usize;
        let new_top = target_size.trailing_zeros() as usize;
        if new_top > old_top {
            for order in (old_top + 1)..=new_top {
                self.link_new_order(order, &reader);
            }
        } else if new_top < old_top {
            // Publish the smaller size first so new routing stops landing in
            // the soon-dead orders, then wait out any in-flight lookup.
            self.size.store(target_size, Ordering::Release);
            self.flavor.synchronize_rcu();
            for order in ((new_top + 1)..=old_top).rev() {
                self.unlink_top_order(order, &reader);
            }
            self.flavor.synchronize_rcu();
        }
        drop(_guard);

        self.flavor.thread_online(&reader);
        self.flavor.unregister_thread(reader);
    }

    pub(crate) fn maybe_schedule_resize(&self, chain_len: usize) {
        if !self.flags.contains(Flags::AUTO_RESIZE) {
            return;
        }
        if chain_len >= CHAIN_LEN_RESIZE_THRESHOLD {
            let next = (self.size() * 2).min(1usize << (MAX_ORDER - 1));
            self.request_resize(next);
        }
    }

    pub(crate) fn maybe_schedule_from_count(&self) {
        if !self.flags.contains(Flags::AUTO_RESIZE) {
            return;
        }
        let approx = self.counts.approx_before().max(0) as usize;
        let size = self.size();
        if approx > size * 2 {
            self.request_resize((size * 2).min(1usize << (MAX_ORDER - 1)));
        } else if approx < size / 4 && size > MIN_TABLE_SIZE {
            self.request_resize((size / 2).max(MIN_TABLE_SIZE));
        }
    }

    /// Refuses if any non-dummy node remains live in the table.
    pub fn destroy(self) -> Result<(), LfhtError> {
        self.in_progress_destroy.store(true, Ordering::Release);
        if self.count_live_user_nodes() != 0 {
            self.in_progress_destroy.store(false, Ordering::Release);
            return Err(LfhtError::NonEmpty);
        }
        for order in 0..=MAX_ORDER {
            let base = self.order_table[order].load(Ordering::Acquire);
            if base.is_null() {
                continue;
            }
            let len = order_len(order);
            for sub in 0..len {
                let raw = unsafe { &*base.add(sub) }.load(Ordering::Acquire);
                unsafe { reclaim(raw) };
            }
            let slice = unsafe { Box::from_raw(std::slice::from_raw_parts_mut(base, len)) };
            drop(slice);
        }
        Ok(())
    }

    fn count_live_user_nodes(&self) -> usize {
        let (_, live, _, _) = self.count_nodes_exact();
        live
    }

    pub(crate) fn count_nodes_exact(&self) -> (i64, usize, usize, i64) {
        let approx_before = self.counts.approx_before();
        let mut live = 0usize;
        let mut removed_not_unlinked = 0usize;
        let mut cur = self.dummy_for_bucket(0);
        loop {
            let node = unsafe { &*cur };
            let next = ptr_of::<K, V>(node.next.load(Ordering::Acquire));
            if next.is_null() {
                break;
            }
            let next_node = unsafe { &*next };
            if matches!(next_node.kind, NodeKind::User { .. }) {
                // `next`'s own next field carries `next`'s removed state.
                if is_removed(next_node.next.load(Ordering::Acquire)) {
                    removed_not_unlinked += 1;
                } else {
                    live += 1;
                }
            }
            cur = next;
        }
        let approx_after = self.counts.approx_before();
        (approx_before, live, removed_not_unlinked, approx_after)
    }
}
