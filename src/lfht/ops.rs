//! Public hash-table operations: `lookup`, traversal, `add`/`add_unique`/
//! `add_replace`, `replace`, `del`, and `count_nodes`.

use crate::error::LfhtError;
use crate::lfht::bits::bit_reverse_u64;
use crate::lfht::flavor::RcuFlavor;
use crate::lfht::node::{is_removed, ptr_of, reclaim, Node, NodeKind};
use crate::lfht::table::Lfht;
use crate::types::*;

/// A position in the split-ordered list: the matched node and the tagged
/// `next` word observed alongside it. `replace`'s CAS needs exactly that
/// word, not a freshly reloaded one, so the pair travels together.
pub struct Iter<'t, K, V, F: RcuFlavor> {
    table: &'t Lfht<K, V, F>,
    node: *const Node<K, V>,
    next_word: usize,
    /// Set for iterators born from `lookup`; bounds `next_duplicate` to the
    /// run of nodes sharing that reverse-hash.
    target_rh: Option<u64>,
}

impl<'t, K, V, F: RcuFlavor> Iter<'t, K, V, F> {
    pub fn key(&self) -> &K {
        unsafe { &*self.node }
            .key()
            .expect("an Iter never points at a dummy")
    }

    pub fn value(&self) -> &V {
        unsafe { &*self.node }
            .value()
            .expect("an Iter never points at a dummy")
    }

    pub(crate) fn next_word(&self) -> usize {
        self.next_word
    }

    pub(crate) fn node_ptr(&self) -> *const Node<K, V> {
        self.node
    }

    /// Advance to the next node with an equal key, or `None` if this was
    /// the last one. Only meaningful on an iterator returned by `lookup`.
    pub fn next_duplicate(self) -> Option<Iter<'t, K, V, F>> {
        let rh = self.target_rh?;
        let table = self.table;
        let my_key_ptr: *const K = self.key();
        let mut cur = ptr_of::<K, V>(self.next_word);
        loop {
            if cur.is_null() {
                return None;
            }
            let node = unsafe { &*cur };
            if node.reverse_hash != rh {
                return None;
            }
            let next_word = node.next.load(Ordering::Acquire);
            if is_removed(next_word) {
                cur = ptr_of::<K, V>(next_word);
                continue;
            }
            if let NodeKind::User { key, .. } = &node.kind {
                if table.keys_equal(key, unsafe { &*my_key_ptr }) {
                    return Some(Iter {
                        table,
                        node: cur,
                        next_word,
                        target_rh: Some(rh),
                    });
                }
            }
            cur = ptr_of::<K, V>(next_word);
        }
    }

    /// Advance to the next live, non-dummy node in list order, regardless
    /// of key.
    pub fn next(self) -> Option<Iter<'t, K, V, F>> {
        advance(self.table, ptr_of::<K, V>(self.next_word))
    }
}

fn advance<'t, K, V, F: RcuFlavor>(
    table: &'t Lfht<K, V, F>,
    mut cur: *const Node<K, V>,
) -> Option<Iter<'t, K, V, F>> {
    loop {
        if cur.is_null() {
            return None;
        }
        let node = unsafe { &*cur };
        let next_word = node.next.load(Ordering::Acquire);
        if is_removed(next_word) || node.is_dummy() {
            cur = ptr_of::<K, V>(next_word);
            continue;
        }
        return Some(Iter {
            table,
            node: cur,
            next_word,
            target_rh: None,
        });
    }
}

/// Outcome of `add_unique`.
pub enum AddUnique<'t, K, V, F: RcuFlavor> {
    /// No equal key was present; `iter` points at the newly inserted node.
    Inserted(Iter<'t, K, V, F>),
    /// An equal key was already present; `iter` points at it, and the
    /// key/value passed in were not inserted.
    Existing(Iter<'t, K, V, F>),
}

impl<K, V, F: RcuFlavor> Lfht<K, V, F> {
    /// First live, non-dummy node in list order.
    pub fn first(&self) -> Option<Iter<'_, K, V, F>> {
        let head = self.dummy_for_bucket(0);
        let head_next = ptr_of::<K, V>(unsafe { &*head }.next.load(Ordering::Acquire));
        advance(self, head_next)
    }

    pub fn lookup(&self, key: &K) -> Option<Iter<'_, K, V, F>> {
        let hash = self.hash_of(key);
        let rh = bit_reverse_u64(hash);
        let bucket = self.bucket_for_hash(hash);
        let dummy = self.dummy_for_bucket(bucket);
        let (_, mut cur) = self.scan_to_ge(dummy, rh);
        loop {
            if cur.is_null() {
                return None;
            }
            let node = unsafe { &*cur };
            if node.reverse_hash != rh {
                return None;
            }
            let next_word = node.next.load(Ordering::Acquire);
            if !is_removed(next_word) {
                if let NodeKind::User { key: k, .. } = &node.kind {
                    if self.keys_equal(k, key) {
                        return Some(Iter {
                            table: self,
                            node: cur,
                            next_word,
                            target_rh: Some(rh),
                        });
                    }
                }
            }
            cur = ptr_of::<K, V>(next_word);
        }
    }

    /// Insert `key`/`value` with no uniqueness check; duplicates are legal.
    pub fn add(&self, key: K, value: V) {
        let hash = self.hash_of(&key);
        let rh = bit_reverse_u64(hash);
        let bucket = self.bucket_for_hash(hash);
        let new = Node::new_user_boxed(hash, key, value);
        let new_raw = Box::into_raw(new);
        let chain_len = loop {
            let dummy = self.dummy_for_bucket(bucket);
            let (prev, cur, chain_len) = self.scan_to_counted(dummy, rh);
            let prev_node = unsafe { &*prev };
            let new_node = unsafe { &*new_raw };
            new_node
                .next
                .store(new_node.link_word(cur), Ordering::Release);
            let expected = prev_node.next.load(Ordering::Acquire);
            if ptr_of::<K, V>(expected) != cur {
                continue;
            }
            let desired = prev_node.link_word(new_raw);
            if prev_node
                .next
                .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break chain_len;
            }
        };
        self.counts.add();
        self.maybe_schedule_resize(chain_len);
        self.maybe_schedule_from_count();
    }

    pub fn add_unique(&self, key: K, value: V) -> AddUnique<'_, K, V, F> {
        let hash = self.hash_of(&key);
        let rh = bit_reverse_u64(hash);
        let bucket = self.bucket_for_hash(hash);
        let new = Node::new_user_boxed(hash, key, value);
        match self.insert_or_find(bucket, rh, new, Action::ReturnExisting) {
            InsertResult::Inserted(raw) => AddUnique::Inserted(self.iter_at(raw, Some(rh))),
            InsertResult::Existing(raw) => AddUnique::Existing(self.iter_at(raw, Some(rh))),
            InsertResult::Replaced(_) => unreachable!("Action::ReturnExisting never replaces"),
        }
    }

    /// Insert `key`/`value`; if a key-equivalent node already existed, it is
    /// atomically displaced and returned to the caller for deferred
    /// release, else `None`.
    pub fn add_replace(&self, key: K, value: V) -> Option<OwnedNode<K, V>> {
        let hash = self.hash_of(&key);
        let rh = bit_reverse_u64(hash);
        let bucket = self.bucket_for_hash(hash);
        let new = Node::new_user_boxed(hash, key, value);
        match self.insert_or_find(bucket, rh, new, Action::Replace) {
            InsertResult::Inserted(_) => None,
            InsertResult::Replaced(old) => Some(OwnedNode {
                raw: old as *mut Node<K, V>,
            }),
            InsertResult::Existing(_) => unreachable!("Action::Replace never returns Existing"),
        }
    }

    fn iter_at(&self, raw: *const Node<K, V>, target_rh: Option<u64>) -> Iter<'_, K, V, F> {
        let next_word = unsafe { &*raw }.next.load(Ordering::Acquire);
        Iter {
            table: self,
            node: raw,
            next_word,
            target_rh,
        }
    }

    /// Shared scan-and-act primitive for `add_unique`/`add_replace`: scans
    /// the bucket chain for a key-equivalent non-dummy node; on finding
    /// one, either reports it (`ReturnExisting`, leaving `new` unpublished)
    /// or atomically substitutes it via the replace algorithm (`Replace`).
    /// On finding none, links `new` in as plain insertion.
    fn insert_or_find(
        &self,
        bucket: usize,
        rh: u64,
        new: Box<Node<K, V>>,
        action: Action,
    ) -> InsertResult<K, V> {
        let new_raw = Box::into_raw(new);
        loop {
            let dummy = self.dummy_for_bucket(bucket);
            let (prev, cur, chain_len) = self.scan_to_counted(dummy, rh);
            let mut probe = cur;
            let mut found = None;
            while !probe.is_null() {
                let node = unsafe { &*probe };
                if node.reverse_hash != rh {
                    break;
                }
                let next_word = node.next.load(Ordering::Acquire);
                if !is_removed(next_word) {
                    if let NodeKind::User { key, .. } = &node.kind {
                        let new_key = unsafe { &*new_raw }.key().unwrap();
                        if self.keys_equal(key, new_key) {
                            found = Some((probe, next_word));
                            break;
                        }
                    }
                }
                probe = ptr_of::<K, V>(next_word);
            }

            if let Some((existing, existing_next_word)) = found {
                match action {
                    Action::ReturnExisting => {
                        unsafe { reclaim(new_raw) };
                        return InsertResult::Existing(existing);
                    }
                    Action::Replace => {
                        let existing_node = unsafe { &*existing };
                        let new_node = unsafe { &*new_raw };
                        new_node.next.store(
                            new_node.link_word(ptr_of::<K, V>(existing_next_word)),
                            Ordering::Release,
                        );
                        let desired =
                            Node::<K, V>::removed_word(existing_node.link_word(new_raw));
                        if existing_node
                            .next
                            .compare_exchange(
                                existing_next_word,
                                desired,
                                Ordering::AcqRel,
                                Ordering::Acquire,
                            )
                            .is_ok()
                        {
                            self.gc_bucket(existing_node);
                            return InsertResult::Replaced(existing);
                        }
                        continue; // existing changed concurrently; rescan.
                    }
                }
            }

            let prev_node = unsafe { &*prev };
            let new_node = unsafe { &*new_raw };
            new_node
                .next
                .store(new_node.link_word(cur), Ordering::Release);
            let expected = prev_node.next.load(Ordering::Acquire);
            if ptr_of::<K, V>(expected) != cur {
                continue;
            }
            let desired = prev_node.link_word(new_raw);
            if prev_node
                .next
                .compare_exchange(expected, desired, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.counts.add();
                self.maybe_schedule_resize(chain_len);
                self.maybe_schedule_from_count();
                return InsertResult::Inserted(new_raw);
            }
        }
    }

    /// Remove the node `iter` points at. Fails with `NotFound` if it was
    /// concurrently removed. On success, returns it to the caller, who must
    /// defer release one grace period (e.g. via the table's flavor's
    /// `call_rcu`).
    pub fn del(&self, iter: Iter<'_, K, V, F>) -> Result<OwnedNode<K, V>, LfhtError> {
        let node = unsafe { &*iter.node };
        loop {
            let old = node.next.load(Ordering::Acquire);
            if is_removed(old) {
                return Err(LfhtError::NotFound);
            }
            let flagged = Node::<K, V>::removed_word(old);
            if node
                .next
                .compare_exchange(old, flagged, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.counts.del();
                self.maybe_schedule_from_count();
                self.gc_bucket(node);
                return Ok(OwnedNode {
                    raw: iter.node as *mut Node<K, V>,
                });
            }
        }
    }

    /// Atomically substitute the node `old_iter` points at with a fresh
    /// `key`/`value` pair. Fails with `NotFound` if `old_iter`'s node was
    /// concurrently removed. On success, the old node is returned for
    /// deferred release.
    pub fn replace(
        &self,
        old_iter: Iter<'_, K, V, F>,
        key: K,
        value: V,
    ) -> Result<OwnedNode<K, V>, LfhtError> {
        let hash = self.hash_of(&key);
        let new = Node::new_user_boxed(hash, key, value);
        let new_raw = Box::into_raw(new);
        let old = unsafe { &*old_iter.node };
        let old_next_word = old_iter.next_word();

        let new_node = unsafe { &*new_raw };
        new_node.next.store(
            new_node.link_word(ptr_of::<K, V>(old_next_word)),
            Ordering::Release,
        );
        let desired = Node::<K, V>::removed_word(old.link_word(new_raw));
        if old
            .next
            .compare_exchange(old_next_word, desired, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.gc_bucket(old);
            Ok(OwnedNode {
                raw: old_iter.node_ptr() as *mut Node<K, V>,
            })
        } else {
            unsafe { reclaim(new_raw) };
            Err(LfhtError::NotFound)
        }
    }

    /// Garbage-collect `node`'s own bucket chain: re-locate the bucket's
    /// anchoring dummy from `node`'s key and scan from there up to and past
    /// `node`'s reverse-hash, helping unlink any `REMOVED` node encountered
    /// (including `node` itself, just flagged by the caller). Bounded by the
    /// bucket's chain length rather than the whole table.
    fn gc_bucket(&self, node: &Node<K, V>) {
        let key = node.key().expect("gc_bucket only ever targets a user node");
        let hash = self.hash_of(key);
        let bucket = self.bucket_for_hash(hash);
        let dummy = self.dummy_for_bucket(bucket);
        let _ = self.scan_to(dummy, node.reverse_hash);
    }

    /// Approximate-before, exact live, exact removed-but-not-yet-unlinked,
    /// approximate-after.
    pub fn count_nodes(&self) -> (i64, usize, usize, i64) {
        self.count_nodes_exact()
    }
}

enum Action {
    ReturnExisting,
    Replace,
}

enum InsertResult<K, V> {
    Inserted(*const Node<K, V>),
    Existing(*const Node<K, V>),
    Replaced(*const Node<K, V>),
}

/// A node detached from the table by `del` or `replace`. The caller owns
/// it and must not free it until a grace period has elapsed; pass it to the
/// table's flavor's `call_rcu`, or hold it across an explicit
/// `synchronize_rcu`.
pub struct OwnedNode<K, V> {
    raw: *mut Node<K, V>,
}

unsafe impl<K: Send, V: Send> Send for OwnedNode<K, V> {}

impl<K, V> OwnedNode<K, V> {
    pub fn key(&self) -> &K {
        unsafe { &*self.raw }.key().expect("never a dummy")
    }

    pub fn value(&self) -> &V {
        unsafe { &*self.raw }.value().expect("never a dummy")
    }

    /// Free this node's storage. Must only be called after a grace period
    /// has elapsed since it was detached.
    pub fn release(self) {
        unsafe { reclaim(self.raw) };
    }
}
