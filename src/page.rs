//! Filepath: src/page.rs
//!
//! Page node for the double tree.
//!
//! A [`PageNode`] is a self-contained B+tree that occupies exactly
//! [`PAGE_NODE_SIZE`] bytes: a pool of [`LINE_NODE_SIZE`]-byte slots, each
//! holding a stem line, a leaf line, or a free-list link, plus a few bytes
//! of bookkeeping. All cross-references inside the page are 8-bit slot
//! indices into the pool, never pointers, so a page is one relocatable,
//! cache-friendly block.
//!
//! Stem lines route by `(min_key, child_slot)` entries; leaf lines hold the
//! page's elements and form a doubly-linked list in key order. A slot's
//! role is implied by the depth at which the intra-page tree reaches it,
//! the same discipline the outer tree applies to whole pages.
//!
//! # Load states
//!
//! The outer tree steers rebalancing by how much pool headroom a page has
//! left, in units of the worst-case slot consumption of one insert descent
//! (`MAX_LEVELS`):
//!
//! - **small**: `free_count > 2 * MAX_LEVELS - 1`; can absorb a borrowed
//!   leaf line and still survive an insert
//! - **large**: the complement of small
//! - **oversized**: `free_count <= MAX_LEVELS - 1`; might not survive the
//!   next insert, so never left at rest

use std::mem::ManuallyDrop;

use smallvec::SmallVec;

use crate::entry::TreeEntry;
use crate::line::{LINE_NODE_SIZE, LineIndex, LineNode};

/// Size of a page node in bytes. One memory page.
pub(crate) const PAGE_NODE_SIZE: usize = 4096;

/// Index of a slot within a page's pool.
pub(crate) type SlotIndex = u8;

/// Sentinel slot index meaning "none".
pub(crate) const SLOT_NIL: SlotIndex = SlotIndex::MAX;

/// Number of 256-byte slots a page can hold next to its bookkeeping
/// (six slot indices, the stem level counter, and up to 8 bytes of
/// role-specific aux data).
pub(crate) const POOL_COUNT: usize = (PAGE_NODE_SIZE - 7 - 8) / LINE_NODE_SIZE;

/// Routing entry of an intra-page stem line: the minimum key of the child
/// slot's subtree, and the child slot itself.
pub(crate) struct StemEntry<K> {
    pub key: K,
    pub child: SlotIndex,
}

impl<K: Ord + Clone> TreeEntry for StemEntry<K> {
    type Key = K;

    #[inline]
    fn key(&self) -> &K {
        &self.key
    }

    #[inline]
    fn set_key(&mut self, key: K) {
        self.key = key;
    }
}

/// Aux data of a leaf line: its neighbors in the intra-page leaf list.
#[derive(Clone, Copy, Debug)]
pub(crate) struct LineLinks {
    pub prev: SlotIndex,
    pub next: SlotIndex,
}

impl LineLinks {
    pub const NONE: Self = Self { prev: SLOT_NIL, next: SLOT_NIL };
}

pub(crate) type StemLine<K, const CAP: usize> = LineNode<StemEntry<K>, (), CAP>;
pub(crate) type LeafLine<E, const CAP: usize> = LineNode<E, LineLinks, CAP>;

/// Position of an element inside a page: a leaf-line slot and an index
/// within that line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct PagePosition {
    pub line: SlotIndex,
    pub elem: LineIndex,
}

/// A pool slot. Holds a stem line, a leaf line, or (while free) the next
/// link of the free-list stack; which one is implied by the page structure.
union PoolSlot<E: TreeEntry, const CAP: usize> {
    stem: ManuallyDrop<StemLine<E::Key, CAP>>,
    leaf: ManuallyDrop<LeafLine<E, CAP>>,
    free: FreeLink,
}

#[derive(Clone, Copy)]
struct FreeLink {
    prev_head: SlotIndex,
}

/// Path of positions from the intra-page root down to an element.
type PagePath = SmallVec<[PagePosition; 4]>;

/// Worst-case intra-page stem depth: how many stem levels it takes before
/// `branch`-way fanout covers a pool of `slots` lines.
const fn max_stem_levels(slots: usize, covered: usize, branch: usize) -> usize {
    if slots > covered {
        1 + max_stem_levels(slots - covered, covered * branch, branch)
    } else {
        0
    }
}

/// A self-contained B+tree of line nodes in one memory page.
///
/// # Invariants
/// - Every live slot is the root or reachable from the root.
/// - The concatenation of the leaf lines in linked-list order is strictly
///   sorted; `min_leaf`/`max_leaf` are the list endpoints.
/// - Stem entries carry the minimum key of their child's subtree.
/// - `free_count` slots are free: the never-allocated tail `back..` plus
///   the LIFO free list threaded through the slots starting at `head`.
#[repr(C, align(4096))]
pub(crate) struct PageNode<E: TreeEntry, A, const CAP: usize> {
    pool: [PoolSlot<E, CAP>; POOL_COUNT],
    head: SlotIndex,
    back: SlotIndex,
    free_count: SlotIndex,
    root: SlotIndex,
    min_leaf: SlotIndex,
    max_leaf: SlotIndex,
    stem_levels: u8,
    pub aux: A,
}

impl<E: TreeEntry, A, const CAP: usize> PageNode<E, A, CAP> {
    const MAX_STEM_LEVELS: usize = max_stem_levels(POOL_COUNT, 1, CAP);
    const MAX_LEVELS: usize = Self::MAX_STEM_LEVELS + 1;

    /// Compile-time check that the node occupies exactly one page.
    const LAYOUT_CHECK: () = assert!(
        size_of::<Self>() == PAGE_NODE_SIZE,
        "page node must occupy exactly one page; shrink the aux type"
    );

    /// Create a page holding a single empty leaf line as its root.
    #[must_use]
    pub fn new(aux: A) -> Self {
        let () = Self::LAYOUT_CHECK;

        let mut page = Self {
            pool: std::array::from_fn(|_| PoolSlot { free: FreeLink { prev_head: 0 } }),
            head: 0,
            back: 0,
            free_count: POOL_COUNT as SlotIndex,
            root: 0,
            min_leaf: 0,
            max_leaf: 0,
            stem_levels: 0,
            aux,
        };
        let root = page.allocate();
        page.pool[root as usize].leaf = ManuallyDrop::new(LineNode::new(LineLinks::NONE));
        page.root = root;
        page.min_leaf = root;
        page.max_leaf = root;
        page
    }

    // ========================================================================
    //  Slot pool
    // ========================================================================

    /// Pop a slot off the free list, or extend the high-water mark.
    fn allocate(&mut self) -> SlotIndex {
        debug_assert!(self.free_count > 0, "page slot pool exhausted");

        self.free_count -= 1;
        let slot = self.head;
        if self.head == self.back {
            self.back += 1;
            self.head = self.back;
        } else {
            // SAFETY: a head below `back` is a freed slot holding the
            // previous head in its free link.
            self.head = unsafe { self.pool[self.head as usize].free }.prev_head;
        }
        slot
    }

    fn push_free(&mut self, slot: SlotIndex) {
        self.free_count += 1;
        self.pool[slot as usize].free = FreeLink { prev_head: self.head };
        self.head = slot;
    }

    /// Drop the stem line in `slot` and return the slot to the free list.
    fn release_stem(&mut self, slot: SlotIndex) {
        // SAFETY: the caller unlinked a stem line from the tree; it is
        // dropped exactly once here.
        unsafe { ManuallyDrop::drop(&mut self.pool[slot as usize].stem) };
        self.push_free(slot);
    }

    /// Drop the leaf line in `slot` and return the slot to the free list.
    fn release_leaf(&mut self, slot: SlotIndex) {
        // SAFETY: the caller unlinked a leaf line from the tree; it is
        // dropped exactly once here.
        unsafe { ManuallyDrop::drop(&mut self.pool[slot as usize].leaf) };
        self.push_free(slot);
    }

    // ========================================================================
    //  Line accessors
    // ========================================================================

    // A slot's role is structural: the intra-page tree reaches stem lines at
    // depths below `stem_levels` and leaf lines at `stem_levels`. Every
    // accessor below relies on the caller addressing a slot in the role the
    // structure gives it.

    #[inline]
    fn stem(&self, slot: SlotIndex) -> &StemLine<E::Key, CAP> {
        // SAFETY: see role note above.
        unsafe { &self.pool[slot as usize].stem }
    }

    #[inline]
    fn stem_mut(&mut self, slot: SlotIndex) -> &mut StemLine<E::Key, CAP> {
        // SAFETY: see role note above.
        unsafe { &mut self.pool[slot as usize].stem }
    }

    #[inline]
    fn leaf(&self, slot: SlotIndex) -> &LeafLine<E, CAP> {
        // SAFETY: see role note above.
        unsafe { &self.pool[slot as usize].leaf }
    }

    #[inline]
    fn leaf_mut(&mut self, slot: SlotIndex) -> &mut LeafLine<E, CAP> {
        // SAFETY: see role note above.
        unsafe { &mut self.pool[slot as usize].leaf }
    }

    /// Distinct mutable borrows of two stem lines.
    fn stem_pair_mut(
        &mut self,
        a: SlotIndex,
        b: SlotIndex,
    ) -> (&mut StemLine<E::Key, CAP>, &mut StemLine<E::Key, CAP>) {
        assert_ne!(a, b, "stem pair must be distinct slots");

        let base = self.pool.as_mut_ptr();
        // SAFETY: distinct indices within the pool; ManuallyDrop is
        // repr(transparent) over the line.
        unsafe {
            let pa = (&raw mut (*base.add(a as usize)).stem).cast::<StemLine<E::Key, CAP>>();
            let pb = (&raw mut (*base.add(b as usize)).stem).cast::<StemLine<E::Key, CAP>>();
            (&mut *pa, &mut *pb)
        }
    }

    /// Distinct mutable borrows of two leaf lines.
    fn leaf_pair_mut(
        &mut self,
        a: SlotIndex,
        b: SlotIndex,
    ) -> (&mut LeafLine<E, CAP>, &mut LeafLine<E, CAP>) {
        assert_ne!(a, b, "leaf pair must be distinct slots");

        let base = self.pool.as_mut_ptr();
        // SAFETY: distinct indices within the pool; ManuallyDrop is
        // repr(transparent) over the line.
        unsafe {
            let pa = (&raw mut (*base.add(a as usize)).leaf).cast::<LeafLine<E, CAP>>();
            let pb = (&raw mut (*base.add(b as usize)).leaf).cast::<LeafLine<E, CAP>>();
            (&mut *pa, &mut *pb)
        }
    }

    // ========================================================================
    //  Load states
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn is_small(&self) -> bool {
        self.free_count as usize > 2 * Self::MAX_LEVELS - 1
    }

    #[inline]
    #[must_use]
    pub fn is_large(&self) -> bool {
        self.free_count as usize <= 2 * Self::MAX_LEVELS - 1
    }

    #[inline]
    #[must_use]
    pub fn is_oversized(&self) -> bool {
        self.free_count as usize <= Self::MAX_LEVELS - 1
    }

    // ========================================================================
    //  Accessors
    // ========================================================================

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stem_levels == 0 && self.leaf(self.root).is_empty()
    }

    #[inline]
    #[must_use]
    pub fn key(&self, position: PagePosition) -> &E::Key {
        self.leaf(position.line).key(position.elem)
    }

    #[inline]
    #[must_use]
    pub fn elem(&self, position: PagePosition) -> &E {
        self.leaf(position.line).elem(position.elem)
    }

    #[inline]
    pub fn elem_mut(&mut self, position: PagePosition) -> &mut E {
        self.leaf_mut(position.line).elem_mut(position.elem)
    }

    #[inline]
    #[must_use]
    pub fn min_key(&self) -> &E::Key {
        self.leaf(self.min_leaf).min_key()
    }

    #[inline]
    #[must_use]
    pub fn max_key(&self) -> &E::Key {
        let leaf = self.leaf(self.max_leaf);
        leaf.key(leaf.max_index())
    }

    #[must_use]
    pub fn min_position(&self) -> PagePosition {
        PagePosition { line: self.min_leaf, elem: self.leaf(self.min_leaf).min_index() }
    }

    #[must_use]
    pub fn max_position(&self) -> PagePosition {
        PagePosition { line: self.max_leaf, elem: self.leaf(self.max_leaf).max_index() }
    }

    /// Position just before `position`, crossing leaf-line boundaries.
    #[must_use]
    pub fn prev_position(&self, position: PagePosition) -> PagePosition {
        let line = self.leaf(position.line);
        if line.aux.prev != SLOT_NIL && position.elem == line.min_index() {
            let prev = self.leaf(line.aux.prev);
            PagePosition { line: line.aux.prev, elem: prev.max_index() }
        } else {
            PagePosition { line: position.line, elem: position.elem - 1 }
        }
    }

    /// Position just after `position`, crossing leaf-line boundaries.
    #[must_use]
    pub fn next_position(&self, position: PagePosition) -> PagePosition {
        let line = self.leaf(position.line);
        if line.aux.next != SLOT_NIL && position.elem == line.max_index() {
            let next = line.aux.next;
            PagePosition { line: next, elem: self.leaf(next).min_index() }
        } else {
            PagePosition { line: position.line, elem: position.elem + 1 }
        }
    }

    /// The page's only element, if it holds exactly one.
    #[must_use]
    pub fn lone_entry(&self) -> Option<&E> {
        if self.stem_levels == 0 {
            let line = self.leaf(self.root);
            if line.count() == 1 {
                return Some(line.min_elem());
            }
        }
        None
    }

    // ========================================================================
    //  Search
    // ========================================================================

    /// Position of the element with the greatest key less than or equal to
    /// `find_key`, or the minimum position if every key is greater.
    #[must_use]
    pub fn find(&self, find_key: &E::Key) -> PagePosition {
        let mut slot = self.root;
        for _ in 0..self.stem_levels {
            let stem = self.stem(slot);
            slot = stem.elem(stem.find(find_key)).child;
        }
        PagePosition { line: slot, elem: self.leaf(slot).find(find_key) }
    }

    /// The descent taken to find `find_key`, one position per level.
    fn find_path(&self, find_key: &E::Key) -> PagePath {
        let mut path = PagePath::with_capacity(self.stem_levels as usize + 1);
        let mut slot = self.root;
        for _ in 0..self.stem_levels {
            let stem = self.stem(slot);
            let elem = stem.find(find_key);
            path.push(PagePosition { line: slot, elem });
            slot = stem.elem(elem).child;
        }
        path.push(PagePosition { line: slot, elem: self.leaf(slot).find(find_key) });
        path
    }

    /// The leftmost descent.
    fn min_path(&self) -> PagePath {
        let mut path = PagePath::with_capacity(self.stem_levels as usize + 1);
        let mut slot = self.root;
        for _ in 0..self.stem_levels {
            let stem = self.stem(slot);
            path.push(PagePosition { line: slot, elem: stem.min_index() });
            slot = stem.elem(stem.min_index()).child;
        }
        path.push(PagePosition { line: slot, elem: self.leaf(slot).min_index() });
        path
    }

    /// The rightmost descent.
    fn max_path(&self) -> PagePath {
        let mut path = PagePath::with_capacity(self.stem_levels as usize + 1);
        let mut slot = self.root;
        for _ in 0..self.stem_levels {
            let stem = self.stem(slot);
            let elem = stem.max_index();
            path.push(PagePosition { line: slot, elem });
            slot = stem.elem(elem).child;
        }
        let leaf = self.leaf(slot);
        path.push(PagePosition { line: slot, elem: leaf.max_index() });
        path
    }

    // ========================================================================
    //  Insert
    // ========================================================================

    /// Grow a new intra-page root if the current one is full, so the
    /// following descent always finds room to pin split halves.
    fn split_root(&mut self) {
        if self.stem_levels > 0 {
            let old_root = self.root;
            if !self.stem(old_root).is_full() {
                return;
            }

            let split_slot = self.allocate();
            self.pool[split_slot as usize].stem = ManuallyDrop::new(LineNode::new(()));
            let (old, split) = self.stem_pair_mut(old_root, split_slot);
            old.split(split);
            let low_key = old.min_key().clone();
            let high_key = split.min_key().clone();

            let new_root = self.allocate();
            self.pool[new_root as usize].stem = ManuallyDrop::new(LineNode::new(()));
            let root_line = self.stem_mut(new_root);
            root_line.insert(StemEntry { key: low_key, child: old_root });
            root_line.insert(StemEntry { key: high_key, child: split_slot });
            self.root = new_root;
            self.stem_levels += 1;
        } else {
            let old_root = self.root;
            if !self.leaf(old_root).is_full() {
                return;
            }

            let split_slot = self.allocate();
            self.pool[split_slot as usize].leaf =
                ManuallyDrop::new(LineNode::new(LineLinks { prev: old_root, next: SLOT_NIL }));
            let (old, split) = self.leaf_pair_mut(old_root, split_slot);
            old.split(split);
            old.aux.next = split_slot;
            let low_key = old.min_key().clone();
            let high_key = split.min_key().clone();
            self.max_leaf = split_slot;

            let new_root = self.allocate();
            self.pool[new_root as usize].stem = ManuallyDrop::new(LineNode::new(()));
            let root_line = self.stem_mut(new_root);
            root_line.insert(StemEntry { key: low_key, child: old_root });
            root_line.insert(StemEntry { key: high_key, child: split_slot });
            self.root = new_root;
            self.stem_levels += 1;
        }
    }

    /// Insert an element, or replace the element with an equal key and
    /// return the old one.
    ///
    /// Splits are preemptive and top-down: a full child is split and pinned
    /// in its parent before the descent leaves the parent, so nothing
    /// bubbles back up. The caller must not invoke this on an oversized
    /// page.
    pub fn insert(&mut self, new_elem: E) -> Option<E> {
        self.split_root();

        let new_key = new_elem.key().clone();

        if self.stem_levels == 0 {
            let root = self.root;
            return self.leaf_mut(root).insert(new_elem);
        }

        let mut current = self.root;
        for _ in 1..self.stem_levels {
            let (target_pos, target) = {
                let stem = self.stem(current);
                let pos = stem.find(&new_key);
                (pos, stem.elem(pos).child)
            };

            if new_key < *self.stem(target).min_key() {
                self.stem_mut(current).set_key(target_pos, new_key.clone());
            }

            if self.stem(target).is_full() {
                let split_slot = self.allocate();
                self.pool[split_slot as usize].stem = ManuallyDrop::new(LineNode::new(()));
                let (full, split) = self.stem_pair_mut(target, split_slot);
                full.split(split);
                let split_min = split.min_key().clone();
                self.stem_mut(current)
                    .insert(StemEntry { key: split_min.clone(), child: split_slot });

                current = if new_key >= split_min { split_slot } else { target };
            } else {
                current = target;
            }
        }

        let (target_pos, target) = {
            let stem = self.stem(current);
            let pos = stem.find(&new_key);
            (pos, stem.elem(pos).child)
        };

        if new_key < *self.leaf(target).min_key() {
            self.stem_mut(current).set_key(target_pos, new_key.clone());
        }

        if self.leaf(target).is_full() {
            let split_slot = self.allocate();
            self.pool[split_slot as usize].leaf = ManuallyDrop::new(LineNode::new(LineLinks::NONE));
            let (full, split) = self.leaf_pair_mut(target, split_slot);
            full.split(split);

            // Splice the new line into the leaf list after the split one.
            let old_next = full.aux.next;
            full.aux.next = split_slot;
            split.aux.prev = target;
            split.aux.next = old_next;
            let split_min = split.min_key().clone();
            if old_next != SLOT_NIL {
                self.leaf_mut(old_next).aux.prev = split_slot;
            }
            if self.max_leaf == target {
                self.max_leaf = split_slot;
            }

            self.stem_mut(current)
                .insert(StemEntry { key: split_min.clone(), child: split_slot });

            if new_key >= split_min {
                self.leaf_mut(split_slot).insert(new_elem)
            } else {
                self.leaf_mut(target).insert(new_elem)
            }
        } else {
            self.leaf_mut(target).insert(new_elem)
        }
    }

    /// Register a freshly allocated leaf line as the new leftmost leaf.
    ///
    /// The caller has already filled the line, spliced it into the leaf
    /// list, and updated `min_leaf`; this descends the leftmost path
    /// rewriting routing keys and inserts the `(key, slot)` entry at the
    /// bottom stem level, growing the stem if necessary.
    pub fn insert_min_leaf(&mut self, new_min_key: E::Key, new_slot: SlotIndex) {
        if self.stem_levels == 0 {
            let old_root = self.root;
            let old_min = self.leaf(old_root).min_key().clone();

            let new_root = self.allocate();
            self.pool[new_root as usize].stem = ManuallyDrop::new(LineNode::new(()));
            let root_line = self.stem_mut(new_root);
            root_line.insert(StemEntry { key: new_min_key, child: new_slot });
            root_line.insert(StemEntry { key: old_min, child: old_root });
            self.root = new_root;
            self.stem_levels += 1;
            return;
        }

        self.split_root();

        let mut current = self.root;
        for _ in 1..self.stem_levels {
            let (target_pos, target) = {
                let stem = self.stem(current);
                (stem.min_index(), stem.min_elem().child)
            };
            self.stem_mut(current).set_key(target_pos, new_min_key.clone());

            if self.stem(target).is_full() {
                let split_slot = self.allocate();
                self.pool[split_slot as usize].stem = ManuallyDrop::new(LineNode::new(()));
                let (full, split) = self.stem_pair_mut(target, split_slot);
                full.split(split);
                let split_min = split.min_key().clone();
                self.stem_mut(current).insert(StemEntry { key: split_min, child: split_slot });
            }

            current = target;
        }

        self.stem_mut(current).insert(StemEntry { key: new_min_key, child: new_slot });
    }

    /// Register a freshly allocated leaf line as the new rightmost leaf.
    /// Mirror image of [`Self::insert_min_leaf`], without key rewrites.
    pub fn insert_max_leaf(&mut self, new_min_key: E::Key, new_slot: SlotIndex) {
        if self.stem_levels == 0 {
            let old_root = self.root;
            let old_min = self.leaf(old_root).min_key().clone();

            let new_root = self.allocate();
            self.pool[new_root as usize].stem = ManuallyDrop::new(LineNode::new(()));
            let root_line = self.stem_mut(new_root);
            root_line.insert(StemEntry { key: old_min, child: old_root });
            root_line.insert(StemEntry { key: new_min_key, child: new_slot });
            self.root = new_root;
            self.stem_levels += 1;
            return;
        }

        self.split_root();

        let mut current = self.root;
        for _ in 1..self.stem_levels {
            let target = {
                let stem = self.stem(current);
                stem.elem(stem.max_index()).child
            };

            if self.stem(target).is_full() {
                let split_slot = self.allocate();
                self.pool[split_slot as usize].stem = ManuallyDrop::new(LineNode::new(()));
                let (full, split) = self.stem_pair_mut(target, split_slot);
                full.split(split);
                let split_min = split.min_key().clone();
                self.stem_mut(current).insert(StemEntry { key: split_min, child: split_slot });
                current = split_slot;
            } else {
                current = target;
            }
        }

        self.stem_mut(current).insert(StemEntry { key: new_min_key, child: new_slot });
    }

    // ========================================================================
    //  Key maintenance
    // ========================================================================

    /// Replace the key of the element at `position`, fixing the routing
    /// keys above it when it is the first element of its line.
    ///
    /// Only called on pages whose elements are routing entries, where the
    /// caller guarantees the new key preserves the ordering.
    pub fn set_key(&mut self, position: PagePosition, new_key: E::Key) {
        let old_key = self.leaf(position.line).key(position.elem).clone();
        self.leaf_mut(position.line).set_key(position.elem, new_key.clone());

        if position.elem == 0 && self.stem_levels > 0 {
            // The stems still route by the old key, so the old key finds
            // the path to this line.
            let path = self.find_path(&old_key);
            let depth = self.stem_levels as usize - 1;
            self.update_key(&path, depth, path[depth].elem, new_key);
        }
    }

    /// Rewrite the routing key at `path[depth]`, propagating to the levels
    /// above while the rewritten entry is the first of its line.
    fn update_key(&mut self, path: &PagePath, depth: usize, elem: LineIndex, new_key: E::Key) {
        if depth > 0 && elem == 0 {
            self.stem_mut(path[depth].line).set_key(elem, new_key.clone());
            self.update_key(path, depth - 1, path[depth - 1].elem, new_key);
        } else {
            self.stem_mut(path[depth].line).set_key(elem, new_key);
        }
    }

    // ========================================================================
    //  Erase
    // ========================================================================

    /// Erase the element with the given key and return it.
    ///
    /// The key must be present; callers resolve absence beforehand. A leaf
    /// line that would drop under minimum fill is rebalanced with a list
    /// neighbor (merged when the combined entries fit in one line,
    /// borrowed from otherwise) and the rebalancing propagates up the
    /// stem levels.
    pub fn erase(&mut self, erase_key: &E::Key) -> E {
        let path = self.find_path(erase_key);

        let levels = self.stem_levels as usize;
        let position = path[levels];
        let line = position.line;
        let elem = position.elem;
        debug_assert!(
            *self.leaf(line).key(elem) == *erase_key,
            "erase of a key that is not in the page"
        );

        if levels == 0 || self.leaf(line).count() > LeafLine::<E, CAP>::MIN_COUNT {
            let removed = self.leaf_mut(line).erase(elem);
            if levels > 0 && elem == 0 {
                let new_min = self.leaf(line).min_key().clone();
                self.update_key(&path, levels - 1, path[levels - 1].elem, new_min);
            }
            return removed;
        }

        let parent_elem = path[levels - 1].elem;
        let links = self.leaf(line).aux;

        if links.prev != SLOT_NIL {
            let prev = links.prev;
            if self.leaf(line).count() + self.leaf(prev).count() <= CAP {
                let (this, prev_line) = self.leaf_pair_mut(line, prev);
                let removed = this.merge_prev_erase(elem, prev_line);
                let next = this.aux.next;
                prev_line.aux.next = next;
                if next != SLOT_NIL {
                    self.leaf_mut(next).aux.prev = prev;
                }
                if self.max_leaf == line {
                    self.max_leaf = prev;
                }
                self.release_leaf(line);
                self.erase_node(&path, levels - 1, parent_elem);
                removed
            } else {
                let (this, prev_line) = self.leaf_pair_mut(line, prev);
                let removed = this.borrow_prev_erase(elem, prev_line);
                // This line has a new minimum.
                let new_min = self.leaf(line).min_key().clone();
                self.update_key(&path, levels - 1, parent_elem, new_min);
                removed
            }
        } else {
            let next = links.next;
            debug_assert!(next != SLOT_NIL, "thin leaf line with no neighbors");

            if self.leaf(line).count() + self.leaf(next).count() <= CAP {
                let (this, next_line) = self.leaf_pair_mut(line, next);
                let removed = this.merge_next_erase(elem, next_line);
                let next_next = next_line.aux.next;
                this.aux.next = next_next;
                if next_next != SLOT_NIL {
                    self.leaf_mut(next_next).aux.prev = line;
                }
                if self.max_leaf == next {
                    self.max_leaf = line;
                }
                self.release_leaf(next);
                if elem == 0 {
                    let new_min = self.leaf(line).min_key().clone();
                    self.update_key(&path, levels - 1, parent_elem, new_min);
                }
                self.erase_node(&path, levels - 1, parent_elem + 1);
                removed
            } else {
                let (this, next_line) = self.leaf_pair_mut(line, next);
                let removed = this.borrow_next_erase(elem, next_line);
                // The next line has a new minimum.
                let next_min = self.leaf(next).min_key().clone();
                self.update_key(&path, levels - 1, parent_elem + 1, next_min);
                if elem == 0 {
                    let new_min = self.leaf(line).min_key().clone();
                    self.update_key(&path, levels - 1, parent_elem, new_min);
                }
                removed
            }
        }
    }

    /// Erase the routing entry at index `elem` of the stem line at
    /// `path[depth]`, rebalancing stem lines that would turn thin against
    /// their siblings and collapsing the root level when it narrows to one
    /// child.
    fn erase_node(&mut self, path: &PagePath, depth: usize, elem: LineIndex) {
        let line = path[depth].line;

        if depth == 0 || self.stem(line).count() > StemLine::<E::Key, CAP>::MIN_COUNT {
            drop(self.stem_mut(line).erase(elem));

            if depth > 0 && elem == 0 {
                let new_min = self.stem(line).min_key().clone();
                self.update_key(path, depth - 1, path[depth - 1].elem, new_min);
            }

            if depth == 0 && self.stem(line).count() == 1 {
                self.root = self.stem(line).min_elem().child;
                self.release_stem(line);
                self.stem_levels -= 1;
            }
            return;
        }

        let parent_line = path[depth - 1].line;
        let parent_elem = path[depth - 1].elem;

        if parent_elem > 0 {
            let prev = self.stem(parent_line).elem(parent_elem - 1).child;

            if self.stem(line).count() + self.stem(prev).count() <= CAP {
                let (this, prev_line) = self.stem_pair_mut(line, prev);
                drop(this.merge_prev_erase(elem, prev_line));
                self.release_stem(line);
                self.erase_node(path, depth - 1, parent_elem);
            } else {
                let (this, prev_line) = self.stem_pair_mut(line, prev);
                drop(this.borrow_prev_erase(elem, prev_line));
                let new_min = self.stem(line).min_key().clone();
                self.update_key(path, depth - 1, parent_elem, new_min);
            }
        } else {
            let next = self.stem(parent_line).elem(parent_elem + 1).child;

            if self.stem(line).count() + self.stem(next).count() <= CAP {
                let (this, next_line) = self.stem_pair_mut(line, next);
                drop(this.merge_next_erase(elem, next_line));
                self.release_stem(next);
                if elem == 0 {
                    let new_min = self.stem(line).min_key().clone();
                    self.update_key(path, depth - 1, parent_elem, new_min);
                }
                self.erase_node(path, depth - 1, parent_elem + 1);
            } else {
                let (this, next_line) = self.stem_pair_mut(line, next);
                drop(this.borrow_next_erase(elem, next_line));
                let next_min = self.stem(next).min_key().clone();
                self.update_key(path, depth - 1, parent_elem + 1, next_min);
                if elem == 0 {
                    let new_min = self.stem(line).min_key().clone();
                    self.update_key(path, depth - 1, parent_elem, new_min);
                }
            }
        }
    }

    // ========================================================================
    //  Page-to-page transfers
    // ========================================================================

    /// Move one leaf line's worth of data from the previous page into this
    /// one.
    ///
    /// A donor line at healthy fill moves wholesale into a fresh slot
    /// spliced in at this page's minimum end; an underfull one is drained
    /// element by element through [`Self::insert`]. The element-wise path
    /// is also taken when splicing would demote a thin root line of this
    /// page into a non-root leaf line. Either way the donor unlinks the
    /// emptied line from its own structure.
    pub fn borrow_prev(&mut self, prev_page: &mut Self) {
        let donor_path = prev_page.max_path();
        let donor_levels = prev_page.stem_levels as usize;
        let old_slot = donor_path[donor_levels].line;

        let donor_thin = prev_page.leaf(old_slot).count() < LeafLine::<E, CAP>::MIN_COUNT;
        let would_demote_thin = self.stem_levels == 0 && self.leaf(self.root).is_thin();
        if donor_thin || would_demote_thin {
            for elem in prev_page.leaf_mut(old_slot).take_all() {
                self.insert(elem);
            }
        } else {
            let new_slot = self.allocate();
            let old_min_leaf = self.min_leaf;
            self.pool[new_slot as usize].leaf =
                ManuallyDrop::new(LineNode::new(LineLinks { prev: SLOT_NIL, next: old_min_leaf }));
            self.leaf_mut(old_min_leaf).aux.prev = new_slot;
            self.leaf_mut(new_slot).take_from(prev_page.leaf_mut(old_slot));
            self.min_leaf = new_slot;

            let new_min_key = self.leaf(new_slot).min_key().clone();
            self.insert_min_leaf(new_min_key, new_slot);
        }

        if prev_page.stem_levels > 0 {
            let new_max = prev_page.leaf(old_slot).aux.prev;
            prev_page.max_leaf = new_max;
            prev_page.leaf_mut(new_max).aux.next = SLOT_NIL;
            prev_page.release_leaf(old_slot);
            prev_page.erase_node(&donor_path, donor_levels - 1, donor_path[donor_levels - 1].elem);
        }
        // A donor without stems keeps its emptied root line.
    }

    /// Move one leaf line's worth of data from the next page into this one.
    /// Mirror image of [`Self::borrow_prev`].
    pub fn borrow_next(&mut self, next_page: &mut Self) {
        let donor_path = next_page.min_path();
        let donor_levels = next_page.stem_levels as usize;
        let old_slot = donor_path[donor_levels].line;

        let donor_thin = next_page.leaf(old_slot).count() < LeafLine::<E, CAP>::MIN_COUNT;
        let would_demote_thin = self.stem_levels == 0 && self.leaf(self.root).is_thin();
        if donor_thin || would_demote_thin {
            for elem in next_page.leaf_mut(old_slot).take_all() {
                self.insert(elem);
            }
        } else {
            let new_slot = self.allocate();
            let old_max_leaf = self.max_leaf;
            self.pool[new_slot as usize].leaf =
                ManuallyDrop::new(LineNode::new(LineLinks { prev: old_max_leaf, next: SLOT_NIL }));
            self.leaf_mut(old_max_leaf).aux.next = new_slot;
            self.leaf_mut(new_slot).take_from(next_page.leaf_mut(old_slot));
            self.max_leaf = new_slot;

            let new_min_key = self.leaf(new_slot).min_key().clone();
            self.insert_max_leaf(new_min_key, new_slot);
        }

        if next_page.stem_levels > 0 {
            let new_min = next_page.leaf(old_slot).aux.next;
            next_page.min_leaf = new_min;
            next_page.leaf_mut(new_min).aux.prev = SLOT_NIL;
            next_page.release_leaf(old_slot);
            next_page.erase_node(&donor_path, donor_levels - 1, donor_path[donor_levels - 1].elem);
        }
    }

    /// Pop this page's rightmost leaf line into a brand-new page, which
    /// becomes that page's root line. Used when no sibling page can take
    /// the overflow.
    pub fn split_one_leaf(&mut self, new_aux: A) -> Self {
        let this_path = self.max_path();
        let levels = self.stem_levels as usize;
        let old_slot = this_path[levels].line;

        let mut new_page = Self::new(new_aux);
        let root_slot = new_page.root;
        new_page.leaf_mut(root_slot).take_from(self.leaf_mut(old_slot));

        if self.stem_levels > 0 {
            let new_max = self.leaf(old_slot).aux.prev;
            self.max_leaf = new_max;
            self.leaf_mut(new_max).aux.next = SLOT_NIL;
            self.release_leaf(old_slot);
            self.erase_node(&this_path, levels - 1, this_path[levels - 1].elem);
        }

        new_page
    }

    // ========================================================================
    //  Invariant checker
    // ========================================================================

    /// Verify the page's structural invariants (debug builds only).
    ///
    /// Checks sortedness and fill of every line, routing-key correctness,
    /// the leaf list, and the slot-pool accounting:
    /// reachable ⊎ free-list = `0..back` and
    /// `free_count == POOL_COUNT − |reachable|`.
    ///
    /// # Panics
    /// If any invariant is violated.
    #[cfg(debug_assertions)]
    pub fn debug_assert_invariants(&self) {
        let mut reachable = [false; POOL_COUNT];
        let mut leaf_slots = 0usize;
        self.check_subtree(self.root, 0, &mut reachable, &mut leaf_slots);

        // Leaf list: doubly linked, strictly increasing, endpoints match.
        let mut slot = self.min_leaf;
        let mut prev = SLOT_NIL;
        let mut listed = 0usize;
        loop {
            assert!(reachable[slot as usize], "leaf list visits an unreachable slot");
            let line = self.leaf(slot);
            assert_eq!(line.aux.prev, prev, "leaf list prev link mismatch");
            if prev != SLOT_NIL {
                let prev_line = self.leaf(prev);
                assert!(
                    prev_line.key(prev_line.max_index()) < line.min_key(),
                    "leaf list key ranges must be strictly increasing"
                );
            }
            listed += 1;
            prev = slot;
            if line.aux.next == SLOT_NIL {
                break;
            }
            slot = line.aux.next;
        }
        assert_eq!(prev, self.max_leaf, "leaf list must end at max_leaf");
        assert_eq!(listed, leaf_slots, "every reachable leaf line must be listed");

        // Pool accounting.
        let live = reachable.iter().filter(|r| **r).count();
        assert_eq!(
            self.free_count as usize,
            POOL_COUNT - live,
            "free_count must complement the reachable slots"
        );
        for slot in self.back as usize..POOL_COUNT {
            assert!(!reachable[slot], "slot beyond the high-water mark is live");
        }
        let chain_len = self.back as usize - live;
        let mut free_seen = [false; POOL_COUNT];
        let mut head = self.head;
        for _ in 0..chain_len {
            assert!(head < self.back, "free-list slot beyond the high-water mark");
            assert!(
                !reachable[head as usize] && !free_seen[head as usize],
                "slot is both live and free"
            );
            free_seen[head as usize] = true;
            // SAFETY: the slot is on the free list.
            head = unsafe { self.pool[head as usize].free }.prev_head;
        }
    }

    /// No-op in release builds.
    #[cfg(not(debug_assertions))]
    #[inline]
    pub fn debug_assert_invariants(&self) {}

    #[cfg(debug_assertions)]
    fn check_subtree(
        &self,
        slot: SlotIndex,
        depth: u8,
        reachable: &mut [bool; POOL_COUNT],
        leaf_slots: &mut usize,
    ) -> Option<&E::Key> {
        assert!(!reachable[slot as usize], "slot reachable through two paths");
        reachable[slot as usize] = true;

        if depth < self.stem_levels {
            let stem = self.stem(slot);
            assert!(stem.count() > 0, "stem line must not be empty");
            if depth > 0 {
                assert!(!stem.is_thin(), "non-root stem line under minimum fill");
            }
            for i in 1..stem.count() {
                assert!(
                    stem.key((i - 1) as LineIndex) < stem.key(i as LineIndex),
                    "stem keys must be strictly sorted"
                );
            }
            for i in 0..stem.count() {
                let entry = stem.elem(i as LineIndex);
                let child_min = self
                    .check_subtree(entry.child, depth + 1, reachable, leaf_slots)
                    .expect("stem child must not be empty");
                assert!(entry.key == *child_min, "routing key must equal child minimum");
            }
            Some(stem.min_key())
        } else {
            let leaf = self.leaf(slot);
            *leaf_slots += 1;
            if self.stem_levels > 0 {
                assert!(!leaf.is_thin(), "non-root leaf line under minimum fill");
            }
            for i in 1..leaf.count() {
                assert!(
                    leaf.key((i - 1) as LineIndex) < leaf.key(i as LineIndex),
                    "leaf keys must be strictly sorted"
                );
            }
            if leaf.is_empty() { None } else { Some(leaf.min_key()) }
        }
    }
}

impl<E: TreeEntry, A, const CAP: usize> Drop for PageNode<E, A, CAP> {
    fn drop(&mut self) {
        self.drop_subtree(self.root, 0);
    }
}

impl<E: TreeEntry, A, const CAP: usize> PageNode<E, A, CAP> {
    fn drop_subtree(&mut self, slot: SlotIndex, depth: u8) {
        if depth < self.stem_levels {
            let children: SmallVec<[SlotIndex; 16]> = {
                let stem = self.stem(slot);
                (0..stem.count()).map(|i| stem.elem(i as LineIndex).child).collect()
            };
            for child in children {
                self.drop_subtree(child, depth + 1);
            }
            // SAFETY: dropping the whole page; each line is dropped once.
            unsafe { ManuallyDrop::drop(&mut self.pool[slot as usize].stem) };
        } else {
            // SAFETY: dropping the whole page; each line is dropped once.
            unsafe { ManuallyDrop::drop(&mut self.pool[slot as usize].leaf) };
        }
    }
}

// ============================================================================
//  Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    type TestPage = PageNode<(u64, u64), (), 15>;

    /// Insert ascending even keys until the page stops being small.
    fn filled_page() -> (TestPage, Vec<u64>) {
        let mut page = TestPage::new(());
        let mut keys = Vec::new();
        let mut k = 0u64;
        while page.is_small() {
            page.insert((k, k * 10));
            keys.push(k);
            k += 2;
        }
        page.debug_assert_invariants();
        (page, keys)
    }

    fn collect_keys(page: &TestPage) -> Vec<u64> {
        let mut out = Vec::new();
        if page.is_empty() {
            return out;
        }
        let mut pos = page.min_position();
        loop {
            out.push(page.elem(pos).0);
            if pos == page.max_position() {
                break;
            }
            pos = page.next_position(pos);
        }
        out
    }

    #[test]
    fn test_layout() {
        assert_eq!(size_of::<TestPage>(), PAGE_NODE_SIZE);
        assert_eq!(align_of::<TestPage>(), PAGE_NODE_SIZE);
        assert_eq!(POOL_COUNT, 15);
    }

    #[test]
    fn test_new_page_is_empty_and_small() {
        let page = TestPage::new(());
        assert!(page.is_empty());
        assert!(page.is_small());
        assert!(!page.is_oversized());
        page.debug_assert_invariants();
    }

    #[test]
    fn test_insert_and_find_within_root_line() {
        let mut page = TestPage::new(());
        for k in [5u64, 3, 9, 1, 7] {
            assert!(page.insert((k, k)).is_none());
        }
        assert_eq!(collect_keys(&page), vec![1, 3, 5, 7, 9]);

        let pos = page.find(&5);
        assert_eq!(page.elem(pos).0, 5);
        let pos = page.find(&6);
        assert_eq!(page.elem(pos).0, 5);
        let pos = page.find(&0);
        assert_eq!(pos, page.min_position());
    }

    #[test]
    fn test_insert_grows_stem_levels() {
        let (page, keys) = filled_page();
        assert!(page.stem_levels > 0, "filled page should have grown a stem");
        assert_eq!(collect_keys(&page), keys);

        for &k in &keys {
            let pos = page.find(&k);
            assert_eq!(page.elem(pos).0, k, "key {k} must be findable");
            assert_eq!(page.elem(pos).1, k * 10);
        }
    }

    #[test]
    fn test_insert_duplicate_replaces_across_lines() {
        let (mut page, keys) = filled_page();
        let probe = keys[keys.len() / 2];
        let old = page.insert((probe, 777));
        assert_eq!(old, Some((probe, probe * 10)));
        assert_eq!(page.elem(page.find(&probe)).1, 777);
        page.debug_assert_invariants();
    }

    #[test]
    fn test_find_between_keys() {
        let (page, _) = filled_page();
        // Keys are even; odd probes must land on the predecessor.
        let pos = page.find(&41);
        assert_eq!(page.elem(pos).0, 40);
    }

    #[test]
    fn test_erase_all_in_random_order() {
        let (mut page, keys) = filled_page();
        // Deterministic scramble of the erase order.
        let mut order = keys.clone();
        order.sort_by_key(|k| k.wrapping_mul(0x9e37_79b9_7f4a_7c15));

        let mut remaining: Vec<u64> = keys;
        for &k in &order {
            let removed = page.erase(&k);
            assert_eq!(removed, (k, k * 10));
            remaining.retain(|&r| r != k);
            page.debug_assert_invariants();
            assert_eq!(collect_keys(&page), remaining);
        }
        assert!(page.is_empty());
    }

    #[test]
    fn test_min_and_max_positions() {
        let (page, keys) = filled_page();
        assert_eq!(*page.min_key(), keys[0]);
        assert_eq!(*page.max_key(), *keys.last().unwrap());
        assert_eq!(page.elem(page.min_position()).0, keys[0]);
        assert_eq!(page.elem(page.max_position()).0, *keys.last().unwrap());
    }

    #[test]
    fn test_position_walk_both_directions() {
        let (page, keys) = filled_page();
        let mut pos = page.max_position();
        let mut reversed = vec![page.elem(pos).0];
        while pos != page.min_position() {
            pos = page.prev_position(pos);
            reversed.push(page.elem(pos).0);
        }
        reversed.reverse();
        assert_eq!(reversed, keys);
    }

    #[test]
    fn test_load_states_progress() {
        let mut page = TestPage::new(());
        assert!(page.is_small());
        let mut k = 0u64;
        while !page.is_oversized() {
            page.insert((k, 0));
            k += 1;
        }
        assert!(page.is_large(), "oversized is a subset of large");
        page.debug_assert_invariants();
    }

    #[test]
    fn test_split_one_leaf() {
        let (mut page, keys) = filled_page();
        let new_page = page.split_one_leaf(());
        page.debug_assert_invariants();
        new_page.debug_assert_invariants();

        let left = collect_keys(&page);
        let right = collect_keys(&new_page);
        assert!(!right.is_empty());
        assert!(left.last().unwrap() < right.first().unwrap());

        let mut combined = left;
        combined.extend(right);
        assert_eq!(combined, keys);
    }

    #[test]
    fn test_borrow_prev_moves_a_line() {
        let (mut donor, keys) = filled_page();
        let mut page = TestPage::new(());
        // Seed the recipient with keys above the donor's range.
        let base = keys.last().unwrap() + 2;
        for i in 0..4u64 {
            page.insert((base + i, 0));
        }

        page.borrow_prev(&mut donor);
        page.debug_assert_invariants();
        donor.debug_assert_invariants();

        let donated = collect_keys(&page);
        let kept = collect_keys(&donor);
        assert!(kept.last().unwrap() < donated.first().unwrap());
        assert_eq!(kept.len() + donated.len(), keys.len() + 4);
    }

    #[test]
    fn test_borrow_next_moves_a_line() {
        // Donor holds keys well above the recipient's.
        let mut donor = TestPage::new(());
        let mut donor_count = 0usize;
        let mut k = 1000u64;
        while donor.is_small() {
            donor.insert((k, 0));
            donor_count += 1;
            k += 2;
        }
        let mut page = TestPage::new(());
        for i in 0..4u64 {
            page.insert((i, 0));
        }

        page.borrow_next(&mut donor);
        page.debug_assert_invariants();
        donor.debug_assert_invariants();

        let got = collect_keys(&page);
        let kept = collect_keys(&donor);
        assert!(got.last().unwrap() < kept.first().unwrap());
        assert_eq!(got.len() + kept.len(), donor_count + 4);
    }

    #[test]
    fn test_borrow_into_sparse_page_keeps_lines_filled() {
        // Borrowing into a page whose root line is thin must not leave that
        // root line behind as an underfull non-root leaf.
        let (mut left, left_keys) = filled_page();
        let mut right = TestPage::new(());
        let base = left_keys.last().unwrap() + 1000;
        let mut k = base;
        while right.is_small() {
            right.insert((k, 0));
            k += 2;
        }

        let mut middle = TestPage::new(());
        for i in 0..3u64 {
            middle.insert((500 + i, 0));
        }

        middle.borrow_prev(&mut left);
        middle.borrow_next(&mut right);
        middle.debug_assert_invariants();
        left.debug_assert_invariants();
        right.debug_assert_invariants();

        let keys = collect_keys(&middle);
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_lone_entry() {
        let mut page = TestPage::new(());
        assert!(page.lone_entry().is_none());
        page.insert((7, 70));
        assert_eq!(page.lone_entry(), Some(&(7, 70)));
        page.insert((8, 80));
        assert!(page.lone_entry().is_none());
    }

    #[test]
    fn test_drop_releases_elements() {
        use std::rc::Rc;

        let probe = Rc::new(());
        {
            let mut page: PageNode<(u64, Rc<()>), (), 15> = PageNode::new(());
            let mut k = 0u64;
            while page.is_small() {
                page.insert((k, Rc::clone(&probe)));
                k += 1;
            }
            assert!(Rc::strong_count(&probe) > 100);
        }
        assert_eq!(Rc::strong_count(&probe), 1);
    }
}
