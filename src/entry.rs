//! Filepath: src/entry.rs
//!
//! Element abstraction for the double tree.
//!
//! Every node in the tree, at both the cache-line and the page scale, stores
//! a run of *entries* sorted by key. Leaf nodes store user elements; stem
//! nodes store routing entries pairing a subtree's minimum key with a child
//! reference. [`TreeEntry`] is the one trait all of these share: it exposes
//! the key an entry sorts by, and lets the tree rewrite a routing key when a
//! subtree's minimum changes.

/// An entry stored in a tree node, ordered by its key.
///
/// Implemented by user elements (`(K, V)` pairs for maps, plain keys for
/// sets) and by the tree's internal routing entries. Keys must be totally
/// ordered and cloneable: routing entries carry copies of subtree minimum
/// keys.
pub trait TreeEntry {
    /// The key this entry sorts by.
    type Key: Ord + Clone;

    /// The key of this entry.
    fn key(&self) -> &Self::Key;

    /// Replace this entry's key.
    ///
    /// The tree only calls this on routing entries, to keep a stem's key
    /// equal to the minimum key of the subtree it points to.
    fn set_key(&mut self, key: Self::Key);
}

impl<K: Ord + Clone, V> TreeEntry for (K, V) {
    type Key = K;

    #[inline]
    fn key(&self) -> &K {
        &self.0
    }

    #[inline]
    fn set_key(&mut self, key: K) {
        self.0 = key;
    }
}
