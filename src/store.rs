//! The node store: graph ownership, indices, and copy-on-write.
//!
//! The store owns every graph node (in a [`NodeArena`]) and the two
//! entity indices. All structural mutation funnels through [`NodeStore::set`],
//! which implements the copy-on-write discipline:
//!
//! 1. redirect to the head of the relevant version chain;
//! 2. return unchanged when the entry already holds the value (callers
//!    depend on this to skip no-op upward propagation);
//! 3. mutate in place when the node was minted by the current transaction;
//! 4. otherwise clone into a new version, chain the old one forward, feed
//!    the old node's subscribers into the transaction's notification set,
//!    and adopt the old node's parents, which copy-on-writes the parents
//!    too, transitively to the roots.
//!
//! This is the minimum machinery that gives structural sharing for
//! unchanged subtrees, referential stability (identity compare of subtree
//! roots is a valid change test), and an upward invalidation path to the
//! subscribers that must be re-notified. Transaction-scoped in-place
//! mutation avoids O(depth × edits) copying when one write touches many
//! fields in the same subtree.
//!
//! See Okasaki, "Purely Functional Data Structures" (1999) for the
//! path-copying scheme this adapts.

use crate::arena::{NodeArena, NodeId};
use crate::identity::StoreKey;
use crate::node::{GraphNode, NodeKey, NodeKind, Slot, SubscriberId, TxId};
use std::collections::{BTreeMap, BTreeSet};
use tracing::trace;

/// Which layer of the store a lookup consults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Base graph only.
    Base,
    /// Optimistic overlay first, base as fallback.
    Optimistic,
}

impl Visibility {
    /// Maps an `is_optimistic` flag to a visibility.
    #[inline]
    pub fn from_optimistic(optimistic: bool) -> Self {
        if optimistic {
            Visibility::Optimistic
        } else {
            Visibility::Base
        }
    }

    #[inline]
    pub fn is_optimistic(self) -> bool {
        matches!(self, Visibility::Optimistic)
    }
}

/// One logical write: a unique id, an optimism flag, and the subscribers
/// collected along copy-on-written paths.
#[derive(Debug)]
pub struct Transaction {
    pub(crate) id: TxId,
    pub(crate) is_optimistic: bool,
    /// Subscribers to re-notify after commit, in deterministic order.
    pub(crate) to_notify: BTreeSet<SubscriberId>,
}

impl Transaction {
    pub(crate) fn new(id: TxId, is_optimistic: bool) -> Self {
        Self {
            id,
            is_optimistic,
            to_notify: BTreeSet::new(),
        }
    }
}

/// Owner of the graph: the node arena plus the base and optimistic indices.
#[derive(Debug, Default)]
pub struct NodeStore {
    arena: NodeArena<GraphNode>,
    base_index: BTreeMap<StoreKey, NodeId>,
    optimistic_index: BTreeMap<StoreKey, NodeId>,
}

impl NodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of node versions ever allocated.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Number of entity keys in the base index.
    #[inline]
    pub fn base_index_len(&self) -> usize {
        self.base_index.len()
    }

    /// Number of entity keys in the optimistic index.
    #[inline]
    pub fn optimistic_index_len(&self) -> usize {
        self.optimistic_index.len()
    }

    /// Resolves a node version by id.
    #[inline]
    pub(crate) fn node(&self, id: NodeId) -> &GraphNode {
        &self.arena[id]
    }

    /// Resolves a store key under the given visibility.
    ///
    /// Optimistic visibility consults the optimistic index first, then
    /// falls back to base. The indices always point at chain heads.
    pub(crate) fn lookup(&self, key: &StoreKey, visibility: Visibility) -> Option<NodeId> {
        if visibility.is_optimistic() {
            if let Some(&id) = self.optimistic_index.get(key) {
                return Some(id);
            }
        }
        self.base_index.get(key).copied()
    }

    /// Mints a node stamped with the transaction's id and optimism flag.
    pub(crate) fn new_node(&mut self, tx: &Transaction, kind: NodeKind) -> NodeId {
        self.arena
            .allocate(GraphNode::new(kind, tx.id, tx.is_optimistic))
    }

    /// Follows forward version pointers to the head of the chain relevant
    /// to the given visibility.
    pub(crate) fn head_for(&self, mut id: NodeId, optimistic: bool) -> NodeId {
        loop {
            let node = &self.arena[id];
            let next = if optimistic {
                node.newer_optimistic.or(node.newer_base)
            } else {
                node.newer_base
            };
            match next {
                Some(newer) => id = newer,
                None => return id,
            }
        }
    }

    /// Returns the child node referenced at `key`, redirected to the head
    /// of its version chain. `None` when the entry is absent or scalar.
    pub(crate) fn child_of(&self, node: NodeId, key: &NodeKey, optimistic: bool) -> Option<NodeId> {
        match self.arena[node].data.get(key) {
            Some(Slot::Child(child)) => Some(self.head_for(*child, optimistic)),
            _ => None,
        }
    }

    /// As [`Self::child_of`], but only when the child is an array node.
    pub(crate) fn array_child_of(
        &self,
        node: NodeId,
        key: &NodeKey,
        optimistic: bool,
    ) -> Option<NodeId> {
        let child = self.child_of(node, key, optimistic)?;
        match self.arena[child].kind {
            NodeKind::Array => Some(child),
            NodeKind::Object => None,
        }
    }

    /// As [`Self::child_of`], but only when the child is an object node.
    pub(crate) fn object_child_of(
        &self,
        node: NodeId,
        key: &NodeKey,
        optimistic: bool,
    ) -> Option<NodeId> {
        let child = self.child_of(node, key, optimistic)?;
        match self.arena[child].kind {
            NodeKind::Object => Some(child),
            NodeKind::Array => None,
        }
    }

    /// Writes `value` at `key` on `id` under the copy-on-write discipline.
    ///
    /// Returns the node carrying the entry afterwards: `id` itself when the
    /// write short-circuited or mutated in place, or the freshly minted
    /// version when the node was copy-on-written.
    pub(crate) fn set(
        &mut self,
        id: NodeId,
        key: NodeKey,
        value: Slot,
        tx: &mut Transaction,
    ) -> NodeId {
        let id = self.head_for(id, tx.is_optimistic);

        if self.arena[id].data.get(&key) == Some(&value) {
            return id;
        }
        if self.arena[id].tx_id == tx.id {
            self.arena[id].data.insert(key, value);
            return id;
        }

        // Copy-on-write: clone, overwrite, chain forward, adopt parents.
        let new_id = {
            let previous = &self.arena[id];
            let mut version = GraphNode::new(previous.kind, tx.id, tx.is_optimistic);
            version.data = previous.data.clone();
            version.subscribers = previous.subscribers.clone();
            version.optimistic_subscribers = previous.optimistic_subscribers.clone();
            version.data.insert(key, value);
            tx.to_notify
                .extend(previous.optimistic_subscribers.iter().copied());
            if !tx.is_optimistic {
                tx.to_notify.extend(previous.subscribers.iter().copied());
            }
            self.arena.allocate(version)
        };
        trace!(
            old = %id,
            new = %new_id,
            tx = tx.id.as_u64(),
            optimistic = tx.is_optimistic,
            "copy-on-write node version"
        );
        // The forward pointer must land before parent adoption so that a
        // cyclic parent path re-entering this node resolves to the new
        // version instead of copying the old one twice.
        if tx.is_optimistic {
            self.arena[id].newer_optimistic = Some(new_id);
        } else {
            self.arena[id].newer_base = Some(new_id);
        }
        self.adopt_parents(id, new_id, tx);
        new_id
    }

    /// Removes the entry at `key`, under the same discipline as [`Self::set`].
    ///
    /// Used by the write engine to keep array nodes dense when an incoming
    /// array is shorter than the stored one.
    pub(crate) fn remove(&mut self, id: NodeId, key: &NodeKey, tx: &mut Transaction) -> NodeId {
        let id = self.head_for(id, tx.is_optimistic);

        if !self.arena[id].data.contains_key(key) {
            return id;
        }
        if self.arena[id].tx_id == tx.id {
            self.arena[id].data.remove(key);
            return id;
        }

        let new_id = {
            let previous = &self.arena[id];
            let mut version = GraphNode::new(previous.kind, tx.id, tx.is_optimistic);
            version.data = previous.data.clone();
            version.subscribers = previous.subscribers.clone();
            version.optimistic_subscribers = previous.optimistic_subscribers.clone();
            version.data.remove(key);
            tx.to_notify
                .extend(previous.optimistic_subscribers.iter().copied());
            if !tx.is_optimistic {
                tx.to_notify.extend(previous.subscribers.iter().copied());
            }
            self.arena.allocate(version)
        };
        trace!(old = %id, new = %new_id, tx = tx.id.as_u64(), "copy-on-write (remove)");
        if tx.is_optimistic {
            self.arena[id].newer_optimistic = Some(new_id);
        } else {
            self.arena[id].newer_base = Some(new_id);
        }
        self.adopt_parents(id, new_id, tx);
        new_id
    }

    /// Re-links every parent of `previous` to reference `new_id`, records
    /// the (possibly copy-on-written) parents on the new version, inherits
    /// the index entry, and re-points the matching index at the new head.
    fn adopt_parents(&mut self, previous: NodeId, new_id: NodeId, tx: &mut Transaction) {
        let parent_edges = self.arena[previous].parents.clone();
        for (parent, key_in_parent) in parent_edges {
            let adopted = self.set(parent, key_in_parent.clone(), Slot::Child(new_id), tx);
            self.add_parent(new_id, adopted, key_in_parent);
        }
        if let Some(key) = self.arena[previous].index_entry.clone() {
            self.arena[new_id].index_entry = Some(key.clone());
            if tx.is_optimistic {
                self.optimistic_index.insert(key, new_id);
            } else {
                self.base_index.insert(key, new_id);
            }
        }
    }

    /// Records a `(parent, key in parent)` back-link on `child`.
    ///
    /// An already-recorded edge is not re-added; no behavior depends on
    /// edge multiplicity and repeated writes must not grow the list.
    pub(crate) fn add_parent(&mut self, child: NodeId, parent: NodeId, key: NodeKey) {
        let node = &mut self.arena[child];
        let exists = node
            .parents
            .iter()
            .any(|(p, k)| *p == parent && *k == key);
        if !exists {
            node.parents.push((parent, key));
        }
    }

    /// Registers `node` under `key` after a write materialized it.
    ///
    /// The base index is updated on every write; the optimistic index
    /// additionally on optimistic writes. Root entries use
    /// [`Self::register_root`] instead, which writes only the index
    /// matching the write's visibility.
    pub(crate) fn register_key(&mut self, node: NodeId, key: StoreKey, tx: &Transaction) {
        self.arena[node].index_entry = Some(key.clone());
        self.base_index.insert(key.clone(), node);
        if tx.is_optimistic {
            self.optimistic_index.insert(key, node);
        }
    }

    /// Points the root entry for `key` at `node`.
    ///
    /// Unlike entity registration, a root lands only in the index matching
    /// the write's visibility; this is what keeps optimistic roots
    /// invisible to base readers.
    pub(crate) fn register_root(&mut self, key: StoreKey, node: NodeId, optimistic: bool) {
        self.arena[node].index_entry = Some(key.clone());
        if optimistic {
            self.optimistic_index.insert(key, node);
        } else {
            self.base_index.insert(key, node);
        }
    }

    /// Adds a subscriber to a node's bucket. Base-bucket subscribers fire
    /// on non-optimistic transactions only; optimistic-bucket subscribers
    /// fire on all transactions.
    pub(crate) fn add_subscriber(&mut self, node: NodeId, id: SubscriberId, optimistic: bool) {
        let node = &mut self.arena[node];
        if optimistic {
            node.optimistic_subscribers.insert(id);
        } else {
            node.subscribers.insert(id);
        }
    }

    /// Removes a subscriber from every version reachable forward from
    /// `start`, so no later copy-on-write resurrects it.
    pub(crate) fn remove_subscriber(&mut self, start: NodeId, id: SubscriberId) {
        let mut stack = vec![start];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            let node = &mut self.arena[current];
            node.subscribers.remove(&id);
            node.optimistic_subscribers.remove(&id);
            if let Some(newer) = node.newer_base {
                stack.push(newer);
            }
            if let Some(newer) = node.newer_optimistic {
                stack.push(newer);
            }
        }
    }
}
