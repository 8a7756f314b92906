//! Graph node records.
//!
//! A [`GraphNode`] is the fundamental unit of the normalized graph: a
//! mapping from edge keys to scalar values or child references, plus the
//! bookkeeping that makes copy-on-write versioning and subscription
//! collection possible: parent back-links, transaction stamps, forward
//! version pointers, and subscriber buckets.
//!
//! # Invariants
//! - Within one transaction at most one live version exists per logical
//!   node; edits mutate it in place.
//! - Across transactions a node is immutable: changes produce a new node
//!   and chain the old one forward via `newer_base` or `newer_optimistic`.
//! - An array node's keys are a dense prefix `Index(0..n)`, no holes.
//! - Every incoming edge is recorded in the child's `parents`.

use crate::arena::NodeId;
use crate::identity::StoreKey;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Monotonic transaction identifier.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct TxId(u64);

impl TxId {
    #[inline]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxId({})", self.0)
    }
}

/// Identifier of a registered subscriber.
#[repr(transparent)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SubscriberId(u64);

impl SubscriberId {
    #[inline]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

/// Edge label inside a node's data: a named field on object nodes, a dense
/// integer index on array nodes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKey {
    /// Field store name (arguments folded in; see `identity`).
    Field(String),
    /// Position in an array node.
    Index(u32),
}

impl NodeKey {
    /// Builds a field key from a store name.
    #[inline]
    pub fn field(name: impl Into<String>) -> Self {
        NodeKey::Field(name.into())
    }

    /// Builds an index key.
    #[inline]
    pub fn index(i: usize) -> Self {
        NodeKey::Index(i as u32)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Field(name) => f.write_str(name),
            NodeKey::Index(i) => write!(f, "{}", i),
        }
    }
}

/// Shape of a node: an object with named fields or a dense array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeKind {
    Object,
    Array,
}

/// One entry of a node's data.
///
/// Child entries are references, not ownership: the same child id may
/// appear under any number of parents, which is the point of
/// normalization. Scalar entries own their JSON value; a whole JSON array
/// under a field with no nested selection is a single scalar entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Scalar(Value),
    Child(NodeId),
}

/// A record in the normalized graph.
#[derive(Debug, Clone)]
pub struct GraphNode {
    pub(crate) kind: NodeKind,
    /// Edge key to value. `BTreeMap` for deterministic iteration.
    pub(crate) data: BTreeMap<NodeKey, Slot>,
    /// Back-links `(parent, key in parent)`, deduplicated.
    pub(crate) parents: Vec<(NodeId, NodeKey)>,
    /// Store key under which this node is registered, if any.
    pub(crate) index_entry: Option<StoreKey>,
    /// Transaction that minted this version.
    pub(crate) tx_id: TxId,
    /// Whether an optimistic write minted this version.
    pub(crate) is_optimistic: bool,
    /// Forward pointer along the base version chain.
    pub(crate) newer_base: Option<NodeId>,
    /// Forward pointer along the optimistic version chain.
    pub(crate) newer_optimistic: Option<NodeId>,
    /// Subscribers notified on non-optimistic transactions only.
    pub(crate) subscribers: BTreeSet<SubscriberId>,
    /// Subscribers notified on every transaction.
    pub(crate) optimistic_subscribers: BTreeSet<SubscriberId>,
}

impl GraphNode {
    pub(crate) fn new(kind: NodeKind, tx_id: TxId, is_optimistic: bool) -> Self {
        Self {
            kind,
            data: BTreeMap::new(),
            parents: Vec::new(),
            index_entry: None,
            tx_id,
            is_optimistic,
            newer_base: None,
            newer_optimistic: None,
            subscribers: BTreeSet::new(),
            optimistic_subscribers: BTreeSet::new(),
        }
    }

    /// The node's shape.
    #[inline]
    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Raw field lookup; no projection.
    #[inline]
    pub fn get(&self, key: &NodeKey) -> Option<&Slot> {
        self.data.get(key)
    }

    /// Number of entries. For array nodes this is the dense length.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the node holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Recorded `(parent, key in parent)` back-links.
    #[inline]
    pub fn parents(&self) -> &[(NodeId, NodeKey)] {
        &self.parents
    }

    /// Convenience: the node's `__typename` scalar, when present.
    pub(crate) fn typename(&self) -> Option<&str> {
        match self.data.get(&NodeKey::field(crate::identity::TYPENAME_FIELD)) {
            Some(Slot::Scalar(Value::String(name))) => Some(name),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn node_keys_order_fields_before_indices_deterministically() {
        let mut keys = vec![
            NodeKey::index(2),
            NodeKey::field("name"),
            NodeKey::index(0),
            NodeKey::field("id"),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                NodeKey::field("id"),
                NodeKey::field("name"),
                NodeKey::index(0),
                NodeKey::index(2),
            ]
        );
    }

    #[test]
    fn typename_reads_the_scalar_slot() {
        let mut node = GraphNode::new(NodeKind::Object, TxId::new(1), false);
        assert_eq!(node.typename(), None);
        node.data.insert(
            NodeKey::field("__typename"),
            Slot::Scalar(json!("Stack")),
        );
        assert_eq!(node.typename(), Some("Stack"));
    }

    #[test]
    fn slot_equality_is_by_value_for_scalars_and_by_id_for_children() {
        assert_eq!(
            Slot::Scalar(json!([1, 2, 3])),
            Slot::Scalar(json!([1, 2, 3]))
        );
        assert_ne!(Slot::Scalar(json!(1)), Slot::Scalar(json!(2)));
        assert_eq!(
            Slot::Child(crate::arena::NodeId::new(3)),
            Slot::Child(crate::arena::NodeId::new(3))
        );
        assert_ne!(
            Slot::Child(crate::arena::NodeId::new(3)),
            Slot::Child(crate::arena::NodeId::new(4))
        );
    }
}
