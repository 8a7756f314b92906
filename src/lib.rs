//! Quiver: a normalized, query-shaped object cache.
//!
//! This crate ingests hierarchical query responses (trees shaped by
//! selections: named fields, arguments, aliases, fragment branches),
//! decomposes them into a graph of normalized nodes keyed by entity
//! identity, and reconstructs query-shaped immutable views out of that
//! graph on demand. It provides:
//! - A copy-on-write graph node store with parent back-links and two-layer
//!   (base + optimistic) indexing.
//! - A selection-directed write engine that merges responses by entity key
//!   and propagates structural changes to all roots.
//! - A lazy read engine resolving aliases, arguments, and fragment type
//!   conditions on access.
//! - Push-style subscriptions re-delivered after every transaction that
//!   touches the subgraph feeding a registered query.
//!
//! # Name Origin: "Quiver"
//!
//! In category theory a quiver is a directed multigraph: objects joined
//! by any number of arrows, prior to any composition law. The cache's
//! normalized graph is exactly that: entities joined by however many
//! field edges the observed queries happened to traverse, with structure
//! imposed lazily, per query, at read time.
//!
//! # Concurrency
//!
//! Single-threaded and cooperative. All store operations run to
//! completion under `&mut` access; the only deferral is subscriber
//! notification, which drains from an explicit queue after commit so
//! subscribers always observe a post-commit store.
//!
//! # Example
//!
//! ```
//! use quiver::prelude::*;
//! use serde_json::json;
//!
//! let mut cache = Cache::new();
//! let query = Document::query(selection_set([field("stack")
//!     .select([
//!         field("id").into(),
//!         field("__typename").into(),
//!         field("name").into(),
//!     ])
//!     .into()]));
//!
//! let context = Context::default();
//! let data = json!({ "stack": { "id": "5", "__typename": "Stack", "name": "Stack 5" } });
//! let changed = cache.write(&query, &data, &context).unwrap();
//! assert!(changed);
//!
//! let view = cache.read(&query, &context).unwrap();
//! assert_eq!(view.to_json(), data);
//! ```

pub mod arena;
pub mod ast;
pub mod cache;
pub mod error;
pub mod identity;
pub mod node;
pub mod read;
pub mod store;
pub mod write;

pub use arena::NodeId;
pub use ast::{AstValue, Document, Field, FragmentDefinition, Selection, SelectionSet};
pub use cache::{Cache, Context, Observable, Subscriber, DEFAULT_ROOT};
pub use error::CacheError;
pub use identity::{StoreKey, Variables};
pub use node::SubscriberId;
pub use read::{ArrayView, FieldView, ObjectView};

/// Prelude for convenient usage.
pub mod prelude {
    pub use crate::ast::{
        field, fragment, fragment_spread, inline_fragment, selection_set, AstValue, Document,
        Field, FragmentDefinition, Selection, SelectionSet,
    };
    pub use crate::cache::{Cache, Context, Observable, Subscriber, DEFAULT_ROOT};
    pub use crate::error::CacheError;
    pub use crate::identity::{StoreKey, Variables};
    pub use crate::node::SubscriberId;
    pub use crate::read::{ArrayView, FieldView, ObjectView};
}
