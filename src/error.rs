//! Error types for the cache.
//!
//! Every fallible boundary of the crate (write, read-adjacent naming,
//! subscribe) reports a `CacheError`. The `Display` renderings are stable
//! surface strings: callers match on their prefixes, so the wording of the
//! leading clause must not change across revisions.

use serde::{Deserialize, Serialize};

/// Error produced by cache operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CacheError {
    /// A selection required a field that the incoming data tree did not carry.
    MissingField {
        /// Response key (alias or field name) that was absent.
        name: String,
    },
    /// A named fragment spread could not be resolved against the document's
    /// fragment definitions.
    UnknownFragment {
        /// Name of the unresolved fragment.
        name: String,
    },
    /// The document contains no operation definition. Carries the
    /// pretty-printed document for the error surface.
    NoOperation {
        /// Pretty-printed document.
        query: String,
    },
    /// A field argument carried a list value. List argument serialization
    /// into field store names is not implemented.
    ListArgument {
        /// Field whose argument was a list.
        field: String,
    },
    /// A field argument carried an object value. Object argument
    /// serialization into field store names is not implemented.
    ObjectArgument {
        /// Field whose argument was an object.
        field: String,
    },
    /// The incoming data tree was not a JSON object at the operation root.
    NonObjectData,
    /// `subscribe` resolved no node for the requested root id. Subscribing
    /// is intentionally stricter than reading, which returns nothing.
    SubscribeMissingRoot {
        /// Root id that resolved to no node.
        root_id: String,
    },
    /// A subscriber's re-read found no root node. Delivered on the
    /// subscriber's error channel, never returned synchronously.
    NodeRemoved,
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheError::MissingField { name } => write!(f, "Missing field {}", name),
            CacheError::UnknownFragment { name } => write!(f, "No fragment named {}", name),
            CacheError::NoOperation { query } => {
                write!(f, "No operation definition found in:\n{}", query)
            }
            CacheError::ListArgument { field } => {
                write!(
                    f,
                    "List argument serialization not implemented (field {})",
                    field
                )
            }
            CacheError::ObjectArgument { field } => {
                write!(
                    f,
                    "Object argument serialization not implemented (field {})",
                    field
                )
            }
            CacheError::NonObjectData => write!(f, "Expected a JSON object at the operation root"),
            CacheError::SubscribeMissingRoot { root_id } => {
                write!(f, "Cannot subscribe to non-existent node with id {}", root_id)
            }
            CacheError::NodeRemoved => write!(f, "node was removed"),
        }
    }
}

impl std::error::Error for CacheError {}

#[cfg(test)]
mod tests {
    use super::*;

    /// The leading clause of each rendering is a stable, match-able prefix.
    #[test]
    fn stable_prefixes() {
        let missing = CacheError::MissingField {
            name: "name".into(),
        };
        assert!(missing.to_string().starts_with("Missing field name"));

        let fragment = CacheError::UnknownFragment {
            name: "HorseParts".into(),
        };
        assert!(fragment.to_string().starts_with("No fragment named HorseParts"));

        let no_op = CacheError::NoOperation {
            query: "fragment F on T {\n  id\n}".into(),
        };
        assert!(no_op.to_string().starts_with("No operation definition found"));
        assert!(no_op.to_string().contains("fragment F on T"));

        let list = CacheError::ListArgument { field: "it".into() };
        assert!(list
            .to_string()
            .starts_with("List argument serialization not implemented"));

        let object = CacheError::ObjectArgument { field: "it".into() };
        assert!(object
            .to_string()
            .starts_with("Object argument serialization not implemented"));

        let root = CacheError::SubscribeMissingRoot {
            root_id: "Stack:5".into(),
        };
        assert_eq!(
            root.to_string(),
            "Cannot subscribe to non-existent node with id Stack:5"
        );

        assert_eq!(CacheError::NodeRemoved.to_string(), "node was removed");
    }
}
