//! The write engine: selection-directed normalization.
//!
//! A [`Writer`] descends an operation's selection set and an incoming JSON
//! data tree in lockstep, materializing or updating graph nodes through
//! the store's copy-on-write `set`. Objects that yield a store key merge
//! with whatever node is already registered under that key, including
//! nodes written by entirely different queries, which is how disjoint
//! queries touching the same entity share state.
//!
//! Scalars, including whole arrays under a field with no nested selection,
//! are stored as single scalar entries: ingesting a 10⁷-number scalar
//! array allocates no nodes beyond the parent's new version. Arrays under
//! a selected field become array nodes, nested to arbitrary depth, each
//! level reusing the same field-level selection.

use crate::arena::NodeId;
use crate::ast::{condition_matches, Field, FragmentMap, Selection, SelectionSet};
use crate::error::CacheError;
use crate::identity::{field_store_name, store_key_of, Variables, TYPENAME_FIELD};
use crate::node::{NodeKey, NodeKind, Slot};
use crate::store::{NodeStore, Transaction, Visibility};
use serde_json::Value;

/// Selection-directed writer for one transaction.
pub(crate) struct Writer<'a> {
    store: &'a mut NodeStore,
    fragments: FragmentMap<'a>,
    variables: &'a Variables,
    tx: &'a mut Transaction,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(
        store: &'a mut NodeStore,
        fragments: FragmentMap<'a>,
        variables: &'a Variables,
        tx: &'a mut Transaction,
    ) -> Self {
        Self {
            store,
            fragments,
            variables,
            tx,
        }
    }

    fn visibility(&self) -> Visibility {
        Visibility::from_optimistic(self.tx.is_optimistic)
    }

    /// Writes one selection set against one data object.
    ///
    /// The working node is the provided `node`, else the node already
    /// indexed under the data's store key, else a fresh node. Returns the
    /// node carrying the data afterwards (a new version when the working
    /// node was copy-on-written).
    pub(crate) fn write_selection_set(
        &mut self,
        node: Option<NodeId>,
        set: &SelectionSet,
        data: &serde_json::Map<String, Value>,
    ) -> Result<NodeId, CacheError> {
        let store_key = store_key_of(data);
        let mut working = match node {
            Some(existing) => existing,
            None => match store_key
                .as_ref()
                .and_then(|key| self.store.lookup(key, self.visibility()))
            {
                Some(indexed) => indexed,
                None => self.store.new_node(self.tx, NodeKind::Object),
            },
        };

        let typename = data.get(TYPENAME_FIELD).and_then(Value::as_str);
        for selection in &set.items {
            match selection {
                Selection::Field(field) => {
                    let response_key = field.response_key();
                    let entry = data.get(response_key).ok_or_else(|| {
                        CacheError::MissingField {
                            name: response_key.to_string(),
                        }
                    })?;
                    working = self.write_field(working, field, entry)?;
                }
                Selection::InlineFragment(fragment) => {
                    if condition_matches(fragment.type_condition.as_deref(), typename) {
                        working =
                            self.write_selection_set(Some(working), &fragment.selection_set, data)?;
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let fragment = self
                        .fragments
                        .get(spread.name.as_str())
                        .copied()
                        .ok_or_else(|| CacheError::UnknownFragment {
                            name: spread.name.clone(),
                        })?;
                    if condition_matches(Some(fragment.type_condition.as_str()), typename) {
                        working =
                            self.write_selection_set(Some(working), &fragment.selection_set, data)?;
                    }
                }
            }
        }

        if let Some(key) = store_key {
            self.store.register_key(working, key, self.tx);
        }
        Ok(working)
    }

    /// Writes one field of `data` onto `node`. Returns the node carrying
    /// the field afterwards.
    fn write_field(
        &mut self,
        node: NodeId,
        field: &Field,
        entry: &Value,
    ) -> Result<NodeId, CacheError> {
        let store_name = NodeKey::field(field_store_name(field, self.variables)?);

        // No nested selection, or an explicit null: a scalar write. This
        // covers whole arrays under unselected fields.
        let set = match &field.selection_set {
            Some(set) if !entry.is_null() => set,
            _ => {
                return Ok(self
                    .store
                    .set(node, store_name, Slot::Scalar(entry.clone()), self.tx))
            }
        };

        match entry {
            Value::Array(items) => self.write_array(node, store_name, set, items),
            Value::Object(object) => {
                let existing = self
                    .store
                    .child_of(node, &store_name, self.tx.is_optimistic);
                let child = self.write_selection_set(existing, set, object)?;
                let parent = self
                    .store
                    .set(node, store_name.clone(), Slot::Child(child), self.tx);
                self.store.add_parent(child, parent, store_name);
                Ok(parent)
            }
            // A bare scalar where the selection expected an object: store
            // it as-is rather than faulting on malformed server data.
            _ => Ok(self
                .store
                .set(node, store_name, Slot::Scalar(entry.clone()), self.tx)),
        }
    }

    /// Writes an array of objects (or of nested arrays) as an array node
    /// under `key_in_parent`. Returns the parent's node afterwards.
    ///
    /// Every nesting level reuses the same field-level selection, so the
    /// selection applies at the leaves regardless of depth. The array node
    /// is trimmed back to the incoming length to keep its keys dense.
    fn write_array(
        &mut self,
        parent: NodeId,
        key_in_parent: NodeKey,
        set: &SelectionSet,
        items: &[Value],
    ) -> Result<NodeId, CacheError> {
        let mut array = match self
            .store
            .array_child_of(parent, &key_in_parent, self.tx.is_optimistic)
        {
            Some(existing) => existing,
            None => self.store.new_node(self.tx, NodeKind::Array),
        };
        let previous_len = self.store.node(array).len();

        for (i, element) in items.iter().enumerate() {
            let index = NodeKey::index(i);
            match element {
                Value::Array(nested) => {
                    array = self.write_array(array, index, set, nested)?;
                }
                Value::Object(object) => {
                    // Identified elements merge by store key, never by
                    // position. Keyless elements reuse the node already at
                    // this index, so rewriting identical data short-circuits
                    // instead of minting a fresh child per write.
                    let existing = match store_key_of(object) {
                        Some(_) => None,
                        None => {
                            self.store
                                .object_child_of(array, &index, self.tx.is_optimistic)
                        }
                    };
                    let child = self.write_selection_set(existing, set, object)?;
                    array = self
                        .store
                        .set(array, index.clone(), Slot::Child(child), self.tx);
                    self.store.add_parent(child, array, index);
                }
                other => {
                    array = self
                        .store
                        .set(array, index, Slot::Scalar(other.clone()), self.tx);
                }
            }
        }
        for stale in items.len()..previous_len {
            array = self.store.remove(array, &NodeKey::index(stale), self.tx);
        }

        let parent = self
            .store
            .set(parent, key_in_parent.clone(), Slot::Child(array), self.tx);
        self.store.add_parent(array, parent, key_in_parent);
        Ok(parent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{field, selection_set, fragment_spread, inline_fragment, Document};
    use crate::identity::StoreKey;
    use crate::node::TxId;
    use serde_json::json;

    fn object(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    fn run(
        store: &mut NodeStore,
        tx_id: u64,
        document: &Document,
        data: Value,
    ) -> Result<NodeId, CacheError> {
        let operation = document.operation()?;
        let fragments = document.fragment_map();
        let variables = Variables::new();
        let mut tx = Transaction::new(TxId::new(tx_id), false);
        let mut writer = Writer::new(store, fragments, &variables, &mut tx);
        writer.write_selection_set(None, &operation.selection_set, &object(data))
    }

    #[test]
    fn missing_field_fails_fast() {
        let mut store = NodeStore::new();
        let doc = Document::query(selection_set([field("name").into()]));
        let err = run(&mut store, 1, &doc, json!({})).unwrap_err();
        assert_eq!(err, CacheError::MissingField { name: "name".into() });
    }

    #[test]
    fn missing_field_is_reported_by_response_key() {
        let mut store = NodeStore::new();
        let doc = Document::query(selection_set([field("name").alias("aName").into()]));
        let err = run(&mut store, 1, &doc, json!({ "name": "x" })).unwrap_err();
        assert_eq!(err, CacheError::MissingField { name: "aName".into() });
    }

    #[test]
    fn unresolved_fragment_spread_fails() {
        let mut store = NodeStore::new();
        let doc = Document::query(selection_set([fragment_spread("Missing")]));
        let err = run(&mut store, 1, &doc, json!({})).unwrap_err();
        assert_eq!(
            err,
            CacheError::UnknownFragment { name: "Missing".into() }
        );
    }

    #[test]
    fn non_matching_inline_fragment_is_skipped() {
        let mut store = NodeStore::new();
        let doc = Document::query(selection_set([
            field("__typename").into(),
            inline_fragment(Some("Camel"), [field("numBumps").into()]),
        ]));
        // numBumps is absent from the data; the write still succeeds
        // because the Camel branch does not match a Horse.
        let root = run(&mut store, 1, &doc, json!({ "__typename": "Horse" })).unwrap();
        assert_eq!(
            store.node(root).get(&NodeKey::field("__typename")),
            Some(&Slot::Scalar(json!("Horse")))
        );
        assert!(store.node(root).get(&NodeKey::field("numBumps")).is_none());
    }

    #[test]
    fn scalar_array_is_one_slot() {
        let mut store = NodeStore::new();
        let doc = Document::query(selection_set([field("samples").into()]));
        let samples: Vec<u64> = (0..10_000).collect();
        let root = run(&mut store, 1, &doc, json!({ "samples": samples })).unwrap();
        // One node total: the root. No per-element allocation.
        assert_eq!(store.node_count(), 1);
        match store.node(root).get(&NodeKey::field("samples")) {
            Some(Slot::Scalar(Value::Array(items))) => assert_eq!(items.len(), 10_000),
            other => panic!("expected scalar array slot, got {other:?}"),
        }
    }

    #[test]
    fn normalizable_objects_merge_across_writes() {
        let mut store = NodeStore::new();
        let doc_a = Document::query(selection_set([field("refA")
            .select([
                field("id").into(),
                field("__typename").into(),
                field("payload").into(),
            ])
            .into()]));
        let doc_b = Document::query(selection_set([field("refB")
            .select([
                field("id").into(),
                field("__typename").into(),
                field("payload").into(),
            ])
            .into()]));

        run(
            &mut store,
            1,
            &doc_a,
            json!({ "refA": { "id": 111, "__typename": "OBJ", "payload": "A" } }),
        )
        .unwrap();
        run(
            &mut store,
            2,
            &doc_b,
            json!({ "refB": { "id": 111, "__typename": "OBJ", "payload": "B" } }),
        )
        .unwrap();

        let shared = store
            .lookup(&StoreKey::new("OBJ:111"), Visibility::Base)
            .unwrap();
        assert_eq!(
            store.node(shared).get(&NodeKey::field("payload")),
            Some(&Slot::Scalar(json!("B")))
        );
    }

    #[test]
    fn nested_arrays_become_nested_array_nodes() {
        let mut store = NodeStore::new();
        let doc = Document::query(selection_set([field("grid")
            .select([field("id").into(), field("__typename").into()])
            .into()]));
        let root = run(
            &mut store,
            1,
            &doc,
            json!({
                "grid": [
                    [{ "id": 1, "__typename": "Cell" }],
                    [{ "id": 2, "__typename": "Cell" }, { "id": 3, "__typename": "Cell" }],
                ]
            }),
        )
        .unwrap();

        let outer = match store.node(root).get(&NodeKey::field("grid")) {
            Some(Slot::Child(id)) => *id,
            other => panic!("expected child, got {other:?}"),
        };
        assert_eq!(store.node(outer).kind(), NodeKind::Array);
        assert_eq!(store.node(outer).len(), 2);
        let inner = match store.node(outer).get(&NodeKey::index(1)) {
            Some(Slot::Child(id)) => *id,
            other => panic!("expected child, got {other:?}"),
        };
        assert_eq!(store.node(inner).kind(), NodeKind::Array);
        assert_eq!(store.node(inner).len(), 2);
    }

    #[test]
    fn shorter_rewrite_trims_the_array() {
        let mut store = NodeStore::new();
        let doc = Document::query(selection_set([field("items")
            .select([field("id").into(), field("__typename").into()])
            .into()]));
        let root = run(
            &mut store,
            1,
            &doc,
            json!({ "items": [
                { "id": 1, "__typename": "It" },
                { "id": 2, "__typename": "It" },
                { "id": 3, "__typename": "It" },
            ] }),
        )
        .unwrap();
        let root = {
            // Rewrite through the same root node with a shorter list.
            let operation = doc.operation().unwrap();
            let variables = Variables::new();
            let mut tx = Transaction::new(TxId::new(2), false);
            let mut writer = Writer::new(&mut store, doc.fragment_map(), &variables, &mut tx);
            writer
                .write_selection_set(
                    Some(root),
                    &operation.selection_set,
                    &object(json!({ "items": [{ "id": 9, "__typename": "It" }] })),
                )
                .unwrap()
        };
        let array = match store.node(root).get(&NodeKey::field("items")) {
            Some(Slot::Child(id)) => store.head_for(*id, false),
            other => panic!("expected child, got {other:?}"),
        };
        assert_eq!(store.node(array).len(), 1);
    }

    #[test]
    fn keyless_array_elements_reuse_positional_nodes() {
        let mut store = NodeStore::new();
        let doc = Document::query(selection_set([field("items")
            .select([field("a").into(), field("b").into()])
            .into()]));
        let data = json!({ "items": [{ "a": 1, "b": 2 }, { "a": 3, "b": 4 }] });
        let root = run(&mut store, 1, &doc, data.clone()).unwrap();
        let nodes_after_first = store.node_count();

        let rewritten = {
            let operation = doc.operation().unwrap();
            let variables = Variables::new();
            let mut tx = Transaction::new(TxId::new(2), false);
            let mut writer = Writer::new(&mut store, doc.fragment_map(), &variables, &mut tx);
            writer
                .write_selection_set(Some(root), &operation.selection_set, &object(data))
                .unwrap()
        };
        // Every level short-circuits: same root reference, no new versions.
        assert_eq!(rewritten, root);
        assert_eq!(store.node_count(), nodes_after_first);
    }

    #[test]
    fn parent_links_are_recorded_on_children() {
        let mut store = NodeStore::new();
        let doc = Document::query(selection_set([field("stack")
            .select([
                field("id").into(),
                field("__typename").into(),
                field("zettelis")
                    .select([field("id").into(), field("__typename").into()])
                    .into(),
            ])
            .into()]));
        let root = run(
            &mut store,
            1,
            &doc,
            json!({ "stack": {
                "id": 5, "__typename": "Stack",
                "zettelis": [{ "id": 2, "__typename": "Zetteli" }],
            } }),
        )
        .unwrap();

        let stack = store
            .lookup(&StoreKey::new("Stack:5"), Visibility::Base)
            .unwrap();
        assert!(store
            .node(stack)
            .parents()
            .iter()
            .any(|(p, k)| *p == root && *k == NodeKey::field("stack")));

        let zetteli = store
            .lookup(&StoreKey::new("Zetteli:2"), Visibility::Base)
            .unwrap();
        let (array_parent, key) = store.node(zetteli).parents()[0].clone();
        assert_eq!(key, NodeKey::index(0));
        assert_eq!(store.node(array_parent).kind(), NodeKind::Array);
    }
}
