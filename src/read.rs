//! The read engine: lazy, query-shaped projections.
//!
//! A view never materializes the projected tree up front; it resolves each
//! access on demand: alias to field, field to store name (folding in the
//! read context's variables), store name to slot, slot to value or nested
//! view. Allocation happens only along the access path.
//!
//! Views are immutable by construction: they borrow the store and expose
//! no mutating surface. Two reads of an unchanged subgraph are backed by
//! the same node id, so [`ObjectView::node_id`] identity comparison is a
//! reliable "unchanged?" test as long as the copy-on-write discipline is
//! preserved upstream.

use crate::arena::NodeId;
use crate::ast::{condition_matches, Field, FragmentMap, Selection, SelectionSet};
use crate::identity::{field_store_name, Variables};
use crate::node::{NodeKey, NodeKind, Slot};
use crate::store::NodeStore;
use serde_json::Value;
use tracing::warn;

/// A query-shaped projection of one object node.
#[derive(Clone)]
pub struct ObjectView<'a> {
    store: &'a NodeStore,
    node: NodeId,
    selection: &'a SelectionSet,
    fragments: FragmentMap<'a>,
    variables: &'a Variables,
}

/// A projection of one array node; elements share the field's selection.
#[derive(Clone)]
pub struct ArrayView<'a> {
    store: &'a NodeStore,
    node: NodeId,
    selection: &'a SelectionSet,
    fragments: FragmentMap<'a>,
    variables: &'a Variables,
}

/// One projected value.
#[derive(Clone)]
pub enum FieldView<'a> {
    /// An explicit null leaf.
    Null,
    /// A scalar leaf, including whole scalar arrays.
    Scalar(&'a Value),
    /// A nested object projection.
    Object(ObjectView<'a>),
    /// A nested array projection.
    Array(ArrayView<'a>),
}

impl<'a> ObjectView<'a> {
    pub(crate) fn new(
        store: &'a NodeStore,
        node: NodeId,
        selection: &'a SelectionSet,
        fragments: FragmentMap<'a>,
        variables: &'a Variables,
    ) -> Self {
        Self {
            store,
            node,
            selection,
            fragments,
            variables,
        }
    }

    /// The graph node backing this view. Stable across reads while the
    /// underlying subgraph is unchanged.
    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Projects the field stored under `response_key` (an alias or a field
    /// name appearing in the view's selection set).
    ///
    /// Returns `None` when the key is not part of the matching selections,
    /// and (with a diagnostic) when the selection is present but the
    /// node carries no value for it.
    pub fn get(&self, response_key: &str) -> Option<FieldView<'a>> {
        let store: &'a NodeStore = self.store;
        let field = self.find_field(self.selection, response_key)?;
        let store_name = match field_store_name(field, self.variables) {
            Ok(name) => name,
            Err(error) => {
                warn!(field = response_key, %error, "unprojectable field arguments");
                return None;
            }
        };
        match store.node(self.node).get(&NodeKey::field(store_name)) {
            None => {
                warn!(
                    field = response_key,
                    node = %self.node,
                    "selected field missing from node"
                );
                None
            }
            Some(Slot::Scalar(Value::Null)) => Some(FieldView::Null),
            Some(Slot::Scalar(value)) => Some(FieldView::Scalar(value)),
            Some(Slot::Child(child)) => {
                let nested = match &field.selection_set {
                    Some(set) => set,
                    None => {
                        warn!(
                            field = response_key,
                            node = %self.node,
                            "node entry where the selection expected a scalar"
                        );
                        return None;
                    }
                };
                Some(project_child(
                    store,
                    *child,
                    nested,
                    self.fragments.clone(),
                    self.variables,
                ))
            }
        }
    }

    /// Response keys this view exposes: exactly the keys named (by alias
    /// or name) in the selections matching the current object, in
    /// selection order, deduplicated.
    pub fn keys(&self) -> Vec<&'a str> {
        let mut keys = Vec::new();
        self.collect_keys(self.selection, &mut keys);
        keys
    }

    /// Iterates `(response key, projected value)` pairs, skipping keys
    /// whose projection is absent.
    pub fn iter<'s>(&'s self) -> impl Iterator<Item = (&'a str, FieldView<'a>)> + 's {
        self.keys()
            .into_iter()
            .filter_map(move |key| self.get(key).map(|value| (key, value)))
    }

    /// Materializes the projection into a JSON tree.
    ///
    /// `get` is the lazy path; this walks the whole selection and is meant
    /// for subscriber payload capture and structural assertions.
    pub fn to_json(&self) -> Value {
        let mut out = serde_json::Map::new();
        for (key, value) in self.iter() {
            out.insert(key.to_string(), field_view_to_json(&value));
        }
        Value::Object(out)
    }

    fn typename(&self) -> Option<&'a str> {
        let store: &'a NodeStore = self.store;
        store.node(self.node).typename()
    }

    fn find_field(&self, set: &'a SelectionSet, response_key: &str) -> Option<&'a Field> {
        let typename = self.typename();
        for selection in &set.items {
            match selection {
                Selection::Field(field) if field.response_key() == response_key => {
                    return Some(field)
                }
                Selection::Field(_) => {}
                Selection::InlineFragment(fragment) => {
                    if condition_matches(fragment.type_condition.as_deref(), typename) {
                        if let Some(found) = self.find_field(&fragment.selection_set, response_key)
                        {
                            return Some(found);
                        }
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let Some(fragment) = self.fragments.get(spread.name.as_str()) else {
                        continue;
                    };
                    if condition_matches(Some(fragment.type_condition.as_str()), typename) {
                        if let Some(found) = self.find_field(&fragment.selection_set, response_key)
                        {
                            return Some(found);
                        }
                    }
                }
            }
        }
        None
    }

    fn collect_keys(&self, set: &'a SelectionSet, out: &mut Vec<&'a str>) {
        let typename = self.typename();
        for selection in &set.items {
            match selection {
                Selection::Field(field) => {
                    let key = field.response_key();
                    if !out.contains(&key) {
                        out.push(key);
                    }
                }
                Selection::InlineFragment(fragment) => {
                    if condition_matches(fragment.type_condition.as_deref(), typename) {
                        self.collect_keys(&fragment.selection_set, out);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    let Some(fragment) = self.fragments.get(spread.name.as_str()) else {
                        continue;
                    };
                    if condition_matches(Some(fragment.type_condition.as_str()), typename) {
                        self.collect_keys(&fragment.selection_set, out);
                    }
                }
            }
        }
    }
}

impl<'a> ArrayView<'a> {
    /// The graph node backing this view.
    #[inline]
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// Dense length of the underlying array node.
    pub fn len(&self) -> usize {
        self.store.node(self.node).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Projects the element at `index`. Scalar slots pass through;
    /// object slots project with the field's selection set.
    pub fn get(&self, index: usize) -> Option<FieldView<'a>> {
        let store: &'a NodeStore = self.store;
        match store.node(self.node).get(&NodeKey::index(index))? {
            Slot::Scalar(Value::Null) => Some(FieldView::Null),
            Slot::Scalar(value) => Some(FieldView::Scalar(value)),
            Slot::Child(child) => Some(project_child(
                store,
                *child,
                self.selection,
                self.fragments.clone(),
                self.variables,
            )),
        }
    }

    /// Iterates elements in index order.
    pub fn iter<'s>(&'s self) -> impl Iterator<Item = FieldView<'a>> + 's {
        (0..self.len()).filter_map(move |i| self.get(i))
    }

    /// Materializes the projection into a JSON array.
    pub fn to_json(&self) -> Value {
        Value::Array(self.iter().map(|value| field_view_to_json(&value)).collect())
    }
}

impl<'a> FieldView<'a> {
    /// The scalar beneath this view, if it is one.
    pub fn as_scalar(&self) -> Option<&'a Value> {
        match self {
            FieldView::Scalar(value) => Some(value),
            _ => None,
        }
    }

    /// The string beneath this view, if it is a string scalar.
    pub fn as_str(&self) -> Option<&'a str> {
        self.as_scalar().and_then(Value::as_str)
    }

    /// The object projection beneath this view, if it is one.
    pub fn as_object(&self) -> Option<&ObjectView<'a>> {
        match self {
            FieldView::Object(view) => Some(view),
            _ => None,
        }
    }

    /// The array projection beneath this view, if it is one.
    pub fn as_array(&self) -> Option<&ArrayView<'a>> {
        match self {
            FieldView::Array(view) => Some(view),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, FieldView::Null)
    }
}

fn project_child<'a>(
    store: &'a NodeStore,
    child: NodeId,
    selection: &'a SelectionSet,
    fragments: FragmentMap<'a>,
    variables: &'a Variables,
) -> FieldView<'a> {
    match store.node(child).kind() {
        NodeKind::Array => FieldView::Array(ArrayView {
            store,
            node: child,
            selection,
            fragments,
            variables,
        }),
        NodeKind::Object => FieldView::Object(ObjectView {
            store,
            node: child,
            selection,
            fragments,
            variables,
        }),
    }
}

fn field_view_to_json(view: &FieldView<'_>) -> Value {
    match view {
        FieldView::Null => Value::Null,
        FieldView::Scalar(value) => (*value).clone(),
        FieldView::Object(object) => object.to_json(),
        FieldView::Array(array) => array.to_json(),
    }
}
