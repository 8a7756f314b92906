//! Selection AST and the adapter over it.
//!
//! The cache does not parse query text; an embedding host hands it parsed
//! documents. This module owns the document shape (operations, selection
//! sets, fields, fragments, argument values) together with the three
//! adapter operations the engines need: operation extraction, fragment-map
//! construction, and fragment type-condition matching.
//!
//! `Display` impls pretty-print documents and selections back into surface
//! syntax. Error surfaces rely on this (a document with no operation is
//! reported with its own printed text), and it doubles as a debugging aid.
//!
//! # Fragment matching
//! A fragment with no type condition always matches. A condition naming
//! type `T` matches iff the object under inspection carries
//! `__typename == "T"`. Conditions naming interface or union types are not
//! resolved against any schema and therefore never match; embedders needing
//! abstract-type matching must flatten such fragments before handing the
//! document over.

use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A parsed query document: any number of operation and fragment definitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Definitions in document order.
    pub definitions: Vec<Definition>,
}

/// A top-level definition in a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Definition {
    /// An operation (query, mutation, subscription).
    Operation(OperationDefinition),
    /// A named fragment definition.
    Fragment(FragmentDefinition),
}

/// The kind keyword of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

/// An operation definition: kind, optional name, root selection set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDefinition {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub selection_set: SelectionSet,
}

/// A named fragment definition with a mandatory type condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentDefinition {
    pub name: String,
    pub type_condition: String,
    pub selection_set: SelectionSet,
}

/// An ordered list of selections.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SelectionSet {
    pub items: Vec<Selection>,
}

/// One entry of a selection set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Selection {
    /// A field selection, possibly aliased, parameterized, or nested.
    Field(Field),
    /// An inline fragment with an optional type condition.
    InlineFragment(InlineFragment),
    /// A spread of a named fragment, resolved through the fragment map.
    FragmentSpread(FragmentSpread),
}

/// An inline fragment branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub selection_set: SelectionSet,
}

/// A named fragment spread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FragmentSpread {
    pub name: String,
}

/// A field selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: Vec<Argument>,
    pub selection_set: Option<SelectionSet>,
}

/// A named argument on a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    pub name: String,
    pub value: AstValue,
}

/// A literal or variable argument value as it appears in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AstValue {
    /// A `$name` variable reference, resolved against the context bindings.
    Variable(String),
    Int(i64),
    Float(f64),
    String(String),
    Boolean(bool),
    Null,
    /// A bare enum token.
    Enum(String),
    /// A list literal. Unsupported in field store names.
    List(Vec<AstValue>),
    /// An object literal. Unsupported in field store names.
    Object(Vec<(String, AstValue)>),
}

/// Fragment name to definition, for one document.
pub type FragmentMap<'a> = BTreeMap<&'a str, &'a FragmentDefinition>;

impl Document {
    /// Builds a document holding a single anonymous query operation.
    pub fn query(selection_set: SelectionSet) -> Self {
        Self {
            definitions: vec![Definition::Operation(OperationDefinition {
                kind: OperationKind::Query,
                name: None,
                selection_set,
            })],
        }
    }

    /// Appends a fragment definition, returning the extended document.
    pub fn with_fragment(mut self, fragment: FragmentDefinition) -> Self {
        self.definitions.push(Definition::Fragment(fragment));
        self
    }

    /// Returns the first operation definition.
    ///
    /// The error carries the pretty-printed document so the surface names
    /// the offending query.
    pub fn operation(&self) -> Result<&OperationDefinition, CacheError> {
        self.definitions
            .iter()
            .find_map(|definition| match definition {
                Definition::Operation(op) => Some(op),
                Definition::Fragment(_) => None,
            })
            .ok_or_else(|| CacheError::NoOperation {
                query: self.to_string(),
            })
    }

    /// Builds the fragment map for this document.
    ///
    /// Later definitions win on a name collision, matching document order.
    pub fn fragment_map(&self) -> FragmentMap<'_> {
        self.definitions
            .iter()
            .filter_map(|definition| match definition {
                Definition::Fragment(fragment) => Some((fragment.name.as_str(), fragment)),
                Definition::Operation(_) => None,
            })
            .collect()
    }
}

impl Field {
    /// The key under which this field appears in a response tree: the alias
    /// when present, else the field name.
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Renames the response key.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Appends an argument.
    pub fn arg(mut self, name: impl Into<String>, value: AstValue) -> Self {
        self.arguments.push(Argument {
            name: name.into(),
            value,
        });
        self
    }

    /// Attaches a nested selection set.
    pub fn select(mut self, items: impl IntoIterator<Item = Selection>) -> Self {
        self.selection_set = Some(selection_set(items));
        self
    }
}

/// Starts a field selection builder.
pub fn field(name: impl Into<String>) -> Field {
    Field {
        alias: None,
        name: name.into(),
        arguments: Vec::new(),
        selection_set: None,
    }
}

/// Collects selections into a selection set.
pub fn selection_set(items: impl IntoIterator<Item = Selection>) -> SelectionSet {
    SelectionSet {
        items: items.into_iter().collect(),
    }
}

/// Builds an inline fragment selection.
pub fn inline_fragment(
    type_condition: Option<&str>,
    items: impl IntoIterator<Item = Selection>,
) -> Selection {
    Selection::InlineFragment(InlineFragment {
        type_condition: type_condition.map(str::to_string),
        selection_set: selection_set(items),
    })
}

/// Builds a named fragment spread selection.
pub fn fragment_spread(name: impl Into<String>) -> Selection {
    Selection::FragmentSpread(FragmentSpread { name: name.into() })
}

/// Builds a named fragment definition.
pub fn fragment(
    name: impl Into<String>,
    type_condition: impl Into<String>,
    items: impl IntoIterator<Item = Selection>,
) -> FragmentDefinition {
    FragmentDefinition {
        name: name.into(),
        type_condition: type_condition.into(),
        selection_set: selection_set(items),
    }
}

impl From<Field> for Selection {
    fn from(field: Field) -> Self {
        Selection::Field(field)
    }
}

/// Whether a fragment's type condition admits an object of `typename`.
///
/// No condition always matches. A condition matches only on concrete
/// `__typename` equality; interface and union names never match.
pub fn condition_matches(condition: Option<&str>, typename: Option<&str>) -> bool {
    match condition {
        None => true,
        Some(expected) => typename == Some(expected),
    }
}

// ---------------------------------------------------------------------------
// Pretty-printing
// ---------------------------------------------------------------------------

fn fmt_selection_set(
    f: &mut fmt::Formatter<'_>,
    set: &SelectionSet,
    indent: usize,
) -> fmt::Result {
    writeln!(f, "{{")?;
    for selection in &set.items {
        fmt_selection(f, selection, indent + 2)?;
        writeln!(f)?;
    }
    write!(f, "{:width$}}}", "", width = indent)
}

fn fmt_selection(f: &mut fmt::Formatter<'_>, selection: &Selection, indent: usize) -> fmt::Result {
    write!(f, "{:width$}", "", width = indent)?;
    match selection {
        Selection::Field(field) => {
            if let Some(alias) = &field.alias {
                write!(f, "{}: ", alias)?;
            }
            write!(f, "{}", field.name)?;
            if !field.arguments.is_empty() {
                write!(f, "(")?;
                for (i, argument) in field.arguments.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", argument.name, argument.value)?;
                }
                write!(f, ")")?;
            }
            if let Some(inner) = &field.selection_set {
                write!(f, " ")?;
                fmt_selection_set(f, inner, indent)?;
            }
            Ok(())
        }
        Selection::InlineFragment(frag) => {
            write!(f, "...")?;
            if let Some(condition) = &frag.type_condition {
                write!(f, " on {}", condition)?;
            }
            write!(f, " ")?;
            fmt_selection_set(f, &frag.selection_set, indent)
        }
        Selection::FragmentSpread(spread) => write!(f, "...{}", spread.name),
    }
}

impl fmt::Display for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, definition) in self.definitions.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
                writeln!(f)?;
            }
            match definition {
                Definition::Operation(op) => op.fmt(f)?,
                Definition::Fragment(fragment) => fragment.fmt(f)?,
            }
        }
        Ok(())
    }
}

impl fmt::Display for OperationDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = match self.kind {
            OperationKind::Query => "query",
            OperationKind::Mutation => "mutation",
            OperationKind::Subscription => "subscription",
        };
        write!(f, "{}", keyword)?;
        if let Some(name) = &self.name {
            write!(f, " {}", name)?;
        }
        write!(f, " ")?;
        fmt_selection_set(f, &self.selection_set, 0)
    }
}

impl fmt::Display for FragmentDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "fragment {} on {} ", self.name, self.type_condition)?;
        fmt_selection_set(f, &self.selection_set, 0)
    }
}

impl fmt::Display for SelectionSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_selection_set(f, self, 0)
    }
}

impl fmt::Display for AstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AstValue::Variable(name) => write!(f, "${}", name),
            AstValue::Int(value) => write!(f, "{}", value),
            AstValue::Float(value) => write!(f, "{}", value),
            AstValue::String(value) => {
                let quoted = serde_json::to_string(value).map_err(|_| fmt::Error)?;
                write!(f, "{}", quoted)
            }
            AstValue::Boolean(value) => write!(f, "{}", value),
            AstValue::Null => write!(f, "null"),
            AstValue::Enum(token) => write!(f, "{}", token),
            AstValue::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            AstValue::Object(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", key, value)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        Document::query(selection_set([field("allStacks")
            .select([
                field("id").into(),
                field("name").alias("aName").into(),
                field("zettelis")
                    .arg("last", AstValue::Int(2))
                    .select([field("id").into(), field("body").into()])
                    .into(),
            ])
            .into()]))
    }

    /// `operation` returns the single query; a fragment-only document fails
    /// with the pretty-printed text in the error.
    #[test]
    fn operation_extraction() {
        let doc = sample();
        assert!(doc.operation().is_ok());

        let fragments_only = Document {
            definitions: vec![Definition::Fragment(fragment(
                "F",
                "Stack",
                [field("id").into()],
            ))],
        };
        let err = fragments_only.operation().unwrap_err();
        match err {
            CacheError::NoOperation { query } => {
                assert!(query.contains("fragment F on Stack"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn fragment_map_resolves_by_name() {
        let doc = sample()
            .with_fragment(fragment("A", "Stack", [field("id").into()]))
            .with_fragment(fragment("B", "Zetteli", [field("body").into()]));
        let map = doc.fragment_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["A"].type_condition, "Stack");
        assert_eq!(map["B"].type_condition, "Zetteli");
    }

    #[test]
    fn response_key_prefers_alias() {
        assert_eq!(field("name").response_key(), "name");
        assert_eq!(field("name").alias("aName").response_key(), "aName");
    }

    /// Matching is concrete: equality on `__typename`, no schema awareness.
    #[test]
    fn condition_matching() {
        assert!(condition_matches(None, Some("Horse")));
        assert!(condition_matches(None, None));
        assert!(condition_matches(Some("Horse"), Some("Horse")));
        assert!(!condition_matches(Some("Camel"), Some("Horse")));
        assert!(!condition_matches(Some("Animal"), None));
    }

    #[test]
    fn pretty_printing_round_trips_structure() {
        let doc = sample();
        let printed = doc.to_string();
        assert!(printed.starts_with("query {"));
        assert!(printed.contains("aName: name"));
        assert!(printed.contains("zettelis(last: 2) {"));
        // Nested braces close at matching indentation.
        assert!(printed.ends_with("}"));
    }

    #[test]
    fn value_printing() {
        assert_eq!(AstValue::Variable("key".into()).to_string(), "$key");
        assert_eq!(AstValue::String("a \"b\"".into()).to_string(), "\"a \\\"b\\\"\"");
        assert_eq!(AstValue::Null.to_string(), "null");
        assert_eq!(AstValue::Enum("ASC".into()).to_string(), "ASC");
        assert_eq!(
            AstValue::List(vec![AstValue::Int(1), AstValue::Int(2)]).to_string(),
            "[1, 2]"
        );
    }
}
