//! Entity identity and field store names.
//!
//! Two naming schemes anchor normalization:
//!
//! - A **store key** is the stable identity of a normalizable object,
//!   derived from its own data: an explicit `__id`, else
//!   `"<__typename>:<id>"` when both parts are present. Objects yielding
//!   neither live only under their parent.
//! - A **field store name** is the key a field occupies inside a node's
//!   data. Arguments are folded into the name syntactically so that two
//!   selections differing only in arguments address distinct entries.
//!
//! # Determinism
//! Store names render arguments in document order with a fixed syntax per
//! value kind, so a variable-bound call and an inline call collide exactly
//! when their rendered forms collide. List and object argument values have
//! no canonical rendering in this revision and fail fast.

use crate::ast::{AstValue, Field};
use crate::error::CacheError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Reserved data key: explicit opaque store key.
pub const ID_FIELD: &str = "__id";
/// Reserved data key: concrete type name, also used for fragment gating.
pub const TYPENAME_FIELD: &str = "__typename";
/// Reserved data key: entity id, combined with `__typename`.
pub const PLAIN_ID_FIELD: &str = "id";

/// Variable bindings supplied by a read or write context.
pub type Variables = serde_json::Map<String, Value>;

/// Canonical identity of a normalizable object.
///
/// Also used for root ids: the default root is the key `"QUERY"`, and any
/// string is a legal independent sub-root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreKey(String);

impl StoreKey {
    /// Wraps a raw key string.
    #[inline]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Returns the key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StoreKey {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

/// Derives the store key of an incoming data object, if it has one.
///
/// Precedence: `__id` as an opaque key; else `"<__typename>:<id>"` when
/// both `__typename` (string) and `id` (string or number) are present.
pub fn store_key_of(data: &serde_json::Map<String, Value>) -> Option<StoreKey> {
    if let Some(Value::String(explicit)) = data.get(ID_FIELD) {
        return Some(StoreKey(explicit.clone()));
    }
    let typename = data.get(TYPENAME_FIELD)?.as_str()?;
    let id = match data.get(PLAIN_ID_FIELD)? {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(StoreKey(format!("{}:{}", typename, id)))
}

/// Computes the canonical store name of a field under its parent node.
///
/// Without arguments this is the field name. With arguments it is
/// `"<name>(<arg>: <value>, …)"`, each value rendered syntactically per
/// its kind.
pub fn field_store_name(field: &Field, variables: &Variables) -> Result<String, CacheError> {
    if field.arguments.is_empty() {
        return Ok(field.name.clone());
    }
    let mut out = String::with_capacity(field.name.len() + 16);
    out.push_str(&field.name);
    out.push('(');
    for (i, argument) in field.arguments.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&argument.name);
        out.push_str(": ");
        out.push_str(&render_argument_value(field, &argument.value, variables)?);
    }
    out.push(')');
    Ok(out)
}

/// Renders one argument value into its store-name form.
///
/// Strings are double-quoted with JSON escaping; numbers, booleans, and
/// enums render as their literal tokens; `null` renders as the `null`
/// token; variable references render as the JSON encoding of the binding
/// (`null` when unbound). List and object values fail fast.
fn render_argument_value(
    field: &Field,
    value: &AstValue,
    variables: &Variables,
) -> Result<String, CacheError> {
    match value {
        AstValue::Variable(name) => {
            let bound = variables.get(name).cloned().unwrap_or(Value::Null);
            Ok(serde_json::to_string(&bound).unwrap_or_else(|_| "null".to_string()))
        }
        AstValue::Int(v) => Ok(v.to_string()),
        AstValue::Float(v) => Ok(v.to_string()),
        AstValue::String(v) => {
            Ok(serde_json::to_string(v).unwrap_or_else(|_| format!("\"{}\"", v)))
        }
        AstValue::Boolean(v) => Ok(v.to_string()),
        AstValue::Null => Ok("null".to_string()),
        AstValue::Enum(token) => Ok(token.clone()),
        AstValue::List(_) => Err(CacheError::ListArgument {
            field: field.name.clone(),
        }),
        AstValue::Object(_) => Err(CacheError::ObjectArgument {
            field: field.name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::field;
    use serde_json::json;

    fn data(value: Value) -> serde_json::Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other:?}"),
        }
    }

    #[test]
    fn explicit_id_wins() {
        let key = store_key_of(&data(json!({
            "__id": "custom",
            "__typename": "Stack",
            "id": "5",
        })));
        assert_eq!(key, Some(StoreKey::new("custom")));
    }

    #[test]
    fn typename_and_id_combine() {
        let by_string = store_key_of(&data(json!({ "__typename": "Stack", "id": "5" })));
        assert_eq!(by_string, Some(StoreKey::new("Stack:5")));

        let by_number = store_key_of(&data(json!({ "__typename": "Zetteli", "id": 2 })));
        assert_eq!(by_number, Some(StoreKey::new("Zetteli:2")));
    }

    #[test]
    fn incomplete_identity_is_non_normalizable() {
        assert_eq!(store_key_of(&data(json!({ "id": "5" }))), None);
        assert_eq!(store_key_of(&data(json!({ "__typename": "Stack" }))), None);
        assert_eq!(
            store_key_of(&data(json!({ "__typename": "Stack", "id": true }))),
            None
        );
    }

    #[test]
    fn plain_field_uses_its_name() {
        let f = field("name");
        assert_eq!(field_store_name(&f, &Variables::new()).unwrap(), "name");
    }

    #[test]
    fn arguments_fold_into_the_name() {
        let f = field("zettelis")
            .arg("last", AstValue::Int(2))
            .arg("order", AstValue::Enum("DESC".into()));
        assert_eq!(
            field_store_name(&f, &Variables::new()).unwrap(),
            "zettelis(last: 2, order: DESC)"
        );
    }

    #[test]
    fn string_arguments_are_quoted() {
        let f = field("stack").arg("name", AstValue::String("a \"b\"".into()));
        assert_eq!(
            field_store_name(&f, &Variables::new()).unwrap(),
            "stack(name: \"a \\\"b\\\"\")"
        );
    }

    /// A variable-bound call and the equivalent inline call produce the
    /// same store name exactly when their rendered forms coincide.
    #[test]
    fn variables_render_as_json_bindings() {
        let mut vars = Variables::new();
        vars.insert("key".into(), json!("X"));
        let by_variable = field("it").arg("key", AstValue::Variable("key".into()));
        let inline = field("it").arg("key", AstValue::String("X".into()));
        assert_eq!(
            field_store_name(&by_variable, &vars).unwrap(),
            field_store_name(&inline, &Variables::new()).unwrap()
        );

        // Unbound variables render as null.
        let unbound = field("it").arg("key", AstValue::Variable("missing".into()));
        assert_eq!(
            field_store_name(&unbound, &Variables::new()).unwrap(),
            "it(key: null)"
        );
    }

    #[test]
    fn structured_arguments_fail_fast() {
        let list = field("it").arg("xs", AstValue::List(vec![AstValue::Int(1)]));
        assert_eq!(
            field_store_name(&list, &Variables::new()),
            Err(CacheError::ListArgument { field: "it".into() })
        );

        let object = field("it").arg(
            "x",
            AstValue::Object(vec![("a".into(), AstValue::Int(1))]),
        );
        assert_eq!(
            field_store_name(&object, &Variables::new()),
            Err(CacheError::ObjectArgument { field: "it".into() })
        );
    }
}
