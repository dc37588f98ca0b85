//! Physical key layout and primary-key encoding.
//!
//! Every table owns a prefix `P`:
//!
//! | key | type | contents |
//! |-----|------|----------|
//! | `P` | list | encoded primary key of every row, insertion order |
//! | `P:a:<pk>` | hash | one row's attributes |
//! | `P:s:<field>` | string | auto-increment counter for `field` |

use std::collections::BTreeMap;

use serde_json::{Map, Number, Value as Json};

use crate::filter::{Literal, is_numeric_str};

/// Strings at most this long that are purely alphanumeric are used as keys
/// verbatim; everything else is hashed.
const MAX_PLAIN_KEY_LEN: usize = 32;

/// The key prefix of one table, as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPrefix {
    physical: String,
}

impl KeyPrefix {
    /// In cluster mode the prefix is wrapped in a hash tag so every key of
    /// the table lands in the same slot.
    pub fn new(prefix: &str, cluster: bool) -> Self {
        let physical = if cluster {
            format!("{{{}}}", prefix)
        } else {
            prefix.to_string()
        };
        Self { physical }
    }

    pub fn as_str(&self) -> &str {
        &self.physical
    }

    /// The list holding every encoded primary key.
    pub fn list_key(&self) -> &str {
        &self.physical
    }

    /// The hash holding one row.
    pub fn row_key(&self, pk: &str) -> String {
        format!("{}:a:{}", self.physical, pk)
    }

    /// The auto-increment counter of one field.
    pub fn counter_key(&self, field: &str) -> String {
        format!("{}:s:{}", self.physical, field)
    }
}

/// A logical primary-key value.
#[derive(Debug, Clone, PartialEq)]
pub enum PkValue {
    Scalar(Literal),
    Composite(BTreeMap<String, Literal>),
}

impl PkValue {
    pub fn composite<K: Into<String>, V: Into<Literal>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        PkValue::Composite(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

macro_rules! pk_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for PkValue {
                fn from(v: $t) -> Self {
                    PkValue::Scalar(v.into())
                }
            }
        )*
    };
}

pk_from!(Literal, bool, i32, i64, u32, f64, &str, String);

/// Encode a primary key into the string used in `P:a:<pk>` and in the list.
///
/// The encoding depends only on the logical key: composite keys are sorted
/// by field name first, so field order never matters.
///
/// # Example
///
/// ```
/// use redlua::key::{build_key, PkValue};
///
/// assert_eq!(build_key(&PkValue::from(42)), "42");
/// assert_eq!(build_key(&PkValue::composite([("b", 1), ("a", 3)])), "3-1");
/// ```
pub fn build_key(key: &PkValue) -> String {
    match key {
        PkValue::Scalar(lit) => scalar_key(lit),
        PkValue::Composite(fields) => {
            if fields.len() == 1 {
                if let Some(only) = fields.values().next() {
                    return scalar_key(only);
                }
            }
            if !fields.is_empty() && fields.values().all(Literal::is_numeric) {
                return fields.values().map(Literal::to_string).collect::<Vec<_>>().join("-");
            }
            let canonical: Map<String, Json> = fields
                .iter()
                .map(|(k, v)| (k.clone(), canonical_json(v)))
                .collect();
            hex_md5(Json::Object(canonical).to_string().as_bytes())
        }
    }
}

fn scalar_key(lit: &Literal) -> String {
    match lit {
        Literal::String(s) | Literal::Raw(s) => {
            if is_numeric_str(s)
                || (s.len() <= MAX_PLAIN_KEY_LEN && !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric()))
            {
                s.clone()
            } else {
                hex_md5(s.as_bytes())
            }
        }
        Literal::Null => hex_md5(b"null"),
        other => other.to_string(),
    }
}

/// Numeric strings become JSON numbers, so `"7"` and `7` hash alike.
fn canonical_json(lit: &Literal) -> Json {
    match lit {
        Literal::Null => Json::Null,
        Literal::Bool(b) => Json::Bool(*b),
        Literal::Int(n) => Json::Number((*n).into()),
        Literal::Float(f) => Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Literal::String(s) | Literal::Raw(s) => {
            if is_numeric_str(s) {
                if let Ok(n) = s.parse::<i64>() {
                    return Json::Number(n.into());
                }
                if let Some(n) = s.parse::<f64>().ok().and_then(Number::from_f64) {
                    return Json::Number(n);
                }
            }
            Json::String(s.clone())
        }
    }
}

fn hex_md5(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_keys() {
        assert_eq!(build_key(&PkValue::from(7)), "7");
        assert_eq!(build_key(&PkValue::from("007")), "007");
        assert_eq!(build_key(&PkValue::from("abc123")), "abc123");
        assert_eq!(build_key(&PkValue::from(1.5)), "1.5");
        // md5("hello world")
        assert_eq!(
            build_key(&PkValue::from("hello world")),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        let long = "a".repeat(33);
        assert_eq!(build_key(&PkValue::from(long.as_str())).len(), 32);
        assert_ne!(build_key(&PkValue::from(long.as_str())), long);
    }

    #[test]
    fn test_composite_numeric_sorted_by_field_name() {
        let ab = PkValue::composite([("a", 3), ("b", 1)]);
        let ba = PkValue::composite([("b", 1), ("a", 3)]);
        assert_eq!(build_key(&ab), "3-1");
        assert_eq!(build_key(&ab), build_key(&ba));
    }

    #[test]
    fn test_composite_single_field_recurses() {
        assert_eq!(build_key(&PkValue::composite([("id", 12)])), "12");
        assert_eq!(build_key(&PkValue::composite([("id", "x y")])), build_key(&PkValue::from("x y")));
    }

    #[test]
    fn test_composite_with_bool_is_hashed() {
        let key = build_key(&PkValue::composite([("a", Literal::Bool(true)), ("b", Literal::from(1))]));
        assert_ne!(key, "1-1");
        assert_eq!(key, hex_md5(br#"{"a":true,"b":1}"#));
    }

    #[test]
    fn test_composite_mixed_is_hashed_order_independently() {
        let one = PkValue::composite([("tenant", Literal::from("acme")), ("id", Literal::from(5))]);
        let two = PkValue::composite([("id", Literal::from("5")), ("tenant", Literal::from("acme"))]);
        let key = build_key(&one);
        assert_eq!(key.len(), 32);
        assert_eq!(key, build_key(&two));
        assert_eq!(key, hex_md5(br#"{"id":5,"tenant":"acme"}"#));
    }

    #[test]
    fn test_prefix_layout() {
        let plain = KeyPrefix::new("customer", false);
        assert_eq!(plain.list_key(), "customer");
        assert_eq!(plain.row_key("1"), "customer:a:1");
        assert_eq!(plain.counter_key("id"), "customer:s:id");

        let tagged = KeyPrefix::new("customer", true);
        assert_eq!(tagged.row_key("1"), "{customer}:a:1");
        assert_eq!(tagged.as_str(), "{customer}");
    }
}
