//! Filter expressions: the WHERE part of a query.
//!
//! Filters come in two shapes, mirroring the way model layers usually write
//! them:
//!
//! - a hash condition, `{"status": 2, "age": [30, 40]}`: an implicit AND of
//!   equalities, where a list value means `in`;
//! - a tagged operator array, `["between", "age", 20, 30]`.
//!
//! [`Filter::from_json`] parses the wire form into the typed tree, and the
//! builder functions construct the same tree directly.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as Json;

use crate::error::{RedluaError, RedluaResult};

/// A literal operand in a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Pre-built Lua expression, substituted verbatim.
    Raw(String),
}

impl Literal {
    /// A pre-built expression that bypasses quoting.
    pub fn raw(expr: impl Into<String>) -> Self {
        Literal::Raw(expr.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Literal::Null)
    }

    /// Whether the literal reads as a number: integers, finite floats and
    /// numeric strings such as `"42"` or `"-1.5e3"`.
    pub fn is_numeric(&self) -> bool {
        match self {
            Literal::Int(_) => true,
            Literal::Float(f) => f.is_finite(),
            Literal::String(s) => is_numeric_str(s),
            _ => false,
        }
    }

    /// Convert a scalar JSON value. Arrays and objects are not literals.
    pub fn from_json(value: &Json) -> Option<Literal> {
        match value {
            Json::Null => Some(Literal::Null),
            Json::Bool(b) => Some(Literal::Bool(*b)),
            Json::Number(n) => Some(match n.as_i64() {
                Some(i) => Literal::Int(i),
                None => Literal::Float(n.as_f64().unwrap_or(f64::NAN)),
            }),
            Json::String(s) => Some(Literal::String(s.clone())),
            Json::Array(_) | Json::Object(_) => None,
        }
    }
}

/// Plain text form: what the value looks like once stored in a hash field.
impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => Ok(()),
            Literal::Bool(b) => write!(f, "{}", u8::from(*b)),
            Literal::Int(n) => write!(f, "{}", n),
            Literal::Float(n) => write!(f, "{}", n),
            Literal::String(s) | Literal::Raw(s) => f.write_str(s),
        }
    }
}

macro_rules! literal_from {
    ($($t:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$t> for Literal {
                fn from(v: $t) -> Self {
                    Literal::$variant(v.into())
                }
            }
        )*
    };
}

literal_from! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => Int,
    f64 => Float,
    &str => String,
    String => String,
}

impl<T: Into<Literal>> From<Option<T>> for Literal {
    fn from(v: Option<T>) -> Self {
        v.map_or(Literal::Null, Into::into)
    }
}

/// The value side of one hash-condition entry.
#[derive(Debug, Clone, PartialEq)]
pub enum HashValue {
    Value(Literal),
    /// A list value turns the entry into `in`.
    List(Vec<InItem>),
}

impl HashValue {
    pub fn list<T: Into<Literal>>(values: impl IntoIterator<Item = T>) -> Self {
        HashValue::List(values.into_iter().map(|v| InItem::Value(v.into())).collect())
    }
}

macro_rules! hash_value_from {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for HashValue {
                fn from(v: $t) -> Self {
                    HashValue::Value(v.into())
                }
            }
        )*
    };
}

hash_value_from!(Literal, bool, i32, i64, u32, f64, &str, String);

/// One element of an `in` value set.
#[derive(Debug, Clone, PartialEq)]
pub enum InItem {
    Value(Literal),
    /// Column → value mapping, used by composite `in` and by single-column
    /// `in` over whole rows.
    Tuple(BTreeMap<String, Literal>),
}

impl InItem {
    pub fn tuple<K: Into<String>, V: Into<Literal>>(pairs: impl IntoIterator<Item = (K, V)>) -> Self {
        InItem::Tuple(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }

    /// The entry for `column` in a tuple, or null when the tuple lacks it.
    pub fn field(&self, column: &str) -> Literal {
        match self {
            InItem::Tuple(map) => map.get(column).cloned().unwrap_or(Literal::Null),
            InItem::Value(_) => Literal::Null,
        }
    }
}

/// Ordering comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }

    fn parse(op: &str) -> Option<Self> {
        match op {
            ">" => Some(CompareOp::Gt),
            ">=" => Some(CompareOp::Gte),
            "<" => Some(CompareOp::Lt),
            "<=" => Some(CompareOp::Lte),
            _ => None,
        }
    }
}

/// The `like` operator family. Parsed so that it can be rejected with a
/// precise error at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LikeOp {
    Like,
    NotLike,
    OrLike,
    OrNotLike,
}

impl LikeOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            LikeOp::Like => "like",
            LikeOp::NotLike => "not like",
            LikeOp::OrLike => "or like",
            LikeOp::OrNotLike => "or not like",
        }
    }
}

/// A filter expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `{column: value, ...}`, an implicit AND of equalities.
    Hash(Vec<(String, HashValue)>),
    Not(Box<Filter>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Between {
        column: String,
        low: Literal,
        high: Literal,
        negated: bool,
    },
    In {
        columns: Vec<String>,
        values: Vec<InItem>,
        negated: bool,
    },
    Compare {
        op: CompareOp,
        column: String,
        value: Literal,
    },
    Like {
        op: LikeOp,
        column: String,
        pattern: Literal,
    },
    /// Pre-built Lua condition, substituted verbatim.
    Raw(String),
}

impl Filter {
    pub fn hash<K: Into<String>>(pairs: impl IntoIterator<Item = (K, HashValue)>) -> Self {
        Filter::Hash(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// `column = value`
    pub fn eq(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Filter::Hash(vec![(column.into(), HashValue::Value(value.into()))])
    }

    pub fn is_in<T: Into<Literal>>(column: impl Into<String>, values: impl IntoIterator<Item = T>) -> Self {
        Filter::In {
            columns: vec![column.into()],
            values: values.into_iter().map(|v| InItem::Value(v.into())).collect(),
            negated: false,
        }
    }

    pub fn not_in<T: Into<Literal>>(column: impl Into<String>, values: impl IntoIterator<Item = T>) -> Self {
        match Filter::is_in(column, values) {
            Filter::In { columns, values, .. } => Filter::In {
                columns,
                values,
                negated: true,
            },
            other => other,
        }
    }

    /// Composite `in`: `(a, b) in ((1, 2), (3, 4))`.
    pub fn in_tuples<C: Into<String>>(
        columns: impl IntoIterator<Item = C>,
        tuples: impl IntoIterator<Item = InItem>,
    ) -> Self {
        Filter::In {
            columns: columns.into_iter().map(Into::into).collect(),
            values: tuples.into_iter().collect(),
            negated: false,
        }
    }

    pub fn between(column: impl Into<String>, low: impl Into<Literal>, high: impl Into<Literal>) -> Self {
        Filter::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            negated: false,
        }
    }

    pub fn not_between(column: impl Into<String>, low: impl Into<Literal>, high: impl Into<Literal>) -> Self {
        Filter::Between {
            column: column.into(),
            low: low.into(),
            high: high.into(),
            negated: true,
        }
    }

    pub fn compare(op: CompareOp, column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Filter::Compare {
            op,
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn gt(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Filter::compare(CompareOp::Gt, column, value)
    }

    pub fn gte(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Filter::compare(CompareOp::Gte, column, value)
    }

    pub fn lt(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Filter::compare(CompareOp::Lt, column, value)
    }

    pub fn lte(column: impl Into<String>, value: impl Into<Literal>) -> Self {
        Filter::compare(CompareOp::Lte, column, value)
    }

    pub fn like(column: impl Into<String>, pattern: impl Into<Literal>) -> Self {
        Filter::Like {
            op: LikeOp::Like,
            column: column.into(),
            pattern: pattern.into(),
        }
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    pub fn negate(filter: Filter) -> Self {
        Filter::Not(Box::new(filter))
    }

    pub fn raw(expr: impl Into<String>) -> Self {
        Filter::Raw(expr.into())
    }

    /// Parse the wire form of a filter.
    ///
    /// # Example
    ///
    /// ```
    /// use redlua::filter::Filter;
    /// use serde_json::json;
    ///
    /// let f = Filter::from_json(&json!(["between", "age", 20, 30])).unwrap();
    /// assert_eq!(f, Filter::between("age", 20, 30));
    /// ```
    pub fn from_json(value: &Json) -> RedluaResult<Filter> {
        match value {
            Json::Object(map) => parse_hash(map),
            Json::Array(items) => parse_tagged(items),
            other => Err(RedluaError::UnsupportedFilterShape(format!(
                "expected an object or an operator array, found {}",
                other
            ))),
        }
    }
}

fn parse_hash(map: &serde_json::Map<String, Json>) -> RedluaResult<Filter> {
    let mut pairs = Vec::with_capacity(map.len());
    for (column, value) in map {
        let value = match value {
            Json::Array(items) => HashValue::List(parse_in_items(items)?),
            scalar => HashValue::Value(scalar_literal(scalar)?),
        };
        pairs.push((column.clone(), value));
    }
    Ok(Filter::Hash(pairs))
}

fn parse_tagged(items: &[Json]) -> RedluaResult<Filter> {
    let Some((head, operands)) = items.split_first() else {
        return Ok(Filter::Hash(Vec::new()));
    };
    let operator = match head {
        Json::String(s) => s.to_lowercase(),
        other => return Err(RedluaError::UnknownOperator(other.to_string())),
    };

    match operator.as_str() {
        "not" => {
            if operands.len() != 1 {
                return Err(RedluaError::missing(operator, 1));
            }
            Ok(Filter::negate(parse_operand(&operands[0])?))
        }
        "and" | "or" => {
            let parts = operands.iter().map(parse_operand).collect::<RedluaResult<Vec<_>>>()?;
            Ok(if operator == "and" { Filter::And(parts) } else { Filter::Or(parts) })
        }
        "between" | "not between" => {
            require(&operator, operands, 3)?;
            Ok(Filter::Between {
                column: column_name(&operands[0])?,
                low: scalar_literal(&operands[1])?,
                high: scalar_literal(&operands[2])?,
                negated: operator == "not between",
            })
        }
        "in" | "not in" => {
            require(&operator, operands, 2)?;
            let columns = match &operands[0] {
                Json::Array(cols) => cols.iter().map(column_name).collect::<RedluaResult<Vec<_>>>()?,
                single => vec![column_name(single)?],
            };
            let values = match &operands[1] {
                Json::Array(items) => parse_in_items(items)?,
                single => vec![parse_in_item(single)?],
            };
            Ok(Filter::In {
                columns,
                values,
                negated: operator == "not in",
            })
        }
        "like" | "not like" | "or like" | "or not like" => {
            require(&operator, operands, 2)?;
            let op = match operator.as_str() {
                "like" => LikeOp::Like,
                "not like" => LikeOp::NotLike,
                "or like" => LikeOp::OrLike,
                _ => LikeOp::OrNotLike,
            };
            Ok(Filter::Like {
                op,
                column: column_name(&operands[0])?,
                pattern: scalar_literal(&operands[1])?,
            })
        }
        other => match CompareOp::parse(other) {
            Some(op) => {
                require(other, operands, 2)?;
                Ok(Filter::Compare {
                    op,
                    column: column_name(&operands[0])?,
                    value: scalar_literal(&operands[1])?,
                })
            }
            None => Err(RedluaError::UnknownOperator(other.to_string())),
        },
    }
}

/// The first `n` operands must be present and non-null.
fn require(operator: &str, operands: &[Json], n: usize) -> RedluaResult<()> {
    if operands.len() < n || operands[..n].iter().any(Json::is_null) {
        return Err(RedluaError::missing(operator, n));
    }
    Ok(())
}

/// Operands of `not`/`and`/`or`: nested filters, or strings taken as raw
/// pre-built conditions.
fn parse_operand(value: &Json) -> RedluaResult<Filter> {
    match value {
        Json::String(expr) => Ok(Filter::Raw(expr.clone())),
        Json::Array(_) | Json::Object(_) => Filter::from_json(value),
        other => Err(RedluaError::UnsupportedFilterShape(format!(
            "operand must be a filter or a raw condition, found {}",
            other
        ))),
    }
}

fn column_name(value: &Json) -> RedluaResult<String> {
    match value {
        Json::String(s) => Ok(s.clone()),
        other => Err(RedluaError::UnsupportedFilterShape(format!(
            "column name must be a string, found {}",
            other
        ))),
    }
}

fn scalar_literal(value: &Json) -> RedluaResult<Literal> {
    Literal::from_json(value).ok_or_else(|| {
        RedluaError::UnsupportedFilterShape(format!("expected a scalar value, found {}", value))
    })
}

fn parse_in_items(items: &[Json]) -> RedluaResult<Vec<InItem>> {
    items.iter().map(parse_in_item).collect()
}

fn parse_in_item(value: &Json) -> RedluaResult<InItem> {
    match value {
        Json::Object(map) => {
            let mut tuple = BTreeMap::new();
            for (column, v) in map {
                tuple.insert(column.clone(), scalar_literal(v)?);
            }
            Ok(InItem::Tuple(tuple))
        }
        scalar => Ok(InItem::Value(scalar_literal(scalar)?)),
    }
}

/// Numeric string check: optional sign, digits with an optional fraction,
/// optional exponent.
pub(crate) fn is_numeric_str(s: &str) -> bool {
    let b = s.as_bytes();
    let mut i = 0;
    if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
        i += 1;
    }
    let int_start = i;
    while i < b.len() && b[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < b.len() && b[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return false;
    }
    if i < b.len() && (b[i] == b'e' || b[i] == b'E') {
        i += 1;
        if i < b.len() && (b[i] == b'+' || b[i] == b'-') {
            i += 1;
        }
        let exp_start = i;
        while i < b.len() && b[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }
    i == b.len()
}

/// Lua `tonumber` on a string: surrounding whitespace is ignored, decimal
/// and `0x` hexadecimal forms are accepted.
pub(crate) fn to_number(s: &str) -> Option<f64> {
    let t = s.trim();
    if is_numeric_str(t) {
        return t.parse().ok();
    }
    let (negative, body) = match t.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, t),
    };
    let hex = body.strip_prefix("0x").or_else(|| body.strip_prefix("0X"))?;
    let n = i64::from_str_radix(hex, 16).ok()? as f64;
    Some(if negative { -n } else { n })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_hash_condition() {
        let f = Filter::from_json(&json!({"status": 2, "tag": ["a", "b"], "deleted": null})).unwrap();
        assert_eq!(
            f,
            Filter::Hash(vec![
                ("deleted".into(), HashValue::Value(Literal::Null)),
                ("status".into(), HashValue::Value(Literal::Int(2))),
                ("tag".into(), HashValue::list(["a", "b"])),
            ])
        );
    }

    #[test]
    fn test_parse_nested_operators() {
        let f = Filter::from_json(&json!([
            "AND",
            ["not in", "id", [1, 2]],
            ["or", [">", "age", 18], "cflag0=='1'"]
        ]))
        .unwrap();
        assert_eq!(
            f,
            Filter::and([
                Filter::not_in("id", [1, 2]),
                Filter::or([Filter::gt("age", 18), Filter::raw("cflag0=='1'")]),
            ])
        );
    }

    #[test]
    fn test_parse_composite_in() {
        let f = Filter::from_json(&json!(["in", ["a", "b"], [{"a": 1, "b": 2}]])).unwrap();
        assert_eq!(
            f,
            Filter::in_tuples(["a", "b"], [InItem::tuple([("a", 1), ("b", 2)])])
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            Filter::from_json(&json!("id=1")),
            Err(RedluaError::UnsupportedFilterShape(_))
        ));
        assert!(matches!(
            Filter::from_json(&json!(["xor", "a", "b"])),
            Err(RedluaError::UnknownOperator(op)) if op == "xor"
        ));
        assert!(matches!(
            Filter::from_json(&json!(["between", "age", 1])),
            Err(RedluaError::MissingOperand { expected: 3, .. })
        ));
        assert!(matches!(
            Filter::from_json(&json!(["in", "id"])),
            Err(RedluaError::MissingOperand { expected: 2, .. })
        ));
        assert!(matches!(
            Filter::from_json(&json!([">=", "age", null])),
            Err(RedluaError::MissingOperand { expected: 2, .. })
        ));
        assert!(matches!(
            Filter::from_json(&json!(["not", ["=", "a"], ["=", "b"]])),
            Err(RedluaError::MissingOperand { expected: 1, .. })
        ));
    }

    #[test]
    fn test_numeric_strings() {
        assert!(is_numeric_str("42"));
        assert!(is_numeric_str("-1.5e3"));
        assert!(is_numeric_str(".5"));
        assert!(!is_numeric_str("1e"));
        assert!(!is_numeric_str("abc"));
        assert!(!is_numeric_str(""));
        assert!(!is_numeric_str("inf"));
        assert_eq!(to_number(" 12 "), Some(12.0));
        assert_eq!(to_number("0x1A"), Some(26.0));
        assert_eq!(to_number("nan"), None);
    }

    #[test]
    fn test_literal_display() {
        assert_eq!(Literal::Bool(true).to_string(), "1");
        assert_eq!(Literal::Int(-4).to_string(), "-4");
        assert_eq!(Literal::from(Some("x")).to_string(), "x");
        assert_eq!(Literal::from(None::<i64>), Literal::Null);
    }
}
