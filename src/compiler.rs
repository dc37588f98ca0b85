//! Condition compiler: filter tree → Lua boolean expression.
//!
//! The compiled expression reads row fields through local aliases rather
//! than calling `HGET` inline. [`ColumnAliases`] records every field the
//! condition touches, and the script loads each of them once per
//! candidate row, however often the condition mentions it.

use std::fmt;

use crate::error::{RedluaError, RedluaResult};
use crate::filter::{CompareOp, Filter, HashValue, InItem, Literal};

/// Field name → Lua local alias, in first-use order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnAliases {
    entries: Vec<(String, String)>,
}

impl ColumnAliases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alias for `column`, registering it on first use.
    ///
    /// Aliases are `c`, the ASCII letters of the column, then the
    /// registration index: `created_at` → `ccreatedat0`. The trailing index
    /// keeps them unique and clear of Lua keywords.
    pub fn alias(&mut self, column: &str) -> String {
        if let Some(alias) = self.get(column) {
            return alias.to_string();
        }
        let letters: String = column.chars().filter(char::is_ascii_alphabetic).collect();
        let alias = format!("c{}{}", letters, self.entries.len());
        self.entries.push((column.to_string(), alias.clone()));
        alias
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, a)| a.as_str())
    }

    /// `(column, alias)` pairs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(c, a)| (c.as_str(), a.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A compiled condition. `Display` renders it as Lua.
///
/// Rendered expressions refer to the script locals `key` (table prefix) and
/// `pk` (current primary key) as well as to the aliases.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// No condition at all: an empty `and`/`or`.
    Empty,
    Const(bool),
    /// The row has no such field.
    Absent { column: String },
    Eq { alias: String, value: Literal },
    Compare {
        alias: String,
        op: CompareOp,
        value: Literal,
        /// Coerce the field with `tonumber` and compare as numbers.
        numeric: bool,
    },
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
    Raw(String),
}

impl Expr {
    pub fn is_empty(&self) -> bool {
        matches!(self, Expr::Empty)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Empty => Ok(()),
            Expr::Const(b) => write!(f, "{}", b),
            Expr::Absent { column } => write!(
                f,
                "redis.call('HEXISTS',key .. ':a:' .. pk,{})==0",
                quote_str(column)
            ),
            Expr::Eq { alias, value } => write!(f, "{}=={}", alias, quote_value(value)),
            Expr::Compare {
                alias,
                op,
                value,
                numeric: true,
            } => write!(f, "tonumber({}) {} {}", alias, op.as_str(), value),
            Expr::Compare { alias, op, value, .. } => {
                write!(f, "{} {} {}", alias, op.as_str(), quote_value(value))
            }
            Expr::Not(inner) => write!(f, "not ({})", inner),
            Expr::And(parts) => write_junction(f, parts, "and"),
            Expr::Or(parts) => write_junction(f, parts, "or"),
            Expr::Raw(expr) => f.write_str(expr),
        }
    }
}

fn write_junction(f: &mut fmt::Formatter<'_>, parts: &[Expr], op: &str) -> fmt::Result {
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            write!(f, " {} ", op)?;
        }
        write!(f, "({})", part)?;
    }
    Ok(())
}

/// Render a literal for embedding in Lua source.
///
/// Strings and integers become single-quoted Lua strings (hash fields are
/// strings, so this is what `==` needs). Booleans are stored as `1`/`0`
/// and quoted the same way. Floats stay bare numbers, and raw expressions
/// are inserted untouched.
pub fn quote_value(value: &Literal) -> String {
    match value {
        Literal::String(s) => quote_str(s),
        Literal::Int(n) => quote_str(&n.to_string()),
        Literal::Bool(b) => quote_str(if *b { "1" } else { "0" }),
        Literal::Float(n) => n.to_string(),
        Literal::Null => "nil".to_string(),
        Literal::Raw(expr) => expr.clone(),
    }
}

/// Single-quoted Lua string literal.
pub fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\0' => out.push_str("\\000"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\\' => out.push_str("\\\\"),
            '\u{1a}' => out.push_str("\\026"),
            '\'' => out.push_str("\\'"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

/// Compile a filter, registering every referenced field in `columns`.
pub fn compile(filter: &Filter, columns: &mut ColumnAliases) -> RedluaResult<Expr> {
    match filter {
        Filter::Hash(pairs) => Ok(compile_hash(pairs, columns)),
        Filter::Not(inner) => {
            let inner = compile(inner, columns)?;
            // An empty condition matches everything; its negation matches nothing.
            Ok(if inner.is_empty() {
                Expr::Const(false)
            } else {
                Expr::Not(Box::new(inner))
            })
        }
        Filter::And(operands) => Ok(junction(compile_all(operands, columns)?, Expr::And)),
        Filter::Or(operands) => Ok(junction(compile_all(operands, columns)?, Expr::Or)),
        Filter::Between {
            column,
            low,
            high,
            negated,
        } => {
            let alias = columns.alias(column);
            let range = Expr::And(vec![
                comparison(&alias, CompareOp::Gte, low),
                comparison(&alias, CompareOp::Lte, high),
            ]);
            Ok(if *negated { Expr::Not(Box::new(range)) } else { range })
        }
        Filter::In {
            columns: in_columns,
            values,
            negated,
        } => Ok(compile_in(in_columns, values, *negated, columns)),
        Filter::Compare { op, column, value } => Ok(comparison(&columns.alias(column), *op, value)),
        Filter::Like { op, .. } => Err(RedluaError::not_supported(format!(
            "'{}' conditions cannot be evaluated server-side",
            op.as_str()
        ))),
        Filter::Raw(expr) => Ok(Expr::Raw(expr.clone())),
    }
}

fn compile_all(operands: &[Filter], columns: &mut ColumnAliases) -> RedluaResult<Vec<Expr>> {
    let mut parts = Vec::with_capacity(operands.len());
    for operand in operands {
        let part = compile(operand, columns)?;
        if !part.is_empty() {
            parts.push(part);
        }
    }
    Ok(parts)
}

fn junction(parts: Vec<Expr>, build: fn(Vec<Expr>) -> Expr) -> Expr {
    if parts.is_empty() { Expr::Empty } else { build(parts) }
}

fn compile_hash(pairs: &[(String, HashValue)], columns: &mut ColumnAliases) -> Expr {
    let mut parts: Vec<Expr> = pairs
        .iter()
        .map(|(column, value)| match value {
            HashValue::List(items) => compile_in(std::slice::from_ref(column), items, false, columns),
            HashValue::Value(v) => equality(column, v, columns),
        })
        .collect();
    match parts.len() {
        0 => Expr::Empty,
        1 => parts.remove(0),
        _ => Expr::And(parts),
    }
}

fn compile_in(in_columns: &[String], values: &[InItem], negated: bool, columns: &mut ColumnAliases) -> Expr {
    // Nothing is in an empty set, everything is outside it.
    if values.is_empty() || in_columns.is_empty() {
        return Expr::Const(negated);
    }

    let alternatives: Vec<Expr> = if let [column] = in_columns {
        values
            .iter()
            .map(|item| {
                let value = match item {
                    InItem::Value(v) => v.clone(),
                    InItem::Tuple(_) => item.field(column),
                };
                equality(column, &value, columns)
            })
            .collect()
    } else {
        values
            .iter()
            .map(|item| {
                Expr::And(
                    in_columns
                        .iter()
                        .map(|column| equality(column, &item.field(column), columns))
                        .collect(),
                )
            })
            .collect()
    };

    let any = Expr::Or(alternatives);
    if negated { Expr::Not(Box::new(any)) } else { any }
}

fn equality(column: &str, value: &Literal, columns: &mut ColumnAliases) -> Expr {
    match value {
        Literal::Null => Expr::Absent {
            column: column.to_string(),
        },
        other => Expr::Eq {
            alias: columns.alias(column),
            value: bool_as_int(other),
        },
    }
}

fn comparison(alias: &str, op: CompareOp, value: &Literal) -> Expr {
    let value = bool_as_int(value);
    Expr::Compare {
        alias: alias.to_string(),
        op,
        numeric: value.is_numeric(),
        value,
    }
}

fn bool_as_int(value: &Literal) -> Literal {
    match value {
        Literal::Bool(b) => Literal::Int(i64::from(*b)),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn lua(filter: &Filter) -> (String, ColumnAliases) {
        let mut columns = ColumnAliases::new();
        let expr = compile(filter, &mut columns).unwrap();
        (expr.to_string(), columns)
    }

    #[test]
    fn test_hash_equality() {
        let (text, columns) = lua(&Filter::hash([
            ("status", HashValue::from(2)),
            ("name", HashValue::from("o'hara")),
            ("active", HashValue::from(true)),
            ("deleted_at", HashValue::from(Literal::Null)),
        ]));
        assert_eq!(
            text,
            "(cstatus0=='2') and (cname1=='o\\'hara') and (cactive2=='1') and \
             (redis.call('HEXISTS',key .. ':a:' .. pk,'deleted_at')==0)"
        );
        assert_eq!(columns.len(), 3);
        assert_eq!(columns.get("deleted_at"), None);
    }

    #[test]
    fn test_single_hash_entry_is_bare() {
        let (text, _) = lua(&Filter::eq("id", 5));
        assert_eq!(text, "cid0=='5'");
    }

    #[test]
    fn test_alias_registered_once() {
        let (text, columns) = lua(&Filter::or([
            Filter::eq("age", 1),
            Filter::gt("age", 10),
            Filter::between("age", 20, 30),
        ]));
        assert_eq!(columns.len(), 1);
        assert_eq!(columns.get("age"), Some("cage0"));
        assert_eq!(
            text,
            "(cage0=='1') or (tonumber(cage0) > 10) or \
             ((tonumber(cage0) >= 20) and (tonumber(cage0) <= 30))"
        );
    }

    #[test]
    fn test_in_conditions() {
        assert_eq!(lua(&Filter::is_in("id", [1, 2])).0, "(cid0=='1') or (cid0=='2')");
        assert_eq!(
            lua(&Filter::not_in("id", [Literal::from(1), Literal::Null])).0,
            "not ((cid0=='1') or (redis.call('HEXISTS',key .. ':a:' .. pk,'id')==0))"
        );
        assert_eq!(lua(&Filter::is_in("id", Vec::<i64>::new())).0, "false");
        assert_eq!(lua(&Filter::not_in("id", Vec::<i64>::new())).0, "true");
    }

    #[test]
    fn test_composite_in() {
        let filter = Filter::in_tuples(
            ["a", "b"],
            [
                InItem::tuple([("a", 1), ("b", 2)]),
                InItem::tuple([("a", 3)]),
            ],
        );
        assert_eq!(
            lua(&filter).0,
            "((ca0=='1') and (cb1=='2')) or \
             ((ca0=='3') and (redis.call('HEXISTS',key .. ':a:' .. pk,'b')==0))"
        );
    }

    #[test]
    fn test_in_over_rows_uses_column_entry() {
        let filter = Filter::In {
            columns: vec!["id".into()],
            values: vec![InItem::tuple([("id", 7), ("name", 0)])],
            negated: false,
        };
        assert_eq!(lua(&filter).0, "(cid0=='7')");
    }

    #[test]
    fn test_comparison_quoting() {
        assert_eq!(lua(&Filter::gte("age", "18")).0, "tonumber(cage0) >= 18");
        assert_eq!(lua(&Filter::lt("name", "m")).0, "cname0 < 'm'");
        assert_eq!(lua(&Filter::gt("score", 1.5)).0, "tonumber(cscore0) > 1.5");
    }

    #[test]
    fn test_negated_between_matches_not_between() {
        let negated = lua(&Filter::negate(Filter::between("age", 1, 5))).0;
        let direct = lua(&Filter::not_between("age", 1, 5)).0;
        assert_eq!(negated, direct);
        assert_eq!(direct, "not ((tonumber(cage0) >= 1) and (tonumber(cage0) <= 5))");
    }

    #[test]
    fn test_empty_junctions() {
        assert_eq!(lua(&Filter::and([])).0, "");
        assert_eq!(lua(&Filter::or([Filter::and([])])).0, "");
        assert_eq!(lua(&Filter::negate(Filter::and([]))).0, "false");
        assert_eq!(
            lua(&Filter::and([Filter::and([]), Filter::eq("a", 1)])).0,
            "(ca0=='1')"
        );
    }

    #[test]
    fn test_raw_expression_passthrough() {
        let (text, _) = lua(&Filter::and([
            Filter::raw("redis.call('EXISTS', 'flag')==1"),
            Filter::eq("n", Literal::raw("tostring(3)")),
        ]));
        assert_eq!(text, "(redis.call('EXISTS', 'flag')==1) and (cn0==tostring(3))");
    }

    #[test]
    fn test_like_is_rejected() {
        let mut columns = ColumnAliases::new();
        let err = compile(&Filter::like("name", "a%"), &mut columns).unwrap_err();
        assert!(matches!(err, RedluaError::NotSupported(_)));
    }

    #[test]
    fn test_quote_escapes() {
        assert_eq!(quote_str("a\\b\n\r\0'\u{1a}"), "'a\\\\b\\n\\r\\000\\'\\026'");
        assert_eq!(quote_value(&Literal::Int(-3)), "'-3'");
        assert_eq!(quote_value(&Literal::Float(2.5)), "2.5");
    }

    #[test]
    fn test_alias_naming() {
        let mut columns = ColumnAliases::new();
        assert_eq!(columns.alias("created_at"), "ccreatedat0");
        assert_eq!(columns.alias("x2"), "cx1");
        assert_eq!(columns.alias("created_at"), "ccreatedat0");
        let listed: Vec<_> = columns.iter().collect();
        assert_eq!(listed, vec![("created_at", "ccreatedat0"), ("x2", "cx1")]);
    }
}
