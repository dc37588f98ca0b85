//! Reply decoding: flat hash replies into rows, script replies into typed
//! results.

use std::collections::BTreeMap;

use crate::error::{RedluaError, RedluaResult};
use crate::filter::to_number;
use crate::script::QueryKind;
use crate::value::Value;

/// One record: field → value.
pub type Row = BTreeMap<String, String>;

/// Turn `[k0, v0, k1, v1, ...]` into a row.
///
/// A repeated key keeps its last value. A trailing key without a value is
/// dropped, and so are pairs whose key is not a scalar.
pub fn decode_row(flat: Vec<Value>) -> Row {
    let mut row = Row::new();
    let mut items = flat.into_iter();
    while let (Some(k), Some(v)) = (items.next(), items.next()) {
        if let (Some(k), Some(v)) = (k.to_text(), v.to_text()) {
            row.insert(k, v);
        }
    }
    row
}

/// Turn a list of flat hash replies into rows, preserving order.
pub fn decode_rows(nested: Vec<Value>) -> Vec<Row> {
    nested
        .into_iter()
        .map(|item| match item {
            Value::Array(flat) => decode_row(flat),
            Value::Map(pairs) => decode_map(pairs),
            _ => Row::new(),
        })
        .collect()
}

/// RESP3 servers may answer `HGETALL` with a map instead of a flat array.
fn decode_map(pairs: Vec<(Value, Value)>) -> Row {
    pairs
        .into_iter()
        .filter_map(|(k, v)| Some((k.to_text()?, v.to_text()?)))
        .collect()
}

/// A decoded hash reply, from either a flat array or a RESP3 map.
pub(crate) fn decode_hash(reply: Value) -> RedluaResult<Row> {
    match reply {
        Value::Array(flat) => Ok(decode_row(flat)),
        Value::Map(pairs) => Ok(decode_map(pairs)),
        Value::Null => Ok(Row::new()),
        other => Err(unexpected("hash", &other)),
    }
}

/// The typed result of one query kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Output {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Count(u64),
    Column(Vec<Option<String>>),
    Number(f64),
    /// Min/max: absent when nothing matched.
    Extremum(Option<f64>),
}

/// Decode the reply of a scan program of the given kind.
pub fn decode_output(kind: &QueryKind, reply: Value) -> RedluaResult<Output> {
    match kind {
        QueryKind::All => match reply {
            Value::Array(items) => Ok(Output::Rows(decode_rows(items))),
            ref r if is_lua_false(r) => Ok(Output::Rows(Vec::new())),
            other => Err(unexpected(kind.name(), &other)),
        },
        QueryKind::One => {
            if is_lua_false(&reply) {
                return Ok(Output::Row(None));
            }
            let row = decode_hash(reply)?;
            Ok(Output::Row(if row.is_empty() { None } else { Some(row) }))
        }
        QueryKind::Count => {
            let n = reply.as_int().ok_or_else(|| unexpected(kind.name(), &reply))?;
            Ok(Output::Count(u64::try_from(n).unwrap_or(0)))
        }
        QueryKind::Column(_) => match reply {
            Value::Array(items) => Ok(Output::Column(items.iter().map(column_item).collect())),
            ref r if is_lua_false(r) => Ok(Output::Column(Vec::new())),
            other => Err(unexpected(kind.name(), &other)),
        },
        QueryKind::Sum(_) => Ok(Output::Number(number(kind, &reply)?)),
        QueryKind::Average(_) => {
            if is_lua_false(&reply) {
                return Err(RedluaError::EmptyAggregate);
            }
            Ok(Output::Number(number(kind, &reply)?))
        }
        QueryKind::Min(_) | QueryKind::Max(_) => {
            if is_lua_false(&reply) {
                return Ok(Output::Extremum(None));
            }
            Ok(Output::Extremum(Some(number(kind, &reply)?)))
        }
    }
}

/// Lua `false` and `nil` reach the client as a null over RESP2 and as a
/// boolean `false` over RESP3.
fn is_lua_false(reply: &Value) -> bool {
    matches!(reply, Value::Null | Value::Boolean(false))
}

/// A field read with `HGET` inside the script; `false` means missing.
fn column_item(item: &Value) -> Option<String> {
    if is_lua_false(item) {
        return None;
    }
    item.to_text()
}

fn number(kind: &QueryKind, reply: &Value) -> RedluaResult<f64> {
    match reply {
        Value::Integer(n) => Ok(*n as f64),
        Value::Double(d) => Ok(*d),
        other => other
            .as_str()
            .and_then(to_number)
            .ok_or_else(|| unexpected(kind.name(), other)),
    }
}

fn unexpected(what: &str, reply: &Value) -> RedluaError {
    RedluaError::Protocol(format!("unexpected reply for {}: {:?}", what, reply))
}
