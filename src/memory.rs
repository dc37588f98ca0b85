//! In-memory [`Executor`] for tests and offline use.
//!
//! Holds the same lists, hashes and counters a server would, and runs scan
//! programs by interpreting their compiled condition with Lua semantics:
//! a missing field reads as `false`, string comparison is byte-wise,
//! `tonumber` is the only coercion, and comparing a missing field raises an
//! error just like the real script does.

use std::cmp::Ordering;
use std::collections::HashMap;

use crate::compiler::Expr;
use crate::error::{RedluaError, RedluaResult};
use crate::executor::{Command, Executor};
use crate::filter::{CompareOp, Literal, to_number};
use crate::key::{PkValue, build_key};
use crate::planner::natural_order;
use crate::reply::Row;
use crate::script::{QueryKind, ScanProgram};
use crate::table::Table;
use crate::value::Value;

static EMPTY_ROW: Row = Row::new();

/// A single-node store living in process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    cluster: bool,
    resp3: bool,
    lists: HashMap<String, Vec<String>>,
    hashes: HashMap<String, Row>,
    strings: HashMap<String, String>,
    issued: Vec<&'static str>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend to be a cluster: keys get hash-tagged prefixes.
    pub fn with_cluster(mut self, cluster: bool) -> Self {
        self.cluster = cluster;
        self
    }

    /// Answer in RESP3 shapes: hash reads come back as maps and a Lua
    /// `false` as a boolean instead of a null.
    pub fn with_resp3(mut self, resp3: bool) -> Self {
        self.resp3 = resp3;
        self
    }

    /// Names of the commands executed so far, oldest first.
    pub fn issued(&self) -> &[&'static str] {
        &self.issued
    }

    /// Store a row the way the model layer saves a new record.
    ///
    /// Missing primary-key fields are filled from the table's
    /// auto-increment counters; explicit values push the counter forward.
    /// Null attributes are not stored, booleans are stored as `1`/`0`.
    /// Returns the encoded primary key.
    pub fn insert<K, V>(&mut self, table: &Table, attributes: impl IntoIterator<Item = (K, V)>) -> RedluaResult<String>
    where
        K: Into<String>,
        V: Into<Literal>,
    {
        let prefix = table.key_prefix(self.cluster);
        let mut row: Vec<(String, Literal)> = Vec::new();
        for (k, v) in attributes {
            let k = k.into();
            row.retain(|(existing, _)| *existing != k);
            row.push((k, v.into()));
        }

        let mut pk = Vec::with_capacity(table.primary_key().len());
        for field in table.primary_key() {
            let counter_key = prefix.counter_key(field);
            let counter = self.counter(&counter_key)?;
            let current = row.iter().find(|(k, _)| k == field).map(|(_, v)| v.clone());
            let value = match current {
                Some(value) if !value.is_null() => {
                    if let Some(n) = to_number(&value.to_string()) {
                        if n.fract() == 0.0 && n > counter as f64 {
                            self.strings.insert(counter_key, (n as i64).to_string());
                        }
                    }
                    value
                }
                _ => {
                    let next = Literal::Int(counter + 1);
                    self.strings.insert(counter_key, (counter + 1).to_string());
                    row.retain(|(k, _)| k != field);
                    row.push((field.clone(), next.clone()));
                    next
                }
            };
            pk.push((field.clone(), value));
        }

        let encoded = build_key(&PkValue::composite(pk));
        let row_key = prefix.row_key(&encoded);
        let list = self.lists.entry(prefix.list_key().to_string()).or_default();
        if !self.hashes.contains_key(&row_key) {
            list.push(encoded.clone());
        }
        let stored: Row = row
            .into_iter()
            .filter(|(_, v)| !v.is_null())
            .map(|(k, v)| (k, v.to_string()))
            .collect();
        self.hashes.insert(row_key, stored);
        Ok(encoded)
    }

    /// Drop a row's hash but leave its key in the table list, the state a
    /// crashed writer can leave behind.
    pub fn remove_row(&mut self, table: &Table, pk: &str) -> bool {
        let key = table.key_prefix(self.cluster).row_key(pk);
        self.hashes.remove(&key).is_some()
    }

    fn counter(&self, key: &str) -> RedluaResult<i64> {
        match self.strings.get(key) {
            None => Ok(0),
            Some(s) => s
                .parse()
                .map_err(|_| RedluaError::Server("ERR value is not an integer or out of range".into())),
        }
    }

    /// `HGETALL` as a top-level command.
    fn hgetall_reply(&self, key: &str) -> Value {
        if !self.resp3 {
            return self.hgetall(key);
        }
        let row = self.hashes.get(key);
        Value::Map(
            row.into_iter()
                .flatten()
                .map(|(k, v)| (Value::bulk(k), Value::bulk(v)))
                .collect(),
        )
    }

    /// What a Lua `false` looks like to the client.
    fn lua_false(&self) -> Value {
        if self.resp3 { Value::Boolean(false) } else { Value::Null }
    }

    /// `HGETALL` as seen from inside a script, always a flat array.
    fn hgetall(&self, key: &str) -> Value {
        let row = self.hashes.get(key);
        Value::Array(
            row.into_iter()
                .flatten()
                .flat_map(|(k, v)| [Value::bulk(k), Value::bulk(v)])
                .collect(),
        )
    }

    fn eval(&self, program: &ScanProgram) -> RedluaResult<Value> {
        let prefix = &program.prefix;
        let list = self.lists.get(prefix.list_key()).cloned().unwrap_or_default();
        let row_of = |pk: &String| self.hashes.get(&prefix.row_key(pk)).unwrap_or(&EMPTY_ROW);

        let candidates: Vec<String> = match &program.order {
            None => list,
            Some(order) => {
                let entries: Vec<(Option<&str>, &str)> = list
                    .iter()
                    .map(|pk| (row_of(pk).get(&order.column).map(String::as_str), pk.as_str()))
                    .collect();
                natural_order(&entries, order.direction)
                    .into_iter()
                    .map(|i| list[i].clone())
                    .collect()
            }
        };

        let mut scan = Scan::new(&program.kind);
        let mut matched = 0;
        for pk in &candidates {
            let row = row_of(pk);
            let locals: HashMap<&str, Option<&str>> = program
                .columns
                .iter()
                .map(|(column, alias)| (alias, row.get(column).map(String::as_str)))
                .collect();
            if !truthy(&program.condition, row, &locals)? {
                continue;
            }
            matched += 1;
            if !program.window.contains(matched) {
                continue;
            }
            if program.kind == QueryKind::One && program.order.is_none() {
                return Ok(self.hgetall(&prefix.row_key(pk)));
            }
            scan.push(self, &prefix.row_key(pk), row);
        }
        Ok(scan.finish(self))
    }
}

impl Executor for MemoryStore {
    async fn execute(&mut self, command: Command) -> RedluaResult<Value> {
        self.issued.push(command.name());
        match command {
            Command::HGetAll { key } => Ok(self.hgetall_reply(&key)),
            Command::LLen { key } => Ok(Value::Integer(
                self.lists.get(&key).map_or(0, |l| l.len() as i64),
            )),
            Command::Eval { program } => self.eval(&program),
        }
    }

    fn is_cluster(&self) -> bool {
        self.cluster
    }
}

/// Script-side accumulator state, producing the reply a Lua scan would.
enum Scan<'k> {
    Rows(Vec<Value>),
    Row(Option<Value>),
    Count(i64),
    Column(&'k str, Vec<Value>),
    Sum(&'k str, f64),
    Average(&'k str, f64, u64),
    Min(&'k str, Option<f64>),
    Max(&'k str, Option<f64>),
}

impl<'k> Scan<'k> {
    fn new(kind: &'k QueryKind) -> Self {
        match kind {
            QueryKind::All => Scan::Rows(Vec::new()),
            QueryKind::One => Scan::Row(None),
            QueryKind::Count => Scan::Count(0),
            QueryKind::Column(c) => Scan::Column(c, Vec::new()),
            QueryKind::Sum(c) => Scan::Sum(c, 0.0),
            QueryKind::Average(c) => Scan::Average(c, 0.0, 0),
            QueryKind::Min(c) => Scan::Min(c, None),
            QueryKind::Max(c) => Scan::Max(c, None),
        }
    }

    fn push(&mut self, store: &MemoryStore, key: &str, row: &Row) {
        let number = |column: &str| row.get(column).and_then(|v| to_number(v));
        match self {
            Scan::Rows(rows) => rows.push(store.hgetall(key)),
            Scan::Row(slot) => {
                if slot.is_none() {
                    *slot = Some(store.hgetall(key));
                }
            }
            Scan::Count(n) => *n += 1,
            Scan::Column(column, values) => values.push(row.get(*column).map_or_else(|| store.lua_false(), Value::bulk)),
            Scan::Sum(column, sum) => *sum += number(*column).unwrap_or(0.0),
            Scan::Average(column, sum, n) => {
                if let Some(x) = number(*column) {
                    *sum += x;
                    *n += 1;
                }
            }
            Scan::Min(column, best) => {
                if let Some(x) = number(*column) {
                    if best.is_none_or(|b| x < b) {
                        *best = Some(x);
                    }
                }
            }
            Scan::Max(column, best) => {
                if let Some(x) = number(*column) {
                    if best.is_none_or(|b| x > b) {
                        *best = Some(x);
                    }
                }
            }
        }
    }

    fn finish(self, store: &MemoryStore) -> Value {
        match self {
            Scan::Rows(rows) => Value::Array(rows),
            Scan::Row(row) => row.unwrap_or(Value::Array(Vec::new())),
            Scan::Count(n) => Value::Integer(n),
            Scan::Column(_, values) => Value::Array(values),
            Scan::Sum(_, sum) => Value::bulk(lua_number(sum)),
            Scan::Average(_, _, 0) => store.lua_false(),
            Scan::Average(_, sum, n) => Value::bulk(lua_number(sum / n as f64)),
            Scan::Min(_, v) | Scan::Max(_, v) => v.map_or_else(|| store.lua_false(), |v| Value::bulk(lua_number(v))),
        }
    }
}

/// Stands in for `string.format('%.17g', n)`. The digits can differ from
/// C's `%g`, but both forms parse back to exactly `n`.
fn lua_number(n: f64) -> String {
    format!("{}", n)
}

fn truthy(expr: &Expr, row: &Row, locals: &HashMap<&str, Option<&str>>) -> RedluaResult<bool> {
    let local = |alias: &str| locals.get(alias).copied().flatten();
    match expr {
        Expr::Empty => Ok(true),
        Expr::Const(b) => Ok(*b),
        Expr::Absent { column } => Ok(!row.contains_key(column)),
        Expr::Eq { alias, value } => {
            let field = local(alias);
            match value {
                Literal::String(_) | Literal::Int(_) | Literal::Bool(_) => {
                    Ok(field == Some(value.to_string().as_str()))
                }
                // A string (or false) never equals a number or nil.
                Literal::Float(_) | Literal::Null => Ok(false),
                Literal::Raw(_) => Err(raw_unsupported()),
            }
        }
        Expr::Compare {
            alias,
            op,
            value,
            numeric,
        } => {
            let field = local(alias);
            if let Literal::Raw(_) = value {
                return Err(raw_unsupported());
            }
            if *numeric {
                let rhs = to_number(&value.to_string())
                    .ok_or_else(|| compare_error("number", "nil"))?;
                let lhs = field
                    .and_then(to_number)
                    .ok_or_else(|| compare_error("nil", "number"))?;
                return Ok(holds(*op, lhs.partial_cmp(&rhs)));
            }
            match (field, value) {
                (Some(lhs), Literal::String(rhs)) => Ok(holds(*op, Some(lhs.as_bytes().cmp(rhs.as_bytes())))),
                (None, _) => Err(compare_error("boolean", "string")),
                (Some(_), _) => Err(compare_error("string", "nil")),
            }
        }
        Expr::Not(inner) => Ok(!truthy(inner, row, locals)?),
        Expr::And(parts) => {
            for part in parts {
                if !truthy(part, row, locals)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Expr::Or(parts) => {
            for part in parts {
                if truthy(part, row, locals)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expr::Raw(_) => Err(raw_unsupported()),
    }
}

fn holds(op: CompareOp, ordering: Option<Ordering>) -> bool {
    match (op, ordering) {
        (_, None) => false,
        (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
        (CompareOp::Gte, Some(o)) => o != Ordering::Less,
        (CompareOp::Lt, Some(o)) => o == Ordering::Less,
        (CompareOp::Lte, Some(o)) => o != Ordering::Greater,
    }
}

fn compare_error(lhs: &str, rhs: &str) -> RedluaError {
    RedluaError::Server(format!(
        "ERR Error running script: attempt to compare {} with {}",
        lhs, rhs
    ))
}

fn raw_unsupported() -> RedluaError {
    RedluaError::not_supported("raw Lua expressions cannot be evaluated in memory")
}
