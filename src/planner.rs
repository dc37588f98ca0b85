//! Primary-key fast path.
//!
//! A filter that pins the primary key (`{id: 5}`, `{id: [1, 2]}`,
//! `["in", "id", [...]]`, or an exact composite-key hash) does not need a
//! table scan: the rows can be read directly with one `HGETALL` each.
//! Ordering and pagination are then applied client-side.
//!
//! Unlike the script path, the reads are separate round trips, so a
//! concurrent writer can be observed halfway. That is the price of O(1)
//! work per requested key.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::error::{RedluaError, RedluaResult};
use crate::executor::{Command, Executor};
use crate::filter::{Filter, HashValue, InItem, Literal, to_number};
use crate::key::{KeyPrefix, PkValue, build_key};
use crate::query::{Direction, Query};
use crate::reply::{Output, Row, decode_hash};
use crate::script::QueryKind;
use crate::table::Table;

/// Whether `filter` names rows purely by primary key.
pub fn is_eligible(filter: &Filter, table: &Table) -> bool {
    match filter {
        Filter::Hash(pairs) => {
            let columns: Vec<&str> = pairs.iter().map(|(c, _)| c.as_str()).collect();
            table.is_primary_key(&columns)
        }
        Filter::In {
            columns,
            negated: false,
            ..
        } => table.is_primary_key(columns.as_slice()),
        _ => false,
    }
}

/// The primary keys a filter asks for, or `None` when the filter has to go
/// through the script path.
///
/// `in` over the fields of a composite key is rejected outright, as is a
/// composite-key hash with list values.
pub fn candidates(filter: &Filter, table: &Table) -> RedluaResult<Option<Vec<PkValue>>> {
    if let Filter::In {
        columns,
        negated: false,
        ..
    } = filter
    {
        let pk = table.primary_key();
        if table.has_composite_key() && !columns.is_empty() && columns.iter().all(|c| pk.contains(c)) {
            return Err(RedluaError::not_supported(
                "IN over a composite primary key is not supported",
            ));
        }
    }
    if !is_eligible(filter, table) {
        return Ok(None);
    }

    let keys: Vec<PkValue> = match filter {
        Filter::Hash(pairs) if table.has_composite_key() => {
            let mut fields = BTreeMap::new();
            for (column, value) in pairs {
                match value {
                    HashValue::Value(v) => {
                        fields.insert(column.clone(), v.clone());
                    }
                    HashValue::List(_) => {
                        return Err(RedluaError::not_supported(
                            "finding by a list of composite primary keys is not supported",
                        ));
                    }
                }
            }
            if fields.values().any(Literal::is_null) {
                Vec::new()
            } else {
                vec![PkValue::Composite(fields)]
            }
        }
        Filter::Hash(pairs) => match pairs.as_slice() {
            [(_, HashValue::Value(v))] => scalars(std::iter::once(v.clone())),
            [(column, HashValue::List(items))] => scalars(items.iter().map(|item| item_value(item, column))),
            _ => return Ok(None),
        },
        Filter::In { columns, values, .. } => match columns.as_slice() {
            [column] => scalars(values.iter().map(|item| item_value(item, column))),
            _ => return Ok(None),
        },
        _ => return Ok(None),
    };

    let has_raw = keys.iter().any(|k| match k {
        PkValue::Scalar(v) => matches!(v, Literal::Raw(_)),
        PkValue::Composite(fields) => fields.values().any(|v| matches!(v, Literal::Raw(_))),
    });
    Ok(if has_raw { None } else { Some(keys) })
}

fn item_value(item: &InItem, column: &str) -> Literal {
    match item {
        InItem::Value(v) => v.clone(),
        InItem::Tuple(_) => item.field(column),
    }
}

/// Null keys are dropped: no stored row has a null primary key.
fn scalars(values: impl Iterator<Item = Literal>) -> Vec<PkValue> {
    values.filter(|v| !v.is_null()).map(PkValue::Scalar).collect()
}

/// Serve `kind` for the given keys.
pub async fn run<E: Executor>(
    executor: &mut E,
    prefix: &KeyPrefix,
    query: &Query,
    kind: &QueryKind,
    keys: &[PkValue],
) -> RedluaResult<Output> {
    let order = query.single_order()?;

    let mut encoded: Vec<String> = Vec::with_capacity(keys.len());
    for key in keys {
        let key = build_key(key);
        if !encoded.contains(&key) {
            encoded.push(key);
        }
    }

    let mut acc = Accumulator::new(kind);

    // Counting asks how many of the keys exist; pagination does not apply.
    if *kind == QueryKind::Count {
        for pk in &encoded {
            let row = fetch(executor, prefix, pk).await?;
            if !row.is_empty() {
                acc.push(row);
            }
        }
        return acc.finish();
    }

    let window = query.window();
    match order {
        Some(order) => {
            let mut rows: Vec<(&str, Row)> = Vec::with_capacity(encoded.len());
            for pk in &encoded {
                let row = fetch(executor, prefix, pk).await?;
                if !row.is_empty() {
                    rows.push((pk.as_str(), row));
                }
            }
            let permutation = {
                let entries: Vec<(Option<&str>, &str)> = rows
                    .iter()
                    .map(|(pk, row)| (row.get(&order.column).map(String::as_str), *pk))
                    .collect();
                natural_order(&entries, order.direction)
            };
            let mut slots: Vec<Option<Row>> = rows.into_iter().map(|(_, row)| Some(row)).collect();
            for (i, index) in permutation.into_iter().enumerate() {
                if window.contains(i + 1) {
                    if let Some(row) = slots[index].take() {
                        acc.push(row);
                    }
                }
            }
        }
        None => {
            let mut position = 0;
            for pk in &encoded {
                if window.exhausted(position) || acc.is_done() {
                    break;
                }
                let row = fetch(executor, prefix, pk).await?;
                if row.is_empty() {
                    continue;
                }
                position += 1;
                if window.contains(position) {
                    acc.push(row);
                }
            }
        }
    }
    acc.finish()
}

async fn fetch<E: Executor>(executor: &mut E, prefix: &KeyPrefix, pk: &str) -> RedluaResult<Row> {
    let reply = executor
        .execute(Command::HGetAll {
            key: prefix.row_key(pk),
        })
        .await?;
    decode_hash(reply)
}

/// Permutation sorting `(value, pk)` entries the way the server's
/// `SORT ... BY` does.
///
/// Numeric when every present value is a number, with missing values
/// counting as 0; equal scores fall back to comparing the encoded keys
/// byte-wise. Otherwise byte-wise on the values with missing values first,
/// where ties keep input order. The direction reverses the whole
/// comparison.
pub(crate) fn natural_order(entries: &[(Option<&str>, &str)], direction: Direction) -> Vec<usize> {
    let mut order: Vec<usize> = (0..entries.len()).collect();
    let scores: Option<Vec<f64>> = entries
        .iter()
        .map(|(v, _)| match v {
            None => Some(0.0),
            Some(s) => to_number(s),
        })
        .collect();
    match scores {
        Some(scores) => order.sort_by(|a, b| {
            let by_score = scores[*a].total_cmp(&scores[*b]);
            direction.apply(by_score.then_with(|| entries[*a].1.as_bytes().cmp(entries[*b].1.as_bytes())))
        }),
        None => order.sort_by(|a, b| direction.apply(entries[*a].0.cmp(&entries[*b].0))),
    }
    order
}

/// Client-side mirror of the script accumulators.
enum Accumulator<'k> {
    Rows(Vec<Row>),
    Row(Option<Row>),
    Count(u64),
    Column(&'k str, Vec<Option<String>>),
    Sum(&'k str, f64),
    Average(&'k str, f64, u64),
    Min(&'k str, Option<f64>),
    Max(&'k str, Option<f64>),
}

impl<'k> Accumulator<'k> {
    fn new(kind: &'k QueryKind) -> Self {
        match kind {
            QueryKind::All => Accumulator::Rows(Vec::new()),
            QueryKind::One => Accumulator::Row(None),
            QueryKind::Count => Accumulator::Count(0),
            QueryKind::Column(c) => Accumulator::Column(c, Vec::new()),
            QueryKind::Sum(c) => Accumulator::Sum(c, 0.0),
            QueryKind::Average(c) => Accumulator::Average(c, 0.0, 0),
            QueryKind::Min(c) => Accumulator::Min(c, None),
            QueryKind::Max(c) => Accumulator::Max(c, None),
        }
    }

    fn is_done(&self) -> bool {
        matches!(self, Accumulator::Row(Some(_)))
    }

    fn push(&mut self, row: Row) {
        let number = |row: &Row, column: &str| row.get(column).and_then(|v| to_number(v));
        match self {
            Accumulator::Rows(rows) => rows.push(row),
            Accumulator::Row(slot) => {
                if slot.is_none() {
                    *slot = Some(row);
                }
            }
            Accumulator::Count(n) => *n += 1,
            Accumulator::Column(column, values) => values.push(row.get(*column).cloned()),
            Accumulator::Sum(column, sum) => *sum += number(&row, *column).unwrap_or(0.0),
            Accumulator::Average(column, sum, n) => {
                if let Some(x) = number(&row, *column) {
                    *sum += x;
                    *n += 1;
                }
            }
            Accumulator::Min(column, best) => {
                if let Some(x) = number(&row, *column) {
                    if best.is_none_or(|b| x.partial_cmp(&b) == Some(Ordering::Less)) {
                        *best = Some(x);
                    }
                }
            }
            Accumulator::Max(column, best) => {
                if let Some(x) = number(&row, *column) {
                    if best.is_none_or(|b| x.partial_cmp(&b) == Some(Ordering::Greater)) {
                        *best = Some(x);
                    }
                }
            }
        }
    }

    fn finish(self) -> RedluaResult<Output> {
        Ok(match self {
            Accumulator::Rows(rows) => Output::Rows(rows),
            Accumulator::Row(row) => Output::Row(row),
            Accumulator::Count(n) => Output::Count(n),
            Accumulator::Column(_, values) => Output::Column(values),
            Accumulator::Sum(_, sum) => Output::Number(sum),
            Accumulator::Average(_, _, 0) => return Err(RedluaError::EmptyAggregate),
            Accumulator::Average(_, sum, n) => Output::Number(sum / n as f64),
            Accumulator::Min(_, v) | Accumulator::Max(_, v) => Output::Extremum(v),
        })
    }
}
