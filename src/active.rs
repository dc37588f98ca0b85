//! The query facade used by the model layer.
//!
//! Every operation dispatches the same way: an emulated query answers
//! with an empty result and no I/O; a filter that pins the primary key is
//! served by direct row reads; anything else compiles to a scan program
//! run in one `EVAL`.
//!
//! # Example
//!
//! ```
//! use redlua::prelude::*;
//!
//! # tokio_test_block(async {
//! let customers = Table::new("customer");
//! let mut store = MemoryStore::new();
//! store.insert(&customers, [("name", Literal::from("ann")), ("status", 2.into())])?;
//!
//! let rows = ActiveQuery::new(customers)
//!     .filter(Filter::eq("status", 2))
//!     .all(&mut store)
//!     .await?;
//! assert_eq!(rows[0]["name"], "ann");
//! # Ok::<(), RedluaError>(())
//! # });
//! # fn tokio_test_block<F: std::future::Future<Output = Result<(), RedluaError>>>(f: F) {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f).unwrap();
//! # }
//! ```

use std::collections::BTreeMap;

use serde_json::Value as Json;
use tracing::debug;

use crate::error::{RedluaError, RedluaResult};
use crate::executor::{Command, Executor};
use crate::filter::Filter;
use crate::planner;
use crate::query::{Direction, Query};
use crate::reply::{Output, Row, decode_output};
use crate::script::{QueryKind, ScriptBuilder};
use crate::table::Table;

/// A query against one table, built up fluently and run against any
/// [`Executor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveQuery {
    table: Table,
    query: Query,
    emulate: bool,
}

impl ActiveQuery {
    pub fn new(table: Table) -> Self {
        Self {
            table,
            query: Query::new(),
            emulate: false,
        }
    }

    /// Set the filter. A second call replaces the first.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Set the filter from its JSON form (see [`Filter::from_json`]).
    pub fn filter_json(self, condition: &Json) -> RedluaResult<Self> {
        Ok(self.filter(Filter::from_json(condition)?))
    }

    pub fn order_by(mut self, column: impl Into<String>, direction: Direction) -> Self {
        self.query = self.query.order_by(column, direction);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.query = self.query.offset(offset);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query = self.query.limit(limit);
        self
    }

    /// When set, every operation returns an empty result without issuing
    /// a command.
    pub fn emulate_execution(mut self, emulate: bool) -> Self {
        self.emulate = emulate;
        self
    }

    pub fn table(&self) -> &Table {
        &self.table
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn is_emulated(&self) -> bool {
        self.emulate
    }

    /// All matching rows.
    pub async fn all<E: Executor>(&self, executor: &mut E) -> RedluaResult<Vec<Row>> {
        if self.emulated("all") {
            return Ok(Vec::new());
        }
        match self.run(executor, QueryKind::All).await? {
            Output::Rows(rows) => Ok(rows),
            other => Err(mismatch("all", other)),
        }
    }

    /// All matching rows keyed by the value of `column`. Rows without the
    /// column are skipped; on duplicates the later row wins.
    pub async fn all_indexed<E: Executor>(&self, executor: &mut E, column: &str) -> RedluaResult<BTreeMap<String, Row>> {
        let rows = self.all(executor).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| Some((row.get(column)?.clone(), row)))
            .collect())
    }

    /// The first matching row.
    pub async fn one<E: Executor>(&self, executor: &mut E) -> RedluaResult<Option<Row>> {
        if self.emulated("one") {
            return Ok(None);
        }
        match self.run(executor, QueryKind::One).await? {
            Output::Row(row) => Ok(row),
            other => Err(mismatch("one", other)),
        }
    }

    /// Number of matching rows. Without a filter this is the length of the
    /// table's key list, read in one command.
    pub async fn count<E: Executor>(&self, executor: &mut E) -> RedluaResult<u64> {
        if self.emulated("count") {
            return Ok(0);
        }
        if self.query.filter.is_none() {
            let prefix = self.table.key_prefix(executor.is_cluster());
            debug!("count {}: list length", self.table.prefix());
            let reply = executor
                .execute(Command::LLen {
                    key: prefix.list_key().to_string(),
                })
                .await?;
            let n = reply
                .as_int()
                .ok_or_else(|| RedluaError::Protocol(format!("unexpected reply for LLEN: {:?}", reply)))?;
            return Ok(u64::try_from(n).unwrap_or(0));
        }
        match self.run(executor, QueryKind::Count).await? {
            Output::Count(n) => Ok(n),
            other => Err(mismatch("count", other)),
        }
    }

    /// Whether any row matches.
    pub async fn exists<E: Executor>(&self, executor: &mut E) -> RedluaResult<bool> {
        Ok(self.one(executor).await?.is_some())
    }

    /// `column` of the first matching row.
    pub async fn scalar<E: Executor>(&self, executor: &mut E, column: &str) -> RedluaResult<Option<String>> {
        Ok(self.one(executor).await?.and_then(|mut row| row.remove(column)))
    }

    /// `column` of every matching row; `None` where a row lacks it.
    pub async fn column<E: Executor>(&self, executor: &mut E, column: &str) -> RedluaResult<Vec<Option<String>>> {
        if self.emulated("column") {
            return Ok(Vec::new());
        }
        match self.run(executor, QueryKind::Column(column.to_string())).await? {
            Output::Column(values) => Ok(values),
            other => Err(mismatch("column", other)),
        }
    }

    /// Sum of the numeric values of `column`.
    pub async fn sum<E: Executor>(&self, executor: &mut E, column: &str) -> RedluaResult<f64> {
        if self.emulated("sum") {
            return Ok(0.0);
        }
        self.number(executor, QueryKind::Sum(column.to_string())).await
    }

    /// Mean of the numeric values of `column`; [`RedluaError::EmptyAggregate`]
    /// when there are none.
    pub async fn average<E: Executor>(&self, executor: &mut E, column: &str) -> RedluaResult<f64> {
        if self.emulated("average") {
            return Ok(0.0);
        }
        self.number(executor, QueryKind::Average(column.to_string())).await
    }

    pub async fn min<E: Executor>(&self, executor: &mut E, column: &str) -> RedluaResult<Option<f64>> {
        if self.emulated("min") {
            return Ok(None);
        }
        self.extremum(executor, QueryKind::Min(column.to_string())).await
    }

    pub async fn max<E: Executor>(&self, executor: &mut E, column: &str) -> RedluaResult<Option<f64>> {
        if self.emulated("max") {
            return Ok(None);
        }
        self.extremum(executor, QueryKind::Max(column.to_string())).await
    }

    async fn number<E: Executor>(&self, executor: &mut E, kind: QueryKind) -> RedluaResult<f64> {
        let name = kind.name();
        match self.run(executor, kind).await? {
            Output::Number(n) => Ok(n),
            other => Err(mismatch(name, other)),
        }
    }

    async fn extremum<E: Executor>(&self, executor: &mut E, kind: QueryKind) -> RedluaResult<Option<f64>> {
        let name = kind.name();
        match self.run(executor, kind).await? {
            Output::Extremum(v) => Ok(v),
            other => Err(mismatch(name, other)),
        }
    }

    fn emulated(&self, operation: &str) -> bool {
        if self.emulate {
            debug!("{} {}: emulated, no command issued", operation, self.table.prefix());
        }
        self.emulate
    }

    /// Fast path when the filter pins the primary key, scan program
    /// otherwise.
    async fn run<E: Executor>(&self, executor: &mut E, kind: QueryKind) -> RedluaResult<Output> {
        let prefix = self.table.key_prefix(executor.is_cluster());

        if let Some(filter) = &self.query.filter {
            if let Some(keys) = planner::candidates(filter, &self.table)? {
                debug!(
                    "{} {}: primary-key fast path over {} key(s)",
                    kind.name(),
                    self.table.prefix(),
                    keys.len()
                );
                return planner::run(executor, &prefix, &self.query, &kind, &keys).await;
            }
        }

        let program = ScriptBuilder::new(prefix).build(&self.query, kind.clone())?;
        debug!("{} {}: scan program", kind.name(), self.table.prefix());
        let reply = executor.execute(Command::Eval { program }).await?;
        decode_output(&kind, reply)
    }
}

fn mismatch(operation: &str, output: Output) -> RedluaError {
    RedluaError::Protocol(format!("{} produced {:?}", operation, output))
}
