//! Script assembler: wraps a compiled condition into a complete Lua scan.
//!
//! Every program has the same skeleton. It collects the candidate primary
//! keys (the table list, or a server-side `SORT` of it), loads the
//! referenced fields of each candidate into their aliases, evaluates the
//! condition, counts matches, and feeds the ones inside the pagination
//! window to a per-kind accumulator. The whole scan runs as one `EVAL`, so
//! it sees an atomic snapshot of the table.

use std::fmt;

use crate::compiler::{ColumnAliases, Expr, compile, quote_str};
use crate::error::RedluaResult;
use crate::key::KeyPrefix;
use crate::query::{OrderBy, Query, Window};

/// What a query produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryKind {
    /// Every matching row.
    All,
    /// The first matching row.
    One,
    /// Number of matching rows.
    Count,
    /// One field of every matching row.
    Column(String),
    Sum(String),
    Average(String),
    Min(String),
    Max(String),
}

impl QueryKind {
    pub fn name(&self) -> &'static str {
        match self {
            QueryKind::All => "all",
            QueryKind::One => "one",
            QueryKind::Count => "count",
            QueryKind::Column(_) => "column",
            QueryKind::Sum(_) => "sum",
            QueryKind::Average(_) => "average",
            QueryKind::Min(_) => "min",
            QueryKind::Max(_) => "max",
        }
    }

    /// The target field of column and aggregate queries.
    pub fn column(&self) -> Option<&str> {
        match self {
            QueryKind::All | QueryKind::One | QueryKind::Count => None,
            QueryKind::Column(c)
            | QueryKind::Sum(c)
            | QueryKind::Average(c)
            | QueryKind::Min(c)
            | QueryKind::Max(c) => Some(c),
        }
    }
}

/// A complete scan program. `Display` renders the Lua source handed to
/// `EVAL`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanProgram {
    pub prefix: KeyPrefix,
    pub kind: QueryKind,
    /// Never [`Expr::Empty`]: an unconditioned scan uses `Const(true)`.
    pub condition: Expr,
    pub columns: ColumnAliases,
    pub order: Option<OrderBy>,
    pub window: Window,
}

impl ScanProgram {
    pub fn source(&self) -> String {
        self.to_string()
    }

    fn write_candidates(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(order) = &self.order else {
            return writeln!(f, "local allpks=redis.call('LRANGE',key,0,-1)");
        };
        // Numeric sort first; SORT fails on non-numeric weights, so retry
        // lexicographically.
        let sort = format!(
            "'SORT',key,'BY',key .. ':a:*->' .. {},'{}'",
            quote_str(&order.column),
            order.direction.as_str()
        );
        writeln!(f, "local allpks=redis.pcall({})", sort)?;
        writeln!(f, "if allpks['err'] then")?;
        writeln!(f, "    allpks=redis.call({},'ALPHA')", sort)?;
        writeln!(f, "end")
    }

    fn write_window(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "i>{}", self.window.offset)?;
        if let Some(end) = self.window.end() {
            write!(f, " and i<={}", end)?;
        }
        Ok(())
    }

    fn accumulate(&self) -> String {
        let field = |column: &str| format!("redis.call('HGET',key .. ':a:' .. pk,{})", quote_str(column));
        match &self.kind {
            QueryKind::All => "n=n+1 pks[n]=redis.call('HGETALL',key .. ':a:' .. pk)".to_string(),
            QueryKind::One if self.order.is_none() => {
                "do return redis.call('HGETALL',key .. ':a:' .. pk) end".to_string()
            }
            QueryKind::One => "if n==0 then n=1 pks=redis.call('HGETALL',key .. ':a:' .. pk) end".to_string(),
            QueryKind::Count => "n=n+1".to_string(),
            QueryKind::Column(c) => format!("n=n+1 pks[n]={}", field(c)),
            QueryKind::Sum(c) => format!("n=n+(tonumber({}) or 0)", field(c)),
            QueryKind::Average(c) => format!(
                "local x=tonumber({}) if x~=nil then n=n+1 v=(v or 0)+x end",
                field(c)
            ),
            QueryKind::Min(c) => format!(
                "local x=tonumber({}) if x~=nil and (v==nil or x<v) then v=x end",
                field(c)
            ),
            QueryKind::Max(c) => format!(
                "local x=tonumber({}) if x~=nil and (v==nil or x>v) then v=x end",
                field(c)
            ),
        }
    }

    fn write_return(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            QueryKind::All | QueryKind::One | QueryKind::Column(_) => writeln!(f, "return pks"),
            QueryKind::Count => writeln!(f, "return n"),
            // Lua numbers come back as truncated integers, strings keep
            // fractions. `tostring` keeps only 14 digits.
            QueryKind::Sum(_) => writeln!(f, "return {}", exact("n")),
            QueryKind::Average(_) => {
                writeln!(f, "if n==0 then return false end")?;
                writeln!(f, "return {}", exact("v/n"))
            }
            QueryKind::Min(_) | QueryKind::Max(_) => {
                writeln!(f, "if v==nil then return false end")?;
                writeln!(f, "return {}", exact("v"))
            }
        }
    }
}

/// A Lua number rendered with enough digits to round-trip a double.
fn exact(expr: &str) -> String {
    format!("string.format('%.17g',{})", expr)
}

impl fmt::Display for ScanProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "local key={}", quote_str(self.prefix.as_str()))?;
        self.write_candidates(f)?;
        writeln!(f, "local pks={{}}")?;
        writeln!(f, "local n=0")?;
        writeln!(f, "local v=nil")?;
        writeln!(f, "local i=0")?;
        writeln!(f, "for _,pk in ipairs(allpks) do")?;
        for (column, alias) in self.columns.iter() {
            writeln!(
                f,
                "    local {}=redis.call('HGET',key .. ':a:' .. pk,{})",
                alias,
                quote_str(column)
            )?;
        }
        writeln!(f, "    if {} then", self.condition)?;
        writeln!(f, "        i=i+1")?;
        write!(f, "        if ")?;
        self.write_window(f)?;
        writeln!(f, " then")?;
        writeln!(f, "            {}", self.accumulate())?;
        writeln!(f, "        end")?;
        writeln!(f, "    end")?;
        writeln!(f, "end")?;
        self.write_return(f)
    }
}

/// Builds scan programs for one table prefix.
#[derive(Debug, Clone)]
pub struct ScriptBuilder {
    prefix: KeyPrefix,
}

impl ScriptBuilder {
    pub fn new(prefix: KeyPrefix) -> Self {
        Self { prefix }
    }

    /// Compile `query` into a program of the given kind.
    pub fn build(&self, query: &Query, kind: QueryKind) -> RedluaResult<ScanProgram> {
        let order = query.single_order()?.cloned();
        let mut columns = ColumnAliases::new();
        let condition = match &query.filter {
            Some(filter) => compile(filter, &mut columns)?,
            None => Expr::Empty,
        };
        let condition = if condition.is_empty() { Expr::Const(true) } else { condition };

        Ok(ScanProgram {
            prefix: self.prefix.clone(),
            kind,
            condition,
            columns,
            order,
            window: query.window(),
        })
    }

    pub fn build_all(&self, query: &Query) -> RedluaResult<ScanProgram> {
        self.build(query, QueryKind::All)
    }

    pub fn build_one(&self, query: &Query) -> RedluaResult<ScanProgram> {
        self.build(query, QueryKind::One)
    }

    pub fn build_count(&self, query: &Query) -> RedluaResult<ScanProgram> {
        self.build(query, QueryKind::Count)
    }

    pub fn build_column(&self, query: &Query, column: &str) -> RedluaResult<ScanProgram> {
        self.build(query, QueryKind::Column(column.to_string()))
    }

    pub fn build_sum(&self, query: &Query, column: &str) -> RedluaResult<ScanProgram> {
        self.build(query, QueryKind::Sum(column.to_string()))
    }

    pub fn build_average(&self, query: &Query, column: &str) -> RedluaResult<ScanProgram> {
        self.build(query, QueryKind::Average(column.to_string()))
    }

    pub fn build_min(&self, query: &Query, column: &str) -> RedluaResult<ScanProgram> {
        self.build(query, QueryKind::Min(column.to_string()))
    }

    pub fn build_max(&self, query: &Query, column: &str) -> RedluaResult<ScanProgram> {
        self.build(query, QueryKind::Max(column.to_string()))
    }
}
