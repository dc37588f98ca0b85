//! # redlua
//!
//! Relational-style queries over Redis hashes.
//!
//! Each table is a list of encoded primary keys plus one hash per row.
//! Queries are compiled into a single Lua scan that runs atomically on the
//! server, except when the filter names rows by primary key: those are
//! read directly.
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use redlua::prelude::*;
//!
//! let config = Config::load_default()?;
//! let mut conn = Connection::connect(&config.connection).await?;
//!
//! let adults = ActiveQuery::new(Table::new("customer"))
//!     .filter(Filter::and([Filter::eq("status", 2), Filter::gte("age", 18)]))
//!     .order_by("age", Direction::Desc)
//!     .limit(10)
//!     .all(&mut conn)
//!     .await?;
//! ```
//!
//! ## Layers
//!
//! | Module | Role |
//! |--------|------|
//! | [`filter`] | Filter tree and its JSON form |
//! | [`compiler`] | Filter → boolean Lua expression |
//! | [`script`] | Expression → complete scan program |
//! | [`planner`] | Primary-key fast path |
//! | [`reply`] | Wire replies → rows and typed results |
//! | [`active`] | The query facade |
//! | [`resp`] | RESP connection |
//! | [`memory`] | In-memory store for tests |

pub mod active;
pub mod compiler;
pub mod config;
pub mod error;
pub mod executor;
pub mod filter;
pub mod key;
pub mod memory;
pub mod planner;
pub mod query;
pub mod reply;
pub mod resp;
pub mod script;
pub mod table;
pub mod value;

pub mod prelude {
    pub use crate::active::ActiveQuery;
    pub use crate::config::{Config, ConnectionConfig};
    pub use crate::error::*;
    pub use crate::executor::{Command, Executor};
    pub use crate::filter::{CompareOp, Filter, HashValue, InItem, Literal};
    pub use crate::key::{KeyPrefix, PkValue, build_key};
    pub use crate::memory::MemoryStore;
    pub use crate::query::{Direction, Query};
    pub use crate::reply::Row;
    pub use crate::resp::Connection;
    pub use crate::script::{QueryKind, ScriptBuilder};
    pub use crate::table::Table;
    pub use crate::value::Value;
}
