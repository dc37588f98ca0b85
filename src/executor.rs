//! The one capability the query layer needs from its environment:
//! execute a command, get a reply.

use std::future::Future;

use crate::error::RedluaResult;
use crate::script::ScanProgram;
use crate::value::Value;

/// Commands issued by the query layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Read one row's hash.
    HGetAll { key: String },
    /// Length of a table's primary-key list.
    LLen { key: String },
    /// Run a scan program atomically (`EVAL <source> 0`).
    Eval { program: ScanProgram },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::HGetAll { .. } => "HGETALL",
            Command::LLen { .. } => "LLEN",
            Command::Eval { .. } => "EVAL",
        }
    }

    /// Arguments after the command name, as sent on the wire.
    pub fn args(&self) -> Vec<Vec<u8>> {
        match self {
            Command::HGetAll { key } | Command::LLen { key } => vec![key.clone().into_bytes()],
            Command::Eval { program } => vec![program.source().into_bytes(), b"0".to_vec()],
        }
    }
}

/// Something that can run [`Command`]s: a live connection, or the
/// in-memory store used in tests.
///
/// Implementations own retries and deadlines; the query layer issues each
/// command once and propagates failures.
pub trait Executor {
    fn execute(&mut self, command: Command) -> impl Future<Output = RedluaResult<Value>> + Send;

    /// Whether keys must carry hash tags to stay in one cluster slot.
    fn is_cluster(&self) -> bool {
        false
    }
}
