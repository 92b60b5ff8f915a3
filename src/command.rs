//! Typed command descriptors exchanged with an execution engine.
//!
//! Every record operation becomes exactly one [`Command`]. The `Display`
//! rendering is the compact command string (`[2]users:mod/ignore WHERE ...`)
//! used in logs and by engines that speak that form.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::EngineError;
use crate::value::{Params, Row, Value, ValueMap};

/// Appended to every query fragment so an operation touches at most one row.
pub const ROW_LIMITER: &str = " LIMIT 1";

/// Column name carried by the existence check reply.
pub const EXISTS_ALIAS: &str = "is_record";

/// Selects which backing connection an engine should use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    pub const DEFAULT: ConnectionId = ConnectionId(1);

    pub fn is_default(&self) -> bool {
        *self == Self::DEFAULT
    }

    /// Empty for the default connection, `[id]` otherwise.
    pub fn qualifier(&self) -> String {
        if self.is_default() {
            String::new()
        } else {
            format!("[{}]", self.0)
        }
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl From<u32> for ConnectionId {
    fn from(id: u32) -> Self {
        ConnectionId(id)
    }
}

/// Normalize a raw query fragment into its single-row form.
///
/// Trailing whitespace and statement terminators are stripped and
/// [`ROW_LIMITER`] appended. A non-empty fragment also gets a leading space so
/// it can be concatenated directly after a table name.
pub(crate) fn normalize_fragment(raw: &str) -> String {
    let body = raw.trim_end().trim_end_matches(';').trim_end();
    let mut fragment = String::with_capacity(body.len() + ROW_LIMITER.len() + 1);
    if !body.is_empty() && !body.starts_with(char::is_whitespace) {
        fragment.push(' ');
    }
    fragment.push_str(body);
    fragment.push_str(ROW_LIMITER);
    fragment
}

/// The row a command is aimed at
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowTarget {
    pub connection: ConnectionId,
    pub table: String,
    /// Normalized fragment, always ending in [`ROW_LIMITER`]
    pub fragment: String,
    pub params: Params,
}

/// Insert or update payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteOperation {
    pub target: RowTarget,
    pub values: ValueMap,
    pub ignore_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteOperation {
    pub target: RowTarget,
    pub ignore_errors: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectOperation {
    pub target: RowTarget,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    Insert(WriteOperation),
    Update(WriteOperation),
    Delete(DeleteOperation),
    Select(SelectOperation),
    Exists(RowTarget),
    LastInsertId(ConnectionId),
}

impl Command {
    pub fn connection(&self) -> ConnectionId {
        match self {
            Command::Insert(op) | Command::Update(op) => op.target.connection,
            Command::Delete(op) => op.target.connection,
            Command::Select(op) => op.target.connection,
            Command::Exists(target) => target.connection,
            Command::LastInsertId(connection) => *connection,
        }
    }

    pub fn ignore_errors(&self) -> bool {
        match self {
            Command::Insert(op) | Command::Update(op) => op.ignore_errors,
            Command::Delete(op) => op.ignore_errors,
            _ => false,
        }
    }

    /// SQL text of the read commands, `None` for writes.
    pub fn select_sql(&self) -> Option<String> {
        match self {
            Command::Select(op) => Some(format!(
                "SELECT {} FROM {}{}",
                op.columns.join(","),
                op.target.table,
                op.target.fragment
            )),
            Command::Exists(target) => Some(format!(
                "SELECT EXISTS(SELECT 1 FROM {}{}) AS {}",
                target.table, target.fragment, EXISTS_ALIAS
            )),
            _ => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let conn = self.connection().qualifier();
        let ignore = if self.ignore_errors() { "/ignore" } else { "" };
        match self {
            Command::Insert(op) => write!(
                f,
                "{}{}:add{}{}",
                conn, op.target.table, ignore, op.target.fragment
            ),
            Command::Update(op) => write!(
                f,
                "{}{}:mod{}{}",
                conn, op.target.table, ignore, op.target.fragment
            ),
            Command::Delete(op) => write!(
                f,
                "{}{}:del{}{}",
                conn, op.target.table, ignore, op.target.fragment
            ),
            Command::Select(_) | Command::Exists(_) => {
                let sql = self.select_sql().unwrap_or_default();
                write!(f, "{}:query {}", conn, sql)
            }
            Command::LastInsertId(_) => write!(f, "{}:id", conn),
        }
    }
}

/// Engine reply to a single command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Affected(u64),
    /// Insert outcome with the id generated by that same insert
    Inserted { affected: u64, last_insert_id: Value },
    Scalar(Value),
    Rows(Vec<Row>),
}

impl Reply {
    pub fn into_affected(self, command: &Command) -> Result<u64, EngineError> {
        match self {
            Reply::Affected(n) | Reply::Inserted { affected: n, .. } => Ok(n),
            _ => Err(unexpected(command, "an affected-row count")),
        }
    }

    pub fn into_scalar(self, command: &Command) -> Result<Value, EngineError> {
        match self {
            Reply::Scalar(v) => Ok(v),
            _ => Err(unexpected(command, "a scalar")),
        }
    }

    pub fn into_rows(self, command: &Command) -> Result<Vec<Row>, EngineError> {
        match self {
            Reply::Rows(rows) => Ok(rows),
            _ => Err(unexpected(command, "a row set")),
        }
    }
}

fn unexpected(command: &Command, expected: &'static str) -> EngineError {
    EngineError::UnexpectedReply {
        command: command.to_string(),
        expected,
    }
}
