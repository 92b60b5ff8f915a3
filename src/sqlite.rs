//! SQLite execution engine.
//!
//! Turns record commands into SQLite statements over one or more numbered
//! connections. `UPDATE`/`DELETE` are scoped through a `rowid IN (SELECT ...)`
//! subquery because the stock SQLite build rejects `LIMIT` on those
//! statements, so tables must have a rowid.
//!
//! Inserts reply with [`Reply::Inserted`], reading the generated rowid while
//! the connection is still locked, so concurrent writers sharing one engine
//! never see each other's ids.

use async_trait::async_trait;
use futures::lock::Mutex;
use log::{debug, info, warn};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::{Connection, ErrorCode, Statement, ToSql};
use std::collections::HashMap;

use crate::command::{Command, ConnectionId, Reply, RowTarget, WriteOperation};
use crate::engine::Engine;
use crate::error::EngineError;
use crate::value::{Row, Value, ValueMap};

/// Path that opens an in-memory database instead of a file.
pub const IN_MEMORY: &str = ":memory:";

const SET_PREFIX: &str = "__set_";

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(r) => ToSqlOutput::from(*r),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b.as_slice())),
            Value::Boolean(b) => ToSqlOutput::from(i64::from(*b)),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(r) => Value::Real(r),
            ValueRef::Text(t) => {
                let s = std::str::from_utf8(t).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                Value::Text(s.to_string())
            }
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

/// SQLite engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct SqliteConfig {
    /// Path of the database behind [`ConnectionId::DEFAULT`]
    pub db_path: String,
    /// Additional numbered connections
    pub connections: Vec<(ConnectionId, String)>,
}

impl SqliteConfig {
    /// Create a config for the default connection
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            connections: Vec::new(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(IN_MEMORY)
    }

    /// Register another connection reachable through `id`
    pub fn with_connection(
        mut self,
        id: impl Into<ConnectionId>,
        db_path: impl Into<String>,
    ) -> Self {
        self.connections.push((id.into(), db_path.into()));
        self
    }
}

pub struct SqliteEngine {
    connections: HashMap<ConnectionId, Mutex<Connection>>,
}

impl SqliteEngine {
    /// Open every connection named in `config`.
    pub fn open(config: SqliteConfig) -> Result<Self, EngineError> {
        let mut connections = HashMap::new();
        let all =
            std::iter::once((ConnectionId::DEFAULT, config.db_path)).chain(config.connections);
        for (id, path) in all {
            info!("opening sqlite connection {} at path: {}", id.0, path);
            let conn = if path == IN_MEMORY {
                Connection::open_in_memory()?
            } else {
                Connection::open(&path)?
            };
            connections.insert(id, Mutex::new(conn));
        }
        Ok(Self { connections })
    }

    /// Run raw SQL (schema setup, fixtures) on one connection.
    pub async fn execute_batch(
        &self,
        connection: ConnectionId,
        sql: &str,
    ) -> Result<(), EngineError> {
        let conn = self.connection(connection)?.lock().await;
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn connection(&self, id: ConnectionId) -> Result<&Mutex<Connection>, EngineError> {
        self.connections
            .get(&id)
            .ok_or(EngineError::UnknownConnection(id.0))
    }
}

#[async_trait]
impl Engine for SqliteEngine {
    async fn execute(&self, command: Command) -> Result<Reply, EngineError> {
        let conn = self.connection(command.connection())?.lock().await;
        match run(&conn, &command) {
            Ok(reply) => Ok(reply),
            Err(e) if command.ignore_errors() && is_constraint_violation(&e) => {
                warn!("ignoring constraint violation for {}: {}", command, e);
                Ok(Reply::Affected(0))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn run(conn: &Connection, command: &Command) -> rusqlite::Result<Reply> {
    match command {
        Command::Insert(op) => insert(conn, op),
        Command::Update(op) => update(conn, op),
        Command::Delete(op) => {
            let sql = format!(
                "DELETE FROM {} WHERE rowid IN ({})",
                op.target.table,
                rowid_subquery(&op.target)
            );
            let mut stmt = conn.prepare(&sql)?;
            let bound = bindings(&stmt, op.target.params.iter())?;
            Ok(Reply::Affected(stmt.execute(&as_params(&bound)[..])? as u64))
        }
        Command::Select(op) => select(conn, command, &op.target),
        Command::Exists(target) => select(conn, command, target),
        Command::LastInsertId(_) => Ok(Reply::Scalar(Value::Integer(conn.last_insert_rowid()))),
    }
}

fn insert(conn: &Connection, op: &WriteOperation) -> rusqlite::Result<Reply> {
    let verb = if op.ignore_errors { "INSERT OR IGNORE" } else { "INSERT" };
    let sql = if op.values.is_empty() {
        format!("{} INTO {} DEFAULT VALUES", verb, op.target.table)
    } else {
        let names: Vec<&str> = op.values.names().collect();
        let placeholders: Vec<String> = names.iter().map(|n| format!(":{n}")).collect();
        format!(
            "{} INTO {} ({}) VALUES ({})",
            verb,
            op.target.table,
            names.join(","),
            placeholders.join(",")
        )
    };
    let mut stmt = conn.prepare(&sql)?;
    let bound = bindings(&stmt, op.values.iter())?;
    let affected = stmt.execute(&as_params(&bound)[..])? as u64;
    Ok(Reply::Inserted {
        affected,
        last_insert_id: Value::Integer(conn.last_insert_rowid()),
    })
}

fn update(conn: &Connection, op: &WriteOperation) -> rusqlite::Result<Reply> {
    if op.values.is_empty() {
        debug!("nothing to update in {}", op.target.table);
        return Ok(Reply::Affected(0));
    }
    let verb = if op.ignore_errors { "UPDATE OR IGNORE" } else { "UPDATE" };
    let assignments: Vec<String> = op
        .values
        .names()
        .map(|n| format!("{n} = :{SET_PREFIX}{n}"))
        .collect();
    let sql = format!(
        "{} {} SET {} WHERE rowid IN ({})",
        verb,
        op.target.table,
        assignments.join(", "),
        rowid_subquery(&op.target)
    );
    let mut stmt = conn.prepare(&sql)?;

    let set_values: ValueMap = op
        .values
        .iter()
        .map(|(n, v)| (format!("{SET_PREFIX}{n}"), v.clone()))
        .collect();
    let bound = bindings(&stmt, set_values.iter().chain(op.target.params.iter()))?;
    Ok(Reply::Affected(stmt.execute(&as_params(&bound)[..])? as u64))
}

fn select(conn: &Connection, command: &Command, target: &RowTarget) -> rusqlite::Result<Reply> {
    let sql = command.select_sql().unwrap_or_default();
    let mut stmt = conn.prepare(&sql)?;
    let bound = bindings(&stmt, target.params.iter())?;
    Ok(Reply::Rows(query_rows(&mut stmt, &as_params(&bound))?))
}

fn rowid_subquery(target: &RowTarget) -> String {
    format!("SELECT rowid FROM {}{}", target.table, target.fragment)
}

/// Named parameters the statement actually uses, with their values.
fn bindings<'a>(
    stmt: &Statement<'_>,
    values: impl Iterator<Item = (&'a str, &'a Value)>,
) -> rusqlite::Result<Vec<(String, &'a Value)>> {
    let mut bound = Vec::new();
    for (name, value) in values {
        let name = if name.starts_with([':', '@', '$']) {
            name.to_string()
        } else {
            format!(":{name}")
        };
        if stmt.parameter_index(&name)?.is_some() && !bound.iter().any(|(n, _)| *n == name) {
            bound.push((name, value));
        }
    }
    Ok(bound)
}

fn as_params<'a>(bound: &'a [(String, &'a Value)]) -> Vec<(&'a str, &'a dyn ToSql)> {
    bound
        .iter()
        .map(|(n, v)| (n.as_str(), *v as &dyn ToSql))
        .collect()
}

fn query_rows(
    stmt: &mut Statement<'_>,
    params: &[(&str, &dyn ToSql)],
) -> rusqlite::Result<Vec<Row>> {
    let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let mut rows = stmt.query(params)?;
    let mut result = Vec::new();
    while let Some(row) = rows.next()? {
        let mut map = Row::new();
        for (i, name) in names.iter().enumerate() {
            map.insert(name, row.get::<_, Value>(i)?);
        }
        result.push(map);
    }
    Ok(result)
}
