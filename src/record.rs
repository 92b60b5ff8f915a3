//! Single-row Active-Record handle.

use log::debug;

use crate::command::{
    normalize_fragment, Command, ConnectionId, DeleteOperation, Reply, RowTarget,
    SelectOperation, WriteOperation, EXISTS_ALIAS,
};
use crate::engine::Engine;
use crate::error::{RecordError, Result};
use crate::value::{Params, Value, ValueMap};

/// One row of a table, bound to the query that identifies it.
///
/// The column set is fixed at construction. Every operation that needs an
/// identified row checks the key column first and fails with
/// [`RecordError::MissingKey`] before anything reaches the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    columns: ValueMap,
    table: String,
    key: String,
    connection: ConnectionId,
    query_params: Params,
    query_sql: String,
    loaded: bool,
}

impl Record {
    /// Create a record bound to `query_sql` and `query_params`.
    ///
    /// All columns start as [`Value::Null`]; `key` is added to the column set
    /// when `columns` does not already name it.
    pub fn new<S: AsRef<str>>(
        columns: &[S],
        table: impl Into<String>,
        key: impl Into<String>,
        connection: impl Into<ConnectionId>,
        query_params: Params,
        query_sql: &str,
    ) -> Self {
        let key = key.into();
        let mut data: ValueMap = columns
            .iter()
            .map(|c| (c.as_ref().to_string(), Value::Null))
            .collect();
        data.insert(&key, Value::Null);

        Self {
            columns: data,
            table: table.into(),
            key,
            connection: connection.into(),
            query_params,
            query_sql: normalize_fragment(query_sql),
            loaded: false,
        }
    }

    /// Create a record located by its key column alone (`WHERE key = :key`).
    pub fn for_key<S: AsRef<str>>(
        columns: &[S],
        table: impl Into<String>,
        key: impl Into<String>,
        connection: impl Into<ConnectionId>,
    ) -> Self {
        let key = key.into();
        let sql = format!("WHERE {key} = :{key}");
        Self::new(columns, table, key, connection, Params::new(), &sql)
    }

    pub fn get_column(&self, name: &str) -> Result<&Value> {
        self.columns
            .get(name)
            .ok_or_else(|| RecordError::UnknownColumn {
                table: self.table.clone(),
                column: name.to_string(),
            })
    }

    /// Store `value` in column `name`.
    ///
    /// Returns false, storing nothing, when `name` is not a column. Writing
    /// the key column also re-binds the key query parameter.
    pub fn set_column(&mut self, name: &str, value: impl Into<Value>) -> bool {
        let value = value.into();
        if name == self.key {
            self.bind_key(value);
            return true;
        }
        match self.columns.get_mut(name) {
            Some(slot) => {
                *slot = value;
                self.loaded = false;
                true
            }
            None => false,
        }
    }

    /// Assign the key column and keep its query binding first and unique.
    fn bind_key(&mut self, value: Value) {
        self.query_params.insert_first(&self.key, value.clone());
        self.columns.insert(&self.key, value);
        self.loaded = false;
    }

    fn validate_key(&self) -> Result<()> {
        match self.columns.get(&self.key) {
            Some(v) if !v.is_null() => Ok(()),
            _ => Err(RecordError::MissingKey {
                table: self.table.clone(),
                key: self.key.clone(),
            }),
        }
    }

    fn target(&self) -> RowTarget {
        RowTarget {
            connection: self.connection,
            table: self.table.clone(),
            fragment: self.query_sql.clone(),
            params: self.query_params.clone(),
        }
    }

    /// Insert the record. On success the key is replaced by the generated id.
    ///
    /// The key must still be set beforehand, even for tables whose key the
    /// database generates. Engines that report the id with the insert reply
    /// spare the follow-up `LastInsertId` command.
    pub async fn add<E: Engine + ?Sized>(
        &mut self,
        engine: &E,
        ignore_errors: bool,
    ) -> Result<bool> {
        self.validate_key()?;

        let command = Command::Insert(WriteOperation {
            target: self.target(),
            values: self.get_data(false),
            ignore_errors,
        });
        let id = match dispatch(engine, &command).await? {
            Reply::Inserted { affected: 0, .. } | Reply::Affected(0) => return Ok(false),
            Reply::Inserted { last_insert_id, .. } => last_insert_id,
            reply => {
                reply.into_affected(&command)?;
                let command = Command::LastInsertId(self.connection);
                dispatch(engine, &command).await?.into_scalar(&command)?
            }
        };
        self.bind_key(id);
        Ok(true)
    }

    /// Delete the backing row. In-memory column data is left untouched.
    pub async fn delete<E: Engine + ?Sized>(
        &self,
        engine: &E,
        ignore_errors: bool,
    ) -> Result<bool> {
        self.validate_key()?;

        let command = Command::Delete(DeleteOperation {
            target: self.target(),
            ignore_errors,
        });
        Ok(dispatch(engine, &command).await?.into_affected(&command)? > 0)
    }

    /// Update the backing row with every non-key column.
    pub async fn save<E: Engine + ?Sized>(
        &self,
        engine: &E,
        ignore_errors: bool,
    ) -> Result<bool> {
        self.validate_key()?;

        let command = Command::Update(WriteOperation {
            target: self.target(),
            values: self.get_data(false),
            ignore_errors,
        });
        Ok(dispatch(engine, &command).await?.into_affected(&command)? > 0)
    }

    /// Fetch the row into the record, optionally setting the key first.
    ///
    /// An `id` of zero or below is treated as absent. Returns false when no
    /// row matches; that is not an error.
    pub async fn load<E: Engine + ?Sized>(
        &mut self,
        engine: &E,
        id: Option<i64>,
    ) -> Result<bool> {
        self.loaded = false;

        match id {
            Some(id) if id > 0 => self.bind_key(Value::Integer(id)),
            _ => self.validate_key()?,
        }

        let command = Command::Select(SelectOperation {
            target: self.target(),
            columns: self.columns().map(str::to_string).collect(),
        });
        let rows = dispatch(engine, &command).await?.into_rows(&command)?;

        if let Some(row) = rows.into_iter().next() {
            if self.set_data(row) {
                self.loaded = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Whether the identified row exists in the table.
    pub async fn is_record<E: Engine + ?Sized>(&self, engine: &E) -> Result<bool> {
        self.validate_key()?;

        let command = Command::Exists(self.target());
        let rows = dispatch(engine, &command).await?.into_rows(&command)?;

        Ok(rows
            .first()
            .and_then(|row| row.get(EXISTS_ALIAS))
            .and_then(Value::as_i64)
            .is_some_and(|n| n > 0))
    }

    /// Copy of the column data; the key is left out when `include_key` is false.
    pub fn get_data(&self, include_key: bool) -> ValueMap {
        let mut data = self.columns.clone();
        if !include_key {
            data.remove(&self.key);
        }
        data
    }

    /// Apply each entry through [`Record::set_column`].
    ///
    /// Returns true when at least one entry named a column. Unknown names are
    /// skipped.
    pub fn set_data<K, V, I>(&mut self, columns_and_values: I) -> bool
    where
        K: AsRef<str>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut is_set = false;
        for (name, value) in columns_and_values {
            if self.set_column(name.as_ref(), value) {
                is_set = true;
            }
        }
        is_set
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.names()
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    pub fn query_params(&self) -> &Params {
        &self.query_params
    }

    pub fn query_sql(&self) -> &str {
        &self.query_sql
    }

    pub fn is_column(&self, name: &str) -> bool {
        self.columns.contains(name)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

/// Send one command and wait for its reply.
async fn dispatch<E: Engine + ?Sized>(engine: &E, command: &Command) -> Result<Reply> {
    debug!("dispatching {}", command);
    Ok(engine.execute(command.clone()).await?)
}
