use crate::error::StorageError;
use rusqlite::types::{ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::Utf8Error;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Path that selects a private in-memory database.
pub const IN_MEMORY_PATH: &str = ":memory:";

/// Core value types for SQLite operations
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
    Boolean(bool),
    /// Object identifier of another entity
    Reference(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Integer(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Real(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Blob(value)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// Fails on TEXT that is not valid UTF-8 rather than rewriting it.
impl TryFrom<ValueRef<'_>> for Value {
    type Error = Utf8Error;

    fn try_from(value: ValueRef<'_>) -> Result<Self, Self::Error> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(std::str::from_utf8(t)?.to_string()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        })
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            // SQLite stores NaN as NULL
            Value::Real(f) if f.is_nan() => {
                return Err(rusqlite::Error::ToSqlConversionFailure(
                    "NaN cannot be stored in a REAL column".into(),
                ))
            }
            Value::Real(f) => ToSqlOutput::from(*f),
            Value::Text(s) | Value::Reference(s) => ToSqlOutput::from(s.as_str()),
            Value::Blob(b) => ToSqlOutput::from(b.as_slice()),
            Value::Boolean(b) => ToSqlOutput::from(i64::from(*b)),
        })
    }
}

/// Positional parameter bindings for SQL statements.
///
/// The first value binds to `?1`, the second to `?2`, and so on.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Params {
    pub values: Vec<Value>,
}

impl Params {
    /// Create a new Params object
    pub fn new() -> Self {
        Self::default()
    }
    /// Append a value
    pub fn with_value(mut self, value: impl Into<Value>) -> Self {
        self.values.push(value.into());
        self
    }
    pub fn push(&mut self, value: impl Into<Value>) {
        self.values.push(value.into());
    }
    pub fn len(&self) -> usize {
        self.values.len()
    }
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }
}

/// SQL statement with typed parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SqlQuery {
    pub statement: String,
    pub params: Params,
}

impl SqlQuery {
    pub fn new(statement: impl Into<String>) -> Self {
        Self {
            statement: statement.into(),
            params: Params::new(),
        }
    }
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// One result row, keyed by column name.
pub type Row = HashMap<String, Value>;

/// Quote a table or column name for use in a statement.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableDefinition {
    pub name: String,
    pub columns: Vec<ColumnDefinition>,
}

impl TableDefinition {
    /// `CREATE TABLE IF NOT EXISTS` for this table.
    pub fn create_statement(&self) -> SqlQuery {
        let columns: Vec<String> = self.columns.iter().map(ColumnDefinition::to_sql).collect();
        SqlQuery::new(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            quote_ident(&self.name),
            columns.join(", ")
        ))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub constraints: Vec<ColumnConstraint>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            constraints: Vec::new(),
        }
    }
    pub fn with_constraint(mut self, constraint: ColumnConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }
    /// Column definition as it appears inside `CREATE TABLE` or `ADD COLUMN`.
    pub fn to_sql(&self) -> String {
        let mut sql = format!("{} {}", quote_ident(&self.name), self.data_type.as_sql());
        for constraint in &self.constraints {
            sql.push(' ');
            sql.push_str(constraint.as_sql());
        }
        sql
    }
}

/// SQLite storage classes used for declared columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Integer,
    Text,
    Real,
    Blob,
}

impl DataType {
    pub fn as_sql(self) -> &'static str {
        match self {
            DataType::Integer => "INTEGER",
            DataType::Text => "TEXT",
            DataType::Real => "REAL",
            DataType::Blob => "BLOB",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnConstraint {
    PrimaryKey,
    NotNull,
}

impl ColumnConstraint {
    pub fn as_sql(self) -> &'static str {
        match self {
            ColumnConstraint::PrimaryKey => "PRIMARY KEY",
            ColumnConstraint::NotNull => "NOT NULL",
        }
    }
}

/// Store and database configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database file, `:memory:` for an in-memory database
    pub db_path: String,
    /// Create each entity table on first use
    pub create_tables: bool,
    /// Add declared columns an existing table lacks
    pub add_missing_columns: bool,
    /// `journal_mode` pragma applied to file databases
    pub journal_mode: Option<String>,
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: IN_MEMORY_PATH.to_string(),
            create_tables: true,
            add_missing_columns: true,
            journal_mode: Some("WAL".to_string()),
            busy_timeout_ms: 5000,
        }
    }
}

impl StoreConfig {
    /// Create a config for the database file at `db_path`
    pub fn new(db_path: impl Into<String>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.db_path == IN_MEMORY_PATH
    }
}

/// Statement execution against a single database.
///
/// Implementations must serialize statement execution themselves when they
/// are shared between threads; the entity store adds no locking of its own.
pub trait StorageClient {
    /// Run a row-returning statement.
    fn query(&self, query: &SqlQuery) -> Result<Vec<Row>, StorageError>;

    /// Run a statement and return the number of affected rows.
    fn execute(&self, query: &SqlQuery) -> Result<usize, StorageError>;
}

/// A SQLite connection guarded by a mutex.
///
/// Every statement runs with the lock held, so a database may be shared
/// between threads.
pub struct SqliteDatabase {
    path: String,
    connection: Mutex<Connection>,
}

impl std::fmt::Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteDatabase")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqliteDatabase {
    /// Open the database named by `config` and apply its pragmas.
    pub fn open(config: &StoreConfig) -> Result<Self, StorageError> {
        info!(path = %config.db_path, "opening sqlite database");
        let connection = if config.is_in_memory() {
            Connection::open_in_memory()
        } else {
            Connection::open(&config.db_path)
        }
        .map_err(|e| StorageError::new("open", e))?;
        configure_connection(&connection, config)?;
        Ok(Self {
            path: config.db_path.clone(),
            connection: Mutex::new(connection),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        Self::open(&StoreConfig::default())
    }

    /// Wrap a connection opened by the caller.
    pub fn from_connection(connection: Connection) -> Self {
        let path = connection
            .path()
            .filter(|p| !p.is_empty())
            .unwrap_or(IN_MEMORY_PATH)
            .to_string();
        Self {
            path,
            connection: Mutex::new(connection),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        match self.connection.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!(path = %self.path, "sqlite mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }
}

fn configure_connection(conn: &Connection, config: &StoreConfig) -> Result<(), StorageError> {
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
        .map_err(|e| StorageError::new("busy_timeout", e))?;
    if config.is_in_memory() {
        return Ok(());
    }
    if let Some(mode) = &config.journal_mode {
        // journal_mode answers with the mode now in effect
        let applied: String = conn
            .pragma_update_and_check(None, "journal_mode", mode, |row| row.get(0))
            .map_err(|e| StorageError::new("journal_mode", e))?;
        debug!(requested = %mode, applied = %applied, "journal mode set");
    }
    Ok(())
}

impl StorageClient for SqliteDatabase {
    fn query(&self, query: &SqlQuery) -> Result<Vec<Row>, StorageError> {
        debug!(sql = %query.statement, binds = query.params.len(), "query");
        let conn = self.lock();
        let mut stmt = conn
            .prepare(&query.statement)
            .map_err(|e| StorageError::new("prepare", e))?;
        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt
            .query(params_from_iter(query.params.iter()))
            .map_err(|e| StorageError::new("query", e))?;

        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(|e| StorageError::new("query", e))? {
            let mut map = Row::with_capacity(columns.len());
            for (index, name) in columns.iter().enumerate() {
                let value = row
                    .get_ref(index)
                    .map_err(|e| StorageError::new("read_column", e))?;
                let value =
                    Value::try_from(value).map_err(|e| StorageError::new("read_column", e))?;
                map.insert(name.clone(), value);
            }
            result.push(map);
        }
        Ok(result)
    }

    fn execute(&self, query: &SqlQuery) -> Result<usize, StorageError> {
        debug!(sql = %query.statement, binds = query.params.len(), "execute");
        let conn = self.lock();
        conn.execute(&query.statement, params_from_iter(query.params.iter()))
            .map_err(|e| StorageError::new("execute", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_definition_renders_constraints() {
        let column = ColumnDefinition::new("objectID", DataType::Text)
            .with_constraint(ColumnConstraint::PrimaryKey)
            .with_constraint(ColumnConstraint::NotNull);
        assert_eq!(column.to_sql(), "\"objectID\" TEXT PRIMARY KEY NOT NULL");
    }

    #[test]
    fn table_definition_creates_if_missing() {
        let table = TableDefinition {
            name: "Note".to_string(),
            columns: vec![
                ColumnDefinition::new("objectID", DataType::Text)
                    .with_constraint(ColumnConstraint::PrimaryKey),
                ColumnDefinition::new("body", DataType::Text),
                ColumnDefinition::new("pinned", DataType::Integer),
            ],
        };
        let query = table.create_statement();
        assert_eq!(
            query.statement,
            "CREATE TABLE IF NOT EXISTS \"Note\" (\"objectID\" TEXT PRIMARY KEY, \"body\" TEXT, \"pinned\" INTEGER)"
        );
        assert!(query.params.is_empty());
    }

    #[test]
    fn quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn config_defaults_to_in_memory() {
        let config = StoreConfig::default();
        assert!(config.is_in_memory());
        assert!(config.create_tables);
        assert!(config.add_missing_columns);
        assert_eq!(config.busy_timeout_ms, 5000);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"db_path": "/tmp/app.db", "add_missing_columns": false}"#)
                .unwrap();
        assert_eq!(config.db_path, "/tmp/app.db");
        assert!(!config.is_in_memory());
        assert!(!config.add_missing_columns);
        assert!(config.create_tables);
        assert_eq!(config.journal_mode.as_deref(), Some("WAL"));
    }

    #[test]
    fn values_bind_with_sqlite_storage_classes() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let query = SqlQuery::new(
            "SELECT typeof(?1) AS a, typeof(?2) AS b, typeof(?3) AS c, typeof(?4) AS d, ?5 AS e, typeof(?6) AS f",
        )
        .with_params(
            Params::new()
                .with_value(Value::Boolean(true))
                .with_value(Value::Reference("abc".to_string()))
                .with_value(Value::Null)
                .with_value(vec![1u8, 2, 3])
                .with_value(2.5)
                .with_value(Option::<i64>::None),
        );
        let rows = db.query(&query).unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["a"], Value::Text("integer".to_string()));
        assert_eq!(row["b"], Value::Text("text".to_string()));
        assert_eq!(row["c"], Value::Text("null".to_string()));
        assert_eq!(row["d"], Value::Text("blob".to_string()));
        assert_eq!(row["e"], Value::Real(2.5));
        assert_eq!(row["f"], Value::Text("null".to_string()));
    }

    #[test]
    fn invalid_utf8_text_is_an_error() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let err = db
            .query(&SqlQuery::new("SELECT CAST(X'FF61' AS TEXT) AS t"))
            .unwrap_err();
        assert_eq!(err.operation, "read_column");
    }

    #[test]
    fn nan_is_not_bound() {
        let db = SqliteDatabase::open_in_memory().unwrap();
        let err = db
            .query(&SqlQuery::new("SELECT ?1 AS r").with_params(Params::new().with_value(f64::NAN)))
            .unwrap_err();
        assert_eq!(err.operation, "query");
        assert!(err.message.contains("NaN"), "{}", err.message);

        let rows = db
            .query(&SqlQuery::new("SELECT ?1 AS r").with_params(Params::new().with_value(f64::INFINITY)))
            .unwrap();
        assert_eq!(rows[0]["r"], Value::Real(f64::INFINITY));
    }

    #[test]
    fn from_connection_reports_in_memory_path() {
        let db = SqliteDatabase::from_connection(Connection::open_in_memory().unwrap());
        assert_eq!(db.path(), IN_MEMORY_PATH);
    }
}
