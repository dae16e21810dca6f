//! Storage engine adapters behind one backend-agnostic interface.
//!
//! # Responsibility
//! - Define the raw row shape shared by every backend.
//! - Define the `StorageAdapter` contract: keyed table storage, explicit
//!   transactions and a per-commit change set.
//! - Select the concrete backend from `StoreConfig` at startup.
//!
//! # Invariants
//! - Every insert/update is validated against `APP_SCHEMA` before it is
//!   applied, by every backend.
//! - `commit` reports exactly the tables touched since `begin`.
//! - Adapters never expose uncommitted rows to another transaction.

use crate::config::{BackendConfig, StoreConfig};
use crate::schema::Table;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

mod memory;
mod sqlite;

pub use memory::MemoryAdapter;
pub use sqlite::SqliteAdapter;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    Io(std::io::Error),
    Json(serde_json::Error),
    SchemaVersionMismatch { found: u32, expected: u32 },
    MissingTable(Table),
    UnknownTable(Table),
    ConstraintViolation(String),
    RecordNotFound { table: Table, id: String },
    InvalidData(String),
    NoActiveTransaction,
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::Io(err) => write!(f, "{err}"),
            Self::Json(err) => write!(f, "{err}"),
            Self::SchemaVersionMismatch { found, expected } => write!(
                f,
                "persisted schema version {found} does not match expected {expected}"
            ),
            Self::MissingTable(table) => write!(f, "required table `{table}` is missing"),
            Self::UnknownTable(table) => write!(f, "table `{table}` is not in the schema"),
            Self::ConstraintViolation(message) => write!(f, "constraint violation: {message}"),
            Self::RecordNotFound { table, id } => write!(f, "{table} record not found: {id}"),
            Self::InvalidData(message) => write!(f, "invalid persisted data: {message}"),
            Self::NoActiveTransaction => write!(f, "no active transaction"),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}

impl From<std::io::Error> for DbError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for DbError {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}

/// Untyped column value as stored by a backend.
///
/// Serialized untagged so the JSON document reads as plain values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
}

/// One stored row: the primary key plus named column values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    pub id: String,
    pub values: BTreeMap<String, ColumnValue>,
}

impl RawRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn set(&mut self, column: &str, value: ColumnValue) {
        self.values.insert(column.to_string(), value);
    }

    /// Returns the column value, treating absent columns as `Null`.
    pub fn get(&self, column: &str) -> &ColumnValue {
        self.values.get(column).unwrap_or(&ColumnValue::Null)
    }
}

/// Equality predicate used by relation queries.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnFilter {
    pub column: &'static str,
    pub value: ColumnValue,
}

impl ColumnFilter {
    pub fn eq(column: &'static str, value: ColumnValue) -> Self {
        Self { column, value }
    }

    pub fn matches(&self, record: &RawRecord) -> bool {
        record.get(self.column) == &self.value
    }
}

/// Tables touched by one committed transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    tables: BTreeSet<Table>,
}

impl ChangeSet {
    pub fn record(&mut self, table: Table) {
        self.tables.insert(table);
    }

    pub fn contains(&self, table: Table) -> bool {
        self.tables.contains(&table)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn tables(&self) -> impl Iterator<Item = Table> + '_ {
        self.tables.iter().copied()
    }
}

/// Which backend a store is running on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    SqliteFile,
    SqliteMemory,
    Memory,
    MemoryPersisted,
}

impl AdapterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SqliteFile => "sqlite_file",
            Self::SqliteMemory => "sqlite_memory",
            Self::Memory => "memory",
            Self::MemoryPersisted => "memory_persisted",
        }
    }
}

/// Backend contract consumed by the reactive store.
///
/// Callers bracket every mutation with `begin` and `commit`/`rollback`.
/// Reads are allowed both inside and outside a transaction.
pub trait StorageAdapter: Send {
    fn kind(&self) -> AdapterKind;
    fn begin(&mut self) -> DbResult<()>;
    /// Makes pending mutations durable and reports the touched tables.
    fn commit(&mut self) -> DbResult<ChangeSet>;
    fn rollback(&mut self) -> DbResult<()>;
    fn insert(&mut self, table: Table, record: &RawRecord) -> DbResult<()>;
    /// Replaces all columns of an existing row.
    fn update(&mut self, table: Table, record: &RawRecord) -> DbResult<()>;
    fn find(&self, table: Table, id: &str) -> DbResult<Option<RawRecord>>;
    fn scan(&self, table: Table, filter: Option<&ColumnFilter>) -> DbResult<Vec<RawRecord>>;
}

/// Opens the backend selected by configuration.
///
/// # Errors
/// - Any open/bootstrap failure, including schema version mismatch.
pub fn open_adapter(config: &StoreConfig) -> DbResult<Box<dyn StorageAdapter>> {
    match &config.backend {
        BackendConfig::Sqlite { path: Some(path) } => Ok(Box::new(SqliteAdapter::open(path)?)),
        BackendConfig::Sqlite { path: None } => Ok(Box::new(SqliteAdapter::open_in_memory()?)),
        BackendConfig::Memory { persist_path } => Ok(Box::new(MemoryAdapter::open(
            persist_path.as_deref(),
        )?)),
    }
}
