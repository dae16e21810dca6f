//! File-backed (or in-memory) SQLite storage adapter.
//!
//! # Responsibility
//! - Open and configure SQLite connections.
//! - Materialize `APP_SCHEMA` on a fresh database and stamp its version.
//! - Map raw records to SQL rows and back.
//!
//! # Invariants
//! - Schema version is tracked via `PRAGMA user_version`.
//! - A non-fresh database with a different version is rejected; no
//!   migration is attempted.
//! - Returned adapters have `foreign_keys=ON` and a 5 s busy timeout.

use super::{AdapterKind, ChangeSet, ColumnFilter, ColumnValue, DbError, DbResult, RawRecord};
use super::StorageAdapter;
use crate::schema::{Table, TableSchema, APP_SCHEMA, ID_COLUMN};
use log::{error, info};
use rusqlite::types::{Value, ValueRef};
use rusqlite::{params_from_iter, Connection, ErrorCode, Row};
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SqliteAdapter {
    conn: Connection,
    kind: AdapterKind,
    pending: Option<ChangeSet>,
}

impl SqliteAdapter {
    /// Opens a SQLite database file and verifies or creates the schema.
    ///
    /// # Side effects
    /// - Emits `db_open` logging events with duration and status.
    pub fn open(path: impl AsRef<Path>) -> DbResult<Self> {
        let started_at = Instant::now();
        info!("event=db_open module=db status=start mode=file");

        let conn = match Connection::open(path) {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode=file duration_ms={} error_code=db_open_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err.into());
            }
        };

        Self::bootstrap(conn, AdapterKind::SqliteFile, started_at)
    }

    /// Opens an in-memory SQLite database with the schema applied.
    pub fn open_in_memory() -> DbResult<Self> {
        let started_at = Instant::now();
        info!("event=db_open module=db status=start mode=memory");

        let conn = match Connection::open_in_memory() {
            Ok(conn) => conn,
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode=memory duration_ms={} error_code=db_open_failed error={}",
                    started_at.elapsed().as_millis(),
                    err
                );
                return Err(err.into());
            }
        };

        Self::bootstrap(conn, AdapterKind::SqliteMemory, started_at)
    }

    fn bootstrap(mut conn: Connection, kind: AdapterKind, started_at: Instant) -> DbResult<Self> {
        let mode = if kind == AdapterKind::SqliteFile {
            "file"
        } else {
            "memory"
        };

        match configure_connection(&mut conn) {
            Ok(()) => {
                info!(
                    "event=db_open module=db status=ok mode={} duration_ms={}",
                    mode,
                    started_at.elapsed().as_millis()
                );
                Ok(Self {
                    conn,
                    kind,
                    pending: None,
                })
            }
            Err(err) => {
                error!(
                    "event=db_open module=db status=error mode={} duration_ms={} error_code=db_bootstrap_failed error={}",
                    mode,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }

    /// Borrow of the underlying connection for diagnostics and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn pending_mut(&mut self) -> DbResult<&mut ChangeSet> {
        self.pending.as_mut().ok_or(DbError::NoActiveTransaction)
    }
}

impl StorageAdapter for SqliteAdapter {
    fn kind(&self) -> AdapterKind {
        self.kind
    }

    fn begin(&mut self) -> DbResult<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE;")?;
        self.pending = Some(ChangeSet::default());
        Ok(())
    }

    fn commit(&mut self) -> DbResult<ChangeSet> {
        let changes = self.pending.take().ok_or(DbError::NoActiveTransaction)?;
        self.conn.execute_batch("COMMIT;")?;
        Ok(changes)
    }

    fn rollback(&mut self) -> DbResult<()> {
        self.pending = None;
        if !self.conn.is_autocommit() {
            self.conn.execute_batch("ROLLBACK;")?;
        }
        Ok(())
    }

    fn insert(&mut self, table: Table, record: &RawRecord) -> DbResult<()> {
        let schema = APP_SCHEMA.table(table)?;
        schema.validate(record)?;
        self.pending_mut()?;

        let names = column_names(schema);
        let placeholders = (1..=names.len())
            .map(|idx| format!("?{idx}"))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({placeholders});",
            names.join(", ")
        );

        let mut binds = vec![Value::Text(record.id.clone())];
        binds.extend(
            schema
                .columns
                .iter()
                .map(|column| to_sql_value(record.get(column.name))),
        );

        self.conn
            .execute(&sql, params_from_iter(binds))
            .map_err(constraint_error)?;
        self.pending_mut()?.record(table);
        Ok(())
    }

    fn update(&mut self, table: Table, record: &RawRecord) -> DbResult<()> {
        let schema = APP_SCHEMA.table(table)?;
        schema.validate(record)?;
        self.pending_mut()?;

        let assignments = schema
            .columns
            .iter()
            .enumerate()
            .map(|(idx, column)| format!("{} = ?{}", column.name, idx + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "UPDATE {table} SET {assignments} WHERE {ID_COLUMN} = ?{};",
            schema.columns.len() + 1
        );

        let mut binds = schema
            .columns
            .iter()
            .map(|column| to_sql_value(record.get(column.name)))
            .collect::<Vec<_>>();
        binds.push(Value::Text(record.id.clone()));

        let changed = self
            .conn
            .execute(&sql, params_from_iter(binds))
            .map_err(constraint_error)?;
        if changed == 0 {
            return Err(DbError::RecordNotFound {
                table,
                id: record.id.clone(),
            });
        }

        self.pending_mut()?.record(table);
        Ok(())
    }

    fn find(&self, table: Table, id: &str) -> DbResult<Option<RawRecord>> {
        let schema = APP_SCHEMA.table(table)?;
        let sql = format!(
            "SELECT {} FROM {table} WHERE {ID_COLUMN} = ?1;",
            column_names(schema).join(", ")
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query([id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(parse_row(schema, row)?));
        }

        Ok(None)
    }

    fn scan(&self, table: Table, filter: Option<&ColumnFilter>) -> DbResult<Vec<RawRecord>> {
        let schema = APP_SCHEMA.table(table)?;
        let mut sql = format!(
            "SELECT {} FROM {table}",
            column_names(schema).join(", ")
        );
        let mut binds = Vec::new();

        if let Some(filter) = filter {
            if schema.column(filter.column).is_none() {
                return Err(DbError::ConstraintViolation(format!(
                    "unknown filter column `{}` for table `{table}`",
                    filter.column
                )));
            }
            sql.push_str(&format!(" WHERE {} = ?1", filter.column));
            binds.push(to_sql_value(&filter.value));
        }
        sql.push_str(" ORDER BY rowid ASC;");

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(binds))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(parse_row(schema, row)?);
        }

        Ok(records)
    }
}

fn configure_connection(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(BUSY_TIMEOUT)?;
    ensure_schema(conn)
}

/// Creates the schema on a fresh database or verifies an existing one.
fn ensure_schema(conn: &mut Connection) -> DbResult<()> {
    let current_version = current_user_version(conn)?;
    let expected = APP_SCHEMA.version;

    if current_version == 0 && !any_schema_table_exists(conn)? {
        let tx = conn.transaction()?;
        for schema in APP_SCHEMA.tables {
            tx.execute_batch(&schema.sqlite_ddl())?;
        }
        tx.execute_batch(&format!("PRAGMA user_version = {expected};"))?;
        tx.commit()?;
        info!("event=schema_check module=db status=ok action=created version={expected}");
        return Ok(());
    }

    if current_version != expected {
        error!(
            "event=schema_check module=db status=error found={current_version} expected={expected}"
        );
        return Err(DbError::SchemaVersionMismatch {
            found: current_version,
            expected,
        });
    }

    for schema in APP_SCHEMA.tables {
        if !table_exists(conn, schema.table.as_str())? {
            return Err(DbError::MissingTable(schema.table));
        }
    }

    info!("event=schema_check module=db status=ok action=verified version={expected}");
    Ok(())
}

fn current_user_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.query_row("PRAGMA user_version;", [], |row| row.get::<_, u32>(0))?;
    Ok(version)
}

fn any_schema_table_exists(conn: &Connection) -> DbResult<bool> {
    for schema in APP_SCHEMA.tables {
        if table_exists(conn, schema.table.as_str())? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn table_exists(conn: &Connection, table: &str) -> DbResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn column_names(schema: &TableSchema) -> Vec<&'static str> {
    let mut names = vec![ID_COLUMN];
    names.extend(schema.columns.iter().map(|column| column.name));
    names
}

fn to_sql_value(value: &ColumnValue) -> Value {
    match value {
        ColumnValue::Null => Value::Null,
        ColumnValue::Bool(flag) => Value::Integer(i64::from(*flag)),
        ColumnValue::Number(number) => Value::Real(*number),
        ColumnValue::Text(text) => Value::Text(text.clone()),
    }
}

/// Reports SQLite constraint failures (foreign key, NOT NULL, duplicate id)
/// the same way schema validation does.
fn constraint_error(err: rusqlite::Error) -> DbError {
    match err {
        rusqlite::Error::SqliteFailure(failure, message)
            if failure.code == ErrorCode::ConstraintViolation =>
        {
            DbError::ConstraintViolation(message.unwrap_or_else(|| failure.to_string()))
        }
        other => DbError::Sqlite(other),
    }
}

fn parse_row(schema: &TableSchema, row: &Row<'_>) -> DbResult<RawRecord> {
    let id: String = row.get(ID_COLUMN)?;
    let mut record = RawRecord::new(id);

    for column in schema.columns {
        let value = match row.get_ref(column.name)? {
            ValueRef::Null => ColumnValue::Null,
            ValueRef::Integer(number) => ColumnValue::Number(number as f64),
            ValueRef::Real(number) => ColumnValue::Number(number),
            ValueRef::Text(bytes) => ColumnValue::Text(
                String::from_utf8(bytes.to_vec()).map_err(|_| {
                    DbError::InvalidData(format!(
                        "non UTF-8 text in {}.{}",
                        schema.table, column.name
                    ))
                })?,
            ),
            ValueRef::Blob(_) => {
                return Err(DbError::InvalidData(format!(
                    "unexpected blob in {}.{}",
                    schema.table, column.name
                )));
            }
        };
        record.set(column.name, value);
    }

    Ok(record)
}
