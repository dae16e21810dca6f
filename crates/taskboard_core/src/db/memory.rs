//! In-memory storage adapter with optional JSON document persistence.
//!
//! # Responsibility
//! - Hold every table as rows in insertion order.
//! - Provide rollback through a journal captured at `begin`.
//! - Optionally persist the full document after every commit.
//!
//! # Invariants
//! - The persisted document is replaced atomically (temp file + rename).
//! - A persisted document with a different schema version is rejected.
//! - Booleans are stored natively, unlike the SQLite adapter.
//! - Relation columns must name an existing row, as SQLite's foreign keys
//!   require.

use super::{AdapterKind, ChangeSet, ColumnFilter, ColumnValue, DbError, DbResult, RawRecord};
use super::StorageAdapter;
use crate::schema::{Table, APP_SCHEMA};
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

type Tables = BTreeMap<Table, Vec<RawRecord>>;

/// On-disk shape: tables keyed by storage name, rows in insertion order.
#[derive(Debug, Serialize, Deserialize)]
struct StoreDocument {
    version: u32,
    tables: BTreeMap<String, Vec<RawRecord>>,
}

pub struct MemoryAdapter {
    tables: Tables,
    journal: Option<(Tables, ChangeSet)>,
    persist_path: Option<PathBuf>,
}

impl MemoryAdapter {
    /// Opens a volatile store, or loads the document at `persist_path`.
    ///
    /// A missing document is treated as a fresh store.
    pub fn open(persist_path: Option<&Path>) -> DbResult<Self> {
        let started_at = Instant::now();
        let mode = if persist_path.is_some() {
            "memory_persisted"
        } else {
            "memory"
        };
        info!("event=db_open module=db status=start mode={mode}");

        match load_tables(persist_path) {
            Ok(tables) => {
                info!(
                    "event=db_open module=db status=ok mode={} duration_ms={}",
                    mode,
                    started_at.elapsed().as_millis()
                );
                Ok(Self {
                    tables,
                    journal: None,
                    persist_path: persist_path.map(Path::to_path_buf),
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

    fn table_mut(&mut self, table: Table) -> DbResult<&mut Vec<RawRecord>> {
        self.tables.get_mut(&table).ok_or(DbError::UnknownTable(table))
    }

    fn check_references(&self, table: Table, record: &RawRecord) -> DbResult<()> {
        for column in APP_SCHEMA.table(table)?.columns {
            let Some(target) = column.references else {
                continue;
            };
            let exists = match record.get(column.name) {
                ColumnValue::Text(id) => self.find(target, id)?.is_some(),
                _ => false,
            };
            if !exists {
                return Err(DbError::ConstraintViolation(format!(
                    "FOREIGN KEY constraint failed: {table}.{} -> {target}",
                    column.name
                )));
            }
        }
        Ok(())
    }

    fn changes_mut(&mut self) -> DbResult<&mut ChangeSet> {
        self.journal
            .as_mut()
            .map(|(_, changes)| changes)
            .ok_or(DbError::NoActiveTransaction)
    }

    fn persist(&self) -> DbResult<()> {
        let Some(path) = self.persist_path.as_deref() else {
            return Ok(());
        };

        let document = StoreDocument {
            version: APP_SCHEMA.version,
            tables: self
                .tables
                .iter()
                .map(|(table, rows)| (table.as_str().to_string(), rows.clone()))
                .collect(),
        };
        let bytes = serde_json::to_vec(&document)?;
        let tmp_path = path.with_extension("tmp");
        fs::write(&tmp_path, bytes)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl StorageAdapter for MemoryAdapter {
    fn kind(&self) -> AdapterKind {
        if self.persist_path.is_some() {
            AdapterKind::MemoryPersisted
        } else {
            AdapterKind::Memory
        }
    }

    fn begin(&mut self) -> DbResult<()> {
        if self.journal.is_some() {
            return Err(DbError::ConstraintViolation(
                "transaction already active".to_string(),
            ));
        }
        self.journal = Some((self.tables.clone(), ChangeSet::default()));
        Ok(())
    }

    fn commit(&mut self) -> DbResult<ChangeSet> {
        let (before, changes) = self.journal.take().ok_or(DbError::NoActiveTransaction)?;
        if !changes.is_empty() {
            if let Err(err) = self.persist() {
                // Durability failed: the commit must not become visible.
                self.tables = before;
                return Err(err);
            }
        }
        Ok(changes)
    }

    fn rollback(&mut self) -> DbResult<()> {
        if let Some((before, _)) = self.journal.take() {
            self.tables = before;
        }
        Ok(())
    }

    fn insert(&mut self, table: Table, record: &RawRecord) -> DbResult<()> {
        APP_SCHEMA.table(table)?.validate(record)?;
        self.changes_mut()?;
        self.check_references(table, record)?;

        let rows = self.table_mut(table)?;
        if rows.iter().any(|row| row.id == record.id) {
            return Err(DbError::ConstraintViolation(format!(
                "duplicate id `{}` in table `{table}`",
                record.id
            )));
        }
        rows.push(record.clone());
        self.changes_mut()?.record(table);
        Ok(())
    }

    fn update(&mut self, table: Table, record: &RawRecord) -> DbResult<()> {
        APP_SCHEMA.table(table)?.validate(record)?;
        self.changes_mut()?;
        self.check_references(table, record)?;

        let rows = self.table_mut(table)?;
        let Some(slot) = rows.iter_mut().find(|row| row.id == record.id) else {
            return Err(DbError::RecordNotFound {
                table,
                id: record.id.clone(),
            });
        };
        *slot = record.clone();
        self.changes_mut()?.record(table);
        Ok(())
    }

    fn find(&self, table: Table, id: &str) -> DbResult<Option<RawRecord>> {
        let rows = self.tables.get(&table).ok_or(DbError::UnknownTable(table))?;
        Ok(rows.iter().find(|row| row.id == id).cloned())
    }

    fn scan(&self, table: Table, filter: Option<&ColumnFilter>) -> DbResult<Vec<RawRecord>> {
        let rows = self.tables.get(&table).ok_or(DbError::UnknownTable(table))?;
        Ok(rows
            .iter()
            .filter(|record| filter.map_or(true, |filter| filter.matches(record)))
            .cloned()
            .collect())
    }
}

fn empty_tables() -> Tables {
    APP_SCHEMA
        .tables
        .iter()
        .map(|schema| (schema.table, Vec::new()))
        .collect()
}

fn load_tables(persist_path: Option<&Path>) -> DbResult<Tables> {
    let Some(path) = persist_path else {
        return Ok(empty_tables());
    };
    if !path.exists() {
        info!("event=schema_check module=db status=ok action=created version={}", APP_SCHEMA.version);
        return Ok(empty_tables());
    }

    let bytes = fs::read(path)?;
    let document: StoreDocument = serde_json::from_slice(&bytes)?;
    if document.version != APP_SCHEMA.version {
        error!(
            "event=schema_check module=db status=error found={} expected={}",
            document.version, APP_SCHEMA.version
        );
        return Err(DbError::SchemaVersionMismatch {
            found: document.version,
            expected: APP_SCHEMA.version,
        });
    }

    let mut tables = empty_tables();
    for (name, rows) in document.tables {
        let table = Table::parse(&name)
            .ok_or_else(|| DbError::InvalidData(format!("unknown persisted table `{name}`")))?;
        let schema = APP_SCHEMA.table(table)?;
        let mut loaded: Vec<RawRecord> = Vec::with_capacity(rows.len());
        for record in rows {
            schema.validate(&record).map_err(|err| {
                DbError::InvalidData(format!("persisted {table} row `{}`: {err}", record.id))
            })?;
            if loaded.iter().any(|row| row.id == record.id) {
                return Err(DbError::InvalidData(format!(
                    "persisted {table} row `{}` is duplicated",
                    record.id
                )));
            }
            loaded.push(record);
        }
        tables.insert(table, loaded);
    }

    info!("event=schema_check module=db status=ok action=verified version={}", APP_SCHEMA.version);
    Ok(tables)
}
