//! Static table schema for the task board store.
//!
//! # Responsibility
//! - Declare every persisted table and its typed columns.
//! - Validate raw records against column descriptors before persistence.
//!
//! # Invariants
//! - `APP_SCHEMA.version` is bumped whenever a table or column changes.
//! - Every table carries an implicit text `id` primary key that is not
//!   listed in `columns`.
//! - A version mismatch against persisted state is fatal; there is no
//!   migration path.

use crate::db::{ColumnValue, DbError, DbResult, RawRecord};
use std::fmt::{Display, Formatter};

/// Name of the implicit primary-key column present in every table.
pub const ID_COLUMN: &str = "id";

/// Persisted tables known to this build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Tasks,
    Notes,
}

impl Table {
    pub const ALL: [Table; 2] = [Table::Tasks, Table::Notes];

    /// Stable storage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Notes => "notes",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "tasks" => Some(Self::Tasks),
            "notes" => Some(Self::Notes),
            _ => None,
        }
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primitive column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    String,
    Number,
    Boolean,
}

impl ColumnType {
    fn sqlite_type(self) -> &'static str {
        match self {
            Self::String => "TEXT",
            Self::Number => "REAL",
            Self::Boolean => "INTEGER",
        }
    }

    fn accepts(self, value: &ColumnValue) -> bool {
        match (self, value) {
            (Self::String, ColumnValue::Text(_)) => true,
            (Self::Number, ColumnValue::Number(_)) => true,
            // SQLite hands booleans back as 0/1 numbers.
            (Self::Boolean, ColumnValue::Bool(_)) => true,
            (Self::Boolean, ColumnValue::Number(n)) => *n == 0.0 || *n == 1.0,
            _ => false,
        }
    }
}

/// One column descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnSchema {
    pub name: &'static str,
    pub column_type: ColumnType,
    pub is_optional: bool,
    pub is_indexed: bool,
    /// Table whose `id` this column must name.
    pub references: Option<Table>,
}

impl ColumnSchema {
    const fn required(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            is_optional: false,
            is_indexed: false,
            references: None,
        }
    }

    const fn optional(name: &'static str, column_type: ColumnType) -> Self {
        Self {
            name,
            column_type,
            is_optional: true,
            is_indexed: false,
            references: None,
        }
    }

    /// Required, indexed text column holding the id of a `target` row.
    const fn relation(name: &'static str, target: Table) -> Self {
        Self {
            name,
            column_type: ColumnType::String,
            is_optional: false,
            is_indexed: true,
            references: Some(target),
        }
    }
}

/// Ordered column set for one table.
#[derive(Debug, Clone, Copy)]
pub struct TableSchema {
    pub table: Table,
    pub columns: &'static [ColumnSchema],
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }

    /// Checks one raw record against this table's column descriptors.
    ///
    /// # Errors
    /// - `ConstraintViolation` for unknown columns, missing/null required
    ///   columns, type mismatches or a blank id.
    pub fn validate(&self, record: &RawRecord) -> DbResult<()> {
        if record.id.trim().is_empty() {
            return Err(DbError::ConstraintViolation(format!(
                "{}.{ID_COLUMN} must not be empty",
                self.table
            )));
        }

        for name in record.values.keys() {
            if self.column(name).is_none() {
                return Err(DbError::ConstraintViolation(format!(
                    "unknown column `{name}` for table `{}`",
                    self.table
                )));
            }
        }

        for column in self.columns {
            match record.values.get(column.name) {
                None | Some(ColumnValue::Null) => {
                    if !column.is_optional {
                        return Err(DbError::ConstraintViolation(format!(
                            "{}.{} is required",
                            self.table, column.name
                        )));
                    }
                }
                Some(value) => {
                    if !column.column_type.accepts(value) {
                        return Err(DbError::ConstraintViolation(format!(
                            "{}.{} expects {:?}, got {value:?}",
                            self.table, column.name, column.column_type
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Renders `CREATE TABLE` plus index statements for SQLite.
    pub fn sqlite_ddl(&self) -> String {
        let mut columns = vec![format!("{ID_COLUMN} TEXT PRIMARY KEY NOT NULL")];
        for column in self.columns {
            let mut line = format!("{} {}", column.name, column.column_type.sqlite_type());
            if !column.is_optional {
                line.push_str(" NOT NULL");
            }
            if let Some(target) = column.references {
                line.push_str(&format!(" REFERENCES {target} ({ID_COLUMN})"));
            }
            columns.push(line);
        }

        let mut ddl = format!(
            "CREATE TABLE IF NOT EXISTS {} (\n    {}\n);\n",
            self.table,
            columns.join(",\n    ")
        );
        for column in self.columns.iter().filter(|column| column.is_indexed) {
            ddl.push_str(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{name} ON {table} ({name});\n",
                table = self.table,
                name = column.name
            ));
        }
        ddl
    }
}

/// Versioned set of all tables.
#[derive(Debug, Clone, Copy)]
pub struct AppSchema {
    pub version: u32,
    pub tables: &'static [TableSchema],
}

impl AppSchema {
    pub fn table(&self, table: Table) -> DbResult<&TableSchema> {
        self.tables
            .iter()
            .find(|schema| schema.table == table)
            .ok_or(DbError::UnknownTable(table))
    }
}

const TASK_COLUMNS: &[ColumnSchema] = &[
    ColumnSchema::required("title", ColumnType::String),
    ColumnSchema::required("color", ColumnType::String),
    ColumnSchema::required("priority", ColumnType::Number),
    ColumnSchema::required("is_archived", ColumnType::Boolean),
    ColumnSchema::required("created_at", ColumnType::Number),
    ColumnSchema::required("updated_at", ColumnType::Number),
];

const NOTE_COLUMNS: &[ColumnSchema] = &[
    ColumnSchema::required("content", ColumnType::String),
    ColumnSchema::required("type", ColumnType::String),
    ColumnSchema::relation("task_id", Table::Tasks),
    ColumnSchema::optional("page_url", ColumnType::String),
    ColumnSchema::optional("page_title", ColumnType::String),
    ColumnSchema::optional("excerpt", ColumnType::String),
    ColumnSchema::required("created_at", ColumnType::Number),
];

/// Schema used by every adapter in this build.
pub static APP_SCHEMA: AppSchema = AppSchema {
    version: 1,
    tables: &[
        TableSchema {
            table: Table::Tasks,
            columns: TASK_COLUMNS,
        },
        TableSchema {
            table: Table::Notes,
            columns: NOTE_COLUMNS,
        },
    ],
};

#[cfg(test)]
mod tests {
    use super::{Table, APP_SCHEMA};
    use crate::db::{ColumnValue, DbError, RawRecord};

    fn note_record() -> RawRecord {
        let mut record = RawRecord::new("n1");
        record.set("content", ColumnValue::Text("body".to_string()));
        record.set("type", ColumnValue::Text("note".to_string()));
        record.set("task_id", ColumnValue::Text("t1".to_string()));
        record.set("created_at", ColumnValue::Number(1.0));
        record
    }

    #[test]
    fn optional_columns_may_be_absent() {
        let schema = APP_SCHEMA.table(Table::Notes).unwrap();
        schema.validate(&note_record()).unwrap();
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let schema = APP_SCHEMA.table(Table::Notes).unwrap();
        let mut record = note_record();
        record.values.remove("task_id");
        let err = schema.validate(&record).unwrap_err();
        assert!(matches!(err, DbError::ConstraintViolation(message) if message.contains("task_id")));
    }

    #[test]
    fn unknown_column_and_type_mismatch_are_rejected() {
        let schema = APP_SCHEMA.table(Table::Notes).unwrap();

        let mut unknown = note_record();
        unknown.set("color", ColumnValue::Text("#fff".to_string()));
        assert!(schema.validate(&unknown).is_err());

        let mut mismatch = note_record();
        mismatch.set("created_at", ColumnValue::Text("yesterday".to_string()));
        assert!(schema.validate(&mismatch).is_err());
    }

    #[test]
    fn boolean_columns_accept_numeric_flags() {
        let schema = APP_SCHEMA.table(Table::Tasks).unwrap();
        let mut record = RawRecord::new("t1");
        record.set("title", ColumnValue::Text("x".to_string()));
        record.set("color", ColumnValue::Text("#3B82F6".to_string()));
        record.set("priority", ColumnValue::Number(0.5));
        record.set("is_archived", ColumnValue::Number(1.0));
        record.set("created_at", ColumnValue::Number(1.0));
        record.set("updated_at", ColumnValue::Number(1.0));
        schema.validate(&record).unwrap();

        record.set("is_archived", ColumnValue::Number(2.0));
        assert!(schema.validate(&record).is_err());
    }

    #[test]
    fn ddl_declares_not_null_and_index() {
        let ddl = APP_SCHEMA.table(Table::Notes).unwrap().sqlite_ddl();
        assert!(ddl.contains("content TEXT NOT NULL"));
        assert!(ddl.contains("page_url TEXT,"));
        assert!(ddl.contains("CREATE INDEX IF NOT EXISTS idx_notes_task_id ON notes (task_id);"));
    }

    #[test]
    fn relation_column_declares_foreign_key() {
        let notes = APP_SCHEMA.table(Table::Notes).unwrap();
        assert_eq!(notes.column("task_id").unwrap().references, Some(Table::Tasks));
        assert!(notes
            .sqlite_ddl()
            .contains("task_id TEXT NOT NULL REFERENCES tasks (id)"));
        assert!(!APP_SCHEMA.table(Table::Tasks).unwrap().sqlite_ddl().contains("REFERENCES"));
    }
}
