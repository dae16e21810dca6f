//! Typed records over raw column storage.
//!
//! # Responsibility
//! - Map each table's columns to typed accessors (`Model`).
//! - Decode raw values: text, booleans from native or 0/1, timestamps
//!   from epoch milliseconds.
//! - Validate drafts before they reach storage.
//!
//! # Invariants
//! - Record ids are stable UUIDs assigned at creation and never reused.
//! - Records are immutable snapshots; mutation only happens through a
//!   `Collection` inside `Database::write`.

use crate::db::{ColumnValue, RawRecord};
use crate::schema::Table;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

pub mod note;
pub mod task;

pub use note::{Note, NoteDraft, NoteId, NoteKind};
pub use task::{Task, TaskDraft, TaskId, DEFAULT_TASK_PRIORITY, TASK_COLOR_PALETTE};

/// Column-to-typed-accessor mapping for one table.
pub trait Model: Clone + PartialEq + Send + 'static {
    const TABLE: Table;

    fn id(&self) -> Uuid;
    fn to_raw(&self) -> RawRecord;
    fn from_raw(raw: &RawRecord) -> Result<Self, DecodeError>;
}

/// Point in time stored as Unix epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_millis() as i64);
        Self(millis)
    }

    pub fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    pub fn as_millis(self) -> i64 {
        self.0
    }

    pub fn to_system_time(self) -> SystemTime {
        if self.0 >= 0 {
            UNIX_EPOCH + Duration::from_millis(self.0 as u64)
        } else {
            UNIX_EPOCH - Duration::from_millis(self.0.unsigned_abs())
        }
    }

    fn to_column(self) -> ColumnValue {
        ColumnValue::Number(self.0 as f64)
    }
}

/// A stored row that does not match its model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub table: Table,
    pub column: &'static str,
    pub message: String,
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot decode {}.{}: {}", self.table, self.column, self.message)
    }
}

impl Error for DecodeError {}

/// Draft rejected before persistence.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValidationError {
    BlankTitle,
    PriorityOutOfRange(f64),
    InvalidColor(String),
}

impl Display for RecordValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlankTitle => write!(f, "task title must not be blank"),
            Self::PriorityOutOfRange(value) => {
                write!(f, "task priority {value} is outside 0.0..=1.0")
            }
            Self::InvalidColor(value) => write!(f, "task color `{value}` is not #RRGGBB"),
        }
    }
}

impl Error for RecordValidationError {}

/// Per-table decoding helper bound to one raw row.
pub(crate) struct Columns<'a> {
    table: Table,
    raw: &'a RawRecord,
}

impl<'a> Columns<'a> {
    pub fn new(table: Table, raw: &'a RawRecord) -> Self {
        Self { table, raw }
    }

    fn error(&self, column: &'static str, message: impl Into<String>) -> DecodeError {
        DecodeError {
            table: self.table,
            column,
            message: message.into(),
        }
    }

    pub fn id(&self) -> Result<Uuid, DecodeError> {
        Uuid::parse_str(&self.raw.id)
            .map_err(|_| self.error("id", format!("invalid uuid `{}`", self.raw.id)))
    }

    pub fn text(&self, column: &'static str) -> Result<String, DecodeError> {
        self.optional_text(column)?
            .ok_or_else(|| self.error(column, "missing required text"))
    }

    pub fn optional_text(&self, column: &'static str) -> Result<Option<String>, DecodeError> {
        match self.raw.get(column) {
            ColumnValue::Null => Ok(None),
            ColumnValue::Text(value) => Ok(Some(value.clone())),
            other => Err(self.error(column, format!("expected text, got {other:?}"))),
        }
    }

    pub fn number(&self, column: &'static str) -> Result<f64, DecodeError> {
        match self.raw.get(column) {
            ColumnValue::Number(value) => Ok(*value),
            other => Err(self.error(column, format!("expected number, got {other:?}"))),
        }
    }

    pub fn boolean(&self, column: &'static str) -> Result<bool, DecodeError> {
        match self.raw.get(column) {
            ColumnValue::Bool(value) => Ok(*value),
            ColumnValue::Number(value) if *value == 0.0 => Ok(false),
            ColumnValue::Number(value) if *value == 1.0 => Ok(true),
            other => Err(self.error(column, format!("expected boolean, got {other:?}"))),
        }
    }

    pub fn timestamp(&self, column: &'static str) -> Result<Timestamp, DecodeError> {
        let millis = self.number(column)?;
        if !millis.is_finite() {
            return Err(self.error(column, "timestamp is not finite"));
        }
        Ok(Timestamp::from_millis(millis as i64))
    }

    pub fn uuid(&self, column: &'static str) -> Result<Uuid, DecodeError> {
        let value = self.text(column)?;
        Uuid::parse_str(&value).map_err(|_| self.error(column, format!("invalid uuid `{value}`")))
    }
}

fn text(value: &str) -> ColumnValue {
    ColumnValue::Text(value.to_string())
}

fn optional_text(value: Option<&str>) -> ColumnValue {
    value.map_or(ColumnValue::Null, text)
}
