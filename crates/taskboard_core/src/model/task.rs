//! Task record.
//!
//! # Invariants
//! - `id` and `created_at` never change after creation.
//! - `updated_at` is never earlier than the previous `updated_at`.
//! - `priority` stays within `0.0..=1.0`; `color` is `#RRGGBB`.

use super::{
    text, Columns, DecodeError, Model, Note, NoteDraft, NoteKind, RecordValidationError, Timestamp,
};
use crate::db::{ColumnValue, RawRecord};
use crate::schema::Table;
use crate::store::{Database, Query, StoreResult};
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

pub type TaskId = Uuid;

/// Colors offered for new tasks.
pub const TASK_COLOR_PALETTE: [&str; 4] = ["#3B82F6", "#F59E0B", "#10B981", "#64748B"];

pub const DEFAULT_TASK_PRIORITY: f64 = 0.5;

static HEX_COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9A-Fa-f]{6}$").expect("valid color regex"));

#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    id: TaskId,
    title: String,
    color: String,
    priority: f64,
    is_archived: bool,
    created_at: Timestamp,
    updated_at: Timestamp,
}

/// Mutable task fields used for create and update.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDraft {
    pub title: String,
    pub color: String,
    pub priority: f64,
    pub is_archived: bool,
}

impl TaskDraft {
    /// Draft with the first palette color, default priority, not archived.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            color: TASK_COLOR_PALETTE[0].to_string(),
            priority: DEFAULT_TASK_PRIORITY,
            is_archived: false,
        }
    }

    pub fn validate(&self) -> Result<(), RecordValidationError> {
        if self.title.trim().is_empty() {
            return Err(RecordValidationError::BlankTitle);
        }
        if !(0.0..=1.0).contains(&self.priority) {
            return Err(RecordValidationError::PriorityOutOfRange(self.priority));
        }
        if !HEX_COLOR_RE.is_match(&self.color) {
            return Err(RecordValidationError::InvalidColor(self.color.clone()));
        }
        Ok(())
    }
}

impl Task {
    pub(crate) fn create(draft: TaskDraft, now: Timestamp) -> Result<Self, RecordValidationError> {
        draft.validate()?;
        Ok(Self {
            id: Uuid::new_v4(),
            title: draft.title,
            color: draft.color,
            priority: draft.priority,
            is_archived: draft.is_archived,
            created_at: now,
            updated_at: now,
        })
    }

    /// Applies a draft on top of this snapshot, keeping identity and
    /// creation time.
    pub(crate) fn apply(&self, draft: TaskDraft, now: Timestamp) -> Result<Self, RecordValidationError> {
        draft.validate()?;
        Ok(Self {
            id: self.id,
            title: draft.title,
            color: draft.color,
            priority: draft.priority,
            is_archived: draft.is_archived,
            created_at: self.created_at,
            updated_at: now.max(self.updated_at),
        })
    }

    pub fn to_draft(&self) -> TaskDraft {
        TaskDraft {
            title: self.title.clone(),
            color: self.color.clone(),
            priority: self.priority,
            is_archived: self.is_archived,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn priority(&self) -> f64 {
        self.priority
    }

    pub fn is_archived(&self) -> bool {
        self.is_archived
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn updated_at(&self) -> Timestamp {
        self.updated_at
    }

    /// Creates one note owned by this task.
    ///
    /// Runs in its own write, or joins the caller's when already inside
    /// `Database::write`.
    pub fn add_note(
        &self,
        db: &Database,
        content: impl Into<String>,
        kind: NoteKind,
    ) -> StoreResult<Note> {
        self.add_note_with(db, NoteDraft::new(content).with_kind(kind))
    }

    /// Like `add_note`, with optional clip metadata.
    ///
    /// # Errors
    /// - `NotFound` when this task is not persisted.
    pub fn add_note_with(&self, db: &Database, draft: NoteDraft) -> StoreResult<Note> {
        db.write(|| {
            let owner = db.tasks().find(self.id)?;
            let note = Note::create(owner.id, draft, Timestamp::now());
            db.notes().insert(&note)?;
            Ok(note)
        })
    }

    /// Live relation over this task's notes.
    pub fn notes(&self, db: &Database) -> Query<Note> {
        db.notes()
            .query()
            .where_eq("task_id", text(&self.id.to_string()))
    }
}

impl Model for Task {
    const TABLE: Table = Table::Tasks;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_raw(&self) -> RawRecord {
        let mut raw = RawRecord::new(self.id.to_string());
        raw.set("title", text(&self.title));
        raw.set("color", text(&self.color));
        raw.set("priority", ColumnValue::Number(self.priority));
        raw.set("is_archived", ColumnValue::Bool(self.is_archived));
        raw.set("created_at", self.created_at.to_column());
        raw.set("updated_at", self.updated_at.to_column());
        raw
    }

    fn from_raw(raw: &RawRecord) -> Result<Self, DecodeError> {
        let columns = Columns::new(Table::Tasks, raw);
        Ok(Self {
            id: columns.id()?,
            title: columns.text("title")?,
            color: columns.text("color")?,
            priority: columns.number("priority")?,
            is_archived: columns.boolean("is_archived")?,
            created_at: columns.timestamp("created_at")?,
            updated_at: columns.timestamp("updated_at")?,
        })
    }
}
