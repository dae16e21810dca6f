//! Note record, owned by exactly one task.
//!
//! # Invariants
//! - `task_id` is set once at creation; no API reassigns it.
//! - Notes are created only through `Task::add_note*`.

use super::{optional_text, text, Columns, DecodeError, Model, Task, TaskId, Timestamp};
use crate::db::RawRecord;
use crate::schema::Table;
use crate::store::{Database, StoreResult};
use uuid::Uuid;

pub type NoteId = Uuid;

/// Note flavor, stored as text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum NoteKind {
    #[default]
    Note,
    /// Captured from a web page.
    Clip,
    Highlight,
}

impl NoteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Note => "note",
            Self::Clip => "clip",
            Self::Highlight => "highlight",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "note" => Some(Self::Note),
            "clip" => Some(Self::Clip),
            "highlight" => Some(Self::Highlight),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    id: NoteId,
    content: String,
    kind: NoteKind,
    page_url: Option<String>,
    page_title: Option<String>,
    excerpt: Option<String>,
    created_at: Timestamp,
    task_id: TaskId,
}

/// Input for `Task::add_note_with`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NoteDraft {
    pub content: String,
    pub kind: NoteKind,
    pub page_url: Option<String>,
    pub page_title: Option<String>,
    pub excerpt: Option<String>,
}

impl NoteDraft {
    /// Plain note; content is not validated and may be empty.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }

    pub fn with_kind(mut self, kind: NoteKind) -> Self {
        self.kind = kind;
        self
    }

    /// Attaches source page metadata captured by the browser clipper.
    pub fn with_page(
        mut self,
        page_url: impl Into<String>,
        page_title: Option<String>,
        excerpt: Option<String>,
    ) -> Self {
        self.page_url = Some(page_url.into());
        self.page_title = page_title;
        self.excerpt = excerpt;
        self
    }
}

impl Note {
    pub(crate) fn create(task_id: TaskId, draft: NoteDraft, now: Timestamp) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: draft.content,
            kind: draft.kind,
            page_url: draft.page_url,
            page_title: draft.page_title,
            excerpt: draft.excerpt,
            created_at: now,
            task_id,
        }
    }

    pub fn id(&self) -> NoteId {
        self.id
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn kind(&self) -> NoteKind {
        self.kind
    }

    pub fn page_url(&self) -> Option<&str> {
        self.page_url.as_deref()
    }

    pub fn page_title(&self) -> Option<&str> {
        self.page_title.as_deref()
    }

    pub fn excerpt(&self) -> Option<&str> {
        self.excerpt.as_deref()
    }

    pub fn created_at(&self) -> Timestamp {
        self.created_at
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// Resolves the owning task.
    pub fn task(&self, db: &Database) -> StoreResult<Task> {
        db.tasks().find(self.task_id)
    }
}

impl Model for Note {
    const TABLE: Table = Table::Notes;

    fn id(&self) -> Uuid {
        self.id
    }

    fn to_raw(&self) -> RawRecord {
        let mut raw = RawRecord::new(self.id.to_string());
        raw.set("content", text(&self.content));
        raw.set("type", text(self.kind.as_str()));
        raw.set("task_id", text(&self.task_id.to_string()));
        raw.set("page_url", optional_text(self.page_url.as_deref()));
        raw.set("page_title", optional_text(self.page_title.as_deref()));
        raw.set("excerpt", optional_text(self.excerpt.as_deref()));
        raw.set("created_at", self.created_at.to_column());
        raw
    }

    fn from_raw(raw: &RawRecord) -> Result<Self, DecodeError> {
        let columns = Columns::new(Table::Notes, raw);
        let kind_text = columns.text("type")?;
        let kind = NoteKind::parse(&kind_text).ok_or_else(|| DecodeError {
            table: Table::Notes,
            column: "type",
            message: format!("unknown note type `{kind_text}`"),
        })?;

        Ok(Self {
            id: columns.id()?,
            content: columns.text("content")?,
            kind,
            page_url: columns.optional_text("page_url")?,
            page_title: columns.optional_text("page_title")?,
            excerpt: columns.optional_text("excerpt")?,
            created_at: columns.timestamp("created_at")?,
            task_id: columns.uuid("task_id")?,
        })
    }
}
