//! Task create intent.
//!
//! # Invariants
//! - Titles are trimmed; an empty title never reaches storage.
//! - New tasks get a random palette color and the default priority.

use crate::model::{Task, TaskDraft, TASK_COLOR_PALETTE};
use crate::store::{Database, StoreError};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::error::Error;
use std::fmt::{Display, Formatter};

#[derive(Debug)]
pub enum TaskServiceError {
    /// Title is empty after trimming.
    EmptyTitle,
    Store(StoreError),
}

impl Display for TaskServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyTitle => write!(f, "task title is empty"),
            Self::Store(err) => write!(f, "{err}"),
        }
    }
}

impl Error for TaskServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::EmptyTitle => None,
        }
    }
}

impl From<StoreError> for TaskServiceError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

/// Task service facade over one store.
#[derive(Debug, Clone)]
pub struct TaskService {
    db: Database,
}

impl TaskService {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Creates one task from raw user input in its own write.
    ///
    /// # Errors
    /// - `EmptyTitle` when `title` is blank; nothing is written.
    /// - `Store` when the write fails; nothing is written.
    pub fn create_task(&self, title: &str) -> Result<Task, TaskServiceError> {
        self.create_task_with_rng(title, &mut rand::thread_rng())
    }

    pub(crate) fn create_task_with_rng<R: Rng + ?Sized>(
        &self,
        title: &str,
        rng: &mut R,
    ) -> Result<Task, TaskServiceError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(TaskServiceError::EmptyTitle);
        }

        let mut draft = TaskDraft::new(title);
        draft.color = pick_color(rng).to_string();
        let created = self.db.write(|| self.db.tasks().create(draft));

        match &created {
            Ok(task) => info!(
                "event=task_create module=service status=ok task_id={} color={}",
                task.id(),
                task.color()
            ),
            Err(err) => warn!("event=task_create module=service status=error error={err}"),
        }
        Ok(created?)
    }
}

fn pick_color<R: Rng + ?Sized>(rng: &mut R) -> &'static str {
    TASK_COLOR_PALETTE
        .choose(rng)
        .copied()
        .unwrap_or(TASK_COLOR_PALETTE[0])
}
