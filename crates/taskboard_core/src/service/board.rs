//! Task board screen state.
//!
//! # Responsibility
//! - Fetch from the store once, then keep a live task list.
//! - Translate store failures into a degraded-mode message instead of
//!   failing the screen.
//!
//! # Invariants
//! - `tasks` always equals the last committed snapshot received.
//! - A fresh snapshot clears any earlier banner message.
//! - An observation error ends the stream; it is not retried.

use super::task_service::{TaskService, TaskServiceError};
use crate::model::{Task, TaskId};
use crate::store::{Database, Emission, StoreStatus, Subscription};
use log::{info, warn};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long `wait_until_loaded` waits for the first snapshot by default.
pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(5);

pub const NOT_PERSISTING_MESSAGE: &str =
    "Database not available. App will work but data won't persist.";
pub const CREATE_FAILED_MESSAGE: &str = "Failed to create task";

#[derive(Debug, Clone, PartialEq)]
pub enum BoardPhase {
    Loading,
    Ready,
    /// Usable without persistence or live updates; carries the banner text.
    Degraded(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoardState {
    pub phase: BoardPhase,
    pub tasks: Vec<Task>,
}

impl BoardState {
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_loading(&self) -> bool {
        self.phase == BoardPhase::Loading
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.phase {
            BoardPhase::Degraded(message) => Some(message.as_str()),
            _ => None,
        }
    }
}

struct Shared {
    state: Mutex<BoardState>,
    changed: Condvar,
}

impl Shared {
    fn update(&self, f: impl FnOnce(&mut BoardState)) {
        let mut state = self.state.lock();
        f(&mut state);
        self.changed.notify_all();
    }

    fn apply(&self, emission: Emission<Vec<Task>>) {
        match emission {
            Ok(tasks) => self.update(|state| {
                state.tasks = tasks;
                state.phase = BoardPhase::Ready;
            }),
            Err(err) => {
                warn!("event=board_observe module=service status=error error={err}");
                self.update(|state| {
                    state.phase = BoardPhase::Degraded(format!("Database error: {}", err.message));
                });
            }
        }
    }
}

/// Live view model over the task table.
pub struct TaskBoard {
    service: TaskService,
    shared: Arc<Shared>,
    subscription: Option<Subscription>,
}

impl TaskBoard {
    /// Fetches once, then starts observing all tasks.
    ///
    /// Never fails: setup and initial fetch failures leave the board degraded.
    pub fn start(db: Database) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(BoardState {
                phase: BoardPhase::Loading,
                tasks: Vec::new(),
            }),
            changed: Condvar::new(),
        });
        let mut board = Self {
            service: TaskService::new(db.clone()),
            shared,
            subscription: None,
        };

        if let StoreStatus::Unavailable { reason } = db.status() {
            warn!("event=board_start module=service status=error reason={reason}");
            board.degrade(NOT_PERSISTING_MESSAGE.to_string());
            return board;
        }
        if let Err(err) = db.tasks().fetch_all() {
            warn!("event=board_fetch module=service status=error error={err}");
            board.degrade(format!("Database connection failed: {err}"));
            return board;
        }

        let sink = Arc::clone(&board.shared);
        board.subscription = Some(db.tasks().observe(move |emission| sink.apply(emission)));
        info!("event=board_start module=service status=ok");
        board
    }

    pub fn state(&self) -> BoardState {
        self.shared.state.lock().clone()
    }

    pub fn task_count(&self) -> usize {
        self.shared.state.lock().tasks.len()
    }

    /// Blocks until the first snapshot or a failure, up to `timeout`.
    ///
    /// On timeout the board degrades to the not-persisting message.
    pub fn wait_until_loaded(&self, timeout: Duration) -> BoardState {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.is_loading() {
            let now = Instant::now();
            if now >= deadline {
                warn!("event=board_load module=service status=error reason=timeout");
                state.phase = BoardPhase::Degraded(NOT_PERSISTING_MESSAGE.to_string());
                self.shared.changed.notify_all();
                break;
            }
            self.shared.changed.wait_for(&mut state, deadline - now);
        }
        state.clone()
    }

    /// Creates a task from the input box text.
    ///
    /// Blank input is ignored and returns `None`. A failed write sets the
    /// board message and also returns `None`; the list is unchanged.
    pub fn submit(&self, input: &str) -> Option<Task> {
        match self.service.create_task(input) {
            Ok(task) => Some(task),
            Err(TaskServiceError::EmptyTitle) => None,
            Err(TaskServiceError::Store(err)) => {
                warn!("event=board_submit module=service status=error error={err}");
                self.degrade(CREATE_FAILED_MESSAGE.to_string());
                None
            }
        }
    }

    /// Live note count for one row of the board.
    pub fn observe_note_count(
        &self,
        task: &Task,
        callback: impl FnMut(Emission<usize>) + Send + 'static,
    ) -> Subscription {
        task.notes(self.service.database()).observe_count(callback)
    }

    pub fn find_task(&self, id: TaskId) -> Option<Task> {
        self.shared
            .state
            .lock()
            .tasks
            .iter()
            .find(|task| task.id() == id)
            .cloned()
    }

    pub fn service(&self) -> &TaskService {
        &self.service
    }

    fn degrade(&self, message: String) {
        self.shared
            .update(|state| state.phase = BoardPhase::Degraded(message));
    }
}

impl Drop for TaskBoard {
    fn drop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BoardPhase, TaskBoard, CREATE_FAILED_MESSAGE, NOT_PERSISTING_MESSAGE};
    use crate::config::StoreConfig;
    use crate::store::Database;
    use std::time::Duration;

    #[test]
    fn ready_board_tracks_created_tasks() {
        let board = TaskBoard::start(Database::open(&StoreConfig::memory()).unwrap());
        assert_eq!(board.state().phase, BoardPhase::Ready);
        assert_eq!(board.task_count(), 0);

        let task = board.submit(" Widget ").unwrap();
        assert_eq!(board.task_count(), 1);
        assert_eq!(board.find_task(task.id()).unwrap().title(), "Widget");
        assert!(board.submit("   ").is_none());
        assert_eq!(board.task_count(), 1);
    }

    #[test]
    fn unavailable_store_degrades_without_waiting() {
        let board = TaskBoard::start(Database::unavailable("missing native module"));
        let state = board.wait_until_loaded(Duration::from_millis(10));
        assert_eq!(
            state.phase,
            BoardPhase::Degraded(NOT_PERSISTING_MESSAGE.to_string())
        );
        assert!(board.submit("a").is_none());
        assert_eq!(
            board.state().error_message(),
            Some(CREATE_FAILED_MESSAGE)
        );
    }
}
