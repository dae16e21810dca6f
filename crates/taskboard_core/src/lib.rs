//! Core of the Taskboard app: a reactive local store for tasks and notes.
//! Writes are transactional; observers receive committed snapshots only.

pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod schema;
pub mod service;
pub mod store;

pub use config::{BackendConfig, ConfigError, StoreConfig};
pub use db::{AdapterKind, DbError, DbResult, StorageAdapter};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::{
    DecodeError, Note, NoteDraft, NoteId, NoteKind, RecordValidationError, Task, TaskDraft,
    TaskId, Timestamp, DEFAULT_TASK_PRIORITY, TASK_COLOR_PALETTE,
};
pub use schema::{Table, APP_SCHEMA};
pub use service::board::{BoardPhase, BoardState, TaskBoard};
pub use service::task_service::{TaskService, TaskServiceError};
pub use store::{
    Collection, Database, Emission, ObservationError, ObservationErrorKind, Query, StoreError,
    StoreResult, StoreStatus, Subscription,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
