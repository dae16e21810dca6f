//! Reactive store: write coordination, reads and live observation.
//!
//! # Responsibility
//! - Own the storage adapter behind a single writer lock.
//! - Run `write` closures as all-or-nothing transactions.
//! - Publish one consolidated snapshot per changed table after commit.
//! - Degrade to an explicit unavailable state when setup fails.
//!
//! # Invariants
//! - At most one write transaction is in flight; other threads wait.
//! - `write` is reentrant on the owning thread: nested calls join the
//!   outer transaction, and a failed nested call aborts it.
//! - Mutations outside `write` fail with `NotInWriteContext`.
//! - Observers never see uncommitted or partially applied state.

use crate::config::StoreConfig;
use crate::db::{open_adapter, AdapterKind, DbError, StorageAdapter};
use crate::model::{DecodeError, Note, RecordValidationError, Task};
use crate::schema::Table;
use log::{error, info, warn};
use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::thread;

mod collection;
mod observe;

pub use collection::{Collection, Query};
pub use observe::{Emission, ObservationError, ObservationErrorKind, Subscription};

use observe::{ChangeHub, PendingInitial, Publication, TableListener};

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Backend failed to open; returned by `Database::open`.
    Setup(DbError),
    /// Store is running in degraded mode after a setup failure.
    Unavailable { reason: String },
    NotInWriteContext,
    /// `write` was called from inside an observer callback.
    WriteDuringDispatch,
    /// A nested write failed, so the enclosing transaction was rolled back.
    TransactionAborted,
    NotFound { table: Table, id: String },
    Validation(RecordValidationError),
    Decode(DecodeError),
    Db(DbError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup(err) => write!(f, "store setup failed: {err}"),
            Self::Unavailable { reason } => write!(f, "store unavailable: {reason}"),
            Self::NotInWriteContext => write!(f, "not in write context"),
            Self::WriteDuringDispatch => {
                write!(f, "write called from inside an observer callback")
            }
            Self::TransactionAborted => {
                write!(f, "transaction aborted after a nested write failed")
            }
            Self::NotFound { table, id } => write!(f, "{table} record not found: {id}"),
            Self::Validation(err) => write!(f, "{err}"),
            Self::Decode(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Setup(err) => Some(err),
            Self::Validation(err) => Some(err),
            Self::Decode(err) => Some(err),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::RecordNotFound { table, id } => Self::NotFound { table, id },
            other => Self::Db(other),
        }
    }
}

impl From<RecordValidationError> for StoreError {
    fn from(value: RecordValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<DecodeError> for StoreError {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

/// Store health as seen by the rendering surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreStatus {
    Ready { adapter: AdapterKind },
    Unavailable { reason: String },
}

struct Session {
    adapter: Box<dyn StorageAdapter>,
    depth: u32,
    rollback_only: bool,
    versions: BTreeMap<Table, u64>,
    pending_initial: Vec<PendingInitial>,
}

impl Session {
    fn version(&self, table: Table) -> u64 {
        self.versions.get(&table).copied().unwrap_or(0)
    }

    fn bump(&mut self, table: Table) -> u64 {
        let version = self.versions.entry(table).or_insert(0);
        *version += 1;
        *version
    }
}

enum Backend {
    Ready {
        kind: AdapterKind,
        session: ReentrantMutex<RefCell<Session>>,
    },
    Unavailable {
        reason: String,
    },
}

struct Inner {
    backend: Backend,
    hub: Arc<ChangeHub>,
}

/// Handle to one reactive store. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Opens the configured backend.
    ///
    /// # Errors
    /// - `Setup` when the backend cannot initialize.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let adapter = open_adapter(config).map_err(StoreError::Setup)?;
        Ok(Self::from_adapter(adapter))
    }

    /// Opens the configured backend, falling back to degraded mode.
    ///
    /// A failed setup is logged once; the returned store answers every
    /// read, write and observe with an explicit unavailable state.
    pub fn open_or_unavailable(config: &StoreConfig) -> Self {
        match open_adapter(config) {
            Ok(adapter) => Self::from_adapter(adapter),
            Err(err) => Self::unavailable(err.to_string()),
        }
    }

    /// Wraps an already opened adapter.
    pub fn from_adapter(adapter: Box<dyn StorageAdapter>) -> Self {
        let kind = adapter.kind();
        info!(
            "event=store_ready module=store status=ok adapter={}",
            kind.as_str()
        );
        Self {
            inner: Arc::new(Inner {
                backend: Backend::Ready {
                    kind,
                    session: ReentrantMutex::new(RefCell::new(Session {
                        adapter,
                        depth: 0,
                        rollback_only: false,
                        versions: BTreeMap::new(),
                        pending_initial: Vec::new(),
                    })),
                },
                hub: Arc::new(ChangeHub::new()),
            }),
        }
    }

    /// Builds a store that never initialized.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        error!("event=store_unavailable module=store status=error reason={reason}");
        Self {
            inner: Arc::new(Inner {
                backend: Backend::Unavailable { reason },
                hub: Arc::new(ChangeHub::new()),
            }),
        }
    }

    pub fn status(&self) -> StoreStatus {
        match &self.inner.backend {
            Backend::Ready { kind, .. } => StoreStatus::Ready { adapter: *kind },
            Backend::Unavailable { reason } => StoreStatus::Unavailable {
                reason: reason.clone(),
            },
        }
    }

    pub fn tasks(&self) -> Collection<Task> {
        Collection::new(self.clone())
    }

    pub fn notes(&self) -> Collection<Note> {
        Collection::new(self.clone())
    }

    /// Runs `f` as one atomic write transaction.
    ///
    /// Either every mutation made inside `f` commits and each changed
    /// table publishes exactly one snapshot, or nothing is applied and
    /// nothing is published. Calls from other threads wait for the
    /// in-flight write to finish.
    ///
    /// # Errors
    /// - The error returned by `f`, after rollback.
    /// - `TransactionAborted` when a nested write failed but `f`
    ///   returned `Ok`.
    /// - `WriteDuringDispatch` when called from an observer callback.
    pub fn write<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        if observe::in_dispatch(self.inner.hub.id()) {
            return Err(StoreError::WriteDuringDispatch.into());
        }
        let session = self.session()?;
        let guard = session.lock();

        let outermost = {
            let mut state = guard.borrow_mut();
            if state.depth == 0 {
                state.adapter.begin().map_err(StoreError::from)?;
                state.rollback_only = false;
            }
            state.depth += 1;
            state.depth == 1
        };
        let mut scope = WriteScope {
            session: &*guard,
            outermost,
            finished: false,
        };
        let result = f();
        scope.finished = true;
        drop(scope);

        let mut state = guard.borrow_mut();
        state.depth -= 1;
        if !outermost {
            if result.is_err() {
                state.rollback_only = true;
            }
            return result;
        }

        let value = match result {
            Ok(value) if !state.rollback_only => value,
            Ok(_) => {
                rollback(&mut state);
                let initial = self.take_initial(&mut state);
                drop(state);
                drop(guard);
                self.deliver_initial(initial);
                return Err(StoreError::TransactionAborted.into());
            }
            Err(err) => {
                rollback(&mut state);
                let initial = self.take_initial(&mut state);
                drop(state);
                drop(guard);
                self.deliver_initial(initial);
                return Err(err);
            }
        };

        let changes = match state.adapter.commit() {
            Ok(changes) => changes,
            Err(err) => {
                error!("event=write_commit module=store status=error error={err}");
                rollback(&mut state);
                let initial = self.take_initial(&mut state);
                drop(state);
                drop(guard);
                self.deliver_initial(initial);
                return Err(StoreError::from(err).into());
            }
        };

        let publication = if changes.is_empty() {
            None
        } else {
            let ticket = self.inner.hub.issue_ticket();
            let tables = changes
                .tables()
                .map(|table| {
                    let version = state.bump(table);
                    let snapshot = state
                        .adapter
                        .scan(table, None)
                        .map(Arc::new)
                        .map_err(|err| ObservationError::storage(table, &err));
                    (table, version, snapshot)
                })
                .collect::<Vec<_>>();
            info!(
                "event=write_commit module=store status=ok ticket={} tables={}",
                ticket,
                tables
                    .iter()
                    .map(|(table, _, _)| table.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            );
            Some(Publication { ticket, tables })
        };
        let initial = self.take_initial(&mut state);
        drop(state);
        drop(guard);

        if let Some(publication) = publication {
            self.inner.hub.publish(publication);
        }
        self.deliver_initial(initial);
        Ok(value)
    }

    /// True when the current thread is inside `write`.
    pub fn in_write_context(&self) -> bool {
        match &self.inner.backend {
            // Another thread holding the lock means this one is not writing.
            Backend::Ready { session, .. } => session
                .try_lock()
                .map_or(false, |guard| {
                    let depth = guard.borrow().depth;
                    depth > 0
                }),
            Backend::Unavailable { .. } => false,
        }
    }

    fn session(&self) -> StoreResult<&ReentrantMutex<RefCell<Session>>> {
        match &self.inner.backend {
            Backend::Ready { session, .. } => Ok(session),
            Backend::Unavailable { reason } => Err(StoreError::Unavailable {
                reason: reason.clone(),
            }),
        }
    }

    /// Runs a read against the adapter.
    pub(crate) fn read<T>(
        &self,
        f: impl FnOnce(&dyn StorageAdapter) -> Result<T, DbError>,
    ) -> StoreResult<T> {
        let session = self.session()?;
        let guard = session.lock();
        let state = guard.borrow();
        Ok(f(state.adapter.as_ref())?)
    }

    /// Runs a mutation; only allowed inside `write`.
    pub(crate) fn mutate(
        &self,
        f: impl FnOnce(&mut dyn StorageAdapter) -> Result<(), DbError>,
    ) -> StoreResult<()> {
        let session = self.session()?;
        let guard = session.lock();
        let mut state = guard.borrow_mut();
        if state.depth == 0 {
            return Err(StoreError::NotInWriteContext);
        }
        Ok(f(state.adapter.as_mut())?)
    }

    /// Registers `listener` and delivers its first snapshot.
    ///
    /// Never blocks on another thread's write. Inside a write the first
    /// snapshot waits until the transaction ends; while another thread
    /// holds the writer lock it is delivered from a helper thread once that
    /// write settles. Either way it is taken from committed state only.
    pub(crate) fn observe_table(
        &self,
        table: Table,
        listener: Arc<dyn TableListener>,
    ) -> Subscription {
        let subscription =
            Subscription::new(table, Arc::clone(&listener), Arc::downgrade(&self.inner.hub));

        let session = match &self.inner.backend {
            Backend::Ready { session, .. } => session,
            Backend::Unavailable { reason } => {
                warn!("event=observe_start module=store status=error table={table} reason=unavailable");
                listener.fail(&ObservationError::unavailable(reason));
                return subscription;
            }
        };

        let initial = match session.try_lock() {
            Some(guard) => {
                let mut state = guard.borrow_mut();
                self.inner.hub.register(table, Arc::clone(&listener));
                if state.depth > 0 {
                    state.pending_initial.push(PendingInitial {
                        table,
                        listener: Arc::clone(&listener),
                    });
                    None
                } else {
                    Some(scan_initial(&state, table))
                }
            }
            None => {
                self.inner.hub.register(table, Arc::clone(&listener));
                self.deliver_initial_later(table, Arc::clone(&listener));
                None
            }
        };

        info!(
            "event=observe_start module=store status=ok table={} listener_id={}",
            table,
            listener.id()
        );
        if let Some((version, snapshot)) = initial {
            deliver_one(table, &*listener, version, snapshot);
        }
        subscription
    }

    /// Waits for the writer lock off the caller's thread, then delivers the
    /// first snapshot. A commit published meanwhile carries the same table
    /// version, so the listener sees that state once.
    fn deliver_initial_later(&self, table: Table, listener: Arc<dyn TableListener>) {
        let db = self.clone();
        let waiting = Arc::clone(&listener);
        let spawned = thread::Builder::new()
            .name("taskboard-observe".to_string())
            .spawn(move || {
                let Ok(session) = db.session() else {
                    return;
                };
                let (version, snapshot) = {
                    let guard = session.lock();
                    let state = guard.borrow();
                    scan_initial(&state, table)
                };
                deliver_one(table, &*waiting, version, snapshot);
            });
        if let Err(err) = spawned {
            let error = ObservationError::storage(table, &DbError::Io(err));
            warn!("event=observe_start module=store status=error table={table} error={error}");
            listener.fail(&error);
        }
    }

    pub(crate) fn next_listener_id(&self) -> u64 {
        self.inner.hub.next_listener_id()
    }

    pub(crate) fn hub_id(&self) -> u64 {
        self.inner.hub.id()
    }

    /// Number of open observers on `table`.
    pub fn observer_count(&self, table: Table) -> usize {
        self.inner.hub.listener_count(table)
    }

    fn take_initial(
        &self,
        state: &mut Session,
    ) -> Vec<(Table, Arc<dyn TableListener>, u64, observe::TableSnapshot)> {
        std::mem::take(&mut state.pending_initial)
            .into_iter()
            .map(|pending| {
                let (version, snapshot) = scan_initial(state, pending.table);
                (pending.table, pending.listener, version, snapshot)
            })
            .collect()
    }

    fn deliver_initial(
        &self,
        initial: Vec<(Table, Arc<dyn TableListener>, u64, observe::TableSnapshot)>,
    ) {
        for (table, listener, version, snapshot) in initial {
            deliver_one(table, &*listener, version, snapshot);
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("status", &self.status())
            .finish()
    }
}

/// Restores writer state if a write closure panics.
struct WriteScope<'a> {
    session: &'a RefCell<Session>,
    outermost: bool,
    finished: bool,
}

impl Drop for WriteScope<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(mut state) = self.session.try_borrow_mut() {
            state.depth = state.depth.saturating_sub(1);
            if self.outermost {
                rollback(&mut state);
                state.pending_initial.clear();
            } else {
                state.rollback_only = true;
            }
        }
    }
}

fn rollback(state: &mut Session) {
    match state.adapter.rollback() {
        Ok(()) => info!("event=write_rollback module=store status=ok"),
        Err(err) => error!("event=write_rollback module=store status=error error={err}"),
    }
    state.rollback_only = false;
}

fn scan_initial(state: &Session, table: Table) -> (u64, observe::TableSnapshot) {
    let snapshot = state
        .adapter
        .scan(table, None)
        .map(Arc::new)
        .map_err(|err| ObservationError::storage(table, &err));
    (state.version(table), snapshot)
}

fn deliver_one(
    table: Table,
    listener: &dyn TableListener,
    version: u64,
    snapshot: observe::TableSnapshot,
) {
    match snapshot {
        Ok(records) => listener.deliver(version, &records),
        Err(err) => {
            warn!("event=observe_error module=store status=error table={table} error={err}");
            listener.fail(&err);
        }
    }
}

