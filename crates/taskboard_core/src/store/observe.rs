//! Per-table publish/subscribe channel with snapshot-on-commit delivery.
//!
//! # Responsibility
//! - Keep the registered listeners of every table.
//! - Deliver post-commit table snapshots in commit order.
//! - Turn raw snapshots into typed, filtered emissions per listener.
//!
//! # Invariants
//! - Only committed, full-table snapshots are ever delivered.
//! - Publications are delivered strictly in ticket (commit) order.
//! - A listener never receives a snapshot older than one it already saw.
//! - A closed listener receives nothing further; an error closes it.

use crate::db::{ColumnFilter, DbError, RawRecord};
use crate::model::{DecodeError, Model};
use crate::schema::Table;
use log::{info, warn};
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// One value delivered to an observer.
pub type Emission<T> = Result<T, ObservationError>;

static NEXT_HUB_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// `(hub_id, listener_id)` of every callback running on this thread.
    static DISPATCHING: RefCell<Vec<(u64, u64)>> = const { RefCell::new(Vec::new()) };
}

/// Whether the current thread is running a callback of the store `hub_id`.
pub(crate) fn in_dispatch(hub_id: u64) -> bool {
    DISPATCHING.with(|stack| stack.borrow().iter().any(|(hub, _)| *hub == hub_id))
}

fn in_listener_dispatch(hub_id: u64, listener_id: u64) -> bool {
    DISPATCHING.with(|stack| stack.borrow().contains(&(hub_id, listener_id)))
}

/// Marks one callback as running on this thread until dropped.
struct DispatchFlag;

impl DispatchFlag {
    fn raise(hub_id: u64, listener_id: u64) -> Self {
        DISPATCHING.with(|stack| stack.borrow_mut().push((hub_id, listener_id)));
        Self
    }
}

impl Drop for DispatchFlag {
    fn drop(&mut self) {
        DISPATCHING.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationErrorKind {
    /// The store never initialized.
    Unavailable,
    /// The backend failed to produce a snapshot.
    Storage,
    /// A stored row could not be decoded.
    Decode,
}

/// Terminal error delivered to every observer of a failed stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservationError {
    pub kind: ObservationErrorKind,
    pub message: String,
}

impl ObservationError {
    pub(crate) fn unavailable(reason: &str) -> Self {
        Self {
            kind: ObservationErrorKind::Unavailable,
            message: format!("store unavailable: {reason}"),
        }
    }

    pub(crate) fn storage(table: Table, err: &DbError) -> Self {
        Self {
            kind: ObservationErrorKind::Storage,
            message: format!("{table} snapshot failed: {err}"),
        }
    }

    fn decode(err: &DecodeError) -> Self {
        Self {
            kind: ObservationErrorKind::Decode,
            message: err.to_string(),
        }
    }
}

impl Display for ObservationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for ObservationError {}

/// Snapshot of one table right after a commit.
pub(crate) type TableSnapshot = Result<Arc<Vec<RawRecord>>, ObservationError>;

/// Everything one commit publishes, tagged with its ticket.
pub(crate) struct Publication {
    pub ticket: u64,
    pub tables: Vec<(Table, u64, TableSnapshot)>,
}

/// Deferred initial snapshot for a listener registered mid-transaction.
pub(crate) struct PendingInitial {
    pub table: Table,
    pub listener: Arc<dyn TableListener>,
}

pub(crate) trait TableListener: Send + Sync {
    fn id(&self) -> u64;
    fn deliver(&self, version: u64, records: &[RawRecord]);
    fn fail(&self, error: &ObservationError);
    fn close(&self);
    fn is_closed(&self) -> bool;
}

/// Hands out commit tickets and admits publishers one at a time.
struct Sequencer {
    issued: AtomicU64,
    next: Mutex<u64>,
    turn: Condvar,
}

impl Sequencer {
    fn new() -> Self {
        Self {
            issued: AtomicU64::new(0),
            next: Mutex::new(0),
            turn: Condvar::new(),
        }
    }

    fn issue(&self) -> u64 {
        self.issued.fetch_add(1, Ordering::SeqCst)
    }

    fn wait_turn(&self, ticket: u64) -> Turn<'_> {
        let mut next = self.next.lock();
        while *next != ticket {
            self.turn.wait(&mut next);
        }
        Turn { sequencer: self }
    }
}

/// Advances the sequencer on drop, even if a callback panicked.
struct Turn<'a> {
    sequencer: &'a Sequencer,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        let mut next = self.sequencer.next.lock();
        *next += 1;
        self.sequencer.turn.notify_all();
    }
}

/// Registry of table listeners plus the ordered publication path.
pub(crate) struct ChangeHub {
    id: u64,
    listeners: Mutex<BTreeMap<Table, Vec<Arc<dyn TableListener>>>>,
    sequencer: Sequencer,
    next_listener_id: AtomicU64,
}

impl ChangeHub {
    pub fn new() -> Self {
        Self {
            id: NEXT_HUB_ID.fetch_add(1, Ordering::Relaxed),
            listeners: Mutex::new(BTreeMap::new()),
            sequencer: Sequencer::new(),
            next_listener_id: AtomicU64::new(1),
        }
    }

    /// Process-unique id of this hub, used to scope the dispatch flag.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn next_listener_id(&self) -> u64 {
        self.next_listener_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Issues the next commit ticket. Must be called under the writer lock.
    pub fn issue_ticket(&self) -> u64 {
        self.sequencer.issue()
    }

    pub fn register(&self, table: Table, listener: Arc<dyn TableListener>) {
        self.listeners.lock().entry(table).or_default().push(listener);
    }

    pub fn remove(&self, table: Table, listener_id: u64) {
        let mut listeners = self.listeners.lock();
        if let Some(entries) = listeners.get_mut(&table) {
            entries.retain(|listener| listener.id() != listener_id);
        }
    }

    pub fn listener_count(&self, table: Table) -> usize {
        self.listeners
            .lock()
            .get(&table)
            .map_or(0, |entries| entries.iter().filter(|l| !l.is_closed()).count())
    }

    /// Delivers one commit's snapshots once every earlier ticket is done.
    pub fn publish(&self, publication: Publication) {
        let _turn = self.sequencer.wait_turn(publication.ticket);

        for (table, version, snapshot) in &publication.tables {
            let targets = self.live_listeners(*table);
            match snapshot {
                Ok(records) => {
                    for listener in &targets {
                        listener.deliver(*version, records);
                    }
                }
                Err(error) => {
                    warn!(
                        "event=observe_error module=store status=error table={} listeners={} error={}",
                        table,
                        targets.len(),
                        error
                    );
                    for listener in &targets {
                        listener.fail(error);
                    }
                }
            }
            self.prune(*table);
        }
    }

    fn live_listeners(&self, table: Table) -> Vec<Arc<dyn TableListener>> {
        self.listeners
            .lock()
            .get(&table)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|listener| !listener.is_closed())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn prune(&self, table: Table) {
        let mut listeners = self.listeners.lock();
        if let Some(entries) = listeners.get_mut(&table) {
            entries.retain(|listener| !listener.is_closed());
        }
    }
}

type Sink<M> = Box<dyn FnMut(Emission<Vec<M>>) + Send>;

struct ListenerState<M> {
    last_version: Option<u64>,
    last_emitted: Option<Vec<M>>,
    sink: Sink<M>,
}

/// Typed listener: filters, decodes and optionally deduplicates.
pub(crate) struct QueryListener<M: Model> {
    id: u64,
    hub_id: u64,
    filter: Option<ColumnFilter>,
    distinct: bool,
    closed: AtomicBool,
    state: Mutex<ListenerState<M>>,
}

impl<M: Model> QueryListener<M> {
    pub fn new(
        id: u64,
        hub_id: u64,
        filter: Option<ColumnFilter>,
        distinct: bool,
        sink: Sink<M>,
    ) -> Self {
        Self {
            id,
            hub_id,
            filter,
            distinct,
            closed: AtomicBool::new(false),
            state: Mutex::new(ListenerState {
                last_version: None,
                last_emitted: None,
                sink,
            }),
        }
    }

    fn decode(&self, records: &[RawRecord]) -> Result<Vec<M>, DecodeError> {
        records
            .iter()
            .filter(|record| {
                self.filter
                    .as_ref()
                    .map_or(true, |filter| filter.matches(record))
            })
            .map(M::from_raw)
            .collect()
    }
}

impl<M: Model> TableListener for QueryListener<M> {
    fn id(&self) -> u64 {
        self.id
    }

    fn deliver(&self, version: u64, records: &[RawRecord]) {
        if self.is_closed() {
            return;
        }
        let mut state = self.state.lock();
        if self.is_closed() || state.last_version.is_some_and(|seen| version <= seen) {
            return;
        }
        state.last_version = Some(version);

        match self.decode(records) {
            Ok(items) => {
                if self.distinct {
                    if state.last_emitted.as_ref() == Some(&items) {
                        return;
                    }
                    state.last_emitted = Some(items.clone());
                }
                let _flag = DispatchFlag::raise(self.hub_id, self.id);
                (state.sink)(Ok(items));
            }
            Err(err) => {
                self.closed.store(true, Ordering::SeqCst);
                warn!(
                    "event=observe_error module=store status=error table={} error={}",
                    M::TABLE,
                    err
                );
                let _flag = DispatchFlag::raise(self.hub_id, self.id);
                (state.sink)(Err(ObservationError::decode(&err)));
            }
        }
    }

    fn fail(&self, error: &ObservationError) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut state = self.state.lock();
        let _flag = DispatchFlag::raise(self.hub_id, self.id);
        (state.sink)(Err(error.clone()));
    }

    /// Once this returns, no callback starts and none is still running on
    /// another thread. Closing from inside the listener's own callback
    /// does not wait.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        if !in_listener_dispatch(self.hub_id, self.id) {
            drop(self.state.lock());
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Handle for one active observation.
///
/// Dropping the handle unsubscribes. `unsubscribe` may be called any
/// number of times.
pub struct Subscription {
    table: Table,
    listener: Arc<dyn TableListener>,
    hub: Weak<ChangeHub>,
}

impl Subscription {
    pub(crate) fn new(table: Table, listener: Arc<dyn TableListener>, hub: Weak<ChangeHub>) -> Self {
        Self {
            table,
            listener,
            hub,
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// Stops all further emissions to this observer.
    pub fn unsubscribe(&self) {
        let was_open = !self.listener.is_closed();
        self.listener.close();
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.table, self.listener.id());
        }
        if was_open {
            info!(
                "event=observe_stop module=store status=ok table={} listener_id={}",
                self.table,
                self.listener.id()
            );
        }
    }

    /// True after `unsubscribe` or after a terminal error.
    pub fn is_closed(&self) -> bool {
        self.listener.is_closed()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.table)
            .field("listener_id", &self.listener.id())
            .field("closed", &self.is_closed())
            .finish()
    }
}
