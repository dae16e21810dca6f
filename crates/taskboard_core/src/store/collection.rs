//! Typed table handles and live queries.

use super::observe::{Emission, QueryListener, Subscription};
use super::{Database, StoreError, StoreResult};
use crate::db::{ColumnFilter, ColumnValue};
use crate::model::{Model, Task, TaskDraft, Timestamp};
use std::marker::PhantomData;
use std::sync::Arc;
use uuid::Uuid;

/// Handle over one table of typed records.
pub struct Collection<M: Model> {
    db: Database,
    marker: PhantomData<fn() -> M>,
}

impl<M: Model> Collection<M> {
    pub(crate) fn new(db: Database) -> Self {
        Self {
            db,
            marker: PhantomData,
        }
    }

    /// Reads one record by id.
    ///
    /// # Errors
    /// - `NotFound` when no row has this id.
    pub fn find(&self, id: Uuid) -> StoreResult<M> {
        let key = id.to_string();
        let raw = self
            .db
            .read(|adapter| adapter.find(M::TABLE, &key))?
            .ok_or_else(|| StoreError::NotFound {
                table: M::TABLE,
                id: key,
            })?;
        Ok(M::from_raw(&raw)?)
    }

    /// All records in insertion order.
    pub fn fetch_all(&self) -> StoreResult<Vec<M>> {
        self.query().fetch()
    }

    /// Number of committed records in the table.
    pub fn fetch_count(&self) -> StoreResult<usize> {
        self.query().fetch_count()
    }

    pub fn query(&self) -> Query<M> {
        Query {
            db: self.db.clone(),
            filter: None,
            distinct: false,
            marker: PhantomData,
        }
    }

    /// Observes the whole table; shorthand for `query().observe(..)`.
    pub fn observe(&self, callback: impl FnMut(Emission<Vec<M>>) + Send + 'static) -> Subscription {
        self.query().observe(callback)
    }

    /// Persists a new record. Only valid inside `Database::write`.
    pub(crate) fn insert(&self, record: &M) -> StoreResult<()> {
        let raw = record.to_raw();
        self.db.mutate(|adapter| adapter.insert(M::TABLE, &raw))
    }

    /// Replaces a stored record. Only valid inside `Database::write`.
    pub(crate) fn replace(&self, record: &M) -> StoreResult<()> {
        let raw = record.to_raw();
        self.db.mutate(|adapter| adapter.update(M::TABLE, &raw))
    }
}

impl<M: Model> Clone for Collection<M> {
    fn clone(&self) -> Self {
        Self::new(self.db.clone())
    }
}

impl Collection<Task> {
    /// Creates a task with a fresh id and `created_at == updated_at`.
    ///
    /// # Errors
    /// - `NotInWriteContext` outside `Database::write`.
    /// - `Validation` when the draft is rejected.
    pub fn create(&self, draft: TaskDraft) -> StoreResult<Task> {
        if !self.db.in_write_context() {
            return Err(StoreError::NotInWriteContext);
        }
        let task = Task::create(draft, Timestamp::now())?;
        self.insert(&task)?;
        Ok(task)
    }

    /// Applies `edit` to the current stored fields of `task`.
    ///
    /// The stored row is re-read so edits from earlier in the same write
    /// are not lost. `updated_at` is refreshed and never moves backwards.
    ///
    /// # Errors
    /// - `NotInWriteContext` outside `Database::write`; nothing changes.
    /// - `NotFound` when the task was never persisted.
    pub fn update(&self, task: &Task, edit: impl FnOnce(&mut TaskDraft)) -> StoreResult<Task> {
        if !self.db.in_write_context() {
            return Err(StoreError::NotInWriteContext);
        }
        let current = self.find(task.id())?;
        let mut draft = current.to_draft();
        edit(&mut draft);
        let updated = current.apply(draft, Timestamp::now())?;
        self.replace(&updated)?;
        Ok(updated)
    }
}

/// A filtered view over one table.
///
/// Unfiltered queries emit every committed snapshot of the table.
/// Relation queries built with a column filter skip emissions whose
/// result equals the previous one.
pub struct Query<M: Model> {
    db: Database,
    filter: Option<ColumnFilter>,
    distinct: bool,
    marker: PhantomData<fn() -> M>,
}

impl<M: Model> Query<M> {
    pub(crate) fn where_eq(mut self, column: &'static str, value: ColumnValue) -> Self {
        self.filter = Some(ColumnFilter::eq(column, value));
        self.distinct = true;
        self
    }

    /// Current committed result.
    pub fn fetch(&self) -> StoreResult<Vec<M>> {
        let rows = self
            .db
            .read(|adapter| adapter.scan(M::TABLE, self.filter.as_ref()))?;
        rows.iter()
            .map(|raw| M::from_raw(raw).map_err(StoreError::from))
            .collect()
    }

    pub fn fetch_count(&self) -> StoreResult<usize> {
        self.fetch().map(|items| items.len())
    }

    /// Emits the current result now, then once per relevant commit.
    ///
    /// Outside a write the first emission happens before this returns.
    /// Inside a write it is delivered once the transaction ends. A
    /// terminal error is delivered as `Err` and ends the stream.
    pub fn observe(
        &self,
        callback: impl FnMut(Emission<Vec<M>>) + Send + 'static,
    ) -> Subscription {
        let listener = QueryListener::<M>::new(
            self.db.next_listener_id(),
            self.db.hub_id(),
            self.filter.clone(),
            self.distinct,
            Box::new(callback),
        );
        self.db.observe_table(M::TABLE, Arc::new(listener))
    }

    /// Emits the result size; repeated counts are suppressed.
    pub fn observe_count(
        &self,
        mut callback: impl FnMut(Emission<usize>) + Send + 'static,
    ) -> Subscription {
        let mut last = None;
        self.observe(move |emission| match emission {
            Ok(items) => {
                let count = items.len();
                if last != Some(count) {
                    last = Some(count);
                    callback(Ok(count));
                }
            }
            Err(err) => callback(Err(err)),
        })
    }
}

impl<M: Model> Clone for Query<M> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            filter: self.filter.clone(),
            distinct: self.distinct,
            marker: PhantomData,
        }
    }
}
