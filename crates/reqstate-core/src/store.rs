//! Scoped stores — where each execution unit keeps its [`ContextRecord`].
//!
//! A record is confined to the unit that owns it, so no store takes a lock.
//! Three flavours are provided:
//!
//! - [`LocalStore`]: the record is a plain value owned by the caller and
//!   passed down its call chain.
//! - [`ThreadStore`]: one record per OS thread, for pooled synchronous
//!   workers.
//! - [`TaskStore`]: one record per tokio task, established with
//!   [`TaskStore::scope`]. The record follows the task across worker threads.
//!
//! None of the stores tear a record down on their own. The owner of the unit
//! must call [`ScopedStore::clear`] between logical requests, otherwise the
//! previous request's record is still there on the next reuse.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqstate_protocol::{IdentityRef, Locale};
use tracing::trace;

/// Opaque caller-defined value carried alongside the identities. Never serialized.
pub type ViewContext = Arc<dyn Any + Send + Sync>;

/// Per-unit request state: metadata plus one entry per filled identity slot.
#[derive(Clone)]
pub struct ContextRecord {
    pub(crate) started: DateTime<Utc>,
    pub(crate) request_id: Option<String>,
    pub(crate) locale: Option<Locale>,
    pub(crate) view_context: Option<ViewContext>,
    pub(crate) slots: HashMap<String, IdentityRef>,
}

impl ContextRecord {
    /// A fresh record stamped with `started`.
    pub fn new(started: DateTime<Utc>) -> Self {
        Self {
            started,
            request_id: None,
            locale: None,
            view_context: None,
            slots: HashMap::new(),
        }
    }

    pub fn started(&self) -> DateTime<Utc> {
        self.started
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn locale(&self) -> Option<&Locale> {
        self.locale.as_ref()
    }

    pub fn slot(&self, slot: &str) -> Option<&IdentityRef> {
        self.slots.get(slot)
    }

    /// Overwrite a slot; `None` empties it.
    pub(crate) fn set_slot(&mut self, slot: &str, identity: Option<IdentityRef>) {
        match identity {
            Some(identity) => {
                self.slots.insert(slot.to_string(), identity);
            }
            None => {
                self.slots.remove(slot);
            }
        }
    }
}

impl fmt::Debug for ContextRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextRecord")
            .field("started", &self.started)
            .field("request_id", &self.request_id)
            .field("locale", &self.locale)
            .field("view_context", &self.view_context.is_some())
            .field("slots", &self.slots)
            .finish()
    }
}

/// Get-or-create and delete of one record, keyed to the calling unit.
pub trait ScopedStore {
    /// Run `f` against the unit's record, creating it with `init` first if
    /// there is none. Never fails.
    ///
    /// `f` must not call back into the same store.
    fn with_record<T>(
        &self,
        init: impl FnOnce() -> ContextRecord,
        f: impl FnOnce(&mut ContextRecord) -> T,
    ) -> T;

    /// Drop the unit's record. No-op when there is none.
    fn clear(&self);

    /// Whether the unit currently has a record.
    fn is_present(&self) -> bool;
}

type RecordCell = RefCell<Option<ContextRecord>>;

fn with_cell<T>(
    cell: &RecordCell,
    init: impl FnOnce() -> ContextRecord,
    f: impl FnOnce(&mut ContextRecord) -> T,
) -> T {
    let mut slot = cell.borrow_mut();
    f(slot.get_or_insert_with(init))
}

// ─────────────────────────────────────────────────────────────────────────────
// LocalStore
// ─────────────────────────────────────────────────────────────────────────────

/// A record owned by the value itself — thread it through the call chain.
#[derive(Debug, Default)]
pub struct LocalStore {
    cell: RecordCell,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the record out, leaving the store empty.
    pub fn take(&self) -> Option<ContextRecord> {
        self.cell.borrow_mut().take()
    }
}

impl ScopedStore for LocalStore {
    fn with_record<T>(
        &self,
        init: impl FnOnce() -> ContextRecord,
        f: impl FnOnce(&mut ContextRecord) -> T,
    ) -> T {
        with_cell(&self.cell, init, f)
    }

    fn clear(&self) {
        self.cell.borrow_mut().take();
    }

    fn is_present(&self) -> bool {
        self.cell.borrow().is_some()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ThreadStore
// ─────────────────────────────────────────────────────────────────────────────

thread_local! {
    static THREAD_RECORD: RecordCell = const { RefCell::new(None) };
}

/// One record per OS thread. All `ThreadStore` handles on a thread share it.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadStore;

impl ScopedStore for ThreadStore {
    fn with_record<T>(
        &self,
        init: impl FnOnce() -> ContextRecord,
        f: impl FnOnce(&mut ContextRecord) -> T,
    ) -> T {
        THREAD_RECORD.with(|cell| with_cell(cell, init, f))
    }

    fn clear(&self) {
        THREAD_RECORD.with(|cell| cell.borrow_mut().take());
    }

    fn is_present(&self) -> bool {
        THREAD_RECORD.with(|cell| cell.borrow().is_some())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TaskStore
// ─────────────────────────────────────────────────────────────────────────────

tokio::task_local! {
    static TASK_RECORD: RecordCell;
}

/// One record per tokio task.
///
/// Work must run inside [`TaskStore::scope`] (or [`TaskStore::sync_scope`])
/// to get a task-confined record. Outside any scope the store falls back to
/// the calling thread's record, same as [`ThreadStore`].
#[derive(Debug, Default, Clone, Copy)]
pub struct TaskStore;

impl TaskStore {
    /// Run `fut` with its own, initially empty, record.
    pub async fn scope<F: Future>(fut: F) -> F::Output {
        TASK_RECORD.scope(RefCell::new(None), fut).await
    }

    /// Run `f` with its own, initially empty, record.
    pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
        TASK_RECORD.sync_scope(RefCell::new(None), f)
    }

    /// Whether the caller runs inside a task scope.
    pub fn in_scope() -> bool {
        TASK_RECORD.try_with(|_| ()).is_ok()
    }
}

impl ScopedStore for TaskStore {
    fn with_record<T>(
        &self,
        init: impl FnOnce() -> ContextRecord,
        f: impl FnOnce(&mut ContextRecord) -> T,
    ) -> T {
        if Self::in_scope() {
            TASK_RECORD.with(|cell| with_cell(cell, init, f))
        } else {
            trace!("no task scope, using thread record");
            ThreadStore.with_record(init, f)
        }
    }

    fn clear(&self) {
        if Self::in_scope() {
            TASK_RECORD.with(|cell| cell.borrow_mut().take());
        } else {
            ThreadStore.clear();
        }
    }

    fn is_present(&self) -> bool {
        if Self::in_scope() {
            TASK_RECORD.with(|cell| cell.borrow().is_some())
        } else {
            ThreadStore.is_present()
        }
    }
}
