//! Handing request state to work that runs on another task.
//!
//! The request side captures a [`StateRecord`]; the job side runs in a fresh
//! [`TaskStore`] scope hydrated from it, so the job sees the same identities
//! without sharing the request's record.

use std::future::Future;

use reqstate_protocol::{StateError, StateRecord, StateResult};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::container::RequestState;
use crate::store::{ScopedStore, TaskStore};

/// Record the unit's state for a job.
pub fn capture<S: ScopedStore>(state: &RequestState<S>) -> StateRecord {
    state.to_record()
}

/// Run `job` in its own task scope, hydrated from `record`.
///
/// The job's record is dropped with the scope.
pub async fn run_with_record<F, Fut, T>(
    state: RequestState<TaskStore>,
    record: StateRecord,
    job: F,
) -> StateResult<T>
where
    F: FnOnce(RequestState<TaskStore>) -> Fut,
    Fut: Future<Output = T>,
{
    TaskStore::scope(async move {
        state.from_record(&record)?;
        debug!(request_id = ?record.request_id, "running job with handed-off state");
        Ok::<_, StateError>(job(state).await)
    })
    .await
}

/// [`run_with_record`] on a new tokio task.
pub fn spawn_with_record<F, Fut, T>(
    state: RequestState<TaskStore>,
    record: StateRecord,
    job: F,
) -> JoinHandle<StateResult<T>>
where
    F: FnOnce(RequestState<TaskStore>) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(run_with_record(state, record, job))
}
