//! Stage capability and its type-erased runner.
//!
//! `Stage<T>` は型付き、`DynWorker` は JSON params のまま受け取る。
//! decode に失敗した task は permanent failure として扱う。

use async_trait::async_trait;

use super::task::Task;
use crate::app::worker_loop::RunReport;
use crate::domain::{HandlerError, Outcome, TaskType, WorkerError};
use crate::queue::TaskQueue;

/// One pipeline step.
///
/// A stage is owned by a single worker for the duration of a run. `setup`
/// acquires run-scoped resources (a scraping session, say) and `teardown`
/// releases them; the worker calls `teardown` on every exit path once
/// `setup` has succeeded.
///
/// `handle` may enqueue downstream work through `queue`. It must not touch
/// the task's own queue-control fields; the worker does that from the
/// returned result.
#[async_trait]
pub trait Stage<T: Task>: Send {
    async fn setup(&mut self) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn handle(&mut self, task: T, queue: &TaskQueue) -> Result<Outcome, HandlerError>;

    async fn teardown(&mut self) {}
}

/// Object-safe runner for one task type, so workers for different `Task`
/// types can live in one registry.
#[async_trait]
pub trait DynWorker: Send {
    fn task_type(&self) -> TaskType;

    /// Drains up to `limit` tasks of this type.
    async fn run(&mut self, limit: usize) -> Result<RunReport, WorkerError>;
}
