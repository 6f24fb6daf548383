//! Task queue: enqueue / claim / transition operations over a `TaskStore`.
//!
//! The queue owns the clock and the per-stage policies so stores stay dumb:
//! they apply `TaskRecord` transitions and nothing else.
//!
//! # 責務の分担
//! - **TaskQueue**: 時刻の決定、stage ごとの `max_attempts` / stale timeout の適用
//! - **TaskStore**: 行の保存と原子的な claim

mod policy;
mod retry;

pub use policy::{StagePolicies, StagePolicy};
pub use retry::BackoffPolicy;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::domain::task::truncate_error;
use crate::domain::{NewTask, StoreError, TaskId, TaskRecord, TaskStatus, TaskType};
use crate::ports::{Clock, QueueCounts, TaskStore};
use crate::typed::Task;

/// Handle to the shared task table. Cheap to clone.
#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
    clock: Arc<dyn Clock>,
    policies: Arc<StagePolicies>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>, clock: Arc<dyn Clock>, policies: StagePolicies) -> Self {
        Self {
            store,
            clock,
            policies: Arc::new(policies),
        }
    }

    pub fn policy(&self, task_type: TaskType) -> StagePolicy {
        self.policies.get(task_type)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Creates a pending task unless `(task_type, task_key)` already exists.
    /// Returns whether a task was created.
    pub async fn enqueue(
        &self,
        task_type: TaskType,
        task_key: impl Into<String>,
        params: serde_json::Value,
        priority: i64,
    ) -> Result<bool, StoreError> {
        let task = NewTask {
            task_type,
            task_key: task_key.into(),
            params,
            priority,
            max_attempts: self.policy(task_type).max_attempts,
        };
        let key = task.task_key.clone();
        let created = self.store.insert_if_absent(task, self.clock.now()).await?;
        debug!(%task_type, task_key = %key, created, "enqueue");
        Ok(created)
    }

    /// Typed form of `enqueue`: type and key come from the params.
    pub async fn enqueue_task<T: Task>(&self, task: &T, priority: i64) -> Result<bool, StoreError> {
        let params = serde_json::to_value(task)?;
        self.enqueue(T::TYPE, task.task_key(), params, priority).await
    }

    pub async fn claim_batch(
        &self,
        task_type: TaskType,
        limit: usize,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.claim_batch(task_type, limit, self.clock.now()).await
    }

    pub async fn complete(&self, id: TaskId) -> Result<(), StoreError> {
        self.store.complete(id, self.clock.now()).await
    }

    /// Counts a failed attempt; the task is re-queued or, at the attempt
    /// ceiling, marked failed.
    pub async fn fail(&self, id: TaskId, error: &str) -> Result<TaskStatus, StoreError> {
        self.store.fail(id, truncate_error(error)).await
    }

    pub async fn fail_permanently(&self, id: TaskId, error: &str) -> Result<(), StoreError> {
        self.store.fail_permanently(id, truncate_error(error)).await
    }

    pub async fn release(&self, ids: &[TaskId]) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        self.store.release(ids).await
    }

    /// Resets tasks stuck in `processing` for longer than `timeout`.
    pub async fn reset_stale(&self, task_type: TaskType, timeout: Duration) -> Result<usize, StoreError> {
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return Ok(0);
        };
        let Some(cutoff) = self.clock.now().checked_sub_signed(timeout) else {
            return Ok(0);
        };
        self.store.reset_stale(task_type, cutoff).await
    }

    pub async fn stats(&self, task_type: TaskType) -> Result<QueueCounts, StoreError> {
        self.store.stats(task_type).await
    }

    /// Counts for every task type, in pipeline order.
    pub async fn stats_all(&self) -> Result<Vec<(TaskType, QueueCounts)>, StoreError> {
        let mut all = Vec::with_capacity(TaskType::ALL.len());
        for task_type in TaskType::ALL {
            all.push((task_type, self.store.stats(task_type).await?));
        }
        Ok(all)
    }

    pub async fn retry_failed(&self, task_type: Option<TaskType>) -> Result<usize, StoreError> {
        self.store.retry_failed(task_type).await
    }

    pub async fn get(&self, task_type: TaskType, task_key: &str) -> Result<Option<TaskRecord>, StoreError> {
        self.store.get(task_type, task_key).await
    }

    pub async fn purge(&self) -> Result<usize, StoreError> {
        self.store.purge().await
    }
}
