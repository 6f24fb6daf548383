//! TaskStore port: durable task table.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{NewTask, StoreError, TaskId, TaskRecord, TaskStatus, TaskType};

/// Task counts by status for one task type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl QueueCounts {
    pub fn add(&mut self, status: TaskStatus, n: usize) {
        match status {
            TaskStatus::Pending => self.pending += n,
            TaskStatus::Processing => self.processing += n,
            TaskStatus::Completed => self.completed += n,
            TaskStatus::Failed => self.failed += n,
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.processing + self.completed + self.failed
    }
}

/// Durable storage for task records.
///
/// The store is the single source of truth shared by every worker process.
/// Implementations must make `claim_batch` atomic: a row is handed out only
/// if it is still `pending` at the moment of the claim, so two claimers never
/// receive the same task.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Inserts a pending task unless `(task_type, task_key)` already exists in
    /// any status. Returns whether a row was created.
    async fn insert_if_absent(&self, task: NewTask, now: DateTime<Utc>)
    -> Result<bool, StoreError>;

    /// Claims up to `limit` pending tasks, highest priority first, then oldest
    /// first. Claimed tasks are `processing` with `started_at = now`.
    async fn claim_batch(
        &self,
        task_type: TaskType,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError>;

    async fn complete(&self, id: TaskId, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Counts a failed attempt. Returns the resulting status.
    async fn fail(&self, id: TaskId, error: String) -> Result<TaskStatus, StoreError>;

    async fn fail_permanently(&self, id: TaskId, error: String) -> Result<(), StoreError>;

    /// Hands claimed tasks back without counting an attempt.
    async fn release(&self, ids: &[TaskId]) -> Result<usize, StoreError>;

    /// Resets `processing` tasks started before `started_before` to `pending`.
    async fn reset_stale(
        &self,
        task_type: TaskType,
        started_before: DateTime<Utc>,
    ) -> Result<usize, StoreError>;

    async fn stats(&self, task_type: TaskType) -> Result<QueueCounts, StoreError>;

    /// Failed -> pending with attempts reset, for one type or all of them.
    async fn retry_failed(&self, task_type: Option<TaskType>) -> Result<usize, StoreError>;

    async fn get(&self, task_type: TaskType, task_key: &str)
    -> Result<Option<TaskRecord>, StoreError>;

    /// Deletes every task.
    async fn purge(&self) -> Result<usize, StoreError>;
}
