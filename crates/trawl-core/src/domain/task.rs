//! Task records and task types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::StoreError;
use super::ids::TaskId;
use super::state::TaskStatus;

/// Longest error message persisted on a task, in characters.
pub const MAX_ERROR_CHARS: usize = 500;

/// One tag per pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Page through the post feed for a date window.
    FetchPosts,
    /// Scrape a post page for its makers.
    ScrapePost,
    /// Scrape a maker's profile page.
    ScrapeProfile,
    /// Run enrichment channels for a person.
    EnrichPerson,
}

impl TaskType {
    /// Pipeline order.
    pub const ALL: [TaskType; 4] = [
        TaskType::FetchPosts,
        TaskType::ScrapePost,
        TaskType::ScrapeProfile,
        TaskType::EnrichPerson,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::FetchPosts => "fetch_posts",
            TaskType::ScrapePost => "scrape_post",
            TaskType::ScrapeProfile => "scrape_profile",
            TaskType::EnrichPerson => "enrich_person",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown task type '{s}'"))
    }
}

/// Request to create a task. `max_attempts` comes from the stage policy.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub task_type: TaskType,
    pub task_key: String,
    pub params: serde_json::Value,
    pub priority: i64,
    pub max_attempts: u32,
}

/// A task as stored.
///
/// All state transitions live here so every store applies the same rules.
/// `attempts` counts failed executions; completing or releasing a task does
/// not touch it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub task_key: String,
    pub params: serde_json::Value,
    pub priority: i64,
    pub status: TaskStatus,
    pub attempts: u32,
    pub max_attempts: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    pub fn new(id: TaskId, task: NewTask, now: DateTime<Utc>) -> Self {
        Self {
            id,
            task_type: task.task_type,
            task_key: task.task_key,
            params: task.params,
            priority: task.priority,
            status: TaskStatus::Pending,
            attempts: 0,
            max_attempts: task.max_attempts,
            error: None,
            created_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    fn expect_status(&self, expected: TaskStatus) -> Result<(), StoreError> {
        if self.status == expected {
            Ok(())
        } else {
            Err(StoreError::InvalidTransition {
                id: self.id,
                from: self.status,
                expected,
            })
        }
    }

    /// Pending -> Processing.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.expect_status(TaskStatus::Pending)?;
        self.status = TaskStatus::Processing;
        self.started_at = Some(now);
        Ok(())
    }

    /// Processing -> Completed.
    pub fn complete(&mut self, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.expect_status(TaskStatus::Processing)?;
        self.status = TaskStatus::Completed;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Records a failed execution. Back to Pending while attempts remain,
    /// Failed once `attempts` reaches `max_attempts`.
    pub fn fail(&mut self, error: String) -> Result<TaskStatus, StoreError> {
        self.expect_status(TaskStatus::Processing)?;
        self.attempts += 1;
        self.error = Some(error);
        if self.attempts >= self.max_attempts {
            self.status = TaskStatus::Failed;
        } else {
            self.status = TaskStatus::Pending;
            self.started_at = None;
        }
        Ok(self.status)
    }

    /// Processing -> Failed regardless of remaining attempts.
    pub fn fail_permanently(&mut self, error: String) -> Result<(), StoreError> {
        self.expect_status(TaskStatus::Processing)?;
        self.attempts += 1;
        self.error = Some(error);
        self.status = TaskStatus::Failed;
        Ok(())
    }

    /// Processing -> Pending without counting an attempt.
    pub fn release(&mut self) -> Result<(), StoreError> {
        self.expect_status(TaskStatus::Processing)?;
        self.status = TaskStatus::Pending;
        self.started_at = None;
        Ok(())
    }

    /// Failed -> Pending with a fresh attempt budget.
    pub fn retry(&mut self) -> Result<(), StoreError> {
        self.expect_status(TaskStatus::Failed)?;
        self.status = TaskStatus::Pending;
        self.attempts = 0;
        self.error = None;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// Processing and started strictly before `cutoff`.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        self.status == TaskStatus::Processing
            && self.started_at.is_some_and(|started| started < cutoff)
    }
}

/// Cuts an error message down to `MAX_ERROR_CHARS` characters.
pub fn truncate_error(error: &str) -> String {
    error.chars().take(MAX_ERROR_CHARS).collect()
}
