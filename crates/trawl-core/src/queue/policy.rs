//! Per-stage tunables.

use std::collections::HashMap;
use std::time::Duration;

use super::retry::BackoffPolicy;
use crate::domain::TaskType;

/// How a stage treats failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StagePolicy {
    /// Failed executions before a task is marked `failed`.
    pub max_attempts: u32,
    /// Failures in a row that stop the current run.
    pub max_consecutive_failures: u32,
    /// `processing` tasks older than this are presumed abandoned.
    pub processing_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl StagePolicy {
    pub fn defaults_for(task_type: TaskType) -> Self {
        let backoff = match task_type {
            TaskType::ScrapePost | TaskType::ScrapeProfile => BackoffPolicy::scraping(),
            TaskType::FetchPosts | TaskType::EnrichPerson => BackoffPolicy::api(),
        };
        Self {
            max_attempts: 3,
            max_consecutive_failures: 5,
            processing_timeout: Duration::from_secs(10 * 60),
            backoff,
        }
    }
}

/// Policies for every task type, falling back to the built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct StagePolicies {
    overrides: HashMap<TaskType, StagePolicy>,
}

impl StagePolicies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, task_type: TaskType, policy: StagePolicy) -> Self {
        self.overrides.insert(task_type, policy);
        self
    }

    /// Applies `f` to the policy of every task type.
    pub fn map_all(mut self, f: impl Fn(&mut StagePolicy)) -> Self {
        for task_type in TaskType::ALL {
            let mut policy = self.get(task_type);
            f(&mut policy);
            self.overrides.insert(task_type, policy);
        }
        self
    }

    pub fn get(&self, task_type: TaskType) -> StagePolicy {
        self.overrides
            .get(&task_type)
            .copied()
            .unwrap_or_else(|| StagePolicy::defaults_for(task_type))
    }
}
