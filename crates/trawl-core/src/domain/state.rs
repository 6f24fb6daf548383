//! Task status state machine.
//!
//! ```text
//! pending ──claim──▶ processing ──complete──▶ completed
//!    ▲                   │
//!    └──fail (残りあり)───┤
//!                        └──fail (上限到達) / fail_permanently──▶ failed
//! ```
//!
//! `failed` から `pending` に戻すのは `retry_failed` だけ（attempts も 0 に戻る）。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of a queued task.
///
/// Transitions:
/// - Pending -> Processing (claim)
/// - Processing -> Completed (complete)
/// - Processing -> Pending (fail below the attempt ceiling, release, stale reset)
/// - Processing -> Failed (fail at the ceiling, permanent failure)
/// - Failed -> Pending (retry_failed)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 4] = [
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    pub fn is_claimable(self) -> bool {
        matches!(self, TaskStatus::Pending)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status '{s}'"))
    }
}
