//! Outcome of a successfully handled task.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// Work was done and something was stored.
    Success,
    /// Nothing to do on the remote side (e.g. a profile that no longer
    /// exists). Still completes the task.
    Empty,
}

/// What a stage reports back to the worker loop on success.
///
/// `fanned_out` counts downstream tasks that were actually created, so
/// duplicates that hit an existing key are not included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default)]
    pub records: usize,

    #[serde(default)]
    pub fanned_out: usize,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            records: 0,
            fanned_out: 0,
            note: None,
        }
    }

    pub fn empty(note: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Empty,
            records: 0,
            fanned_out: 0,
            note: Some(note.into()),
        }
    }

    pub fn with_records(mut self, records: usize) -> Self {
        self.records = records;
        self
    }

    pub fn with_fanned_out(mut self, fanned_out: usize) -> Self {
        self.fanned_out = fanned_out;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}
