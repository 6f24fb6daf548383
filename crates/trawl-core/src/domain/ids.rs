//! Strongly-typed identifiers.
//!
//! Ids are ULIDs wrapped in a phantom-typed `Id<T>`, so a task id can never be
//! confused with another kind of id at compile time. ULIDs sort by creation
//! time, which keeps store dumps readable.
//!
//! ## Phantom Type パターン
//! `Id<T>` の `T` は実行時には使わないマーカー型 (`PhantomData`)。
//! 文字列表現は `T::prefix()` の後に ULID（26 文字、Crockford base32）が続く。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use ulid::Ulid;

/// Marker trait for id kinds. Supplies the Display prefix.
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    /// Fresh id stamped with the current time.
    pub fn generate() -> Self {
        Self::from_ulid(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid id '{0}'")]
pub struct ParseIdError(pub String);

/// Accepts both the prefixed Display form and a bare ULID.
impl<T: IdMarker> FromStr for Id<T> {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.strip_prefix(T::prefix()).unwrap_or(s);
        Ulid::from_string(raw)
            .map(Self::from_ulid)
            .map_err(|_| ParseIdError(s.to_string()))
    }
}

/// Marker for task ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

/// Identifier of a queued task (store-assigned).
pub type TaskId = Id<Task>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_prefix() {
        let id = TaskId::generate();
        assert!(id.to_string().starts_with("task-"));
    }

    #[test]
    fn parses_display_and_bare_forms() {
        let id = TaskId::generate();
        let from_display: TaskId = id.to_string().parse().unwrap();
        let from_bare: TaskId = id.as_ulid().to_string().parse().unwrap();
        assert_eq!(from_display, id);
        assert_eq!(from_bare, id);
    }

    #[test]
    fn rejects_garbage() {
        let err = "task-not-a-ulid".parse::<TaskId>().unwrap_err();
        assert_eq!(err, ParseIdError("task-not-a-ulid".to_string()));
    }

    #[test]
    fn ids_sort_by_creation_time() {
        let first = TaskId::generate();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let second = TaskId::generate();
        assert!(first < second);
    }

    #[test]
    fn phantom_marker_is_free() {
        assert_eq!(std::mem::size_of::<TaskId>(), std::mem::size_of::<Ulid>());
    }
}
