//! Task params, one strongly-typed struct per `TaskType`.
//!
//! Params are stored as JSON and decoded when a task is claimed.
//!
//! # ポイント
//! - `const TYPE` で params 型と `TaskType` を 1 対 1 に対応付ける
//! - `task_key()` が重複排除のキー。同じキーの 2 回目の enqueue は何もしない

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::{Channel, TaskType};

/// Ties a params type to its task type and idempotency key.
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TYPE: TaskType;

    /// Unique per logical unit of work within `TYPE`.
    fn task_key(&self) -> String;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CrawlMode {
    /// Walk backward from the backfill frontier until it reaches `until`,
    /// optionally stopping after `max_posts` posts. `until` is fixed when the
    /// crawl is scheduled, so a retried task never walks past it.
    Backfill {
        until: NaiveDate,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        max_posts: Option<usize>,
    },
    /// Catch up from the incremental frontier to now.
    Incremental,
}

impl CrawlMode {
    pub fn label(&self) -> &'static str {
        match self {
            CrawlMode::Backfill { .. } => "backfill",
            CrawlMode::Incremental => "incremental",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchPosts {
    pub source: String,
    pub mode: CrawlMode,
    /// Day the crawl was scheduled for; one crawl per source, mode and day.
    pub scheduled_on: NaiveDate,
}

impl Task for FetchPosts {
    const TYPE: TaskType = TaskType::FetchPosts;

    fn task_key(&self) -> String {
        format!("{}:{}:{}", self.source, self.mode.label(), self.scheduled_on)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapePost {
    pub slug: String,
}

impl Task for ScrapePost {
    const TYPE: TaskType = TaskType::ScrapePost;

    fn task_key(&self) -> String {
        self.slug.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeProfile {
    pub username: String,
}

impl Task for ScrapeProfile {
    const TYPE: TaskType = TaskType::ScrapeProfile;

    fn task_key(&self) -> String {
        self.username.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichPerson {
    pub person_id: String,
    /// Empty means every channel.
    #[serde(default)]
    pub channels: Vec<Channel>,
    #[serde(default)]
    pub incremental: bool,
    pub requested_on: NaiveDate,
}

impl EnrichPerson {
    pub fn channels(&self) -> Vec<Channel> {
        if self.channels.is_empty() {
            Channel::ALL.to_vec()
        } else {
            let mut channels = self.channels.clone();
            channels.sort();
            channels.dedup();
            channels
        }
    }
}

impl Task for EnrichPerson {
    const TYPE: TaskType = TaskType::EnrichPerson;

    fn task_key(&self) -> String {
        let mode = if self.incremental { "incremental" } else { "full" };
        let scope = if self.channels.is_empty() {
            "all".to_string()
        } else {
            self.channels()
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join("+")
        };
        format!("{}:{mode}:{scope}:{}", self.person_id, self.requested_on)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    #[test]
    fn fetch_key_is_per_source_mode_and_day() {
        let task = FetchPosts {
            source: "product_hunt".into(),
            mode: CrawlMode::Backfill { until: day(), max_posts: None },
            scheduled_on: day(),
        };
        assert_eq!(task.task_key(), "product_hunt:backfill:2025-03-01");
    }

    #[test]
    fn fetch_params_shape() {
        let task = FetchPosts {
            source: "product_hunt".into(),
            mode: CrawlMode::Incremental,
            scheduled_on: day(),
        };
        assert_eq!(
            serde_json::to_value(&task).unwrap(),
            json!({"source": "product_hunt", "mode": {"kind": "incremental"}, "scheduled_on": "2025-03-01"})
        );
    }

    #[test]
    fn enrich_key_normalises_channels() {
        let task = EnrichPerson {
            person_id: "ada".into(),
            channels: vec![Channel::Arxiv, Channel::Github, Channel::Arxiv],
            incremental: true,
            requested_on: day(),
        };
        assert_eq!(task.task_key(), "ada:incremental:github+arxiv:2025-03-01");

        let all = EnrichPerson { channels: vec![], incremental: false, ..task };
        assert_eq!(all.task_key(), "ada:full:all:2025-03-01");
        assert_eq!(all.channels(), Channel::ALL.to_vec());
    }

    #[test]
    fn enrich_params_default_optional_fields() {
        let task: EnrichPerson =
            serde_json::from_value(json!({"person_id": "ada", "requested_on": "2025-03-01"})).unwrap();
        assert!(task.channels.is_empty());
        assert!(!task.incremental);
    }
}
