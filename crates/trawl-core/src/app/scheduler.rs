//! Scheduler: turns operator intent into queued tasks.
//!
//! Every method is idempotent per day: scheduling the same crawl or the same
//! enrichment twice on one day leaves a single task.

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::info;

use super::crawl::{backfill_target, ensure_state};
use crate::domain::{Channel, PersonFilter, StoreError};
use crate::ports::{CrawlStateStore, RecordStore};
use crate::queue::TaskQueue;
use crate::typed::{CrawlMode, EnrichPerson, FetchPosts};

pub struct Scheduler {
    queue: TaskQueue,
    states: Arc<dyn CrawlStateStore>,
    records: Arc<dyn RecordStore>,
}

impl Scheduler {
    pub fn new(queue: TaskQueue, states: Arc<dyn CrawlStateStore>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            queue,
            states,
            records,
        }
    }

    /// Makes sure the source has crawl state and queues a backfill crawl
    /// reaching `days` days behind the current frontier.
    pub async fn schedule_backfill(
        &self,
        source: &str,
        days: u32,
        max_posts: Option<usize>,
    ) -> Result<bool, StoreError> {
        let today = self.queue.clock().today();
        let state = ensure_state(self.states.as_ref(), source, today).await?;
        let until = backfill_target(state.oldest_date, days);
        self.schedule(source, today, CrawlMode::Backfill { until, max_posts }).await
    }

    pub async fn schedule_incremental(&self, source: &str) -> Result<bool, StoreError> {
        let today = self.queue.clock().today();
        ensure_state(self.states.as_ref(), source, today).await?;
        self.schedule(source, today, CrawlMode::Incremental).await
    }

    async fn schedule(&self, source: &str, today: NaiveDate, mode: CrawlMode) -> Result<bool, StoreError> {
        let task = FetchPosts {
            source: source.to_string(),
            mode,
            scheduled_on: today,
        };
        let created = self.queue.enqueue_task(&task, 0).await?;
        info!(source, mode = task.mode.label(), created, "crawl scheduled");
        Ok(created)
    }

    /// Queues one person for enrichment. Empty `channels` means all.
    pub async fn enqueue_enrichment(
        &self,
        person_id: &str,
        channels: Vec<Channel>,
        incremental: bool,
        priority: i64,
    ) -> Result<bool, StoreError> {
        let task = EnrichPerson {
            person_id: person_id.to_string(),
            channels,
            incremental,
            requested_on: self.queue.clock().today(),
        };
        self.queue.enqueue_task(&task, priority).await
    }

    /// Queues the highest-scoring persons, prioritised by their score.
    /// Returns how many tasks were created.
    pub async fn queue_top_persons(
        &self,
        min_score: i64,
        limit: usize,
        incremental: bool,
    ) -> Result<usize, StoreError> {
        let persons = self.records.top_persons(&PersonFilter::new(min_score, limit)).await?;
        let mut created = 0;
        for person in &persons {
            if self
                .enqueue_enrichment(&person.id, Vec::new(), incremental, person.importance_score)
                .await?
            {
                created += 1;
            }
        }
        info!(candidates = persons.len(), created, min_score, "persons queued for enrichment");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Person, TaskType};
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use crate::queue::StagePolicies;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn fixture() -> (Arc<InMemoryStore>, Arc<FixedClock>, Scheduler) {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 10, 8, 0, 0).unwrap()));
        let queue = TaskQueue::new(store.clone(), clock.clone(), StagePolicies::new());
        let scheduler = Scheduler::new(queue, store.clone(), store.clone());
        (store, clock, scheduler)
    }

    #[tokio::test]
    async fn scheduling_creates_state_and_one_task_per_day() {
        let (store, clock, scheduler) = fixture();
        assert!(scheduler.schedule_backfill("ph", 7, None).await.unwrap());
        assert!(!scheduler.schedule_backfill("ph", 3, Some(10)).await.unwrap());
        assert!(scheduler.schedule_incremental("ph").await.unwrap());

        let state = store.load_crawl_state("ph").await.unwrap().unwrap();
        assert_eq!(state.oldest_date, NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
        let backfill = store
            .tasks()
            .await
            .into_iter()
            .find(|t| t.task_key == "ph:backfill:2025-03-10")
            .unwrap();
        assert_eq!(backfill.params["mode"]["until"], "2025-03-03");

        clock.advance(chrono::Duration::days(1));
        assert!(scheduler.schedule_backfill("ph", 7, None).await.unwrap());
        let tasks = store.tasks().await;
        assert_eq!(tasks.iter().filter(|t| t.task_type == TaskType::FetchPosts).count(), 3);
    }

    #[tokio::test]
    async fn top_persons_are_queued_with_score_priority() {
        let (store, _clock, scheduler) = fixture();
        for (id, score) in [("ada", 80), ("bob", 20), ("cy", 55)] {
            store
                .upsert_person(&Person { id: id.into(), name: id.into(), importance_score: score, ..Person::default() })
                .await
                .unwrap();
        }

        assert_eq!(scheduler.queue_top_persons(50, 10, false).await.unwrap(), 2);
        assert_eq!(scheduler.queue_top_persons(50, 10, false).await.unwrap(), 0);

        let mut queued: Vec<_> = store
            .tasks()
            .await
            .into_iter()
            .map(|t| (t.task_key, t.priority))
            .collect();
        queued.sort();
        assert_eq!(
            queued,
            [("ada:full:all:2025-03-10".to_string(), 80), ("cy:full:all:2025-03-10".to_string(), 55)]
        );
    }
}
