//! In-memory store: every storage port behind one lock.
//!
//! Each operation holds the lock for its whole read-modify-write, which is
//! what makes `claim_batch` atomic here. Used by tests and `--memory` runs.

use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{
    Channel, ChannelWatermark, CrawlState, KnowledgeItem, MakerStats, NewTask, Person,
    PersonFilter, Post, Profile, RecordCounts, StoreError, TaskId, TaskRecord, TaskStatus, TaskType,
};
use crate::ports::{CrawlStateStore, QueueCounts, RecordStore, TaskStore, WatermarkStore};

struct TaskEntry {
    /// Insertion order; breaks ties between equal `created_at`.
    seq: u64,
    record: TaskRecord,
}

#[derive(Default)]
struct MemoryState {
    tasks: HashMap<TaskId, TaskEntry>,
    keys: HashMap<(TaskType, String), TaskId>,
    next_seq: u64,

    crawl: HashMap<String, CrawlState>,
    watermarks: HashMap<(String, Channel), DateTime<Utc>>,

    posts: HashMap<String, Post>,
    post_people: BTreeSet<(String, String)>,
    profiles: HashMap<String, Profile>,
    persons: HashMap<String, Person>,
    knowledge: HashMap<(String, String), KnowledgeItem>,
}

impl MemoryState {
    fn task_mut(&mut self, id: TaskId) -> Result<&mut TaskRecord, StoreError> {
        self.tasks
            .get_mut(&id)
            .map(|entry| &mut entry.record)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<MemoryState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every task, oldest first. For tests and debugging.
    pub async fn tasks(&self) -> Vec<TaskRecord> {
        let state = self.state.lock().await;
        let mut entries: Vec<_> = state.tasks.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.record.clone()).collect()
    }

    pub async fn posts(&self) -> Vec<Post> {
        let state = self.state.lock().await;
        let mut posts: Vec<_> = state.posts.values().cloned().collect();
        posts.sort_by(|a, b| a.slug.cmp(&b.slug));
        posts
    }

    pub async fn knowledge_for(&self, person_id: &str) -> Vec<KnowledgeItem> {
        let state = self.state.lock().await;
        state
            .knowledge
            .iter()
            .filter(|((owner, _), _)| owner == person_id)
            .map(|(_, item)| item.clone())
            .collect()
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn insert_if_absent(&self, task: NewTask, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let key = (task.task_type, task.task_key.clone());
        if state.keys.contains_key(&key) {
            return Ok(false);
        }
        let id = TaskId::generate();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.keys.insert(key, id);
        state.tasks.insert(
            id,
            TaskEntry {
                seq,
                record: TaskRecord::new(id, task, now),
            },
        );
        Ok(true)
    }

    async fn claim_batch(
        &self,
        task_type: TaskType,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<TaskRecord>, StoreError> {
        let mut state = self.state.lock().await;
        let mut candidates: Vec<_> = state
            .tasks
            .values()
            .filter(|e| e.record.task_type == task_type && e.record.status.is_claimable())
            .map(|e| (Reverse(e.record.priority), e.record.created_at, e.seq, e.record.id))
            .collect();
        candidates.sort();

        let mut claimed = Vec::with_capacity(limit.min(candidates.len()));
        for (_, _, _, id) in candidates.into_iter().take(limit) {
            let record = state.task_mut(id)?;
            record.claim(now)?;
            claimed.push(record.clone());
        }
        Ok(claimed)
    }

    async fn complete(&self, id: TaskId, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.state.lock().await.task_mut(id)?.complete(now)
    }

    async fn fail(&self, id: TaskId, error: String) -> Result<TaskStatus, StoreError> {
        self.state.lock().await.task_mut(id)?.fail(error)
    }

    async fn fail_permanently(&self, id: TaskId, error: String) -> Result<(), StoreError> {
        self.state.lock().await.task_mut(id)?.fail_permanently(error)
    }

    async fn release(&self, ids: &[TaskId]) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut released = 0;
        for id in ids {
            let record = state.task_mut(*id)?;
            if record.status == TaskStatus::Processing {
                record.release()?;
                released += 1;
            }
        }
        Ok(released)
    }

    async fn reset_stale(
        &self,
        task_type: TaskType,
        started_before: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut reset = 0;
        for entry in state.tasks.values_mut() {
            if entry.record.task_type == task_type && entry.record.is_stale(started_before) {
                entry.record.release()?;
                reset += 1;
            }
        }
        Ok(reset)
    }

    async fn stats(&self, task_type: TaskType) -> Result<QueueCounts, StoreError> {
        let state = self.state.lock().await;
        let mut counts = QueueCounts::default();
        for entry in state.tasks.values().filter(|e| e.record.task_type == task_type) {
            counts.add(entry.record.status, 1);
        }
        Ok(counts)
    }

    async fn retry_failed(&self, task_type: Option<TaskType>) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let mut retried = 0;
        for entry in state.tasks.values_mut() {
            let record = &mut entry.record;
            if record.status == TaskStatus::Failed
                && task_type.is_none_or(|t| t == record.task_type)
            {
                record.retry()?;
                retried += 1;
            }
        }
        Ok(retried)
    }

    async fn get(&self, task_type: TaskType, task_key: &str) -> Result<Option<TaskRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .keys
            .get(&(task_type, task_key.to_string()))
            .and_then(|id| state.tasks.get(id))
            .map(|entry| entry.record.clone()))
    }

    async fn purge(&self) -> Result<usize, StoreError> {
        let mut state = self.state.lock().await;
        let removed = state.tasks.len();
        state.tasks.clear();
        state.keys.clear();
        Ok(removed)
    }
}

#[async_trait]
impl CrawlStateStore for InMemoryStore {
    async fn load_crawl_state(&self, source: &str) -> Result<Option<CrawlState>, StoreError> {
        Ok(self.state.lock().await.crawl.get(source).cloned())
    }

    async fn save_crawl_state(&self, crawl: &CrawlState) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .crawl
            .insert(crawl.source.clone(), crawl.clone());
        Ok(())
    }
}

#[async_trait]
impl WatermarkStore for InMemoryStore {
    async fn cutoff(&self, entity_id: &str, channel: Channel) -> Result<Option<DateTime<Utc>>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .watermarks
            .get(&(entity_id.to_string(), channel))
            .copied())
    }

    async fn set_cutoff(&self, watermark: &ChannelWatermark) -> Result<(), StoreError> {
        self.state.lock().await.watermarks.insert(
            (watermark.entity_id.clone(), watermark.channel),
            watermark.cutoff,
        );
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn upsert_post(&self, post: &Post) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .posts
            .insert(post.slug.clone(), post.clone());
        Ok(())
    }

    async fn link_post_person(&self, slug: &str, username: &str) -> Result<bool, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .post_people
            .insert((slug.to_string(), username.to_string())))
    }

    async fn upsert_profile(&self, profile: &Profile) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .profiles
            .insert(profile.username.clone(), profile.clone());
        Ok(())
    }

    async fn person(&self, id: &str) -> Result<Option<Person>, StoreError> {
        Ok(self.state.lock().await.persons.get(id).cloned())
    }

    async fn upsert_person(&self, person: &Person) -> Result<(), StoreError> {
        self.state
            .lock()
            .await
            .persons
            .insert(person.id.clone(), person.clone());
        Ok(())
    }

    async fn persons(&self) -> Result<Vec<Person>, StoreError> {
        let state = self.state.lock().await;
        let mut persons: Vec<_> = state.persons.values().cloned().collect();
        persons.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(persons)
    }

    async fn top_persons(&self, filter: &PersonFilter) -> Result<Vec<Person>, StoreError> {
        let state = self.state.lock().await;
        let mut persons: Vec<_> = state
            .persons
            .values()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect();
        persons.sort_by(|a, b| {
            b.importance_score
                .cmp(&a.importance_score)
                .then_with(|| a.id.cmp(&b.id))
        });
        persons.truncate(filter.limit);
        Ok(persons)
    }

    async fn maker_stats(&self, username: &str) -> Result<MakerStats, StoreError> {
        let state = self.state.lock().await;
        let mut stats = MakerStats::default();
        for (slug, _) in state.post_people.iter().filter(|(_, u)| u == username) {
            stats.posts += 1;
            stats.votes += state.posts.get(slug).map_or(0, |p| p.votes_count);
        }
        Ok(stats)
    }

    async fn insert_knowledge(
        &self,
        person_id: &str,
        item: &KnowledgeItem,
        content_hash: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let key = (person_id.to_string(), content_hash.to_string());
        if state.knowledge.contains_key(&key) {
            return Ok(false);
        }
        state.knowledge.insert(key, item.clone());
        Ok(true)
    }

    async fn counts(&self) -> Result<RecordCounts, StoreError> {
        let state = self.state.lock().await;
        Ok(RecordCounts {
            posts: state.posts.len(),
            post_people: state.post_people.len(),
            profiles: state.profiles.len(),
            persons: state.persons.len(),
            knowledge: state.knowledge.len(),
        })
    }

    async fn purge_records(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.crawl.clear();
        state.watermarks.clear();
        state.posts.clear();
        state.post_people.clear();
        state.profiles.clear();
        state.persons.clear();
        state.knowledge.clear();
        Ok(())
    }
}
