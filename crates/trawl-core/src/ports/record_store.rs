//! Storage for the domain records the stages produce.

use async_trait::async_trait;

use crate::domain::{KnowledgeItem, MakerStats, Person, PersonFilter, Post, Profile, RecordCounts, StoreError};

/// Keyed, idempotent persistence for posts, profiles, persons and knowledge.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upsert keyed by `slug`.
    async fn upsert_post(&self, post: &Post) -> Result<(), StoreError>;

    /// Records that `username` made `slug`. Returns false if already linked.
    async fn link_post_person(&self, slug: &str, username: &str) -> Result<bool, StoreError>;

    /// Upsert keyed by `username`.
    async fn upsert_profile(&self, profile: &Profile) -> Result<(), StoreError>;

    async fn person(&self, id: &str) -> Result<Option<Person>, StoreError>;

    /// Upsert keyed by `id`.
    async fn upsert_person(&self, person: &Person) -> Result<(), StoreError>;

    async fn persons(&self) -> Result<Vec<Person>, StoreError>;

    /// Persons matching `filter`, highest score first, ties by id, at most
    /// `filter.limit`.
    async fn top_persons(&self, filter: &PersonFilter) -> Result<Vec<Person>, StoreError>;

    /// Post count and vote total over the posts linked to `username`.
    async fn maker_stats(&self, username: &str) -> Result<MakerStats, StoreError>;

    /// Inserts unless `(person_id, content_hash)` exists. Returns whether it
    /// was new.
    async fn insert_knowledge(
        &self,
        person_id: &str,
        item: &KnowledgeItem,
        content_hash: &str,
    ) -> Result<bool, StoreError>;

    async fn counts(&self) -> Result<RecordCounts, StoreError>;

    /// Deletes every record, crawl state and watermark.
    async fn purge_records(&self) -> Result<(), StoreError>;
}
