//! Crawl state and watermark persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Channel, ChannelWatermark, CrawlState, StoreError};

#[async_trait]
pub trait CrawlStateStore: Send + Sync {
    async fn load_crawl_state(&self, source: &str) -> Result<Option<CrawlState>, StoreError>;

    /// Upsert keyed by `source`.
    async fn save_crawl_state(&self, state: &CrawlState) -> Result<(), StoreError>;
}

#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn cutoff(
        &self,
        entity_id: &str,
        channel: Channel,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Upsert keyed by `(entity_id, channel)`.
    async fn set_cutoff(&self, watermark: &ChannelWatermark) -> Result<(), StoreError>;
}
