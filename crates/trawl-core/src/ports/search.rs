//! Search collaborator used by the enrichment channels.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{Channel, EnrichmentResult, Person, ProviderError};

#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Looks `person` up on `channel`. With a `cutoff`, only content newer
    /// than it is wanted; providers that can filter remotely should.
    async fn search(
        &self,
        channel: Channel,
        person: &Person,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<EnrichmentResult, ProviderError>;
}
