use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::SessionSlot;
use crate::domain::{HandlerError, Outcome, Person, ProviderError};
use crate::ports::{PageScraper, RecordStore};
use crate::queue::TaskQueue;
use crate::typed::{ScrapeProfile, Stage};

/// Stores a maker's profile and upserts the matching person.
pub struct ProfileScrapeStage {
    session: SessionSlot,
    records: Arc<dyn RecordStore>,
}

impl ProfileScrapeStage {
    pub fn new(scraper: Arc<dyn PageScraper>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            session: SessionSlot::new(scraper),
            records,
        }
    }
}

/// Fresh profile data wins; fields the profile no longer shows, enrichment
/// results and the score are kept from the stored person.
fn merge(existing: Person, scraped: Person) -> Person {
    Person {
        id: scraped.id,
        name: scraped.name,
        headline: scraped.headline.or(existing.headline),
        twitter: scraped.twitter.or(existing.twitter),
        linkedin: scraped.linkedin.or(existing.linkedin),
        github: scraped.github.or(existing.github),
        website: scraped.website.or(existing.website),
        email: existing.email,
        importance_score: existing.importance_score,
    }
}

#[async_trait]
impl Stage<ScrapeProfile> for ProfileScrapeStage {
    async fn setup(&mut self) -> Result<(), HandlerError> {
        self.session.open().await
    }

    async fn handle(&mut self, task: ScrapeProfile, _queue: &TaskQueue) -> Result<Outcome, HandlerError> {
        let profile = match self.session.get()?.profile(&task.username).await {
            Ok(profile) => profile,
            Err(ProviderError::NotFound(_)) => return Ok(Outcome::empty("profile not found")),
            Err(err) => return Err(err.into()),
        };

        self.records.upsert_profile(&profile).await?;
        let scraped = Person::from_profile(&profile);
        let person = match self.records.person(&scraped.id).await? {
            Some(existing) => merge(existing, scraped),
            None => scraped,
        };
        self.records.upsert_person(&person).await?;
        debug!(username = %task.username, "profile scraped");
        Ok(Outcome::success().with_records(1))
    }

    async fn teardown(&mut self) {
        self.session.close().await;
    }
}
