use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::SessionSlot;
use crate::domain::{HandlerError, Outcome, ProviderError};
use crate::ports::{PageScraper, RecordStore};
use crate::queue::TaskQueue;
use crate::typed::{ScrapePost, ScrapeProfile, Stage};

/// Finds the makers on a post page and queues their profiles.
pub struct PostScrapeStage {
    session: SessionSlot,
    records: Arc<dyn RecordStore>,
}

impl PostScrapeStage {
    pub fn new(scraper: Arc<dyn PageScraper>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            session: SessionSlot::new(scraper),
            records,
        }
    }
}

#[async_trait]
impl Stage<ScrapePost> for PostScrapeStage {
    async fn setup(&mut self) -> Result<(), HandlerError> {
        self.session.open().await
    }

    async fn handle(&mut self, task: ScrapePost, queue: &TaskQueue) -> Result<Outcome, HandlerError> {
        let makers = match self.session.get()?.post_makers(&task.slug).await {
            Ok(makers) => makers,
            Err(ProviderError::NotFound(_)) => return Ok(Outcome::empty("post page not found")),
            Err(err) => return Err(err.into()),
        };
        if makers.is_empty() {
            return Ok(Outcome::empty("no makers listed"));
        }

        let mut fanned_out = 0;
        for username in &makers {
            self.records.link_post_person(&task.slug, username).await?;
            let profile = ScrapeProfile {
                username: username.clone(),
            };
            if queue.enqueue_task(&profile, 0).await? {
                fanned_out += 1;
            }
        }
        debug!(slug = %task.slug, makers = makers.len(), fanned_out, "post scraped");
        Ok(Outcome::success()
            .with_records(makers.len())
            .with_fanned_out(fanned_out))
    }

    async fn teardown(&mut self) {
        self.session.close().await;
    }
}
