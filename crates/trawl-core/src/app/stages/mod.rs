//! Stage implementations, one per task type.
//!
//! - `FetchStage`: runs the crawl tracker for a scheduled crawl, fans out `scrape_post`
//! - `PostScrapeStage`: finds a post's makers, fans out `scrape_profile`
//! - `ProfileScrapeStage`: stores the profile and upserts the person
//! - `EnrichStage`: runs the enricher for one person

mod enrich;
mod fetch;
mod post_scrape;
mod profile_scrape;

pub use enrich::EnrichStage;
pub use fetch::FetchStage;
pub use post_scrape::PostScrapeStage;
pub use profile_scrape::ProfileScrapeStage;

use std::sync::Arc;

use crate::domain::HandlerError;
use crate::ports::{PageScraper, ScrapeSession};

/// A scrape session opened in `setup` and closed in `teardown`.
pub(crate) struct SessionSlot {
    scraper: Arc<dyn PageScraper>,
    session: Option<Box<dyn ScrapeSession>>,
}

impl SessionSlot {
    pub(crate) fn new(scraper: Arc<dyn PageScraper>) -> Self {
        Self {
            scraper,
            session: None,
        }
    }

    pub(crate) async fn open(&mut self) -> Result<(), HandlerError> {
        if self.session.is_none() {
            self.session = Some(self.scraper.open().await?);
        }
        Ok(())
    }

    pub(crate) fn get(&mut self) -> Result<&mut (dyn ScrapeSession + 'static), HandlerError> {
        self.session
            .as_mut()
            .map(|s| &mut **s)
            .ok_or_else(|| HandlerError::transient("scrape session is not open"))
    }

    pub(crate) async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
        }
    }
}
