//! Page scraper collaborator.
//!
//! Scraping needs a session (a browser, an HTTP client with cookies) that is
//! opened once per worker run and closed when the run ends.

use async_trait::async_trait;

use crate::domain::{Profile, ProviderError};

#[async_trait]
pub trait PageScraper: Send + Sync {
    async fn open(&self) -> Result<Box<dyn ScrapeSession>, ProviderError>;
}

#[async_trait]
pub trait ScrapeSession: Send {
    /// Usernames of the makers listed on a post page.
    async fn post_makers(&mut self, slug: &str) -> Result<Vec<String>, ProviderError>;

    async fn profile(&mut self, username: &str) -> Result<Profile, ProviderError>;

    async fn close(&mut self);
}
