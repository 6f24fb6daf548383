//! Post feed collaborator: one page of posts for a time window.

use async_trait::async_trait;

use crate::domain::{DateWindow, Post, ProviderError};

/// One page of a cursor-paginated feed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub posts: Vec<Post>,
    /// Token for the next page. Only meaningful when `has_more`.
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

#[async_trait]
pub trait PostFeed: Send + Sync {
    /// Fetches the page after `cursor` (first page when `None`) of posts
    /// published inside `window`.
    async fn fetch_page(
        &self,
        source: &str,
        window: DateWindow,
        cursor: Option<&str>,
    ) -> Result<Page, ProviderError>;
}
