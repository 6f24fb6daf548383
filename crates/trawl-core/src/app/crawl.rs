//! Crawl state tracker: resumable backfill and incremental traversal of one
//! source's post feed.
//!
//! Backfill walks backward one day at a time from `oldest_date`. Each day is a
//! half-open window `[D-1, D)` drained page by page; the cursor is persisted
//! after every page and cleared when the day is exhausted, at which point
//! `oldest_date` moves back one day. An interrupted walk resumes mid-day from
//! the stored cursor, or at the next day if it stopped between days.
//!
//! Incremental drains `[newest_date, now)` and moves `newest_date` to today
//! only once the whole range is paged through. It keeps its cursor in memory:
//! the stored cursor belongs to the backfill day in progress.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::{CrawlState, DateWindow, HandlerError, Post, ProviderError, SourceStatus, StoreError};
use crate::ports::{CrawlStateStore, PostFeed, RecordStore};
use crate::queue::TaskQueue;
use crate::typed::ScrapePost;

#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("feed: {0}")]
    Feed(#[from] ProviderError),
}

impl From<CrawlError> for HandlerError {
    fn from(err: CrawlError) -> Self {
        match err {
            CrawlError::Store(err) => err.into(),
            CrawlError::Feed(err) => err.into(),
        }
    }
}

/// What one traversal did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    pub source: String,
    pub mode: &'static str,
    /// Source missing or paused; nothing was fetched.
    pub skipped: bool,
    pub pages: usize,
    pub posts: usize,
    /// `scrape_post` tasks created.
    pub fanned_out: usize,
    /// Backfill days fully drained.
    pub days_completed: u32,
    /// Stopped early because `max_posts` was reached.
    pub capped: bool,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
}

impl CrawlReport {
    fn new(source: &str, mode: &'static str) -> Self {
        Self {
            source: source.to_string(),
            mode,
            skipped: false,
            pages: 0,
            posts: 0,
            fanned_out: 0,
            days_completed: 0,
            capped: false,
            oldest_date: None,
            newest_date: None,
        }
    }

    fn finish(mut self, state: &CrawlState) -> Self {
        self.oldest_date = Some(state.oldest_date);
        self.newest_date = Some(state.newest_date);
        self
    }

    fn skipped(mut self) -> Self {
        self.skipped = true;
        self
    }
}

/// Date the backfill frontier reaches after walking `days` days back from
/// `oldest`.
pub fn backfill_target(oldest: NaiveDate, days: u32) -> NaiveDate {
    oldest
        .checked_sub_days(Days::new(u64::from(days)))
        .unwrap_or(NaiveDate::MIN)
}

/// Creates the state for `source` with both frontiers at `today` if missing.
pub async fn ensure_state(
    states: &dyn CrawlStateStore,
    source: &str,
    today: NaiveDate,
) -> Result<CrawlState, StoreError> {
    if let Some(state) = states.load_crawl_state(source).await? {
        return Ok(state);
    }
    let state = CrawlState::new(source, today);
    states.save_crawl_state(&state).await?;
    info!(source, %today, "created crawl state");
    Ok(state)
}

pub struct CrawlTracker {
    states: Arc<dyn CrawlStateStore>,
    records: Arc<dyn RecordStore>,
    feed: Arc<dyn PostFeed>,
    queue: TaskQueue,
    page_delay: Duration,
}

impl CrawlTracker {
    pub fn new(
        states: Arc<dyn CrawlStateStore>,
        records: Arc<dyn RecordStore>,
        feed: Arc<dyn PostFeed>,
        queue: TaskQueue,
    ) -> Self {
        Self {
            states,
            records,
            feed,
            queue,
            page_delay: Duration::ZERO,
        }
    }

    /// Pause between consecutive page requests.
    pub fn with_page_delay(mut self, page_delay: Duration) -> Self {
        self.page_delay = page_delay;
        self
    }

    pub async fn ensure_state(&self, source: &str) -> Result<CrawlState, StoreError> {
        ensure_state(self.states.as_ref(), source, self.queue.clock().today()).await
    }

    pub async fn state(&self, source: &str) -> Result<Option<CrawlState>, StoreError> {
        self.states.load_crawl_state(source).await
    }

    pub async fn set_status(&self, source: &str, status: SourceStatus) -> Result<CrawlState, StoreError> {
        let mut state = self.ensure_state(source).await?;
        if state.status != status {
            state.status = status;
            self.states.save_crawl_state(&state).await?;
            info!(source, %status, "source status changed");
        }
        Ok(state)
    }

    async fn active_state(&self, source: &str) -> Result<Option<CrawlState>, StoreError> {
        let state = self.states.load_crawl_state(source).await?;
        match state {
            Some(state) if state.is_active() => Ok(Some(state)),
            Some(_) => {
                info!(source, "source paused, skipping");
                Ok(None)
            }
            None => {
                info!(source, "no crawl state, skipping");
                Ok(None)
            }
        }
    }

    /// Walks `days` days backward from the current backfill frontier.
    pub async fn backfill(
        &self,
        source: &str,
        days: u32,
        max_posts: Option<usize>,
    ) -> Result<CrawlReport, CrawlError> {
        let Some(state) = self.active_state(source).await? else {
            return Ok(CrawlReport::new(source, "backfill").skipped());
        };
        let until = backfill_target(state.oldest_date, days);
        self.walk_back(source, state, until, max_posts).await
    }

    /// Walks backward until `oldest_date` reaches `until`, stopping early
    /// once `max_posts` posts were stored. A frontier already at or before
    /// `until` makes this a no-op.
    pub async fn backfill_until(
        &self,
        source: &str,
        until: NaiveDate,
        max_posts: Option<usize>,
    ) -> Result<CrawlReport, CrawlError> {
        let Some(state) = self.active_state(source).await? else {
            return Ok(CrawlReport::new(source, "backfill").skipped());
        };
        self.walk_back(source, state, until, max_posts).await
    }

    async fn walk_back(
        &self,
        source: &str,
        mut state: CrawlState,
        target: NaiveDate,
        max_posts: Option<usize>,
    ) -> Result<CrawlReport, CrawlError> {
        let mut report = CrawlReport::new(source, "backfill");
        info!(source, from = %state.oldest_date, to = %target, resume = state.last_cursor.is_some(), "backfill started");

        while state.oldest_date > target {
            let window = DateWindow::day_before(state.oldest_date);
            let page = self
                .feed
                .fetch_page(source, window, state.last_cursor.as_deref())
                .await?;
            report.pages += 1;
            self.store_posts(&page.posts, &mut report).await?;

            match page.next_cursor.filter(|_| page.has_more) {
                Some(cursor) => {
                    state.last_cursor = Some(cursor);
                }
                None => {
                    let Some(previous) = state.oldest_date.pred_opt() else {
                        break;
                    };
                    state.last_cursor = None;
                    state.oldest_date = previous;
                    report.days_completed += 1;
                    debug!(source, oldest_date = %state.oldest_date, "backfill day drained");
                }
            }
            self.states.save_crawl_state(&state).await?;

            if max_posts.is_some_and(|cap| report.posts >= cap) {
                report.capped = true;
                break;
            }
            if state.oldest_date > target {
                self.pause().await;
            }
        }

        let report = report.finish(&state);
        info!(
            source,
            pages = report.pages,
            posts = report.posts,
            days = report.days_completed,
            capped = report.capped,
            oldest_date = %state.oldest_date,
            "backfill finished"
        );
        Ok(report)
    }

    /// Fetches everything from `newest_date` up to now. No-op when the
    /// incremental frontier is already at today or later.
    pub async fn incremental(&self, source: &str) -> Result<CrawlReport, CrawlError> {
        let mut report = CrawlReport::new(source, "incremental");
        let Some(mut state) = self.active_state(source).await? else {
            return Ok(report.skipped());
        };

        let clock = self.queue.clock();
        let today = clock.today();
        if state.newest_date >= today {
            debug!(source, newest_date = %state.newest_date, "already up to date");
            return Ok(report.finish(&state));
        }

        let window = DateWindow::since(state.newest_date, clock.now());
        info!(source, since = %state.newest_date, "incremental started");
        let mut cursor: Option<String> = None;
        loop {
            let page = self.feed.fetch_page(source, window, cursor.as_deref()).await?;
            report.pages += 1;
            self.store_posts(&page.posts, &mut report).await?;

            cursor = page.next_cursor.filter(|_| page.has_more);
            if cursor.is_none() {
                break;
            }
            self.pause().await;
        }

        state.newest_date = today;
        self.states.save_crawl_state(&state).await?;

        let report = report.finish(&state);
        info!(source, pages = report.pages, posts = report.posts, newest_date = %today, "incremental finished");
        Ok(report)
    }

    async fn store_posts(&self, posts: &[Post], report: &mut CrawlReport) -> Result<(), StoreError> {
        for post in posts {
            self.records.upsert_post(post).await?;
            report.posts += 1;
            let task = ScrapePost {
                slug: post.slug.clone(),
            };
            if self.queue.enqueue_task(&task, 0).await? {
                report.fanned_out += 1;
            }
        }
        Ok(())
    }

    async fn pause(&self) {
        if !self.page_delay.is_zero() {
            tokio::time::sleep(self.page_delay).await;
        }
    }
}
