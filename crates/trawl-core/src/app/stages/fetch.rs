use std::sync::Arc;

use async_trait::async_trait;

use crate::app::crawl::CrawlTracker;
use crate::domain::{HandlerError, Outcome};
use crate::queue::TaskQueue;
use crate::typed::{CrawlMode, FetchPosts, Stage};

pub struct FetchStage {
    tracker: Arc<CrawlTracker>,
}

impl FetchStage {
    pub fn new(tracker: Arc<CrawlTracker>) -> Self {
        Self { tracker }
    }
}

#[async_trait]
impl Stage<FetchPosts> for FetchStage {
    async fn handle(&mut self, task: FetchPosts, _queue: &TaskQueue) -> Result<Outcome, HandlerError> {
        let report = match task.mode {
            CrawlMode::Backfill { until, max_posts } => {
                self.tracker.backfill_until(&task.source, until, max_posts).await?
            }
            CrawlMode::Incremental => self.tracker.incremental(&task.source).await?,
        };

        if report.skipped {
            return Ok(Outcome::empty(format!("source {} is paused or unknown", task.source)));
        }
        Ok(Outcome::success()
            .with_records(report.posts)
            .with_fanned_out(report.fanned_out))
    }
}
