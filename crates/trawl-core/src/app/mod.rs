//! Application layer: composes the ports into the crawler's operations.
//!
//! - **worker_loop**: generic stage runner (claim, handle, retry, circuit breaker)
//! - **crawl**: crawl state tracker (backfill / incremental)
//! - **enrich**: per-person channel enrichment with watermarks
//! - **stages**: the four pipeline stages
//! - **scheduler**: queues crawls and enrichments
//! - **scoring**: importance scores
//! - **status**: operator views
//! - **builder**: AppBuilder / App
//!
//! ports を組み合わせるだけで、HTTP やファイルには直接触れない。

pub mod builder;
pub mod crawl;
pub mod enrich;
pub mod scheduler;
pub mod scoring;
pub mod stages;
pub mod status;
pub mod worker_loop;

pub use self::builder::{App, AppBuilder, AppError, BuildError};
pub use self::crawl::{CrawlError, CrawlReport, CrawlTracker};
pub use self::enrich::{EnrichError, EnrichReport, Enricher};
pub use self::scheduler::Scheduler;
pub use self::scoring::{ScoreReport, update_scores};
pub use self::status::{StatusReport, person_line};
pub use self::worker_loop::{RunReport, Worker};
