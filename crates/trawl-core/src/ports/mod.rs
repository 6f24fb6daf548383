//! Ports: the seams between the orchestration core and the outside world.
//!
//! Storage ports are implemented in `impls`; collaborator ports (feed,
//! scraper, search) are implemented by the binary that wires the app.

pub mod clock;
pub mod crawl_store;
pub mod feed;
pub mod record_store;
pub mod scraper;
pub mod search;
pub mod task_store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use crawl_store::{CrawlStateStore, WatermarkStore};
pub use feed::{Page, PostFeed};
pub use record_store::RecordStore;
pub use scraper::{PageScraper, ScrapeSession};
pub use search::SearchProvider;
pub use task_store::{QueueCounts, TaskStore};
