//! Domain model.

pub mod crawl;
pub mod errors;
pub mod ids;
pub mod outcome;
pub mod records;
pub mod state;
pub mod task;
pub mod watermark;

pub use crawl::{CrawlState, DateWindow, SourceStatus};
pub use errors::{HandlerError, ProviderError, StoreError, WorkerError};
pub use ids::{Id, IdMarker, TaskId};
pub use outcome::Outcome;
pub use records::{
    Confidence, ContactItem, ContactKind, EnrichmentResult, KnowledgeItem, MakerStats, Person,
    PersonFilter, Post, Profile, RecordCounts,
};
pub use state::TaskStatus;
pub use task::{NewTask, TaskRecord, TaskType};
pub use watermark::{Channel, ChannelWatermark};
