//! Typed task API: params per task type, the `Stage` capability and the
//! registry that erases stage types so the app can drive them uniformly.
//!
//! # 二層構造
//! - **表層（Typed）**: `Task` trait, `Stage<T>` trait - params を型で受け取る
//! - **内部（Dyn）**: `DynWorker` trait - object-safe, `TaskType` ごとに 1 つ

pub mod registry;
pub mod stage;
pub mod task;

pub use registry::{RegistryError, WorkerRegistry};
pub use stage::{DynWorker, Stage};
pub use task::{CrawlMode, EnrichPerson, FetchPosts, ScrapePost, ScrapeProfile, Task};
