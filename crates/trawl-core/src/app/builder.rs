//! AppBuilder: wires stages to task types and checks the wiring at startup.
//!
//! ```ignore
//! let app = AppBuilder::new(queue)
//!     .register::<FetchPosts, _>(FetchStage::new(tracker))?
//!     .register::<ScrapePost, _>(PostScrapeStage::new(scraper, records))?
//!     .expect_stages(&TaskType::ALL)
//!     .build()?;
//! let reports = app.run_pipeline(50).await?;
//! ```

use tracing::warn;

use super::worker_loop::{RunReport, Worker};
use crate::domain::{TaskType, WorkerError};
use crate::queue::TaskQueue;
use crate::typed::{RegistryError, Stage, Task, WorkerRegistry};

pub struct AppBuilder {
    queue: TaskQueue,
    registry: WorkerRegistry,
    expected: Option<Vec<TaskType>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("missing stages: {0:?}; these task types were expected but have no registered stage")]
    MissingTaskTypes(Vec<TaskType>),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("no stage registered for {0}")]
    UnknownStage(TaskType),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

impl AppBuilder {
    pub fn new(queue: TaskQueue) -> Self {
        Self {
            queue,
            registry: WorkerRegistry::new(),
            expected: None,
        }
    }

    /// Registers `stage` as the handler for `T::TYPE`.
    pub fn register<T: Task, S: Stage<T> + 'static>(mut self, stage: S) -> Result<Self, RegistryError> {
        self.registry.register(Worker::new(self.queue.clone(), stage))?;
        Ok(self)
    }

    /// Task types that must have a stage by the time `build` is called.
    pub fn expect_stages(mut self, task_types: &[TaskType]) -> Self {
        self.expected = Some(task_types.to_vec());
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        if let Some(expected) = &self.expected {
            let registered = self.registry.registered_types();
            let missing: Vec<TaskType> = expected
                .iter()
                .filter(|t| !registered.contains(t))
                .copied()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing));
            }
        }
        Ok(App {
            queue: self.queue,
            registry: self.registry,
        })
    }
}

pub struct App {
    queue: TaskQueue,
    registry: WorkerRegistry,
}

impl App {
    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn stages(&self) -> Vec<TaskType> {
        self.registry.registered_types()
    }

    /// One worker run for `task_type`, claiming at most `limit` tasks.
    pub async fn run_stage(&mut self, task_type: TaskType, limit: usize) -> Result<RunReport, AppError> {
        let worker = self
            .registry
            .get_mut(task_type)
            .ok_or(AppError::UnknownStage(task_type))?;
        Ok(worker.run(limit).await?)
    }

    /// One run of every registered stage in pipeline order, so work fanned
    /// out by a stage is picked up by the next one in the same pass.
    ///
    /// A stage whose setup fails is skipped; store errors abort the pass.
    pub async fn run_pipeline(&mut self, limit: usize) -> Result<Vec<RunReport>, AppError> {
        let mut reports = Vec::new();
        for task_type in self.stages() {
            match self.run_stage(task_type, limit).await {
                Ok(report) => reports.push(report),
                Err(AppError::Worker(WorkerError::Setup(err))) => {
                    warn!(%task_type, error = %err, "stage skipped");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(reports)
    }
}
