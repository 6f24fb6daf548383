//! WorkerRegistry: one type-erased worker per task type.

use std::collections::HashMap;

use super::stage::DynWorker;
use crate::domain::TaskType;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("a worker for task type '{0}' is already registered")]
    AlreadyRegistered(TaskType),
}

#[derive(Default)]
pub struct WorkerRegistry {
    workers: HashMap<TaskType, Box<dyn DynWorker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<W: DynWorker + 'static>(&mut self, worker: W) -> Result<(), RegistryError> {
        let task_type = worker.task_type();
        if self.workers.contains_key(&task_type) {
            return Err(RegistryError::AlreadyRegistered(task_type));
        }
        self.workers.insert(task_type, Box::new(worker));
        Ok(())
    }

    pub fn get_mut(&mut self, task_type: TaskType) -> Option<&mut (dyn DynWorker + 'static)> {
        self.workers.get_mut(&task_type).map(|w| &mut **w)
    }

    /// Registered types in pipeline order.
    pub fn registered_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| self.workers.contains_key(t))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::worker_loop::RunReport;
    use crate::domain::WorkerError;
    use async_trait::async_trait;

    struct Noop(TaskType);

    #[async_trait]
    impl DynWorker for Noop {
        fn task_type(&self) -> TaskType {
            self.0
        }

        async fn run(&mut self, _limit: usize) -> Result<RunReport, WorkerError> {
            Ok(RunReport::new(self.0))
        }
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = WorkerRegistry::new();
        registry.register(Noop(TaskType::ScrapeProfile)).unwrap();
        registry.register(Noop(TaskType::FetchPosts)).unwrap();

        assert!(registry.get_mut(TaskType::FetchPosts).is_some());
        assert!(registry.get_mut(TaskType::EnrichPerson).is_none());
        assert_eq!(
            registry.registered_types(),
            vec![TaskType::FetchPosts, TaskType::ScrapeProfile]
        );
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = WorkerRegistry::new();
        registry.register(Noop(TaskType::ScrapePost)).unwrap();
        let err = registry.register(Noop(TaskType::ScrapePost)).unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyRegistered(TaskType::ScrapePost)));
    }

    #[tokio::test]
    async fn registered_worker_runs_through_the_trait_object() {
        let mut registry = WorkerRegistry::new();
        registry.register(Noop(TaskType::ScrapePost)).unwrap();
        let report = registry
            .get_mut(TaskType::ScrapePost)
            .unwrap()
            .run(10)
            .await
            .unwrap();
        assert_eq!(report.task_type, TaskType::ScrapePost);
        assert_eq!(report.claimed, 0);
    }
}
