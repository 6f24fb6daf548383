use std::sync::Arc;

use async_trait::async_trait;

use crate::app::enrich::Enricher;
use crate::domain::{HandlerError, Outcome};
use crate::queue::TaskQueue;
use crate::typed::{EnrichPerson, Stage};

pub struct EnrichStage {
    enricher: Arc<Enricher>,
}

impl EnrichStage {
    pub fn new(enricher: Arc<Enricher>) -> Self {
        Self { enricher }
    }
}

#[async_trait]
impl Stage<EnrichPerson> for EnrichStage {
    async fn handle(&mut self, task: EnrichPerson, _queue: &TaskQueue) -> Result<Outcome, HandlerError> {
        let report = self
            .enricher
            .enrich(&task.person_id, &task.channels(), task.incremental)
            .await?;
        let outcome = Outcome::success().with_records(report.stored);
        if report.channels_failed.is_empty() {
            Ok(outcome)
        } else {
            let failed: Vec<_> = report.channels_failed.iter().map(|(c, _)| c.as_str()).collect();
            Ok(outcome.with_note(format!("failed channels: {}", failed.join(", "))))
        }
    }
}
