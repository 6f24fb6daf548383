//! Importance scores, used as enrichment queue priority.

use serde::Serialize;
use tracing::info;

use crate::domain::StoreError;
use crate::ports::RecordStore;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScoreReport {
    pub persons: usize,
    pub changed: usize,
}

/// Recomputes every person's score from the posts they made.
pub async fn update_scores(records: &dyn RecordStore) -> Result<ScoreReport, StoreError> {
    let mut report = ScoreReport::default();
    for mut person in records.persons().await? {
        report.persons += 1;
        let stats = records.maker_stats(&person.id).await?;
        let score = person.importance_score(&stats);
        if score != person.importance_score {
            person.importance_score = score;
            records.upsert_person(&person).await?;
            report.changed += 1;
        }
    }
    info!(persons = report.persons, changed = report.changed, "scores updated");
    Ok(report)
}
