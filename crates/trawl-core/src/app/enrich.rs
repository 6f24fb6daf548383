//! Enricher: runs a person through the search channels and stores what
//! comes back.
//!
//! In incremental mode each channel gets the stored watermark as cutoff and
//! anything dated at or before it is dropped. A channel that succeeds gets
//! its watermark moved to the time the run started. Failed channels keep
//! theirs, so the next incremental pass covers the gap.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::domain::{
    Channel, ChannelWatermark, HandlerError, Person, ProviderError, StoreError,
};
use crate::ports::{Clock, RecordStore, SearchProvider, WatermarkStore};

#[derive(Debug, thiserror::Error)]
pub enum EnrichError {
    #[error("person not found: {0}")]
    PersonNotFound(String),

    #[error("every channel failed: {0}")]
    AllChannelsFailed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<EnrichError> for HandlerError {
    fn from(err: EnrichError) -> Self {
        match err {
            EnrichError::PersonNotFound(_) => HandlerError::permanent(err),
            EnrichError::AllChannelsFailed(_) => HandlerError::transient(err),
            EnrichError::Store(err) => err.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EnrichReport {
    pub person_id: String,
    pub channels_ok: Vec<Channel>,
    pub channels_failed: Vec<(Channel, String)>,
    /// New knowledge rows.
    pub stored: usize,
    /// Already stored under the same content hash.
    pub duplicates: usize,
    /// Dropped for being at or before the channel cutoff.
    pub older_than_cutoff: usize,
    pub contacts_applied: usize,
}

pub struct Enricher {
    records: Arc<dyn RecordStore>,
    watermarks: Arc<dyn WatermarkStore>,
    provider: Arc<dyn SearchProvider>,
    clock: Arc<dyn Clock>,
    channel_delay: Duration,
}

impl Enricher {
    pub fn new(
        records: Arc<dyn RecordStore>,
        watermarks: Arc<dyn WatermarkStore>,
        provider: Arc<dyn SearchProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            records,
            watermarks,
            provider,
            clock,
            channel_delay: Duration::ZERO,
        }
    }

    pub fn with_channel_delay(mut self, channel_delay: Duration) -> Self {
        self.channel_delay = channel_delay;
        self
    }

    pub async fn enrich(
        &self,
        person_id: &str,
        channels: &[Channel],
        incremental: bool,
    ) -> Result<EnrichReport, EnrichError> {
        let mut person = self
            .records
            .person(person_id)
            .await?
            .ok_or_else(|| EnrichError::PersonNotFound(person_id.to_string()))?;
        let started = self.clock.now();
        let mut report = EnrichReport {
            person_id: person_id.to_string(),
            ..EnrichReport::default()
        };

        for (i, &channel) in channels.iter().enumerate() {
            if i > 0 && !self.channel_delay.is_zero() {
                tokio::time::sleep(self.channel_delay).await;
            }

            let cutoff = if incremental {
                self.watermarks.cutoff(person_id, channel).await?
            } else {
                None
            };
            debug!(person_id, %channel, ?cutoff, "searching");

            match self.provider.search(channel, &person, cutoff).await {
                Ok(result) => {
                    self.store_result(&mut person, channel, cutoff, result, &mut report)
                        .await?;
                }
                Err(ProviderError::NotFound(what)) => {
                    debug!(person_id, %channel, what, "nothing found");
                }
                Err(err) => {
                    warn!(person_id, %channel, error = %err, "channel failed");
                    report.channels_failed.push((channel, err.to_string()));
                    continue;
                }
            }

            self.watermarks
                .set_cutoff(&ChannelWatermark {
                    entity_id: person_id.to_string(),
                    channel,
                    cutoff: started,
                })
                .await?;
            report.channels_ok.push(channel);
        }

        if report.contacts_applied > 0 {
            self.records.upsert_person(&person).await?;
        }

        if report.channels_ok.is_empty() && !report.channels_failed.is_empty() {
            let reasons = report
                .channels_failed
                .iter()
                .map(|(channel, err)| format!("{channel}: {err}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(EnrichError::AllChannelsFailed(reasons));
        }

        info!(
            person_id,
            ok = report.channels_ok.len(),
            failed = report.channels_failed.len(),
            stored = report.stored,
            duplicates = report.duplicates,
            "person enriched"
        );
        Ok(report)
    }

    async fn store_result(
        &self,
        person: &mut Person,
        channel: Channel,
        cutoff: Option<DateTime<Utc>>,
        result: crate::domain::EnrichmentResult,
        report: &mut EnrichReport,
    ) -> Result<(), StoreError> {
        for item in result.knowledge {
            if cutoff.is_some_and(|cutoff| item.is_at_or_before(cutoff)) {
                report.older_than_cutoff += 1;
                continue;
            }
            if self
                .records
                .insert_knowledge(&person.id, &item, &item.content_hash())
                .await?
            {
                report.stored += 1;
            } else {
                report.duplicates += 1;
            }
        }
        for contact in &result.contacts {
            if person.apply_contact(contact) {
                debug!(person_id = %person.id, %channel, kind = ?contact.kind, "contact applied");
                report.contacts_applied += 1;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Confidence, ContactItem, ContactKind, EnrichmentResult, KnowledgeItem};
    use crate::impls::InMemoryStore;
    use crate::ports::FixedClock;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedSearch {
        results: Mutex<HashMap<Channel, Result<EnrichmentResult, ProviderError>>>,
        cutoffs: Mutex<Vec<(Channel, Option<DateTime<Utc>>)>>,
    }

    impl ScriptedSearch {
        fn set(&self, channel: Channel, result: Result<EnrichmentResult, ProviderError>) {
            self.results.lock().unwrap().insert(channel, result);
        }
    }

    #[async_trait]
    impl SearchProvider for ScriptedSearch {
        async fn search(
            &self,
            channel: Channel,
            _person: &Person,
            cutoff: Option<DateTime<Utc>>,
        ) -> Result<EnrichmentResult, ProviderError> {
            self.cutoffs.lock().unwrap().push((channel, cutoff));
            self.results
                .lock()
                .unwrap()
                .get(&channel)
                .cloned()
                .unwrap_or_else(|| Ok(EnrichmentResult::default()))
        }
    }

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, day, 0, 0, 0).unwrap()
    }

    async fn fixture() -> (Arc<InMemoryStore>, Arc<ScriptedSearch>, Arc<FixedClock>, Enricher) {
        let store = Arc::new(InMemoryStore::new());
        let search = Arc::new(ScriptedSearch::default());
        let clock = Arc::new(FixedClock::new(at(10)));
        store
            .upsert_person(&Person { id: "ada".into(), name: "Ada".into(), ..Person::default() })
            .await
            .unwrap();
        let enricher = Enricher::new(store.clone(), store.clone(), search.clone(), clock.clone());
        (store, search, clock, enricher)
    }

    #[tokio::test]
    async fn success_stores_knowledge_and_sets_watermark_to_run_start() {
        let (store, search, _clock, enricher) = fixture().await;
        search.set(
            Channel::Github,
            Ok(EnrichmentResult {
                knowledge: vec![
                    KnowledgeItem::new(Channel::Github, "repo a").with_date(at(2)),
                    KnowledgeItem::new(Channel::Github, "repo a").with_date(at(2)),
                ],
                contacts: vec![ContactItem {
                    kind: ContactKind::Email,
                    value: "ada@example.com".into(),
                    confidence: Confidence::High,
                    source: "github_profile".into(),
                }],
            }),
        );

        let report = enricher.enrich("ada", &[Channel::Github], false).await.unwrap();
        assert_eq!((report.stored, report.duplicates, report.contacts_applied), (1, 1, 1));
        assert_eq!(store.cutoff("ada", Channel::Github).await.unwrap(), Some(at(10)));
        let person = store.person("ada").await.unwrap().unwrap();
        assert_eq!(person.email.as_deref(), Some("ada@example.com"));
    }

    #[tokio::test]
    async fn incremental_passes_cutoff_and_drops_older_items() {
        let (store, search, _clock, enricher) = fixture().await;
        store
            .set_cutoff(&ChannelWatermark { entity_id: "ada".into(), channel: Channel::Arxiv, cutoff: at(5) })
            .await
            .unwrap();
        search.set(
            Channel::Arxiv,
            Ok(EnrichmentResult {
                knowledge: vec![
                    KnowledgeItem::new(Channel::Arxiv, "old paper").with_date(at(5)),
                    KnowledgeItem::new(Channel::Arxiv, "new paper").with_date(at(7)),
                    KnowledgeItem::new(Channel::Arxiv, "undated"),
                ],
                contacts: vec![],
            }),
        );

        let report = enricher.enrich("ada", &[Channel::Arxiv, Channel::Github], true).await.unwrap();
        assert_eq!(report.older_than_cutoff, 1);
        assert_eq!(report.stored, 2);
        let cutoffs = search.cutoffs.lock().unwrap().clone();
        assert_eq!(cutoffs, [(Channel::Arxiv, Some(at(5))), (Channel::Github, None)]);
    }

    #[tokio::test]
    async fn full_mode_ignores_watermarks() {
        let (store, search, _clock, enricher) = fixture().await;
        store
            .set_cutoff(&ChannelWatermark { entity_id: "ada".into(), channel: Channel::Arxiv, cutoff: at(5) })
            .await
            .unwrap();
        enricher.enrich("ada", &[Channel::Arxiv], false).await.unwrap();
        assert_eq!(search.cutoffs.lock().unwrap()[0], (Channel::Arxiv, None));
    }

    #[tokio::test]
    async fn failed_channel_keeps_its_watermark() {
        let (store, search, _clock, enricher) = fixture().await;
        search.set(Channel::General, Err(ProviderError::Unavailable("serp down".into())));

        let report = enricher
            .enrich("ada", &[Channel::General, Channel::Github], true)
            .await
            .unwrap();
        assert_eq!(report.channels_ok, [Channel::Github]);
        assert_eq!(store.cutoff("ada", Channel::General).await.unwrap(), None);
        assert_eq!(store.cutoff("ada", Channel::Github).await.unwrap(), Some(at(10)));
    }

    #[tokio::test]
    async fn not_found_counts_as_an_empty_success() {
        let (store, search, _clock, enricher) = fixture().await;
        search.set(Channel::Github, Err(ProviderError::NotFound("no user".into())));
        let report = enricher.enrich("ada", &[Channel::Github], true).await.unwrap();
        assert_eq!(report.channels_ok, [Channel::Github]);
        assert!(store.cutoff("ada", Channel::Github).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn all_channels_failing_is_transient_and_missing_person_is_permanent() {
        let (_store, search, _clock, enricher) = fixture().await;
        search.set(Channel::Github, Err(ProviderError::RateLimited("403".into())));
        let err = enricher.enrich("ada", &[Channel::Github], false).await.unwrap_err();
        assert!(!HandlerError::from(err).is_permanent());

        let err = enricher.enrich("nobody", &[Channel::Github], false).await.unwrap_err();
        assert!(HandlerError::from(err).is_permanent());
    }
}
