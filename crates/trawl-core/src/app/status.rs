//! Read-only views for operators.

use std::fmt;

use serde::Serialize;

use crate::domain::{CrawlState, Person, PersonFilter, RecordCounts, StoreError, TaskType};
use crate::ports::{CrawlStateStore, QueueCounts, RecordStore};
use crate::queue::TaskQueue;

/// Persons shown in the status summary.
pub const TOP_PERSONS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub queues: Vec<(TaskType, QueueCounts)>,
    pub sources: Vec<CrawlState>,
    pub records: RecordCounts,
    pub top_persons: Vec<Person>,
}

impl StatusReport {
    pub async fn collect(
        queue: &TaskQueue,
        states: &dyn CrawlStateStore,
        records: &dyn RecordStore,
        sources: &[&str],
    ) -> Result<Self, StoreError> {
        let mut found = Vec::new();
        for source in sources {
            if let Some(state) = states.load_crawl_state(source).await? {
                found.push(state);
            }
        }
        Ok(Self {
            queues: queue.stats_all().await?,
            sources: found,
            records: records.counts().await?,
            top_persons: records.top_persons(&PersonFilter::new(i64::MIN, TOP_PERSONS)).await?,
        })
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<16} {:>8} {:>10} {:>10} {:>8}",
            "stage", "pending", "processing", "completed", "failed"
        )?;
        for (task_type, c) in &self.queues {
            writeln!(
                f,
                "{:<16} {:>8} {:>10} {:>10} {:>8}",
                task_type.as_str(),
                c.pending,
                c.processing,
                c.completed,
                c.failed
            )?;
        }
        for s in &self.sources {
            writeln!(
                f,
                "\nsource {} ({}): oldest {} newest {}{}",
                s.source,
                s.status,
                s.oldest_date,
                s.newest_date,
                if s.last_cursor.is_some() { " [mid-day cursor]" } else { "" }
            )?;
        }
        let r = &self.records;
        write!(
            f,
            "\nrecords: {} posts, {} post makers, {} profiles, {} persons, {} knowledge",
            r.posts, r.post_people, r.profiles, r.persons, r.knowledge
        )?;
        if !self.top_persons.is_empty() {
            write!(f, "\n\ntop persons:")?;
            for p in &self.top_persons {
                write!(f, "\n  {:>5}  {}", p.importance_score, person_line(p))?;
            }
        }
        Ok(())
    }
}

/// `id (name) email @twitter`, omitting missing contacts.
pub fn person_line(person: &Person) -> String {
    let mut line = person.id.clone();
    if !person.name.is_empty() && person.name != person.id {
        line.push_str(&format!(" ({})", person.name));
    }
    if let Some(email) = person.email.as_deref().filter(|e| !e.is_empty()) {
        line.push_str(&format!(" {email}"));
    }
    if let Some(twitter) = person.twitter.as_deref().filter(|t| !t.is_empty()) {
        line.push_str(&format!(" @{twitter}"));
    }
    line
}
