//! Records produced by the pipeline stages and the enrichment channels.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::watermark::Channel;

/// A launch post as returned by the post feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub slug: String,
    pub name: String,
    pub tagline: Option<String>,
    pub url: Option<String>,
    pub website: Option<String>,
    pub votes_count: i64,
    pub comments_count: i64,
    pub featured_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// A maker's profile page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub name: Option<String>,
    pub headline: Option<String>,
    pub bio: Option<String>,
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
    pub followers_count: i64,
    pub following_count: i64,
}

/// Someone worth enriching. `id` is the platform username.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub id: String,
    pub name: String,
    pub headline: Option<String>,
    pub twitter: Option<String>,
    pub linkedin: Option<String>,
    pub github: Option<String>,
    pub website: Option<String>,
    pub email: Option<String>,
    pub importance_score: i64,
}

impl Person {
    /// Builds a person from a scraped profile, sorting its links into
    /// social handles. The first unrecognised link becomes the website.
    pub fn from_profile(profile: &Profile) -> Self {
        let mut person = Person {
            id: profile.username.clone(),
            name: profile
                .name
                .clone()
                .unwrap_or_else(|| profile.username.clone()),
            headline: profile.headline.clone(),
            ..Person::default()
        };

        for link in &profile.links {
            let (host, path) = split_host(link);
            match (host, first_segment(path)) {
                ("twitter.com" | "x.com", Some(handle)) => {
                    person.twitter.get_or_insert(handle);
                }
                ("github.com", Some(handle)) => {
                    person.github.get_or_insert(handle);
                }
                ("twitter.com" | "x.com" | "github.com", None) | ("", _) => {}
                ("linkedin.com", _) => {
                    person.linkedin.get_or_insert_with(|| link.clone());
                }
                _ => {
                    person.website.get_or_insert_with(|| link.clone());
                }
            }
        }
        person
    }

    /// Applies a contact found during enrichment. Only high-confidence
    /// contacts are taken. Returns whether anything changed.
    pub fn apply_contact(&mut self, contact: &ContactItem) -> bool {
        if contact.confidence != Confidence::High {
            return false;
        }
        let slot = match contact.kind {
            ContactKind::Email => &mut self.email,
            ContactKind::Twitter => &mut self.twitter,
            ContactKind::Linkedin => &mut self.linkedin,
            ContactKind::Github => &mut self.github,
            ContactKind::Website => &mut self.website,
            ContactKind::Phone | ContactKind::Other => return false,
        };
        if slot.as_deref() == Some(contact.value.as_str()) {
            return false;
        }
        *slot = Some(contact.value.clone());
        true
    }

    /// Queue priority for enrichment:
    /// `posts * 10 + votes / 10 + 5 if twitter + 5 if github`.
    pub fn importance_score(&self, stats: &MakerStats) -> i64 {
        let mut score = stats.posts * 10 + stats.votes / 10;
        if self.twitter.is_some() {
            score += 5;
        }
        if self.github.is_some() {
            score += 5;
        }
        score
    }
}

fn split_host(link: &str) -> (&str, &str) {
    let rest = link
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(link);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    }
}

fn first_segment(path: &str) -> Option<String> {
    path.split(['/', '?', '#'])
        .find(|segment| !segment.is_empty())
        .map(|segment| segment.trim_start_matches('@').to_string())
        .filter(|segment| !segment.is_empty())
}

/// Selects persons for listing and enrichment queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonFilter {
    pub min_score: i64,
    pub with_email: bool,
    pub with_twitter: bool,
    pub limit: usize,
}

impl PersonFilter {
    pub fn new(min_score: i64, limit: usize) -> Self {
        Self {
            min_score,
            with_email: false,
            with_twitter: false,
            limit,
        }
    }

    pub fn with_email(mut self, required: bool) -> Self {
        self.with_email = required;
        self
    }

    pub fn with_twitter(mut self, required: bool) -> Self {
        self.with_twitter = required;
        self
    }

    /// Score threshold and required contact fields. `limit` is applied by
    /// the store after ordering.
    pub fn matches(&self, person: &Person) -> bool {
        person.importance_score >= self.min_score
            && (!self.with_email || person.email.as_deref().is_some_and(|e| !e.is_empty()))
            && (!self.with_twitter || person.twitter.as_deref().is_some_and(|t| !t.is_empty()))
    }
}

/// Aggregates over the posts a person made.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MakerStats {
    pub posts: i64,
    pub votes: i64,
}

/// A piece of raw content found on an enrichment channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub channel: Channel,
    pub content: String,
    pub url: Option<String>,
    pub query: Option<String>,
    pub title: Option<String>,
    pub content_type: Option<String>,
    pub content_date: Option<DateTime<Utc>>,
}

impl KnowledgeItem {
    pub fn new(channel: Channel, content: impl Into<String>) -> Self {
        Self {
            channel,
            content: content.into(),
            url: None,
            query: None,
            title: None,
            content_type: None,
            content_date: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.content_date = Some(date);
        self
    }

    /// Hex sha256 of `channel:url:content`, used to skip re-fetched content.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.channel.as_str().as_bytes());
        hasher.update(b":");
        hasher.update(self.url.as_deref().unwrap_or("").as_bytes());
        hasher.update(b":");
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// True when the item carries a date and that date is not after `cutoff`.
    pub fn is_at_or_before(&self, cutoff: DateTime<Utc>) -> bool {
        self.content_date.is_some_and(|date| date <= cutoff)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactKind {
    Email,
    Twitter,
    Linkedin,
    Github,
    Website,
    Phone,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactItem {
    pub kind: ContactKind,
    pub value: String,
    pub confidence: Confidence,
    /// Where the contact was found, e.g. `github_profile`.
    pub source: String,
}

/// Everything one channel returned for one person.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub knowledge: Vec<KnowledgeItem>,
    pub contacts: Vec<ContactItem>,
}

/// Row counts of the record tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCounts {
    pub posts: usize,
    pub post_people: usize,
    pub profiles: usize,
    pub persons: usize,
    pub knowledge: usize,
}
