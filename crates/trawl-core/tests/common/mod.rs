//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use trawl_core::domain::{
    Channel, DateWindow, EnrichmentResult, KnowledgeItem, Person, Post, Profile, ProviderError,
};
use trawl_core::ports::{Page, PageScraper, PostFeed, ScrapeSession, SearchProvider};

pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, day, hour, 0, 0).unwrap()
}

pub fn post(slug: &str, votes: i64) -> Post {
    Post {
        id: format!("id-{slug}"),
        slug: slug.to_string(),
        name: slug.to_uppercase(),
        tagline: None,
        url: Some(format!("https://www.producthunt.com/posts/{slug}")),
        website: None,
        votes_count: votes,
        comments_count: 0,
        featured_at: None,
        created_at: at(1, 0),
        topics: vec![],
    }
}

/// Pages keyed by window start, served in order; unknown windows are empty.
#[derive(Default)]
pub struct FakeFeed {
    pages: Mutex<HashMap<DateTime<Utc>, VecDeque<Result<Page, ProviderError>>>>,
    pub calls: Mutex<Vec<(DateWindow, Option<String>)>>,
}

impl FakeFeed {
    pub fn push(&self, window_start: DateTime<Utc>, posts: Vec<Post>, next: Option<&str>) {
        self.pages
            .lock()
            .unwrap()
            .entry(window_start)
            .or_default()
            .push_back(Ok(Page {
                posts,
                next_cursor: next.map(str::to_string),
                has_more: next.is_some(),
            }));
    }

    pub fn push_err(&self, window_start: DateTime<Utc>, err: ProviderError) {
        self.pages
            .lock()
            .unwrap()
            .entry(window_start)
            .or_default()
            .push_back(Err(err));
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl PostFeed for FakeFeed {
    async fn fetch_page(
        &self,
        _source: &str,
        window: DateWindow,
        cursor: Option<&str>,
    ) -> Result<Page, ProviderError> {
        self.calls
            .lock()
            .unwrap()
            .push((window, cursor.map(str::to_string)));
        self.pages
            .lock()
            .unwrap()
            .get_mut(&window.start)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Page::default()))
    }
}

/// Post makers and profiles from fixed maps. Tracks open sessions.
#[derive(Default)]
pub struct FakeScraper {
    pub makers: Mutex<HashMap<String, Result<Vec<String>, ProviderError>>>,
    pub profiles: Mutex<HashMap<String, Profile>>,
    pub opened: Arc<Mutex<usize>>,
    pub closed: Arc<Mutex<usize>>,
}

impl FakeScraper {
    pub fn makers(&self, slug: &str, usernames: &[&str]) {
        self.makers.lock().unwrap().insert(
            slug.to_string(),
            Ok(usernames.iter().map(|u| u.to_string()).collect()),
        );
    }

    pub fn profile(&self, profile: Profile) {
        self.profiles
            .lock()
            .unwrap()
            .insert(profile.username.clone(), profile);
    }

    pub fn sessions(&self) -> (usize, usize) {
        (*self.opened.lock().unwrap(), *self.closed.lock().unwrap())
    }
}

struct FakeSession {
    makers: HashMap<String, Result<Vec<String>, ProviderError>>,
    profiles: HashMap<String, Profile>,
    closed: Arc<Mutex<usize>>,
}

#[async_trait]
impl PageScraper for FakeScraper {
    async fn open(&self) -> Result<Box<dyn ScrapeSession>, ProviderError> {
        *self.opened.lock().unwrap() += 1;
        Ok(Box::new(FakeSession {
            makers: self.makers.lock().unwrap().clone(),
            profiles: self.profiles.lock().unwrap().clone(),
            closed: self.closed.clone(),
        }))
    }
}

#[async_trait]
impl ScrapeSession for FakeSession {
    async fn post_makers(&mut self, slug: &str) -> Result<Vec<String>, ProviderError> {
        self.makers
            .get(slug)
            .cloned()
            .unwrap_or_else(|| Err(ProviderError::NotFound(slug.to_string())))
    }

    async fn profile(&mut self, username: &str) -> Result<Profile, ProviderError> {
        self.profiles
            .get(username)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(username.to_string()))
    }

    async fn close(&mut self) {
        *self.closed.lock().unwrap() += 1;
    }
}

/// One knowledge item per call, dated `item_date`, tagged with the person.
pub struct FakeSearch {
    pub item_date: Mutex<DateTime<Utc>>,
    pub failing: Mutex<Vec<Channel>>,
    pub cutoffs: Mutex<Vec<(String, Channel, Option<DateTime<Utc>>)>>,
}

impl FakeSearch {
    pub fn new(item_date: DateTime<Utc>) -> Self {
        Self {
            item_date: Mutex::new(item_date),
            failing: Mutex::new(Vec::new()),
            cutoffs: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SearchProvider for FakeSearch {
    async fn search(
        &self,
        channel: Channel,
        person: &Person,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<EnrichmentResult, ProviderError> {
        self.cutoffs
            .lock()
            .unwrap()
            .push((person.id.clone(), channel, cutoff));
        if self.failing.lock().unwrap().contains(&channel) {
            return Err(ProviderError::Unavailable(format!("{channel} down")));
        }
        let date = *self.item_date.lock().unwrap();
        Ok(EnrichmentResult {
            knowledge: vec![
                KnowledgeItem::new(channel, format!("{} on {channel} at {date}", person.id))
                    .with_date(date),
            ],
            contacts: vec![],
        })
    }
}
