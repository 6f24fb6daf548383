//! Post and profile pages fetched over plain HTTP and read with CSS selectors.

use std::collections::HashSet;
use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::debug;

use super::send;
use trawl_core::domain::{Profile, ProviderError};
use trawl_core::ports::{PageScraper, ScrapeSession};

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static MAKER_LINK: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href^="/@"]"#));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static H1: LazyLock<Selector> = LazyLock::new(|| selector("h1"));
static OG_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"meta[property="og:description"]"#));
static OG_IMAGE: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[property="og:image"]"#));
static EXTERNAL_LINK: LazyLock<Selector> = LazyLock::new(|| selector(r#"a[href^="http"]"#));
static FOLLOWERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,]+)\s*followers").expect("valid regex"));
static FOLLOWING: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\d,]+)\s*following").expect("valid regex"));

/// Platform accounts that show up on every page.
const PLATFORM_HANDLES: [&str; 2] = ["/producthunt", "/company/producthunt"];

pub struct HttpScraper {
    client: reqwest::Client,
    base_url: String,
}

impl HttpScraper {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl PageScraper for HttpScraper {
    async fn open(&self) -> Result<Box<dyn ScrapeSession>, ProviderError> {
        Ok(Box::new(HttpSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            pages: 0,
        }))
    }
}

struct HttpSession {
    client: reqwest::Client,
    base_url: String,
    pages: usize,
}

impl HttpSession {
    async fn page(&mut self, path: &str) -> Result<String, ProviderError> {
        let url = format!("{}{path}", self.base_url);
        let html = send(self.client.get(&url), &url)
            .await?
            .text()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("{url}: {e}")))?;
        self.pages += 1;
        if is_challenge(&html) {
            return Err(ProviderError::Blocked(format!("{url}: bot challenge")));
        }
        Ok(html)
    }
}

#[async_trait]
impl ScrapeSession for HttpSession {
    async fn post_makers(&mut self, slug: &str) -> Result<Vec<String>, ProviderError> {
        let html = self.page(&format!("/posts/{slug}")).await?;
        Ok(parse_makers(&html))
    }

    async fn profile(&mut self, username: &str) -> Result<Profile, ProviderError> {
        let html = self.page(&format!("/@{username}")).await?;
        Ok(parse_profile(username, &html))
    }

    async fn close(&mut self) {
        debug!(pages = self.pages, "scrape session closed");
    }
}

fn is_challenge(html: &str) -> bool {
    let document = Html::parse_document(html);
    document
        .select(&TITLE)
        .next()
        .is_some_and(|title| title.text().collect::<String>().trim_start().starts_with("Just a moment"))
}

fn parse_makers(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut seen = HashSet::new();
    document
        .select(&MAKER_LINK)
        .filter_map(|a| a.value().attr("href"))
        .filter_map(|href| {
            let handle: String = href
                .strip_prefix("/@")?
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            (!handle.is_empty()).then_some(handle)
        })
        .filter(|u| seen.insert(u.clone()))
        .collect()
}

fn meta_content(document: &Html, selector: &Selector) -> Option<String> {
    document
        .select(selector)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
}

fn parse_profile(username: &str, html: &str) -> Profile {
    let document = Html::parse_document(html);
    let name = document
        .select(&H1)
        .next()
        .map(|h1| h1.text().collect::<Vec<_>>().join(" "))
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|n| !n.is_empty());

    let mut seen = HashSet::new();
    let links = document
        .select(&EXTERNAL_LINK)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| href.trim().to_string())
        .filter(|href| !is_platform_link(href))
        .filter(|href| seen.insert(href.clone()))
        .collect();

    let text = document.root_element().text().collect::<Vec<_>>().join(" ");

    Profile {
        username: username.to_string(),
        name,
        headline: None,
        bio: meta_content(&document, &OG_DESCRIPTION),
        avatar_url: meta_content(&document, &OG_IMAGE),
        links,
        followers_count: count(&FOLLOWERS, &text),
        following_count: count(&FOLLOWING, &text),
    }
}

fn is_platform_link(href: &str) -> bool {
    let lower = href.to_ascii_lowercase();
    let host = lower
        .split_once("://")
        .map(|(_, rest)| rest.split('/').next().unwrap_or(rest))
        .unwrap_or("");
    if host.contains("producthunt") {
        return true;
    }
    let trimmed = lower.trim_end_matches('/');
    PLATFORM_HANDLES.iter().any(|h| trimmed.ends_with(h)) || (host == "lu.ma" && lower.contains("producthunt"))
}

fn count(pattern: &Regex, text: &str) -> i64 {
    pattern
        .captures(text)
        .and_then(|c| c[1].replace(',', "").parse().ok())
        .unwrap_or(0)
}
