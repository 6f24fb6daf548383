//! Enrichment channels: GitHub, a Google SERP API and arXiv.

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use super::send;
use trawl_core::domain::{
    Channel, Confidence, ContactItem, ContactKind, EnrichmentResult, KnowledgeItem, Person,
    ProviderError,
};
use trawl_core::ports::SearchProvider;

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
});

/// Routes each channel to the client that serves it.
pub struct HttpSearch {
    pub github: GithubClient,
    pub serp: SerpClient,
    pub arxiv: ArxivClient,
}

#[async_trait]
impl SearchProvider for HttpSearch {
    async fn search(
        &self,
        channel: Channel,
        person: &Person,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<EnrichmentResult, ProviderError> {
        match channel {
            Channel::Github => self.github.search(person, cutoff).await,
            Channel::Arxiv => self.arxiv.search(person, cutoff).await,
            Channel::Twitter | Channel::Linkedin | Channel::General => {
                self.serp.search(channel, person, cutoff).await
            }
        }
    }
}

fn contact(kind: ContactKind, value: impl Into<String>, confidence: Confidence, source: &str) -> ContactItem {
    ContactItem {
        kind,
        value: value.into(),
        confidence,
        source: source.to_string(),
    }
}

// ---------------------------------------------------------------------------
// GitHub

pub struct GithubClient {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserSearch {
    items: Vec<UserHit>,
}

#[derive(Debug, Deserialize)]
struct UserHit {
    login: String,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
    html_url: String,
    name: Option<String>,
    bio: Option<String>,
    company: Option<String>,
    location: Option<String>,
    blog: Option<String>,
    email: Option<String>,
    twitter_username: Option<String>,
    #[serde(default)]
    followers: i64,
    #[serde(default)]
    public_repos: i64,
}

#[derive(Debug, Deserialize)]
struct Repo {
    full_name: String,
    html_url: String,
    description: Option<String>,
    language: Option<String>,
    #[serde(default)]
    stargazers_count: i64,
    #[serde(default)]
    fork: bool,
    pushed_at: Option<DateTime<Utc>>,
}

impl GithubClient {
    pub fn new(client: reqwest::Client, api_url: String, token: Option<String>) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ProviderError> {
        let mut request = self
            .client
            .get(format!("{}{path}", self.api_url))
            .header("Accept", "application/vnd.github+json");
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        send(request, "github")
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Invalid(format!("github {path}: {e}")))
    }

    /// The person's GitHub login, looked up by name when not already known.
    async fn login(&self, person: &Person) -> Result<(String, bool), ProviderError> {
        if let Some(login) = &person.github {
            return Ok((login.clone(), true));
        }
        let query = person.name.replace(' ', "+");
        let found: UserSearch = self.get(&format!("/search/users?q={query}+in:name&per_page=5")).await?;
        found
            .items
            .into_iter()
            .next()
            .map(|hit| (hit.login, false))
            .ok_or_else(|| ProviderError::NotFound(format!("no github user named {}", person.name)))
    }

    pub async fn search(
        &self,
        person: &Person,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<EnrichmentResult, ProviderError> {
        let (login, known) = self.login(person).await?;
        let user: GithubUser = self.get(&format!("/users/{login}")).await?;
        let mut result = EnrichmentResult::default();

        let mut summary = vec![format!("{} (@{})", user.name.as_deref().unwrap_or(&user.login), user.login)];
        summary.extend(user.bio.iter().cloned());
        summary.extend(user.company.iter().map(|c| format!("company: {c}")));
        summary.extend(user.location.iter().map(|l| format!("location: {l}")));
        summary.push(format!("{} followers, {} public repos", user.followers, user.public_repos));
        result.knowledge.push(
            KnowledgeItem::new(Channel::Github, summary.join("\n"))
                .with_url(user.html_url.clone())
                .with_title(format!("GitHub profile @{}", user.login))
                .with_content_type("profile"),
        );

        // A login found by name search is only a guess.
        let confidence = if known { Confidence::High } else { Confidence::Medium };
        result.contacts.push(contact(ContactKind::Github, &user.login, confidence, "github_search"));
        if let Some(email) = user.email.filter(|e| !e.is_empty()) {
            result.contacts.push(contact(ContactKind::Email, email, confidence, "github_profile"));
        }
        if let Some(blog) = user.blog.filter(|b| !b.is_empty()) {
            result.contacts.push(contact(ContactKind::Website, blog, confidence, "github_profile"));
        }
        if let Some(twitter) = user.twitter_username.filter(|t| !t.is_empty()) {
            result.contacts.push(contact(ContactKind::Twitter, twitter, confidence, "github_profile"));
        }

        let repos: Vec<Repo> = self
            .get(&format!("/users/{login}/repos?sort=updated&per_page=10"))
            .await?;
        for repo in repos.into_iter().filter(|r| !r.fork) {
            if let (Some(cutoff), Some(pushed)) = (cutoff, repo.pushed_at) {
                if pushed <= cutoff {
                    continue;
                }
            }
            let mut content = repo.full_name.clone();
            if let Some(description) = &repo.description {
                content.push_str(": ");
                content.push_str(description);
            }
            content.push_str(&format!(
                " ({}, {} stars)",
                repo.language.as_deref().unwrap_or("unknown"),
                repo.stargazers_count
            ));
            let mut item = KnowledgeItem::new(Channel::Github, content)
                .with_url(repo.html_url)
                .with_title(repo.full_name)
                .with_content_type("repo");
            if let Some(pushed) = repo.pushed_at {
                item = item.with_date(pushed);
            }
            result.knowledge.push(item);
        }
        debug!(login, items = result.knowledge.len(), "github searched");
        Ok(result)
    }
}

// ---------------------------------------------------------------------------
// SERP

pub struct SerpClient {
    client: reqwest::Client,
    api_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SerpResponse {
    #[serde(default)]
    organic_results: Vec<OrganicResult>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OrganicResult {
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

/// `tbs` value limiting results to dates after `cutoff`.
fn date_filter(cutoff: DateTime<Utc>) -> String {
    format!("cdr:1,cd_min:{}", cutoff.format("%-m/%-d/%Y"))
}

fn serp_query(channel: Channel, person: &Person) -> (String, &'static str) {
    match channel {
        Channel::Twitter => match &person.twitter {
            Some(handle) => (format!("site:twitter.com/{handle} OR site:x.com/{handle}"), "tweet"),
            None => (format!("site:twitter.com OR site:x.com \"{}\"", person.name), "tweet"),
        },
        Channel::Linkedin => {
            let headline = person.headline.as_deref().unwrap_or("");
            (
                format!("site:linkedin.com/in \"{}\" {headline}", person.name).trim().to_string(),
                "profile",
            )
        }
        _ => (
            format!("\"{}\" (founder OR CEO OR maker OR startup OR entrepreneur)", person.name),
            "article",
        ),
    }
}

impl SerpClient {
    pub fn new(client: reqwest::Client, api_url: String, api_key: Option<String>) -> Self {
        Self { client, api_url, api_key }
    }

    pub async fn search(
        &self,
        channel: Channel,
        person: &Person,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<EnrichmentResult, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::Unavailable("SERP_API_KEY is not set".into()))?;
        let (query, content_type) = serp_query(channel, person);
        let mut params = vec![
            ("engine", "google".to_string()),
            ("q", query.clone()),
            ("num", "20".to_string()),
            ("api_key", api_key.to_string()),
        ];
        if let Some(cutoff) = cutoff {
            params.push(("tbs", date_filter(cutoff)));
        }

        let response: SerpResponse = send(self.client.get(&self.api_url).query(&params), "serp")
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Invalid(format!("serp: {e}")))?;
        if let Some(error) = response.error {
            return Err(ProviderError::Unavailable(format!("serp: {error}")));
        }
        Ok(serp_result(channel, content_type, &query, response.organic_results))
    }
}

fn serp_result(
    channel: Channel,
    content_type: &str,
    query: &str,
    results: Vec<OrganicResult>,
) -> EnrichmentResult {
    let mut result = EnrichmentResult::default();
    for hit in results {
        match channel {
            Channel::Twitter if result.contacts.is_empty() => {
                if let Some(handle) = twitter_handle(&hit.link) {
                    result.contacts.push(contact(ContactKind::Twitter, handle, Confidence::Medium, "serp"));
                }
            }
            Channel::Linkedin if result.contacts.is_empty() && hit.link.contains("linkedin.com/in/") => {
                result.contacts.push(contact(ContactKind::Linkedin, &hit.link, Confidence::Medium, "serp"));
            }
            Channel::General => {
                for email in EMAIL.find_iter(&hit.snippet) {
                    result.contacts.push(contact(ContactKind::Email, email.as_str(), Confidence::Low, "serp"));
                }
            }
            _ => {}
        }
        result.knowledge.push(
            KnowledgeItem::new(channel, hit.snippet)
                .with_url(hit.link)
                .with_title(hit.title)
                .with_query(query)
                .with_content_type(content_type),
        );
    }
    result
}

fn twitter_handle(link: &str) -> Option<String> {
    let rest = link.split_once("://").map(|(_, r)| r).unwrap_or(link);
    let rest = rest.strip_prefix("www.").unwrap_or(rest);
    let path = rest
        .strip_prefix("twitter.com/")
        .or_else(|| rest.strip_prefix("x.com/"))?;
    let handle = path.split(['/', '?']).next()?;
    (!handle.is_empty() && handle != "search" && handle != "hashtag").then(|| handle.to_string())
}

// ---------------------------------------------------------------------------
// arXiv

pub struct ArxivClient {
    client: reqwest::Client,
    api_url: String,
}

impl ArxivClient {
    pub fn new(client: reqwest::Client, api_url: String) -> Self {
        Self { client, api_url }
    }

    pub async fn search(
        &self,
        person: &Person,
        cutoff: Option<DateTime<Utc>>,
    ) -> Result<EnrichmentResult, ProviderError> {
        let search_query = format!("au:\"{}\"", person.name);
        let params = [
            ("search_query", search_query.as_str()),
            ("sortBy", "submittedDate"),
            ("sortOrder", "descending"),
            ("max_results", "20"),
        ];
        let body = send(self.client.get(&self.api_url).query(&params), "arxiv")
            .await?
            .bytes()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("arxiv: {e}")))?;
        parse_atom(&body, &search_query, cutoff)
    }
}

fn collapse(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Entries are newest first; reading stops at the first one not after `cutoff`.
fn parse_atom(
    body: &[u8],
    query: &str,
    cutoff: Option<DateTime<Utc>>,
) -> Result<EnrichmentResult, ProviderError> {
    let feed = feed_rs::parser::parse(body).map_err(|e| ProviderError::Invalid(format!("arxiv feed: {e}")))?;

    let mut result = EnrichmentResult::default();
    for entry in feed.entries {
        let published = entry.published.or(entry.updated);
        if let (Some(cutoff), Some(published)) = (cutoff, published) {
            if published <= cutoff {
                break;
            }
        }
        let title = entry.title.map(|t| collapse(&t.content)).unwrap_or_default();
        let summary = entry.summary.map(|t| collapse(&t.content)).unwrap_or_default();
        let url = entry
            .links
            .first()
            .map(|l| l.href.clone())
            .or_else(|| entry.id.starts_with("http").then(|| entry.id.clone()));

        let mut item = KnowledgeItem::new(Channel::Arxiv, format!("{title}\n\n{summary}"))
            .with_title(title)
            .with_query(query)
            .with_content_type("paper");
        if let Some(url) = url {
            item = item.with_url(url);
        }
        if let Some(published) = published {
            item = item.with_date(published);
        }
        result.knowledge.push(item);
    }
    Ok(result)
}
