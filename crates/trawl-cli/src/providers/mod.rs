//! HTTP-backed collaborators: the GraphQL post feed, the page scraper and
//! the search channels.

mod feed;
mod pages;
mod search;

pub use feed::GraphQlFeed;
pub use pages::HttpScraper;
pub use search::{ArxivClient, GithubClient, HttpSearch, SerpClient};

use std::time::Duration;

use reqwest::StatusCode;
use trawl_core::domain::ProviderError;

const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";

pub fn http_client() -> anyhow::Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()?;
    Ok(client)
}

/// Maps a non-success status to the collaborator error taxonomy.
fn status_error(status: StatusCode, context: &str) -> ProviderError {
    let message = format!("{context}: HTTP {status}");
    match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => ProviderError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Blocked(message),
        s if s.is_server_error() => ProviderError::Unavailable(message),
        _ => ProviderError::Invalid(message),
    }
}

fn transport_error(err: reqwest::Error, context: &str) -> ProviderError {
    if err.is_decode() {
        ProviderError::Invalid(format!("{context}: {err}"))
    } else {
        ProviderError::Unavailable(format!("{context}: {err}"))
    }
}

/// Sends `request` and fails on a non-success status.
async fn send(request: reqwest::RequestBuilder, context: &str) -> Result<reqwest::Response, ProviderError> {
    let response = request.send().await.map_err(|e| transport_error(e, context))?;
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(status_error(status, context))
    }
}
