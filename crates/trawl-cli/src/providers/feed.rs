use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::send;
use trawl_core::domain::{DateWindow, Post, ProviderError};
use trawl_core::ports::{Page, PostFeed};

const PAGE_SIZE: u32 = 20;

const POSTS_QUERY: &str = r#"
query Posts($postedAfter: DateTime, $postedBefore: DateTime, $after: String, $first: Int) {
  posts(postedAfter: $postedAfter, postedBefore: $postedBefore, after: $after,
        first: $first, featured: true, order: VOTES) {
    edges {
      node {
        id name tagline slug url website votesCount commentsCount featuredAt createdAt
        topics { edges { node { name } } }
      }
    }
    pageInfo { hasNextPage endCursor }
  }
}
"#;

/// Featured posts from the Product Hunt GraphQL API.
pub struct GraphQlFeed {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl GraphQlFeed {
    pub fn new(client: reqwest::Client, api_url: String, token: Option<String>) -> Self {
        Self { client, api_url, token }
    }
}

#[derive(Debug, Deserialize)]
struct Response {
    data: Option<Data>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Data {
    posts: Connection<PostNode>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Connection<T> {
    edges: Vec<Edge<T>>,
    #[serde(default)]
    page_info: Option<PageInfo>,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageInfo {
    has_next_page: bool,
    end_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Topic {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostNode {
    id: String,
    name: String,
    tagline: Option<String>,
    slug: String,
    url: Option<String>,
    website: Option<String>,
    #[serde(default)]
    votes_count: i64,
    #[serde(default)]
    comments_count: i64,
    featured_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    topics: Option<Connection<Topic>>,
}

impl From<PostNode> for Post {
    fn from(node: PostNode) -> Self {
        Post {
            id: node.id,
            slug: node.slug,
            name: node.name,
            tagline: node.tagline,
            url: node.url,
            website: node.website,
            votes_count: node.votes_count,
            comments_count: node.comments_count,
            featured_at: node.featured_at,
            created_at: node.created_at,
            topics: node
                .topics
                .map(|t| t.edges.into_iter().map(|e| e.node.name).collect())
                .unwrap_or_default(),
        }
    }
}

fn into_page(response: Response) -> Result<Page, ProviderError> {
    if let Some(err) = response.errors.first() {
        let message = err.message.clone();
        return Err(if message.to_ascii_lowercase().contains("rate limit") {
            ProviderError::RateLimited(message)
        } else {
            ProviderError::Invalid(message)
        });
    }
    let posts = response
        .data
        .ok_or_else(|| ProviderError::Invalid("response without data".into()))?
        .posts;
    let (has_more, next_cursor) = match posts.page_info {
        Some(info) => (info.has_next_page, info.end_cursor),
        None => (false, None),
    };
    Ok(Page {
        posts: posts.edges.into_iter().map(|e| Post::from(e.node)).collect(),
        next_cursor,
        has_more,
    })
}

#[async_trait]
impl PostFeed for GraphQlFeed {
    async fn fetch_page(
        &self,
        source: &str,
        window: DateWindow,
        cursor: Option<&str>,
    ) -> Result<Page, ProviderError> {
        let token = self
            .token
            .as_deref()
            .ok_or_else(|| ProviderError::Invalid("PRODUCT_HUNT_TOKEN is not set".into()))?;
        let body = json!({
            "query": POSTS_QUERY,
            "variables": {
                "postedAfter": window.start.to_rfc3339(),
                "postedBefore": window.end.to_rfc3339(),
                "after": cursor,
                "first": PAGE_SIZE,
            }
        });
        debug!(source, start = %window.start, end = %window.end, cursor, "fetching page");

        let request = self.client.post(&self.api_url).bearer_auth(token).json(&body);
        let response: Response = send(request, "posts query")
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::Invalid(format!("posts query: {e}")))?;
        into_page(response)
    }
}
