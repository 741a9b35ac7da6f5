use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Source;

/// A persisted article. Written once by the crawl pipeline, evicted by
/// retention, never updated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub content_hash: String,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
}

/// Article row ready for insertion, after the duplicate gate has passed.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub source_id: i64,
    pub title: String,
    pub url: String,
    pub content_hash: String,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
}

/// One feed item: an article paired with the current snapshot of its source.
#[derive(Debug, Clone, Serialize)]
pub struct FeedEntry {
    pub article: Article,
    pub source: Source,
}
