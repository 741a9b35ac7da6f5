use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Error,
    Unreachable,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Error => "error",
            SourceStatus::Unreachable => "unreachable",
        }
    }

    /// Unknown values fall back to Active so a schema-drifted row stays readable.
    pub fn parse(s: &str) -> Self {
        match s {
            "error" => SourceStatus::Error,
            "unreachable" => SourceStatus::Unreachable,
            _ => SourceStatus::Active,
        }
    }
}

/// A crawlable origin, shared by every user subscribed to its URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub url: String,
    pub name: String,
    pub status: SourceStatus,
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub total_articles: i64,
    pub successful_crawls: i64,
    pub failed_crawls: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewSource {
    pub url: String,
    pub name: String,
}

/// Result of one completed crawl attempt, applied to the source snapshot.
#[derive(Debug, Clone)]
pub enum CrawlOutcome {
    Success {
        new_articles: i64,
        crawled_at: DateTime<Utc>,
    },
    Failure {
        error: String,
    },
}

impl Source {
    /// Fold a crawl outcome into the next source snapshot.
    ///
    /// Pure state transition: status, error text, counters and timestamps all
    /// move together, so a crawl can never leave a half-updated record behind.
    pub fn apply_outcome(&self, outcome: &CrawlOutcome, now: DateTime<Utc>) -> Source {
        let mut next = self.clone();
        next.updated_at = now;

        match outcome {
            CrawlOutcome::Success {
                new_articles,
                crawled_at,
            } => {
                next.status = SourceStatus::Active;
                next.last_crawled_at = Some(*crawled_at);
                next.last_error = None;
                next.successful_crawls += 1;
                next.total_articles += new_articles;
            }
            CrawlOutcome::Failure { error } => {
                next.status = SourceStatus::Error;
                next.last_error = Some(error.clone());
                next.failed_crawls += 1;
            }
        }

        next
    }
}
