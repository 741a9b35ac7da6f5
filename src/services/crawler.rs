use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use futures::stream::{self, StreamExt};

use crate::config::Config;
use crate::crawler::{extract_candidates, Candidate, PageFetcher};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{CrawlOutcome, NewArticle};

/// Articles kept per source; the oldest discoveries beyond this are evicted.
pub const RETENTION_CAP: usize = 50;

const MAX_URL_CHARS: usize = 2000;

/// Tally of a multi-source crawl run.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrawlSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Drives one source through fetch, extract, dedup, retention and the final
/// source-status update, and fans that out across a user's subscriptions.
#[derive(Clone)]
pub struct CrawlerService {
    repo: Repository,
    fetcher: PageFetcher,
    max_concurrent_crawls: usize,
    crawl_deadline: Duration,
}

impl CrawlerService {
    pub fn new(repo: Repository, config: &Config) -> Self {
        Self {
            repo,
            fetcher: PageFetcher::new(config),
            max_concurrent_crawls: config.max_concurrent_crawls.max(1),
            crawl_deadline: Duration::from_secs(config.crawl_deadline_secs),
        }
    }

    /// Crawl one source. Returns the number of newly persisted articles.
    ///
    /// The source record always ends in a terminal state: Active on success,
    /// Error with the failure text otherwise.
    pub async fn crawl_source(&self, source_id: i64) -> Result<usize> {
        let source = self
            .repo
            .get_source(source_id)
            .await?
            .ok_or(AppError::NotFound("source"))?;

        // Attempt stamp is best-effort
        if let Err(e) = self.repo.touch_source_attempt(source_id, Utc::now()).await {
            tracing::warn!(source_id, error = %e, "failed to stamp crawl attempt");
        }

        tracing::info!(source = %source.name, url = %source.url, "crawling source");

        let candidates = match self.fetch_and_extract(&source.url).await {
            Ok(candidates) => candidates,
            Err(e) => {
                let failed = source.apply_outcome(
                    &CrawlOutcome::Failure {
                        error: e.to_string(),
                    },
                    Utc::now(),
                );
                if let Err(update_err) = self.repo.update_source_crawl_state(&failed).await {
                    tracing::error!(source_id, error = %update_err, "failed to record crawl failure");
                }
                return Err(e);
            }
        };

        tracing::info!(count = candidates.len(), source = %source.name, "extracted candidates");

        let saved = self.save_candidates(source_id, &candidates).await?;

        if let Err(e) = self.enforce_retention(source_id).await {
            tracing::warn!(source_id, error = %e, "retention enforcement failed");
        }

        let now = Utc::now();
        let succeeded = source.apply_outcome(
            &CrawlOutcome::Success {
                new_articles: saved as i64,
                crawled_at: now,
            },
            now,
        );
        self.repo.update_source_crawl_state(&succeeded).await?;

        tracing::info!(saved, source = %source.name, "crawl finished");
        Ok(saved)
    }

    async fn fetch_and_extract(&self, url: &str) -> Result<Vec<Candidate>> {
        let body = self.fetcher.fetch_page(url).await?;
        // Html parsing stays inside this synchronous call; the parsed tree is
        // not Send and must not live across an await
        extract_candidates(&body, url)
    }

    /// Persist candidates that pass the duplicate gate, preserving their
    /// extraction order. Per-candidate failures are logged and skipped;
    /// partial success is the normal case.
    pub async fn save_candidates(
        &self,
        source_id: i64,
        candidates: &[Candidate],
    ) -> Result<usize> {
        let mut saved = 0;

        for candidate in candidates {
            if candidate.url.chars().count() > MAX_URL_CHARS {
                tracing::warn!(title = %candidate.title, "skipping candidate with oversized URL");
                continue;
            }

            match self.is_duplicate(source_id, candidate).await {
                Ok(true) => {
                    tracing::debug!(url = %candidate.url, "skipping duplicate candidate");
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(url = %candidate.url, error = %e, "duplicate check failed, skipping");
                    continue;
                }
            }

            let article = NewArticle {
                source_id,
                title: candidate.title.clone(),
                url: candidate.url.clone(),
                content_hash: candidate.content_hash.clone(),
                summary: candidate.summary.clone(),
                author: candidate.author.clone(),
                published_at: candidate.published_at,
                discovered_at: Utc::now(),
            };

            match self.repo.insert_article(article).await {
                Ok(_) => saved += 1,
                Err(e) if e.is_conflict() => {
                    // Lost a uniqueness race with a concurrent crawl; same as a duplicate
                    tracing::debug!(url = %candidate.url, "insert lost uniqueness race");
                }
                Err(e) => {
                    tracing::warn!(url = %candidate.url, error = %e, "failed to save article");
                }
            }
        }

        Ok(saved)
    }

    /// The single duplicate gate: same URL within the source, or the same
    /// normalized content anywhere in the store.
    async fn is_duplicate(&self, source_id: i64, candidate: &Candidate) -> Result<bool> {
        Ok(self
            .repo
            .article_exists_by_url(source_id, &candidate.url)
            .await?
            || self
                .repo
                .article_exists_by_hash(&candidate.content_hash)
                .await?)
    }

    /// Cap a source's stored history at the most recently discovered articles.
    /// Returns the number evicted. Discovery time, not publication time,
    /// decides who survives.
    pub async fn enforce_retention(&self, source_id: i64) -> Result<usize> {
        let count = self.repo.count_articles_for_source(source_id).await?;
        if count <= RETENTION_CAP as i64 {
            return Ok(0);
        }

        let stale = self.repo.stale_article_ids(source_id, RETENTION_CAP).await?;
        let deleted = self.repo.delete_articles(stale).await?;
        if deleted > 0 {
            tracing::info!(source_id, deleted, "evicted old articles");
        }
        Ok(deleted)
    }

    /// Crawl every source the user is subscribed to, a bounded number at a
    /// time. One source failing never stops the rest; the caller gets a tally.
    pub async fn crawl_user_sources(&self, user_id: &str) -> Result<CrawlSummary> {
        let subscriptions = self.repo.subscriptions_for_user(user_id).await?;

        let mut seen = HashSet::new();
        let source_ids: Vec<i64> = subscriptions
            .iter()
            .map(|sub| sub.source_id)
            .filter(|id| seen.insert(*id))
            .collect();

        let outcomes: Vec<bool> = stream::iter(source_ids)
            .map(|source_id| async move {
                match self.crawl_source(source_id).await {
                    Ok(saved) => {
                        tracing::debug!(source_id, saved, "crawl succeeded");
                        true
                    }
                    Err(e) => {
                        tracing::warn!(source_id, error = %e, "crawl failed");
                        false
                    }
                }
            })
            .buffer_unordered(self.max_concurrent_crawls)
            .collect()
            .await;

        let succeeded = outcomes.iter().filter(|ok| **ok).count();
        Ok(CrawlSummary {
            succeeded,
            failed: outcomes.len() - succeeded,
        })
    }

    /// Submit a crawl to the executor and return immediately. The task gets
    /// its own deadline covering the whole pipeline; articles already
    /// committed when the deadline hits stay committed.
    pub fn spawn_crawl(&self, source_id: i64) -> tokio::task::JoinHandle<()> {
        let service = self.clone();
        let deadline = self.crawl_deadline;
        tokio::spawn(async move {
            match tokio::time::timeout(deadline, service.crawl_source(source_id)).await {
                Ok(Ok(saved)) => {
                    tracing::info!(source_id, saved, "background crawl finished")
                }
                Ok(Err(e)) => tracing::warn!(source_id, error = %e, "background crawl failed"),
                Err(_) => tracing::warn!(source_id, "background crawl hit deadline"),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::content_hash;
    use crate::models::NewSource;
    use chrono::{Duration as ChronoDuration, Utc};
    use tempfile::TempDir;

    async fn setup() -> (CrawlerService, Repository, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let repo = Repository::new(db_path.to_str().unwrap()).await.unwrap();
        let config = Config {
            db_path: db_path.to_string_lossy().to_string(),
            ..Config::default()
        };
        let service = CrawlerService::new(repo.clone(), &config);
        (service, repo, dir)
    }

    async fn make_source(repo: &Repository, url: &str) -> i64 {
        repo.insert_source(NewSource {
            url: url.to_string(),
            name: "test source".to_string(),
        })
        .await
        .unwrap()
    }

    fn make_candidate(title: &str, url: &str, summary: Option<&str>) -> Candidate {
        Candidate {
            title: title.to_string(),
            url: url.to_string(),
            summary: summary.map(|s| s.to_string()),
            author: None,
            published_at: None,
            content_hash: content_hash(title, summary.unwrap_or("")),
        }
    }

    #[tokio::test]
    async fn test_save_candidates_is_idempotent() {
        let (service, repo, _dir) = setup().await;
        let source_id = make_source(&repo, "https://example.com").await;

        let candidates = vec![
            make_candidate("First story headline", "https://example.com/1", None),
            make_candidate("Second story headline", "https://example.com/2", Some("teaser")),
        ];

        let first_run = service.save_candidates(source_id, &candidates).await.unwrap();
        assert_eq!(first_run, 2);

        // Re-crawling an unchanged source saves nothing new
        let second_run = service.save_candidates(source_id, &candidates).await.unwrap();
        assert_eq!(second_run, 0);
        assert_eq!(repo.count_articles_for_source(source_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_cross_source_content_identity() {
        let (service, repo, _dir) = setup().await;
        let source_a = make_source(&repo, "https://alpha.example.com").await;
        let source_b = make_source(&repo, "https://beta.example.com").await;

        // Same normalized text published at two different URLs
        let at_a = make_candidate("Shared wire story", "https://alpha.example.com/s", Some("body"));
        let at_b = make_candidate("Shared  WIRE story", "https://beta.example.com/s", Some("BODY"));
        assert_eq!(at_a.content_hash, at_b.content_hash);

        assert_eq!(service.save_candidates(source_a, &[at_a]).await.unwrap(), 1);
        assert_eq!(service.save_candidates(source_b, &[at_b]).await.unwrap(), 0);

        assert_eq!(repo.count_articles_for_source(source_a).await.unwrap(), 1);
        assert_eq!(repo.count_articles_for_source(source_b).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_oversized_url_skipped() {
        let (service, repo, _dir) = setup().await;
        let source_id = make_source(&repo, "https://example.com").await;

        let long_url = format!("https://example.com/{}", "a".repeat(2100));
        let candidates = vec![make_candidate("A headline long enough", &long_url, None)];

        assert_eq!(service.save_candidates(source_id, &candidates).await.unwrap(), 0);
        assert_eq!(repo.count_articles_for_source(source_id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_retention_keeps_newest_fifty_by_discovery() {
        let (service, repo, _dir) = setup().await;
        let source_id = make_source(&repo, "https://example.com").await;

        let base = Utc::now() - ChronoDuration::hours(2);
        for i in 0..75 {
            let title = format!("Article number {}", i);
            repo.insert_article(NewArticle {
                source_id,
                title: title.clone(),
                url: format!("https://example.com/{}", i),
                content_hash: content_hash(&title, ""),
                summary: None,
                author: None,
                // Publication order runs backwards on purpose: eviction must
                // follow discovery time, not published time
                published_at: Some(base - ChronoDuration::minutes(i)),
                discovered_at: base + ChronoDuration::seconds(i),
            })
            .await
            .unwrap();
        }

        let evicted = service.enforce_retention(source_id).await.unwrap();
        assert_eq!(evicted, 25);
        assert_eq!(repo.count_articles_for_source(source_id).await.unwrap(), 50);

        // Survivors are exactly the 50 most recently discovered (indices 25..75)
        let survivors = repo.articles_page(&[source_id], 100, 0).await.unwrap();
        assert_eq!(survivors.len(), 50);
        assert_eq!(survivors[0].title, "Article number 74");
        assert_eq!(survivors[49].title, "Article number 25");
    }

    #[tokio::test]
    async fn test_retention_noop_at_or_below_cap() {
        let (service, repo, _dir) = setup().await;
        let source_id = make_source(&repo, "https://example.com").await;

        let base = Utc::now();
        for i in 0..50 {
            let title = format!("Article number {}", i);
            repo.insert_article(NewArticle {
                source_id,
                title: title.clone(),
                url: format!("https://example.com/{}", i),
                content_hash: content_hash(&title, ""),
                summary: None,
                author: None,
                published_at: None,
                discovered_at: base + ChronoDuration::seconds(i),
            })
            .await
            .unwrap();
        }

        assert_eq!(service.enforce_retention(source_id).await.unwrap(), 0);
        assert_eq!(repo.count_articles_for_source(source_id).await.unwrap(), 50);
    }

    #[tokio::test]
    async fn test_crawl_unknown_source() {
        let (service, _repo, _dir) = setup().await;
        assert!(matches!(
            service.crawl_source(9999).await,
            Err(AppError::NotFound("source"))
        ));
    }

    #[tokio::test]
    async fn test_spawn_crawl_completes_on_its_own() {
        let (service, _repo, _dir) = setup().await;
        // Unknown source: the detached task records the failure and finishes
        // without surfacing an error to the submitter
        service.spawn_crawl(9999).await.unwrap();
    }

    #[tokio::test]
    async fn test_candidate_order_preserved() {
        let (service, repo, _dir) = setup().await;
        let source_id = make_source(&repo, "https://example.com").await;

        let candidates: Vec<Candidate> = (0..5)
            .map(|i| {
                make_candidate(
                    &format!("Ordered headline {}", i),
                    &format!("https://example.com/{}", i),
                    None,
                )
            })
            .collect();

        service.save_candidates(source_id, &candidates).await.unwrap();

        let stored = repo.articles_page(&[source_id], 10, 0).await.unwrap();
        // Newest discovery first, so insertion order comes back reversed
        let titles: Vec<&str> = stored.iter().map(|a| a.title.as_str()).collect();
        let mut expected: Vec<String> =
            (0..5).map(|i| format!("Ordered headline {}", i)).collect();
        expected.reverse();
        assert_eq!(titles, expected.iter().map(String::as_str).collect::<Vec<_>>());
    }
}
