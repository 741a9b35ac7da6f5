use std::collections::HashMap;

use crate::db::Repository;
use crate::error::Result;
use crate::models::{FeedEntry, Source};

/// Merges persisted articles across a user's subscribed sources into one
/// reverse-chronological, offset-paginated stream. Reads only; completely
/// decoupled from crawling.
pub struct FeedService {
    repo: Repository,
}

impl FeedService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// One feed page plus the total article count across the user's sources.
    ///
    /// `page` (1-based) and `page_size` arrive pre-clamped by the caller.
    /// Ordering is global descending discovery time, so interleaving across
    /// sources reflects when the pipeline found each article.
    pub async fn compose_feed(
        &self,
        user_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<FeedEntry>, i64)> {
        let subscriptions = self.repo.subscriptions_for_user(user_id).await?;
        if subscriptions.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let mut source_ids: Vec<i64> = Vec::new();
        let mut sources: HashMap<i64, Source> = HashMap::new();
        for subscription in &subscriptions {
            if sources.contains_key(&subscription.source_id) {
                continue;
            }
            // A source removed out from under its subscription is skipped
            if let Some(source) = self.repo.get_source(subscription.source_id).await? {
                source_ids.push(source.id);
                sources.insert(source.id, source);
            }
        }

        if source_ids.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let total = self.repo.count_articles_for_sources(&source_ids).await?;

        let offset = (page - 1) * page_size;
        let articles = self
            .repo
            .articles_page(&source_ids, page_size, offset)
            .await?;

        let entries = articles
            .into_iter()
            .filter_map(|article| {
                sources.get(&article.source_id).map(|source| FeedEntry {
                    article,
                    source: source.clone(),
                })
            })
            .collect();

        Ok((entries, total))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::content_hash;
    use crate::models::{NewArticle, NewSource};
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use tempfile::TempDir;

    async fn setup() -> (FeedService, Repository, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let repo = Repository::new(db_path.to_str().unwrap()).await.unwrap();
        (FeedService::new(repo.clone()), repo, dir)
    }

    async fn make_source(repo: &Repository, url: &str) -> i64 {
        repo.insert_source(NewSource {
            url: url.to_string(),
            name: url.to_string(),
        })
        .await
        .unwrap()
    }

    async fn seed_articles(
        repo: &Repository,
        source_id: i64,
        label: &str,
        count: usize,
        base: DateTime<Utc>,
    ) {
        for i in 0..count {
            let title = format!("{} article {}", label, i);
            repo.insert_article(NewArticle {
                source_id,
                title: title.clone(),
                url: format!("https://{}.example.com/{}", label, i),
                content_hash: content_hash(&title, ""),
                summary: None,
                author: None,
                published_at: None,
                discovered_at: base + ChronoDuration::seconds(i as i64),
            })
            .await
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_feed_without_subscriptions() {
        let (feed, _repo, _dir) = setup().await;
        let (entries, total) = feed.compose_feed("nobody", 1, 20).await.unwrap();
        assert!(entries.is_empty());
        assert_eq!(total, 0);
    }

    #[tokio::test]
    async fn test_pagination_across_two_sources() {
        let (feed, repo, _dir) = setup().await;
        let source_a = make_source(&repo, "https://alpha.example.com").await;
        let source_b = make_source(&repo, "https://beta.example.com").await;

        let now = Utc::now();
        repo.insert_subscription("reader", source_a, now).await.unwrap();
        repo.insert_subscription("reader", source_b, now).await.unwrap();

        // 30 from A discovered first, then 25 from B: B outranks A everywhere
        let base = now - ChronoDuration::hours(1);
        seed_articles(&repo, source_a, "alpha", 30, base).await;
        seed_articles(&repo, source_b, "beta", 25, base + ChronoDuration::minutes(10)).await;

        let (entries, total) = feed.compose_feed("reader", 2, 20).await.unwrap();

        assert_eq!(total, 55);
        assert_eq!(entries.len(), 20);

        // Ranks 21-40 descending: the 5 oldest of B, then the 15 newest of A
        assert_eq!(entries[0].article.title, "beta article 4");
        assert_eq!(entries[4].article.title, "beta article 0");
        assert_eq!(entries[5].article.title, "alpha article 29");
        assert_eq!(entries[19].article.title, "alpha article 15");

        // Strictly descending discovery times within the page
        for pair in entries.windows(2) {
            assert!(pair[0].article.discovered_at > pair[1].article.discovered_at);
        }

        // Every entry carries its owning source snapshot
        assert!(entries[0].source.id == source_b);
        assert!(entries[19].source.id == source_a);
    }

    #[tokio::test]
    async fn test_feed_scoped_to_own_subscriptions() {
        let (feed, repo, _dir) = setup().await;
        let subscribed = make_source(&repo, "https://mine.example.com").await;
        let foreign = make_source(&repo, "https://theirs.example.com").await;

        let now = Utc::now();
        repo.insert_subscription("reader", subscribed, now).await.unwrap();

        seed_articles(&repo, subscribed, "mine", 3, now).await;
        seed_articles(&repo, foreign, "theirs", 3, now).await;

        let (entries, total) = feed.compose_feed("reader", 1, 20).await.unwrap();

        assert_eq!(total, 3);
        assert!(entries.iter().all(|e| e.article.source_id == subscribed));
    }

    #[tokio::test]
    async fn test_last_page_is_partial() {
        let (feed, repo, _dir) = setup().await;
        let source = make_source(&repo, "https://alpha.example.com").await;
        let now = Utc::now();
        repo.insert_subscription("reader", source, now).await.unwrap();
        seed_articles(&repo, source, "alpha", 25, now).await;

        let (entries, total) = feed.compose_feed("reader", 3, 10).await.unwrap();
        assert_eq!(total, 25);
        assert_eq!(entries.len(), 5);

        let (entries, _) = feed.compose_feed("reader", 4, 10).await.unwrap();
        assert!(entries.is_empty());
    }
}
