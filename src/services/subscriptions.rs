use chrono::Utc;
use url::Url;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{NewSource, Subscription, SubscriptionDetails};

/// Subscription bookkeeping: validates URLs, creates sources lazily, and
/// keeps every read and delete scoped to the owning user.
pub struct SubscriptionService {
    repo: Repository,
}

impl SubscriptionService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Subscribe a user to a URL. The first subscriber to a URL creates the
    /// shared Source; later subscribers reuse it.
    pub async fn add_subscription(&self, user_id: &str, url_str: &str) -> Result<Subscription> {
        let parsed = Url::parse(url_str)
            .map_err(|_| AppError::Validation("invalid URL format".to_string()))?;
        if parsed.scheme() != "http" && parsed.scheme() != "https" {
            return Err(AppError::Validation(
                "URL must use http or https".to_string(),
            ));
        }

        // Trailing slash is stripped so both spellings land on one source
        let mut normalized = parsed.to_string();
        if normalized.ends_with('/') {
            normalized.pop();
        }

        let source = match self.repo.find_source_by_url(&normalized).await? {
            Some(source) => source,
            None => {
                let name = parsed
                    .host_str()
                    .map(|h| h.to_string())
                    .unwrap_or_else(|| normalized.clone());
                match self
                    .repo
                    .insert_source(NewSource {
                        url: normalized.clone(),
                        name,
                    })
                    .await
                {
                    Ok(id) => self
                        .repo
                        .get_source(id)
                        .await?
                        .ok_or(AppError::NotFound("source"))?,
                    Err(e) if e.is_conflict() => {
                        // Two subscribers raced on a new URL; the winner's row stands
                        self.repo
                            .find_source_by_url(&normalized)
                            .await?
                            .ok_or(AppError::NotFound("source"))?
                    }
                    Err(e) => return Err(e),
                }
            }
        };

        let subscribed_at = Utc::now();
        let id = self
            .repo
            .insert_subscription(user_id, source.id, subscribed_at)
            .await
            .map_err(|e| {
                if e.is_conflict() {
                    AppError::Conflict("already subscribed to this source".to_string())
                } else {
                    e
                }
            })?;

        tracing::info!(user_id, source = %source.url, "subscription added");

        Ok(Subscription {
            id,
            user_id: user_id.to_string(),
            source_id: source.id,
            subscribed_at,
        })
    }

    /// Remove a subscription the user owns. A subscription belonging to
    /// someone else reads as absent.
    pub async fn remove_subscription(&self, user_id: &str, subscription_id: i64) -> Result<()> {
        let subscription = self
            .repo
            .get_subscription_for_user(subscription_id, user_id)
            .await?
            .ok_or(AppError::NotFound("subscription"))?;

        let deleted = self
            .repo
            .delete_subscription(subscription.id, user_id)
            .await?;
        if deleted == 0 {
            return Err(AppError::NotFound("subscription"));
        }

        tracing::info!(user_id, subscription_id, "subscription removed");
        Ok(())
    }

    /// All of a user's subscriptions with their source snapshots.
    pub async fn list_subscriptions(&self, user_id: &str) -> Result<Vec<SubscriptionDetails>> {
        let subscriptions = self.repo.subscriptions_for_user(user_id).await?;

        let mut details = Vec::with_capacity(subscriptions.len());
        for subscription in subscriptions {
            // Source removed out from under the subscription: skip the row
            let Some(source) = self.repo.get_source(subscription.source_id).await? else {
                continue;
            };
            details.push(SubscriptionDetails {
                subscription,
                source,
            });
        }

        Ok(details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SourceStatus;
    use tempfile::TempDir;

    async fn setup() -> (SubscriptionService, Repository, TempDir) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let repo = Repository::new(db_path.to_str().unwrap()).await.unwrap();
        (SubscriptionService::new(repo.clone()), repo, dir)
    }

    #[tokio::test]
    async fn test_first_subscriber_creates_source() {
        let (service, repo, _dir) = setup().await;

        let sub = service
            .add_subscription("alice", "https://blog.example.com/")
            .await
            .unwrap();

        let source = repo.get_source(sub.source_id).await.unwrap().unwrap();
        assert_eq!(source.url, "https://blog.example.com");
        assert_eq!(source.name, "blog.example.com");
        assert_eq!(source.status, SourceStatus::Active);
        assert_eq!(source.total_articles, 0);
    }

    #[tokio::test]
    async fn test_later_subscribers_share_the_source() {
        let (service, _repo, _dir) = setup().await;

        let first = service
            .add_subscription("alice", "https://blog.example.com")
            .await
            .unwrap();
        // Different spelling of the same URL
        let second = service
            .add_subscription("bob", "https://blog.example.com/")
            .await
            .unwrap();

        assert_eq!(first.source_id, second.source_id);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_duplicate_subscription_conflicts() {
        let (service, _repo, _dir) = setup().await;

        service
            .add_subscription("alice", "https://blog.example.com")
            .await
            .unwrap();
        let err = service
            .add_subscription("alice", "https://blog.example.com/")
            .await
            .unwrap_err();

        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_rejects_malformed_and_non_http_urls() {
        let (service, _repo, _dir) = setup().await;

        assert!(matches!(
            service.add_subscription("alice", "not a url").await,
            Err(AppError::Validation(_))
        ));
        assert!(matches!(
            service.add_subscription("alice", "ftp://example.com").await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_requires_ownership() {
        let (service, _repo, _dir) = setup().await;

        let sub = service
            .add_subscription("alice", "https://blog.example.com")
            .await
            .unwrap();

        // Another user cannot see or delete it
        let err = service.remove_subscription("mallory", sub.id).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound("subscription")));

        // Record is intact and the owner can still remove it
        let listed = service.list_subscriptions("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        service.remove_subscription("alice", sub.id).await.unwrap();
        assert!(service.list_subscriptions("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_remove_unknown_subscription() {
        let (service, _repo, _dir) = setup().await;
        assert!(matches!(
            service.remove_subscription("alice", 12345).await,
            Err(AppError::NotFound("subscription"))
        ));
    }

    #[tokio::test]
    async fn test_list_pairs_subscription_with_source() {
        let (service, _repo, _dir) = setup().await;

        service
            .add_subscription("alice", "https://one.example.com")
            .await
            .unwrap();
        service
            .add_subscription("alice", "https://two.example.com")
            .await
            .unwrap();

        let listed = service.list_subscriptions("alice").await.unwrap();
        assert_eq!(listed.len(), 2);
        let urls: Vec<&str> = listed.iter().map(|d| d.source.url.as_str()).collect();
        assert!(urls.contains(&"https://one.example.com"));
        assert!(urls.contains(&"https://two.example.com"));
    }
}
