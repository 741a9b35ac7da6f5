use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::{AppError, Result};
use crate::models::{Article, NewArticle, NewSource, Source, SourceStatus, Subscription};

use super::schema::SCHEMA;

#[derive(Clone)]
pub struct Repository {
    conn: Connection,
}

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;

        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON")?;
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Source operations

    /// Insert a new source. A racing insert of the same URL surfaces as
    /// `AppError::Conflict`; callers re-read the winning row.
    pub async fn insert_source(&self, source: NewSource) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO sources (url, name) VALUES (?1, ?2)",
                    params![source.url, source.name],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(|e| map_unique_violation(e, "source URL"))?;
        Ok(id)
    }

    pub async fn get_source(&self, id: i64) -> Result<Option<Source>> {
        let source = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SOURCE_COLUMNS} FROM sources WHERE id = ?1"
                ))?;
                let source = stmt
                    .query_row(params![id], |row| Ok(source_from_row(row)))
                    .optional()?;
                Ok(source)
            })
            .await?;
        Ok(source)
    }

    pub async fn find_source_by_url(&self, url: &str) -> Result<Option<Source>> {
        let url = url.to_string();
        let source = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SOURCE_COLUMNS} FROM sources WHERE url = ?1"
                ))?;
                let source = stmt
                    .query_row(params![url], |row| Ok(source_from_row(row)))
                    .optional()?;
                Ok(source)
            })
            .await?;
        Ok(source)
    }

    pub async fn touch_source_attempt(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE sources SET last_attempt_at = ?1 WHERE id = ?2",
                    params![at.to_rfc3339(), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Persist the crawl-state fields of a source snapshot produced by
    /// `Source::apply_outcome`.
    pub async fn update_source_crawl_state(&self, source: &Source) -> Result<()> {
        let source = source.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    r#"UPDATE sources SET
                           status = ?1,
                           last_crawled_at = ?2,
                           last_error = ?3,
                           total_articles = ?4,
                           successful_crawls = ?5,
                           failed_crawls = ?6,
                           updated_at = ?7
                       WHERE id = ?8"#,
                    params![
                        source.status.as_str(),
                        source.last_crawled_at.map(|dt| dt.to_rfc3339()),
                        source.last_error,
                        source.total_articles,
                        source.successful_crawls,
                        source.failed_crawls,
                        source.updated_at.to_rfc3339(),
                        source.id,
                    ],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Article operations

    pub async fn article_exists_by_url(&self, source_id: i64, url: &str) -> Result<bool> {
        let url = url.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM articles WHERE source_id = ?1 AND url = ?2",
                    params![source_id, url],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    pub async fn article_exists_by_hash(&self, content_hash: &str) -> Result<bool> {
        let content_hash = content_hash.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM articles WHERE content_hash = ?1",
                    params![content_hash],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }

    /// Insert an article. Unique violations (same (source_id, url) or same
    /// content_hash, e.g. from a racing crawl) come back as `AppError::Conflict`.
    pub async fn insert_article(&self, article: NewArticle) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO articles
                           (source_id, title, url, content_hash, summary, author, published_at, discovered_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
                    params![
                        article.source_id,
                        article.title,
                        article.url,
                        article.content_hash,
                        article.summary,
                        article.author,
                        article.published_at.map(|dt| dt.to_rfc3339()),
                        article.discovered_at.to_rfc3339(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(|e| map_unique_violation(e, "article"))?;
        Ok(id)
    }

    pub async fn count_articles_for_source(&self, source_id: i64) -> Result<i64> {
        let count = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM articles WHERE source_id = ?1",
                    params![source_id],
                    |row| row.get(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// Ids of articles beyond the `keep` most recently discovered for a source.
    pub async fn stale_article_ids(&self, source_id: i64, keep: usize) -> Result<Vec<i64>> {
        let ids = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id FROM articles
                       WHERE source_id = ?1
                       ORDER BY discovered_at DESC
                       LIMIT -1 OFFSET ?2"#,
                )?;
                let ids = stmt
                    .query_map(params![source_id, keep as i64], |row| row.get(0))?
                    .collect::<std::result::Result<Vec<i64>, _>>()?;
                Ok(ids)
            })
            .await?;
        Ok(ids)
    }

    pub async fn delete_articles(&self, ids: Vec<i64>) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let deleted = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "DELETE FROM articles WHERE id IN ({})",
                    placeholders(ids.len())
                );
                let deleted = conn.execute(&sql, params_from_iter(ids.iter()))?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn count_articles_for_sources(&self, source_ids: &[i64]) -> Result<i64> {
        if source_ids.is_empty() {
            return Ok(0);
        }
        let source_ids = source_ids.to_vec();
        let count = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    "SELECT COUNT(*) FROM articles WHERE source_id IN ({})",
                    placeholders(source_ids.len())
                );
                let count: i64 =
                    conn.query_row(&sql, params_from_iter(source_ids.iter()), |row| row.get(0))?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }

    /// One feed page: articles across the given sources, newest discovery first.
    pub async fn articles_page(
        &self,
        source_ids: &[i64],
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Article>> {
        if source_ids.is_empty() {
            return Ok(Vec::new());
        }
        let source_ids = source_ids.to_vec();
        let articles = self
            .conn
            .call(move |conn| {
                let sql = format!(
                    r#"SELECT {ARTICLE_COLUMNS} FROM articles
                       WHERE source_id IN ({})
                       ORDER BY discovered_at DESC
                       LIMIT ? OFFSET ?"#,
                    placeholders(source_ids.len()),
                );
                let mut stmt = conn.prepare(&sql)?;
                let params: Vec<i64> = source_ids
                    .iter()
                    .copied()
                    .chain([limit, offset])
                    .collect();
                let articles = stmt
                    .query_map(params_from_iter(params.iter()), |row| {
                        Ok(article_from_row(row))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    // Subscription operations

    pub async fn insert_subscription(
        &self,
        user_id: &str,
        source_id: i64,
        at: DateTime<Utc>,
    ) -> Result<i64> {
        let user_id = user_id.to_string();
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO subscriptions (user_id, source_id, subscribed_at) VALUES (?1, ?2, ?3)",
                    params![user_id, source_id, at.to_rfc3339()],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(|e| map_unique_violation(e, "subscription"))?;
        Ok(id)
    }

    /// Point lookup scoped to the owning user. Foreign subscriptions are
    /// indistinguishable from absent ones.
    pub async fn get_subscription_for_user(
        &self,
        id: i64,
        user_id: &str,
    ) -> Result<Option<Subscription>> {
        let user_id = user_id.to_string();
        let subscription = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, source_id, subscribed_at FROM subscriptions WHERE id = ?1 AND user_id = ?2",
                )?;
                let subscription = stmt
                    .query_row(params![id, user_id], |row| Ok(subscription_from_row(row)))
                    .optional()?;
                Ok(subscription)
            })
            .await?;
        Ok(subscription)
    }

    pub async fn delete_subscription(&self, id: i64, user_id: &str) -> Result<usize> {
        let user_id = user_id.to_string();
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    "DELETE FROM subscriptions WHERE id = ?1 AND user_id = ?2",
                    params![id, user_id],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }

    pub async fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<Subscription>> {
        let user_id = user_id.to_string();
        let subscriptions = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, user_id, source_id, subscribed_at FROM subscriptions WHERE user_id = ?1 ORDER BY subscribed_at",
                )?;
                let subscriptions = stmt
                    .query_map(params![user_id], |row| Ok(subscription_from_row(row)))?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(subscriptions)
            })
            .await?;
        Ok(subscriptions)
    }
}

const SOURCE_COLUMNS: &str = "id, url, name, status, last_crawled_at, last_attempt_at, last_error, \
                              total_articles, successful_crawls, failed_crawls, created_at, updated_at";

const ARTICLE_COLUMNS: &str =
    "id, source_id, title, url, content_hash, summary, author, published_at, discovered_at";

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn map_unique_violation(err: tokio_rusqlite::Error, what: &str) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict(format!("{} already exists", what))
    } else {
        AppError::Database(err)
    }
}

fn is_unique_violation(err: &tokio_rusqlite::Error) -> bool {
    matches!(
        err,
        tokio_rusqlite::Error::Rusqlite(rusqlite::Error::SqliteFailure(e, _))
            if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn source_from_row(row: &Row) -> Source {
    Source {
        id: row.get(0).unwrap(),
        url: row.get(1).unwrap(),
        name: row.get(2).unwrap(),
        status: SourceStatus::parse(&row.get::<_, String>(3).unwrap()),
        last_crawled_at: row
            .get::<_, Option<String>>(4)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        last_attempt_at: row
            .get::<_, Option<String>>(5)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        last_error: row.get(6).unwrap(),
        total_articles: row.get(7).unwrap(),
        successful_crawls: row.get(8).unwrap(),
        failed_crawls: row.get(9).unwrap(),
        created_at: row
            .get::<_, String>(10)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        updated_at: row
            .get::<_, String>(11)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}

fn article_from_row(row: &Row) -> Article {
    Article {
        id: row.get(0).unwrap(),
        source_id: row.get(1).unwrap(),
        title: row.get(2).unwrap(),
        url: row.get(3).unwrap(),
        content_hash: row.get(4).unwrap(),
        summary: row.get(5).unwrap(),
        author: row.get(6).unwrap(),
        published_at: row
            .get::<_, Option<String>>(7)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        discovered_at: row
            .get::<_, String>(8)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}

fn subscription_from_row(row: &Row) -> Subscription {
    Subscription {
        id: row.get(0).unwrap(),
        user_id: row.get(1).unwrap(),
        source_id: row.get(2).unwrap(),
        subscribed_at: row
            .get::<_, String>(3)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
    }
}
