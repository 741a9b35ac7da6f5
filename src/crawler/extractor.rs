use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use crate::error::{AppError, Result};

use super::hash::content_hash;

/// Hard cap on candidates taken from one document, whichever strategy wins.
pub const MAX_CANDIDATES: usize = 50;

const MIN_TITLE_CHARS: usize = 10;
const MAX_TITLE_CHARS: usize = 500;
const MAX_SUMMARY_CHARS: usize = 500;

/// An article extracted from a document, before duplicate checking.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub title: String,
    pub url: String,
    pub summary: Option<String>,
    pub author: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub content_hash: String,
}

impl Candidate {
    fn new(title: String, url: String, summary: Option<String>) -> Self {
        let title = clamp_chars(&title, MAX_TITLE_CHARS);
        let hash = content_hash(&title, summary.as_deref().unwrap_or(""));
        Candidate {
            title,
            url,
            summary,
            author: None,
            published_at: None,
            content_hash: hash,
        }
    }
}

/// Ordered extraction rules. Site-specific rules go first and gate themselves
/// on the source domain; the generic rules follow from most to least precise.
/// The chain stops at the first rule yielding at least one candidate.
const STRATEGIES: &[(&str, fn(&Html, &str) -> Vec<Candidate>)] = &[
    ("hacker-news", extract_hacker_news),
    ("lobsters", extract_lobsters),
    ("article-tags", extract_article_tags),
    ("common-classes", extract_common_classes),
    ("heading-links", extract_heading_links),
];

/// Turn a fetched document into a bounded list of candidates.
pub fn extract_candidates(html: &str, source_url: &str) -> Result<Vec<Candidate>> {
    let document = Html::parse_document(html);

    for (name, strategy) in STRATEGIES {
        let mut candidates = strategy(&document, source_url);
        if !candidates.is_empty() {
            tracing::debug!(
                strategy = name,
                count = candidates.len(),
                "extraction strategy matched"
            );
            candidates.truncate(MAX_CANDIDATES);
            return Ok(candidates);
        }
    }

    Err(AppError::NoArticlesFound)
}

/// Hacker News front page: story rows are `tr.athing`, the title link lives
/// in `span.titleline`. Comment-page links come back relative (`item?id=`).
fn extract_hacker_news(document: &Html, source_url: &str) -> Vec<Candidate> {
    if !source_url.contains("news.ycombinator.com") {
        return Vec::new();
    }

    let row_selector = Selector::parse("tr.athing").unwrap();
    let link_selector = Selector::parse("span.titleline > a").unwrap();

    let mut candidates = Vec::new();
    for row in document.select(&row_selector) {
        let Some(link) = row.select(&link_selector).next() else {
            continue;
        };
        let title = element_text(&link);
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if title.is_empty() {
            continue;
        }

        let url = if href.starts_with("item?id=") {
            format!("https://news.ycombinator.com/{}", href)
        } else {
            href.to_string()
        };

        candidates.push(Candidate::new(title, url, None));
    }
    candidates
}

/// Lobsters front page: `li.story` rows with an `a.u-url` title link.
fn extract_lobsters(document: &Html, source_url: &str) -> Vec<Candidate> {
    if !source_url.contains("lobste.rs") {
        return Vec::new();
    }

    let row_selector = Selector::parse("li.story").unwrap();
    let link_selector = Selector::parse("a.u-url").unwrap();

    let mut candidates = Vec::new();
    for row in document.select(&row_selector) {
        let Some(link) = row.select(&link_selector).next() else {
            continue;
        };
        let title = element_text(&link);
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if title.is_empty() {
            continue;
        }

        let url = if href.starts_with('/') {
            format!("https://lobste.rs{}", href)
        } else {
            href.to_string()
        };

        candidates.push(Candidate::new(title, url, None));
    }
    candidates
}

/// Semantic `<article>` elements.
fn extract_article_tags(document: &Html, source_url: &str) -> Vec<Candidate> {
    let article_selector = Selector::parse("article").unwrap();
    document
        .select(&article_selector)
        .filter_map(|el| extract_from_container(&el, source_url))
        .collect()
}

/// Containers named after the usual post/entry/story class conventions.
fn extract_common_classes(document: &Html, source_url: &str) -> Vec<Candidate> {
    let container_selector =
        Selector::parse("div.post, div.entry, div.article-item, div.story, li.story").unwrap();
    document
        .select(&container_selector)
        .filter_map(|el| extract_from_container(&el, source_url))
        .collect()
}

/// Last resort: any heading that wraps a link.
fn extract_heading_links(document: &Html, source_url: &str) -> Vec<Candidate> {
    let heading_link_selector = Selector::parse("h1 a, h2 a, h3 a").unwrap();

    let mut candidates = Vec::new();
    for link in document.select(&heading_link_selector) {
        let title = element_text(&link);
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if title.chars().count() < MIN_TITLE_CHARS {
            continue;
        }

        let url = absolutize(href, source_url);
        candidates.push(Candidate::new(title, url, None));
    }
    candidates
}

/// Shared rule for the two generic container strategies: first heading-or-link
/// is the title, first link the URL, first paragraph the summary.
fn extract_from_container(container: &ElementRef, source_url: &str) -> Option<Candidate> {
    let title_selector = Selector::parse("h1, h2, h3, a").unwrap();
    let link_selector = Selector::parse("a").unwrap();
    let para_selector = Selector::parse("p").unwrap();

    let title = container
        .select(&title_selector)
        .next()
        .map(|el| element_text(&el))
        .unwrap_or_default();

    let href = container
        .select(&link_selector)
        .next()
        .and_then(|el| el.value().attr("href"))
        .unwrap_or_default();

    if href.is_empty() || title.is_empty() || title.chars().count() < MIN_TITLE_CHARS {
        return None;
    }

    let url = absolutize(href, source_url);

    let summary = container
        .select(&para_selector)
        .next()
        .map(|el| element_text(&el))
        .filter(|text| !text.is_empty())
        .map(|text| {
            if text.chars().count() > MAX_SUMMARY_CHARS {
                let truncated: String = text.chars().take(MAX_SUMMARY_CHARS).collect();
                format!("{}...", truncated)
            } else {
                text
            }
        });

    Some(Candidate::new(title, url, summary))
}

fn element_text(el: &ElementRef) -> String {
    el.text().collect::<String>().trim().to_string()
}

/// Site-relative links are rewritten against the source URL, which is stored
/// without a trailing slash.
fn absolutize(href: &str, source_url: &str) -> String {
    if href.starts_with('/') {
        format!("{}{}", source_url, href)
    } else {
        href.to_string()
    }
}

fn clamp_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        s.chars().take(max).collect()
    } else {
        s.to_string()
    }
}
