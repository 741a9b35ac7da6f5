mod config;
mod crawler;
mod db;
mod error;
mod models;
mod services;

use config::Config;
use db::Repository;
use error::{AppError, Result};
use services::{CrawlerService, FeedService, SubscriptionService};

#[tokio::main]
async fn main() {
    // Initialize logging (only show warnings and errors by default)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(args: Vec<String>) -> Result<()> {
    let config = Config::load()?;
    let repo = Repository::new(&config.db_path).await?;

    // Optional --user <id> pair anywhere before the command
    let mut user: Option<String> = None;
    let mut rest: Vec<String> = Vec::new();
    let mut iter = args.into_iter().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--user" {
            user = iter.next();
            if user.is_none() {
                return Err(AppError::Validation("--user requires a value".to_string()));
            }
        } else {
            rest.push(arg);
        }
    }

    let command = rest.first().map(String::as_str).unwrap_or("help");

    match command {
        "subscribe" => {
            let user = require_user(&user)?;
            let url = require_arg(&rest, 1, "subscribe <url>")?;
            let subscriptions = SubscriptionService::new(repo);
            let subscription = subscriptions.add_subscription(user, url).await?;
            println!(
                "Subscribed (subscription {} -> source {})",
                subscription.id, subscription.source_id
            );
        }
        "unsubscribe" => {
            let user = require_user(&user)?;
            let id = parse_id(require_arg(&rest, 1, "unsubscribe <subscription-id>")?)?;
            let subscriptions = SubscriptionService::new(repo);
            subscriptions.remove_subscription(user, id).await?;
            println!("Unsubscribed {}", id);
        }
        "subscriptions" => {
            let user = require_user(&user)?;
            let subscriptions = SubscriptionService::new(repo);
            let listed = subscriptions.list_subscriptions(user).await?;
            if listed.is_empty() {
                println!("No subscriptions");
            }
            for details in listed {
                println!(
                    "{}  {}  [{}]  {} articles",
                    details.subscription.id,
                    details.source.url,
                    details.source.status.as_str(),
                    details.source.total_articles,
                );
            }
        }
        "crawl" => {
            let id = parse_id(require_arg(&rest, 1, "crawl <source-id>")?)?;
            let crawler = CrawlerService::new(repo, &config);
            let saved = crawler.crawl_source(id).await?;
            println!("Crawled source {}: {} new articles", id, saved);
        }
        "crawl-all" => {
            let user = require_user(&user)?;
            let crawler = CrawlerService::new(repo, &config);
            let summary = crawler.crawl_user_sources(user).await?;
            println!(
                "Crawled {} sources ({} failed)",
                summary.succeeded + summary.failed,
                summary.failed
            );
        }
        "feed" => {
            let user = require_user(&user)?;
            let json = rest.iter().any(|a| a == "--json");
            let positional: Vec<&String> = rest
                .iter()
                .skip(1)
                .filter(|a| !a.starts_with("--"))
                .collect();
            let page = positional
                .first()
                .map(|s| parse_id(s))
                .transpose()?
                .unwrap_or(1)
                .max(1);
            let page_size = positional
                .get(1)
                .map(|s| parse_id(s))
                .transpose()?
                .unwrap_or(20)
                .clamp(1, 100);

            let feed = FeedService::new(repo);
            let (entries, total) = feed.compose_feed(user, page, page_size).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&entries).map_err(anyhow::Error::from)?);
            } else {
                for (i, entry) in entries.iter().enumerate() {
                    let rank = (page - 1) * page_size + i as i64 + 1;
                    println!(
                        "{:3}. [{}] {}\n     {}",
                        rank, entry.source.name, entry.article.title, entry.article.url
                    );
                }
                println!("-- page {} of {} total articles --", page, total);
            }
        }
        _ => {
            print_usage();
        }
    }

    Ok(())
}

fn require_user<'a>(user: &'a Option<String>) -> Result<&'a str> {
    user.as_deref()
        .ok_or_else(|| AppError::Validation("--user <id> is required for this command".to_string()))
}

fn require_arg<'a>(rest: &'a [String], index: usize, usage: &str) -> Result<&'a str> {
    rest.get(index)
        .map(String::as_str)
        .ok_or_else(|| AppError::Validation(format!("usage: {}", usage)))
}

fn parse_id(s: &str) -> Result<i64> {
    s.parse::<i64>()
        .map_err(|_| AppError::Validation(format!("invalid identifier: {}", s)))
}

fn print_usage() {
    println!("feedmill - crawl subscribed web sources into a deduplicated feed");
    println!();
    println!("Usage: feedmill [--user <id>] <command> [args]");
    println!();
    println!("Commands:");
    println!("  subscribe <url>                 subscribe the user to a source URL");
    println!("  unsubscribe <subscription-id>   remove one of the user's subscriptions");
    println!("  subscriptions                   list the user's subscriptions");
    println!("  crawl <source-id>               crawl a single source now");
    println!("  crawl-all                       crawl all of the user's sources");
    println!("  feed [page] [size] [--json]     show the user's aggregated feed");
}
