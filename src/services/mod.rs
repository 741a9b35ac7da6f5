mod crawler;
mod feed;
mod subscriptions;

pub use crawler::{CrawlSummary, CrawlerService, RETENTION_CAP};
pub use feed::FeedService;
pub use subscriptions::SubscriptionService;
