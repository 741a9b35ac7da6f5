mod article;
mod source;
mod subscription;

pub use article::{Article, FeedEntry, NewArticle};
pub use source::{CrawlOutcome, NewSource, Source, SourceStatus};
pub use subscription::{Subscription, SubscriptionDetails};
