use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Source;

/// A (user, source) link. Owned by the user who created it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: i64,
    pub user_id: String,
    pub source_id: i64,
    pub subscribed_at: DateTime<Utc>,
}

/// Subscription joined with its source snapshot, for listing.
#[derive(Debug, Clone, Serialize)]
pub struct SubscriptionDetails {
    pub subscription: Subscription,
    pub source: Source,
}
