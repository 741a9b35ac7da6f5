use sha2::{Digest, Sha256};

/// Content fingerprint for cross-source duplicate detection.
///
/// Title and body are joined with a single space, lowercased, and all
/// whitespace runs collapse to one space before hashing, so case and
/// formatting differences never defeat the duplicate check. Two sources
/// publishing the same normalized text hash identically.
pub fn content_hash(title: &str, body: &str) -> String {
    let joined = format!("{} {}", title, body).to_lowercase();
    let normalized = joined.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}
