use chrono::{DateTime, Utc};
use serde::Serialize;

/// Stable identity of a parameterised query, unique per
/// (instance, database, hash). Created on first observation; only the
/// preserved sample text and last-seen instant are ever refreshed.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Fingerprint {
    pub id: i64,
    pub instance_name: String,
    pub database_name: String,
    /// 128-bit canonical hash, lowercase hex (or the server-supplied digest
    /// verbatim when the engine provides one)
    pub hash: String,
    /// Original text, truncated to 4096 bytes at a UTF-8 boundary
    pub sample_text: String,
    /// Literals replaced, whitespace collapsed, keywords upper-cased
    pub normalized_text: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Row content for an upsert; the store assigns the id.
#[derive(Debug, Clone)]
pub struct FingerprintUpsert {
    pub instance_name: String,
    pub database_name: String,
    pub hash: String,
    pub sample_text: String,
    pub normalized_text: String,
}

/// Output of the fingerprint service for one raw statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FingerprintParts {
    pub hash: String,
    pub normalized_text: String,
    pub sample_text: String,
}
