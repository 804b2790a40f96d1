// Fingerprint Store
// Purpose: Identity rows for fingerprints, unique per
// (instance, database, hash). Upserts are atomic per hash: of any set of
// concurrent upserts for one hash, exactly one observes "newly created".

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::collections::HashMap;

use crate::models::{Fingerprint, FingerprintUpsert};
use crate::utils::MonitorResult;

#[derive(Clone)]
pub struct FingerprintStore {
    pool: SqlitePool,
}

impl FingerprintStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert or refresh one fingerprint. Returns the stable id and whether
    /// this call created the row.
    ///
    /// The insert claims the row or silently loses to a concurrent claim;
    /// the losing path refreshes sample text and last-seen. Only the
    /// winning insert reports created = true.
    pub async fn upsert(
        &self,
        fp: &FingerprintUpsert,
        now: DateTime<Utc>,
    ) -> MonitorResult<(i64, bool)> {
        let inserted: Option<(i64,)> = sqlx::query_as(
            "INSERT INTO fingerprints
                 (instance_name, database_name, hash, sample_text, normalized_text,
                  first_seen, last_seen)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(instance_name, database_name, hash) DO NOTHING
             RETURNING id",
        )
        .bind(&fp.instance_name)
        .bind(&fp.database_name)
        .bind(&fp.hash)
        .bind(&fp.sample_text)
        .bind(&fp.normalized_text)
        .bind(now)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        if let Some((id,)) = inserted {
            return Ok((id, true));
        }

        let (id,): (i64,) = sqlx::query_as(
            "UPDATE fingerprints
             SET sample_text = ?, last_seen = ?
             WHERE instance_name = ? AND database_name = ? AND hash = ?
             RETURNING id",
        )
        .bind(&fp.sample_text)
        .bind(now)
        .bind(&fp.instance_name)
        .bind(&fp.database_name)
        .bind(&fp.hash)
        .fetch_one(&self.pool)
        .await?;

        Ok((id, false))
    }

    pub async fn get(&self, id: i64) -> MonitorResult<Option<Fingerprint>> {
        let fingerprint: Option<Fingerprint> =
            sqlx::query_as("SELECT * FROM fingerprints WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(fingerprint)
    }

    pub async fn find_by_hash(
        &self,
        instance_name: &str,
        database_name: &str,
        hash: &str,
    ) -> MonitorResult<Option<Fingerprint>> {
        let fingerprint: Option<Fingerprint> = sqlx::query_as(
            "SELECT * FROM fingerprints
             WHERE instance_name = ? AND database_name = ? AND hash = ?",
        )
        .bind(instance_name)
        .bind(database_name)
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(fingerprint)
    }

    /// Batch metadata lookup for analysis joins: id → (hash, instance, db,
    /// normalized_text).
    pub async fn load_map(&self, ids: &[i64]) -> MonitorResult<HashMap<i64, Fingerprint>> {
        let mut map = HashMap::with_capacity(ids.len());
        for chunk in ids.chunks(200) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!("SELECT * FROM fingerprints WHERE id IN ({})", placeholders);
            let mut query = sqlx::query_as::<_, Fingerprint>(&sql);
            for id in chunk {
                query = query.bind(id);
            }
            for fingerprint in query.fetch_all(&self.pool).await? {
                map.insert(fingerprint.id, fingerprint);
            }
        }
        Ok(map)
    }

    /// Fingerprints first observed at or after the given instant. Feeds the
    /// daily summary.
    pub async fn count_created_since(&self, since: DateTime<Utc>) -> MonitorResult<i64> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM fingerprints WHERE first_seen >= ?")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
