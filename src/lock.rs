use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::util::{now_timestamp, parse_timestamp, timestamp_in};
use crate::TARGET_PIPELINE;

/// Checks whether a named lock is currently held.
///
/// An absent row and an expired row both read as unlocked; expiry is
/// evaluated at check time, no background sweep deletes stale rows.
///
/// # Arguments
/// * `db` - Database instance
/// * `name` - Name of the lock
///
/// # Returns
/// * `Ok(true)` - A non-expired lock row exists for `name`
/// * `Ok(false)` - No lock row, or the row has expired
/// * `Err` - If there was an error reading the lock row
pub async fn is_locked(db: &Database, name: &str) -> Result<bool, sqlx::Error> {
    let expires_at: Option<String> =
        sqlx::query_scalar("SELECT expires_at FROM pipeline_locks WHERE name = ?")
            .bind(name)
            .fetch_optional(db.pool())
            .await?;

    let Some(expires_at) = expires_at else {
        return Ok(false);
    };

    match parse_timestamp(&expires_at) {
        Some(expiry) => Ok(expiry > Utc::now()),
        // An unparseable expiry cannot be trusted to have expired.
        None => Ok(true),
    }
}

/// Attempts to acquire a named lock for `ttl_seconds`.
///
/// The acquire is a single conditional upsert: the insert wins when no row
/// exists, and the update clause only fires when the existing row has
/// already expired. SQLite executes the statement atomically, so two
/// concurrent callers can never both see `true`.
///
/// # Arguments
/// * `db` - Database instance
/// * `name` - Name of the lock
/// * `ttl_seconds` - How long the lock stays valid without a release
///
/// # Returns
/// * `Ok(true)` - The lock was acquired
/// * `Ok(false)` - Someone else holds a non-expired lock
/// * `Err` - If there was an error during the write; callers must treat
///   this the same as `Ok(false)`
pub async fn acquire(db: &Database, name: &str, ttl_seconds: i64) -> Result<bool, sqlx::Error> {
    let holder_token = Uuid::new_v4().to_string();
    let acquired_at = now_timestamp();
    let expires_at = timestamp_in(ttl_seconds);

    let result = sqlx::query(
        r#"
        INSERT INTO pipeline_locks (name, holder_token, acquired_at, expires_at)
        VALUES (?1, ?2, ?3, ?4)
        ON CONFLICT(name) DO UPDATE SET
            holder_token = excluded.holder_token,
            acquired_at = excluded.acquired_at,
            expires_at = excluded.expires_at
        WHERE pipeline_locks.expires_at <= excluded.acquired_at
        "#,
    )
    .bind(name)
    .bind(&holder_token)
    .bind(&acquired_at)
    .bind(&expires_at)
    .execute(db.pool())
    .await?;

    let acquired = result.rows_affected() == 1;

    if acquired {
        debug!(
            target: TARGET_PIPELINE,
            "Acquired lock '{}' as {} until {}", name, holder_token, expires_at
        );
    } else {
        debug!(target: TARGET_PIPELINE, "Lock '{}' is held, acquire failed", name);
    }

    Ok(acquired)
}

/// Releases a named lock.
///
/// Idempotent: releasing an absent lock (e.g. one that expired naturally)
/// succeeds without complaint.
pub async fn release(db: &Database, name: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM pipeline_locks WHERE name = ?")
        .bind(name)
        .execute(db.pool())
        .await?;

    debug!(target: TARGET_PIPELINE, "Released lock '{}'", name);

    Ok(())
}

/// Releases a lock, swallowing any error.
///
/// Used on pipeline exit paths so a release failure can never mask the
/// run's own result; a leaked lock is bounded by its TTL anyway.
pub async fn release_best_effort(db: &Database, name: &str) {
    if let Err(e) = release(db, name).await {
        warn!(
            target: TARGET_PIPELINE,
            "Failed to release lock '{}' (will expire via TTL): {}", name, e
        );
    }
}
