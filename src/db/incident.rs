use anyhow::Result;
use sqlx::Row;
use tracing::debug;

use super::core::Database;
use crate::util::{now_timestamp, timestamp_in};
use crate::{RETENTION_DAYS, TARGET_DB};

/// Compact view of an incident handed to the clustering collaborator when
/// deciding whether a new article joins an existing incident.
#[derive(Clone, Debug)]
pub struct IncidentDigest {
    pub id: i64,
    pub category: Option<String>,
    pub source_count: i64,
    pub last_seen_at: String,
    pub recent_titles: Vec<String>,
}

/// One row of the public feed: a published incident joined with its
/// summary in the requested language.
#[derive(Clone, Debug, serde::Serialize)]
pub struct FeedIncident {
    pub id: i64,
    pub category: Option<String>,
    pub source_count: i64,
    pub first_seen_at: String,
    pub last_seen_at: String,
    pub headline: String,
    pub summary: String,
}

/// Parameters of a feed query. Everything that affects the result set
/// participates in cache key construction.
#[derive(Clone, Debug)]
pub struct FeedQuery {
    pub language: String,
    pub category: Option<String>,
    pub window_hours: i64,
    pub limit: i64,
    pub offset: i64,
}

/// Creates a new draft incident for a first article.
///
/// `expires_at` is derived from the retention horizon at creation time.
///
/// # Arguments
/// * `db` - Database instance
/// * `category` - Optional topic/category of the incident
///
/// # Returns
/// * `Ok(incident_id)` - The ID of the newly created incident
/// * `Err` - If there was an error during creation
pub async fn create_incident(db: &Database, category: Option<&str>) -> Result<i64> {
    let now = now_timestamp();
    let expires_at = timestamp_in(RETENTION_DAYS * 24 * 3600);

    let incident_id = sqlx::query(
        r#"
        INSERT INTO incidents
        (status, category, source_count, first_seen_at, last_seen_at, created_at, updated_at, expires_at)
        VALUES ('draft', ?, 0, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(category)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .bind(&now)
    .bind(&expires_at)
    .execute(db.pool())
    .await?
    .last_insert_rowid();

    debug!(target: TARGET_DB, "Created new incident {}", incident_id);

    Ok(incident_id)
}

/// Bumps an incident's freshness and source count after an article joins it.
pub async fn touch_incident(db: &Database, incident_id: i64) -> Result<()> {
    let now = now_timestamp();

    sqlx::query(
        r#"
        UPDATE incidents
        SET last_seen_at = ?,
            updated_at = ?,
            source_count = source_count + 1
        WHERE id = ?
        "#,
    )
    .bind(&now)
    .bind(&now)
    .bind(incident_id)
    .execute(db.pool())
    .await?;

    Ok(())
}

/// Marks an incident as published.
///
/// Publication happens after every candidate summary for the incident has
/// been through the fact-verification guard; a review flag on a summary
/// does not block publication, it only surfaces the summary for review.
pub async fn publish_incident(db: &Database, incident_id: i64) -> Result<()> {
    let now = now_timestamp();

    sqlx::query(
        r#"
        UPDATE incidents
        SET status = 'published',
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(&now)
    .bind(incident_id)
    .execute(db.pool())
    .await?;

    Ok(())
}

/// Gets digests of live (unexpired) incidents, most recently seen first.
///
/// # Arguments
/// * `db` - Database instance
/// * `limit` - Maximum number of incidents to consider for clustering
///
/// # Returns
/// * `Ok(Vec<IncidentDigest>)` - Digests including a handful of recent titles
/// * `Err` - If there was an error during retrieval
pub async fn get_live_digests(db: &Database, limit: usize) -> Result<Vec<IncidentDigest>> {
    let now = now_timestamp();

    let rows = sqlx::query(
        r#"
        SELECT id, category, source_count, last_seen_at
        FROM incidents
        WHERE expires_at > ?
        ORDER BY last_seen_at DESC
        LIMIT ?
        "#,
    )
    .bind(&now)
    .bind(limit as i64)
    .fetch_all(db.pool())
    .await?;

    let mut digests = Vec::new();

    for row in rows {
        let id: i64 = row.get("id");
        let recent_titles = super::article::get_incident_titles(db, id, 5).await?;

        digests.push(IncidentDigest {
            id,
            category: row.get("category"),
            source_count: row.get("source_count"),
            last_seen_at: row.get("last_seen_at"),
            recent_titles,
        });
    }

    Ok(digests)
}

/// Queries the published feed.
///
/// Draft incidents and incidents past their freshness window never appear,
/// regardless of whether retention cleanup has physically deleted them yet.
pub async fn get_published_incidents(
    db: &Database,
    query: &FeedQuery,
) -> Result<Vec<FeedIncident>> {
    let now = now_timestamp();
    let window_start = timestamp_in(-query.window_hours * 3600);

    let rows = sqlx::query(
        r#"
        SELECT i.id, i.category, i.source_count, i.first_seen_at, i.last_seen_at,
               s.headline, s.body
        FROM incidents i
        JOIN summaries s ON s.incident_id = i.id AND s.language = ?
        WHERE i.status = 'published'
          AND i.expires_at > ?
          AND i.last_seen_at >= ?
          AND (? IS NULL OR i.category = ?)
        ORDER BY i.last_seen_at DESC
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(&query.language)
    .bind(&now)
    .bind(&window_start)
    .bind(&query.category)
    .bind(&query.category)
    .bind(query.limit)
    .bind(query.offset)
    .fetch_all(db.pool())
    .await?;

    let incidents = rows
        .iter()
        .map(|row| FeedIncident {
            id: row.get("id"),
            category: row.get("category"),
            source_count: row.get("source_count"),
            first_seen_at: row.get("first_seen_at"),
            last_seen_at: row.get("last_seen_at"),
            headline: row.get("headline"),
            summary: row.get("body"),
        })
        .collect();

    Ok(incidents)
}

/// Gets the distinct categories of live published incidents, for the
/// facet/filter metadata endpoint.
pub async fn get_live_categories(db: &Database) -> Result<Vec<String>> {
    let now = now_timestamp();

    let rows = sqlx::query(
        r#"
        SELECT DISTINCT category FROM incidents
        WHERE status = 'published' AND expires_at > ? AND category IS NOT NULL
        ORDER BY category
        "#,
    )
    .bind(&now)
    .fetch_all(db.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| row.get::<String, _>("category"))
        .collect())
}

/// Selects the ids of incidents created before the cutoff.
///
/// Used by retention cleanup; the same query on a second run returns the
/// same ids until their cleanup completes.
pub async fn get_incident_ids_older_than(db: &Database, cutoff: &str) -> Result<Vec<i64>> {
    let rows = sqlx::query(
        r#"
        SELECT id FROM incidents
        WHERE created_at < ?
        "#,
    )
    .bind(cutoff)
    .fetch_all(db.pool())
    .await?;

    Ok(rows.iter().map(|row| row.get::<i64, _>("id")).collect())
}
