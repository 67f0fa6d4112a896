use anyhow::Result;
use chrono::{Duration, Utc};
use tracing::info;

use crate::db::{incident, Database};
use crate::util::format_timestamp;
use crate::{RETENTION_DAYS, TARGET_DB};

/// Outcome of one retention pass.
#[derive(Clone, Debug)]
pub struct PurgeReport {
    pub deleted_count: usize,
    pub deleted_ids: Vec<i64>,
    pub cutoff: String,
}

/// The current retention cutoff: now minus the 30-day horizon.
pub fn retention_cutoff() -> String {
    format_timestamp(Utc::now() - Duration::days(RETENTION_DAYS))
}

/// Deletes incidents created before `cutoff`, dependents first.
///
/// The order is mandatory and performed explicitly rather than through
/// database cascades, so the operation stays portable and auditable:
/// summaries, then join rows, then the articles' weak incident reference
/// (articles themselves are preserved), then the incidents.
///
/// Idempotent: with no new qualifying data a second run deletes nothing.
/// No rollback on partial failure; the intermediate states are themselves
/// safe, and a re-run finds the same ids and completes the remaining
/// steps.
///
/// # Arguments
/// * `db` - Database instance
/// * `cutoff` - Timestamp in canonical storage format
///
/// # Returns
/// * `Ok(PurgeReport)` - Count and ids of the incidents removed
/// * `Err` - If any deletion step failed
pub async fn purge_older_than(db: &Database, cutoff: &str) -> Result<PurgeReport> {
    let ids = incident::get_incident_ids_older_than(db, cutoff).await?;

    if ids.is_empty() {
        return Ok(PurgeReport {
            deleted_count: 0,
            deleted_ids: ids,
            cutoff: cutoff.to_string(),
        });
    }

    info!(
        target: TARGET_DB,
        "Purging {} incidents created before {}", ids.len(), cutoff
    );

    // Step 1: summaries owned by the expired incidents.
    for id in &ids {
        sqlx::query("DELETE FROM summaries WHERE incident_id = ?")
            .bind(id)
            .execute(db.pool())
            .await?;
    }

    // Step 2: join rows linking articles to the expired incidents.
    for id in &ids {
        sqlx::query("DELETE FROM incident_articles WHERE incident_id = ?")
            .bind(id)
            .execute(db.pool())
            .await?;
    }

    // Step 3: unlink articles; they are preserved, not deleted.
    for id in &ids {
        sqlx::query("UPDATE articles SET incident_id = NULL WHERE incident_id = ?")
            .bind(id)
            .execute(db.pool())
            .await?;
    }

    // Step 4: the incidents themselves.
    for id in &ids {
        sqlx::query("DELETE FROM incidents WHERE id = ?")
            .bind(id)
            .execute(db.pool())
            .await?;
    }

    info!(target: TARGET_DB, "Purged {} incidents", ids.len());

    Ok(PurgeReport {
        deleted_count: ids.len(),
        deleted_ids: ids,
        cutoff: cutoff.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{article, summary};
    use crate::util::now_timestamp;

    async fn test_db() -> Database {
        Database::new(":memory:")
            .await
            .expect("Failed to create in-memory database")
    }

    /// Inserts an incident with explicit timestamps, bypassing the normal
    /// creation path so tests can age rows arbitrarily.
    async fn insert_incident_created_at(db: &Database, created_at: &str) -> i64 {
        sqlx::query(
            r#"
            INSERT INTO incidents
            (status, category, source_count, first_seen_at, last_seen_at, created_at, updated_at, expires_at)
            VALUES ('published', 'world', 1, ?1, ?1, ?1, ?1, ?1)
            "#,
        )
        .bind(created_at)
        .execute(db.pool())
        .await
        .unwrap()
        .last_insert_rowid()
    }

    async fn insert_linked_article(db: &Database, incident_id: i64, url: &str) -> i64 {
        let article_id = article::insert_article(
            db,
            &article::NewArticle {
                source_id: "source-1".to_string(),
                title: Some("Something happened".to_string()),
                url: url.to_string(),
                raw_text: "Body text".to_string(),
                image_url: None,
                language: Some("en".to_string()),
            },
        )
        .await
        .unwrap();

        article::update_article_incident_id(db, article_id, incident_id)
            .await
            .unwrap();
        article::link_article_to_incident(db, article_id, incident_id)
            .await
            .unwrap();

        article_id
    }

    #[tokio::test]
    async fn test_purge_removes_expired_and_keeps_fresh() {
        let db = test_db().await;

        let old = insert_incident_created_at(&db, "2020-01-01T00:00:00.000000Z").await;
        let fresh = insert_incident_created_at(&db, &now_timestamp()).await;

        let report = purge_older_than(&db, &retention_cutoff()).await.unwrap();

        assert_eq!(report.deleted_count, 1);
        assert_eq!(report.deleted_ids, vec![old]);

        let remaining: Vec<i64> = sqlx::query_scalar("SELECT id FROM incidents")
            .fetch_all(db.pool())
            .await
            .unwrap();
        assert_eq!(remaining, vec![fresh]);
    }

    #[tokio::test]
    async fn test_purge_ordering_leaves_no_orphans() {
        let db = test_db().await;

        let old = insert_incident_created_at(&db, "2020-01-01T00:00:00.000000Z").await;
        let article_id = insert_linked_article(&db, old, "https://example.com/a").await;
        summary::upsert_summary(&db, old, "en", "Headline", "Body", 1.0, false)
            .await
            .unwrap();

        purge_older_than(&db, &retention_cutoff()).await.unwrap();

        // No summary or join row may reference the deleted incident.
        let summaries: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM summaries WHERE incident_id = ?")
                .bind(old)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(summaries, 0);

        let links: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM incident_articles WHERE incident_id = ?")
                .bind(old)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(links, 0);

        // The article survives, unlinked.
        let incident_ref: Option<i64> =
            sqlx::query_scalar("SELECT incident_id FROM articles WHERE id = ?")
                .bind(article_id)
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(incident_ref, None);
    }

    #[tokio::test]
    async fn test_purge_is_idempotent() {
        let db = test_db().await;

        insert_incident_created_at(&db, "2020-01-01T00:00:00.000000Z").await;

        let cutoff = retention_cutoff();
        let first = purge_older_than(&db, &cutoff).await.unwrap();
        let second = purge_older_than(&db, &cutoff).await.unwrap();

        assert_eq!(first.deleted_count, 1);
        assert_eq!(second.deleted_count, 0);
        assert!(second.deleted_ids.is_empty());
    }

    #[tokio::test]
    async fn test_purge_with_nothing_expired_is_a_noop() {
        let db = test_db().await;

        insert_incident_created_at(&db, &now_timestamp()).await;

        let report = purge_older_than(&db, &retention_cutoff()).await.unwrap();
        assert_eq!(report.deleted_count, 0);
    }
}
