use sqlx::Row;
use tracing::debug;

use super::core::Database;
use crate::util::now_timestamp;
use crate::TARGET_DB;

/// An already-fetched article handed to the pipeline by the ingestion
/// collaborator. Fetching and HTML extraction happen upstream.
#[derive(Clone, Debug)]
pub struct NewArticle {
    pub source_id: String,
    pub title: Option<String>,
    pub url: String,
    pub raw_text: String,
    pub image_url: Option<String>,
    pub language: Option<String>,
}

/// Inserts an article, updating it in place when the URL was already seen.
///
/// # Arguments
/// * `db` - Database instance
/// * `article` - The fetched article to persist
///
/// # Returns
/// * `Ok(article_id)` - The ID of the inserted or updated row
/// * `Err` - If there was an error during insertion
pub async fn insert_article(db: &Database, article: &NewArticle) -> Result<i64, sqlx::Error> {
    let now = now_timestamp();
    debug!(target: TARGET_DB, "Adding/updating article: {}", article.url);

    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO articles (source_id, title, url, raw_text, image_url, language, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(url) DO UPDATE SET
            source_id = excluded.source_id,
            title = excluded.title,
            raw_text = excluded.raw_text,
            image_url = excluded.image_url,
            language = excluded.language
        RETURNING id
        "#,
    )
    .bind(&article.source_id)
    .bind(&article.title)
    .bind(&article.url)
    .bind(&article.raw_text)
    .bind(&article.image_url)
    .bind(&article.language)
    .bind(&now)
    .fetch_one(db.pool())
    .await?;

    Ok(id)
}

/// Updates an article's weak incident reference.
pub async fn update_article_incident_id(
    db: &Database,
    article_id: i64,
    incident_id: i64,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE articles
        SET incident_id = ?
        WHERE id = ?
        "#,
    )
    .bind(incident_id)
    .bind(article_id)
    .execute(db.pool())
    .await?;

    Ok(())
}

/// Records the article-incident membership in the join table.
///
/// Idempotent: re-linking an already linked pair is a no-op.
pub async fn link_article_to_incident(
    db: &Database,
    article_id: i64,
    incident_id: i64,
) -> Result<(), sqlx::Error> {
    let now = now_timestamp();

    sqlx::query(
        r#"
        INSERT OR IGNORE INTO incident_articles (article_id, incident_id, added_at)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(article_id)
    .bind(incident_id)
    .bind(&now)
    .execute(db.pool())
    .await?;

    debug!(
        target: TARGET_DB,
        "Linked article {} to incident {}", article_id, incident_id
    );

    Ok(())
}

/// Gets the raw text of every article linked to an incident, newest first.
///
/// These are the source texts the fact-verification guard checks generated
/// summaries against.
pub async fn get_incident_source_texts(
    db: &Database,
    incident_id: i64,
) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT a.raw_text
        FROM articles a
        JOIN incident_articles ia ON a.id = ia.article_id
        WHERE ia.incident_id = ?
        ORDER BY a.created_at DESC
        "#,
    )
    .bind(incident_id)
    .fetch_all(db.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| row.get::<String, _>("raw_text"))
        .collect())
}

/// Gets recent article titles for an incident, used by the clustering
/// collaborator to compare candidates.
pub async fn get_incident_titles(
    db: &Database,
    incident_id: i64,
    limit: usize,
) -> Result<Vec<String>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT a.title
        FROM articles a
        JOIN incident_articles ia ON a.id = ia.article_id
        WHERE ia.incident_id = ? AND a.title IS NOT NULL
        ORDER BY a.created_at DESC
        LIMIT ?
        "#,
    )
    .bind(incident_id)
    .bind(limit as i64)
    .fetch_all(db.pool())
    .await?;

    Ok(rows
        .iter()
        .map(|row| row.get::<String, _>("title"))
        .collect())
}
