use anyhow::Result;
use sqlx::Row;

use super::core::Database;
use crate::util::now_timestamp;

/// A stored per-language summary together with its verification verdict.
#[derive(Clone, Debug)]
pub struct SummaryRow {
    pub id: i64,
    pub incident_id: i64,
    pub language: String,
    pub headline: String,
    pub body: String,
    pub version: i64,
    pub confidence: f64,
    pub needs_review: bool,
}

/// Writes a summary for an incident/language pair, bumping the version on
/// regeneration.
///
/// The confidence score and review flag come from the fact-verification
/// guard and are persisted with the text they judged.
///
/// # Arguments
/// * `db` - Database instance
/// * `incident_id` - ID of the incident this summary describes
/// * `language` - ISO 639-1 language code of the summary
/// * `headline` - Generated headline
/// * `body` - Generated summary text
/// * `confidence` - Verification confidence in 0..1
/// * `needs_review` - Whether the guard flagged the text for review
///
/// # Returns
/// * `Ok(summary_id)` - The ID of the inserted or updated row
/// * `Err` - If there was an error during the write
pub async fn upsert_summary(
    db: &Database,
    incident_id: i64,
    language: &str,
    headline: &str,
    body: &str,
    confidence: f64,
    needs_review: bool,
) -> Result<i64> {
    let now = now_timestamp();

    let (id,): (i64,) = sqlx::query_as(
        r#"
        INSERT INTO summaries
        (incident_id, language, headline, body, version, confidence, needs_review, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, 1, ?5, ?6, ?7, ?7)
        ON CONFLICT(incident_id, language) DO UPDATE SET
            headline = excluded.headline,
            body = excluded.body,
            version = summaries.version + 1,
            confidence = excluded.confidence,
            needs_review = excluded.needs_review,
            updated_at = excluded.updated_at
        RETURNING id
        "#,
    )
    .bind(incident_id)
    .bind(language)
    .bind(headline)
    .bind(body)
    .bind(confidence)
    .bind(needs_review)
    .bind(&now)
    .fetch_one(db.pool())
    .await?;

    Ok(id)
}

/// Gets the stored summary for an incident in one language.
pub async fn get_summary(
    db: &Database,
    incident_id: i64,
    language: &str,
) -> Result<Option<SummaryRow>> {
    let row = sqlx::query(
        r#"
        SELECT id, incident_id, language, headline, body, version, confidence, needs_review
        FROM summaries
        WHERE incident_id = ? AND language = ?
        "#,
    )
    .bind(incident_id)
    .bind(language)
    .fetch_optional(db.pool())
    .await?;

    Ok(row.map(|row| SummaryRow {
        id: row.get("id"),
        incident_id: row.get("incident_id"),
        language: row.get("language"),
        headline: row.get("headline"),
        body: row.get("body"),
        version: row.get("version"),
        confidence: row.get("confidence"),
        needs_review: row.get("needs_review"),
    }))
}
