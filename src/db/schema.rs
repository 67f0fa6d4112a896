use tracing::info;

use super::core::Database;
use crate::TARGET_DB;

impl Database {
    pub(crate) async fn initialize_schema(&self) -> Result<(), sqlx::Error> {
        let mut conn = self.pool().acquire().await?;
        sqlx::query(
            r#"
            -- Named distributed locks; at most one row per name, expiry is
            -- checked at acquisition time rather than swept in the background.
            CREATE TABLE IF NOT EXISTS pipeline_locks (
                name TEXT PRIMARY KEY,
                holder_token TEXT NOT NULL,
                acquired_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );

            -- Deduplicated news events. expires_at = created_at + retention
            -- horizon; it also hides rows past their freshness window before
            -- the cleanup job physically deletes them.
            CREATE TABLE IF NOT EXISTS incidents (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                status TEXT NOT NULL DEFAULT 'draft',
                category TEXT,
                source_count INTEGER NOT NULL DEFAULT 0,
                first_seen_at TEXT NOT NULL,
                last_seen_at TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                expires_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_incidents_status ON incidents (status);
            CREATE INDEX IF NOT EXISTS idx_incidents_category ON incidents (category);
            CREATE INDEX IF NOT EXISTS idx_incidents_created_at ON incidents (created_at);
            CREATE INDEX IF NOT EXISTS idx_incidents_expires_at ON incidents (expires_at);
            CREATE INDEX IF NOT EXISTS idx_incidents_last_seen_at ON incidents (last_seen_at);

            -- Source articles. incident_id is a weak reference: articles
            -- survive incident deletion and are merely unlinked.
            CREATE TABLE IF NOT EXISTS articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source_id TEXT NOT NULL,
                incident_id INTEGER,
                title TEXT,
                url TEXT NOT NULL UNIQUE,
                raw_text TEXT NOT NULL,
                image_url TEXT,
                language TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_articles_incident_id ON articles (incident_id);
            CREATE INDEX IF NOT EXISTS idx_articles_source_id ON articles (source_id);
            CREATE INDEX IF NOT EXISTS idx_articles_created_at ON articles (created_at);

            -- Article-incident relationships
            CREATE TABLE IF NOT EXISTS incident_articles (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                article_id INTEGER NOT NULL,
                incident_id INTEGER NOT NULL,
                added_at TEXT NOT NULL,
                FOREIGN KEY (article_id) REFERENCES articles (id),
                FOREIGN KEY (incident_id) REFERENCES incidents (id),
                UNIQUE(article_id, incident_id)
            );
            CREATE INDEX IF NOT EXISTS idx_incident_articles_article_id ON incident_articles (article_id);
            CREATE INDEX IF NOT EXISTS idx_incident_articles_incident_id ON incident_articles (incident_id);

            -- Per-language generated headline and summary text, owned by the
            -- incident. The fact-verification verdict lives alongside the
            -- text it judged.
            CREATE TABLE IF NOT EXISTS summaries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                incident_id INTEGER NOT NULL,
                language TEXT NOT NULL,
                headline TEXT NOT NULL,
                body TEXT NOT NULL,
                version INTEGER NOT NULL DEFAULT 1,
                confidence REAL NOT NULL DEFAULT 1.0,
                needs_review BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (incident_id) REFERENCES incidents (id),
                UNIQUE(incident_id, language)
            );
            CREATE INDEX IF NOT EXISTS idx_summaries_incident_id ON summaries (incident_id);
            CREATE INDEX IF NOT EXISTS idx_summaries_needs_review ON summaries (needs_review);
            "#,
        )
        .execute(&mut *conn)
        .await?;
        info!(target: TARGET_DB, "Tables ensured to exist");

        Ok(())
    }
}
