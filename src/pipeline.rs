use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::ResponseCache;
use crate::db::article::{self, NewArticle};
use crate::db::incident::{self, IncidentDigest};
use crate::db::{summary, Database};
use crate::{factcheck, lock};
use crate::{LOCK_TTL_SECONDS, PIPELINE_LOCK_NAME, TARGET_PIPELINE};

/// How many live incidents are offered to the clusterer as candidates.
const MAX_CLUSTER_CANDIDATES: usize = 200;

/// Supplies already-fetched article text; fetching and HTML extraction
/// live outside this crate.
#[async_trait]
pub trait ArticleSource: Send + Sync {
    async fn fetch_articles(&self) -> Result<Vec<NewArticle>>;
}

/// What the clustering collaborator decided for one article.
#[derive(Clone, Debug)]
pub enum ClusterDecision {
    /// The article reports an incident we already track.
    Existing(i64),
    /// The article starts a new incident.
    New { category: Option<String> },
}

/// Decides which incident an article belongs to. The semantic matching
/// itself is an external collaborator.
#[async_trait]
pub trait Clusterer: Send + Sync {
    async fn assign(
        &self,
        article: &NewArticle,
        candidates: &[IncidentDigest],
    ) -> Result<ClusterDecision>;
}

/// A generated headline/summary pair for one language.
#[derive(Clone, Debug)]
pub struct GeneratedSummary {
    pub headline: String,
    pub body: String,
}

/// Produces candidate summaries from source texts. The NL generation call
/// is an external collaborator; its output is never published unchecked.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, source_texts: &[String], language: &str)
        -> Result<GeneratedSummary>;
}

/// Aggregate statistics of one completed pipeline run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunStats {
    pub articles_ingested: usize,
    pub incidents_created: usize,
    pub incidents_updated: usize,
    pub summaries_written: usize,
    pub summaries_flagged: usize,
}

/// Result of a pipeline invocation. A held lock is a normal outcome, not
/// an error.
#[derive(Clone, Debug)]
pub enum RunOutcome {
    Skipped { reason: String },
    Completed(RunStats),
}

/// Sequences ingestion, clustering, summarization, fact-check, publish
/// and cache invalidation, and owns the lock lifecycle around the run.
pub struct PipelineRunner {
    db: Database,
    cache: Arc<ResponseCache>,
    source: Arc<dyn ArticleSource>,
    clusterer: Arc<dyn Clusterer>,
    summarizer: Arc<dyn Summarizer>,
    languages: Vec<String>,
}

impl PipelineRunner {
    pub fn new(
        db: Database,
        cache: Arc<ResponseCache>,
        source: Arc<dyn ArticleSource>,
        clusterer: Arc<dyn Clusterer>,
        summarizer: Arc<dyn Summarizer>,
        languages: Vec<String>,
    ) -> Self {
        PipelineRunner {
            db,
            cache,
            source,
            clusterer,
            summarizer,
            languages,
        }
    }

    /// Runs the pipeline once, under the distributed lock.
    ///
    /// `force` bypasses the is-locked short-circuit but still goes through
    /// `acquire`, so an actually-held lock always wins. Lock-manager
    /// errors are treated as "could not acquire": the run is skipped
    /// rather than started on an uncertain lock state.
    ///
    /// The lock is released on every exit path; a crashed process that
    /// never reaches the release is bounded by the lock TTL.
    pub async fn run(&self, force: bool) -> Result<RunOutcome> {
        if !force {
            let locked = lock::is_locked(&self.db, PIPELINE_LOCK_NAME)
                .await
                .unwrap_or_else(|e| {
                    warn!(target: TARGET_PIPELINE, "Lock check failed, assuming locked: {}", e);
                    true
                });

            if locked {
                info!(target: TARGET_PIPELINE, "Pipeline lock is held, skipping run");
                return Ok(RunOutcome::Skipped {
                    reason: "locked".to_string(),
                });
            }
        }

        let acquired = lock::acquire(&self.db, PIPELINE_LOCK_NAME, LOCK_TTL_SECONDS)
            .await
            .unwrap_or_else(|e| {
                warn!(target: TARGET_PIPELINE, "Lock acquire failed: {}", e);
                false
            });

        if !acquired {
            info!(target: TARGET_PIPELINE, "Could not acquire pipeline lock, skipping run");
            return Ok(RunOutcome::Skipped {
                reason: "locked".to_string(),
            });
        }

        let result = self.execute_run().await;

        // Best-effort release on every exit path; a failure here must not
        // mask the run's own result.
        lock::release_best_effort(&self.db, PIPELINE_LOCK_NAME).await;

        result.map(RunOutcome::Completed)
    }

    /// The run body: everything between lock acquire and release.
    async fn execute_run(&self) -> Result<RunStats> {
        let mut stats = RunStats::default();
        let mut touched: BTreeSet<i64> = BTreeSet::new();

        let articles = self.source.fetch_articles().await?;
        info!(target: TARGET_PIPELINE, "Ingesting {} fetched articles", articles.len());

        for fetched in &articles {
            let article_id = article::insert_article(&self.db, fetched).await?;

            let candidates =
                incident::get_live_digests(&self.db, MAX_CLUSTER_CANDIDATES).await?;

            let incident_id = match self.clusterer.assign(fetched, &candidates).await? {
                ClusterDecision::Existing(id) => {
                    incident::touch_incident(&self.db, id).await?;
                    stats.incidents_updated += 1;
                    id
                }
                ClusterDecision::New { category } => {
                    let id = incident::create_incident(&self.db, category.as_deref()).await?;
                    incident::touch_incident(&self.db, id).await?;
                    stats.incidents_created += 1;
                    id
                }
            };

            article::update_article_incident_id(&self.db, article_id, incident_id).await?;
            article::link_article_to_incident(&self.db, article_id, incident_id).await?;

            touched.insert(incident_id);
            stats.articles_ingested += 1;
        }

        for &incident_id in &touched {
            let source_texts = article::get_incident_source_texts(&self.db, incident_id).await?;

            for language in &self.languages {
                let generated = self.summarizer.summarize(&source_texts, language).await?;

                // Fact verification is mandatory before a summary gains its
                // publish-eligibility flags, but its verdict is advisory:
                // a flagged summary is stored for review, not discarded.
                let verdict = factcheck::validate(&generated.body, &source_texts);

                if verdict.needs_review {
                    warn!(
                        target: TARGET_PIPELINE,
                        "Summary for incident {} ({}) flagged for review (confidence {:.2}): {:?}",
                        incident_id, language, verdict.confidence, verdict.issues
                    );
                    stats.summaries_flagged += 1;
                }

                summary::upsert_summary(
                    &self.db,
                    incident_id,
                    language,
                    &generated.headline,
                    &generated.body,
                    verdict.confidence,
                    verdict.needs_review,
                )
                .await?;

                stats.summaries_written += 1;
            }

            incident::publish_incident(&self.db, incident_id).await?;
        }

        // Published content must show up ahead of natural TTL expiry.
        self.cache.invalidate_prefix("feed");
        self.cache.invalidate_prefix("facets");

        info!(
            target: TARGET_PIPELINE,
            "Run complete: {} articles, {} new incidents, {} updated, {} summaries ({} flagged)",
            stats.articles_ingested,
            stats.incidents_created,
            stats.incidents_updated,
            stats.summaries_written,
            stats.summaries_flagged
        );

        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct StaticSource {
        articles: Vec<NewArticle>,
    }

    #[async_trait]
    impl ArticleSource for StaticSource {
        async fn fetch_articles(&self) -> Result<Vec<NewArticle>> {
            Ok(self.articles.clone())
        }
    }

    /// Every article starts its own incident.
    struct AlwaysNewClusterer;

    #[async_trait]
    impl Clusterer for AlwaysNewClusterer {
        async fn assign(
            &self,
            _article: &NewArticle,
            _candidates: &[IncidentDigest],
        ) -> Result<ClusterDecision> {
            Ok(ClusterDecision::New {
                category: Some("world".to_string()),
            })
        }
    }

    /// Every article joins the first candidate incident.
    struct JoinFirstClusterer;

    #[async_trait]
    impl Clusterer for JoinFirstClusterer {
        async fn assign(
            &self,
            _article: &NewArticle,
            candidates: &[IncidentDigest],
        ) -> Result<ClusterDecision> {
            match candidates.first() {
                Some(digest) => Ok(ClusterDecision::Existing(digest.id)),
                None => Ok(ClusterDecision::New { category: None }),
            }
        }
    }

    /// Echoes the first source text back as the summary.
    struct EchoSummarizer;

    #[async_trait]
    impl Summarizer for EchoSummarizer {
        async fn summarize(
            &self,
            source_texts: &[String],
            _language: &str,
        ) -> Result<GeneratedSummary> {
            Ok(GeneratedSummary {
                headline: "Generated headline".to_string(),
                body: source_texts.first().cloned().unwrap_or_default(),
            })
        }
    }

    /// Fabricates a statistic absent from every source.
    struct FabricatingSummarizer;

    #[async_trait]
    impl Summarizer for FabricatingSummarizer {
        async fn summarize(
            &self,
            _source_texts: &[String],
            _language: &str,
        ) -> Result<GeneratedSummary> {
            Ok(GeneratedSummary {
                headline: "Generated headline".to_string(),
                body: "Exactly 987654 people were affected.".to_string(),
            })
        }
    }

    struct FailingSummarizer;

    #[async_trait]
    impl Summarizer for FailingSummarizer {
        async fn summarize(
            &self,
            _source_texts: &[String],
            _language: &str,
        ) -> Result<GeneratedSummary> {
            Err(anyhow!("model endpoint unavailable"))
        }
    }

    fn fetched(url: &str, text: &str) -> NewArticle {
        NewArticle {
            source_id: "test-source".to_string(),
            title: Some("A test headline".to_string()),
            url: url.to_string(),
            raw_text: text.to_string(),
            image_url: None,
            language: Some("en".to_string()),
        }
    }

    fn runner_with(
        db: &Database,
        source: Arc<dyn ArticleSource>,
        clusterer: Arc<dyn Clusterer>,
        summarizer: Arc<dyn Summarizer>,
    ) -> PipelineRunner {
        PipelineRunner::new(
            db.clone(),
            Arc::new(ResponseCache::new(64)),
            source,
            clusterer,
            summarizer,
            vec!["en".to_string()],
        )
    }

    async fn test_db() -> Database {
        Database::new(":memory:")
            .await
            .expect("Failed to create in-memory database")
    }

    #[tokio::test]
    async fn test_run_ingests_publishes_and_releases_lock() {
        let db = test_db().await;
        let runner = runner_with(
            &db,
            Arc::new(StaticSource {
                articles: vec![fetched("https://example.com/a", "Something happened today.")],
            }),
            Arc::new(AlwaysNewClusterer),
            Arc::new(EchoSummarizer),
        );

        let outcome = runner.run(false).await.unwrap();

        let stats = match outcome {
            RunOutcome::Completed(stats) => stats,
            RunOutcome::Skipped { reason } => panic!("unexpected skip: {}", reason),
        };

        assert_eq!(stats.articles_ingested, 1);
        assert_eq!(stats.incidents_created, 1);
        assert_eq!(stats.summaries_written, 1);

        let status: String = sqlx::query_scalar("SELECT status FROM incidents LIMIT 1")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(status, "published");

        assert!(!lock::is_locked(&db, PIPELINE_LOCK_NAME).await.unwrap());
    }

    #[tokio::test]
    async fn test_articles_join_existing_incident() {
        let db = test_db().await;
        let runner = runner_with(
            &db,
            Arc::new(StaticSource {
                articles: vec![
                    fetched("https://example.com/a", "First report."),
                    fetched("https://example.com/b", "Second report."),
                ],
            }),
            Arc::new(JoinFirstClusterer),
            Arc::new(EchoSummarizer),
        );

        let outcome = runner.run(false).await.unwrap();
        let stats = match outcome {
            RunOutcome::Completed(stats) => stats,
            RunOutcome::Skipped { reason } => panic!("unexpected skip: {}", reason),
        };

        assert_eq!(stats.incidents_created, 1);
        assert_eq!(stats.incidents_updated, 1);

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM incidents")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let source_count: i64 =
            sqlx::query_scalar("SELECT source_count FROM incidents LIMIT 1")
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(source_count, 2);
    }

    #[tokio::test]
    async fn test_fabricated_summary_is_flagged_not_fatal() {
        let db = test_db().await;
        let runner = runner_with(
            &db,
            Arc::new(StaticSource {
                articles: vec![fetched("https://example.com/a", "No numbers here at all.")],
            }),
            Arc::new(AlwaysNewClusterer),
            Arc::new(FabricatingSummarizer),
        );

        let outcome = runner.run(false).await.unwrap();
        let stats = match outcome {
            RunOutcome::Completed(stats) => stats,
            RunOutcome::Skipped { reason } => panic!("unexpected skip: {}", reason),
        };

        assert_eq!(stats.summaries_flagged, 1);

        let incident_id: i64 = sqlx::query_scalar("SELECT id FROM incidents LIMIT 1")
            .fetch_one(db.pool())
            .await
            .unwrap();
        let stored = summary::get_summary(&db, incident_id, "en")
            .await
            .unwrap()
            .expect("summary should be stored despite the flag");
        assert!(stored.needs_review);
        assert!(stored.confidence < 1.0);

        // Advisory, not a gate: the incident still published.
        let status: String = sqlx::query_scalar("SELECT status FROM incidents LIMIT 1")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(status, "published");
    }

    #[tokio::test]
    async fn test_held_lock_skips_run() {
        let db = test_db().await;
        let runner = runner_with(
            &db,
            Arc::new(StaticSource { articles: vec![] }),
            Arc::new(AlwaysNewClusterer),
            Arc::new(EchoSummarizer),
        );

        assert!(lock::acquire(&db, PIPELINE_LOCK_NAME, 600).await.unwrap());

        let outcome = runner.run(false).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Skipped { .. }));

        // The skip must not have released someone else's lock.
        assert!(lock::is_locked(&db, PIPELINE_LOCK_NAME).await.unwrap());
    }

    #[tokio::test]
    async fn test_force_still_loses_to_a_live_lock() {
        let db = test_db().await;
        let runner = runner_with(
            &db,
            Arc::new(StaticSource { articles: vec![] }),
            Arc::new(AlwaysNewClusterer),
            Arc::new(EchoSummarizer),
        );

        assert!(lock::acquire(&db, PIPELINE_LOCK_NAME, 600).await.unwrap());

        // force bypasses the short-circuit but acquire still gatekeeps.
        let outcome = runner.run(true).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Skipped { .. }));
    }

    #[tokio::test]
    async fn test_force_reclaims_expired_lock() {
        let db = test_db().await;
        let runner = runner_with(
            &db,
            Arc::new(StaticSource { articles: vec![] }),
            Arc::new(AlwaysNewClusterer),
            Arc::new(EchoSummarizer),
        );

        assert!(lock::acquire(&db, PIPELINE_LOCK_NAME, -1).await.unwrap());

        let outcome = runner.run(true).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_failed_run_still_releases_lock() {
        let db = test_db().await;
        let runner = runner_with(
            &db,
            Arc::new(StaticSource {
                articles: vec![fetched("https://example.com/a", "Some report.")],
            }),
            Arc::new(AlwaysNewClusterer),
            Arc::new(FailingSummarizer),
        );

        let result = runner.run(false).await;
        assert!(result.is_err());

        assert!(!lock::is_locked(&db, PIPELINE_LOCK_NAME).await.unwrap());
    }
}
