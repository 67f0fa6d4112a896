use axum::{
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::cache::{self, ResponseCache};
use crate::db::incident::{self, FeedQuery};
use crate::db::Database;
use crate::environment::AppConfig;
use crate::pipeline::{PipelineRunner, RunOutcome};
use crate::retention;
use crate::{FACET_CACHE_TTL_SECONDS, FEED_CACHE_TTL_SECONDS, TARGET_WEB_REQUEST};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub cache: Arc<ResponseCache>,
    pub runner: Arc<PipelineRunner>,
    pub config: Arc<AppConfig>,
}

#[derive(Deserialize)]
pub struct TriggerParams {
    force: Option<String>,
}

#[derive(Deserialize)]
pub struct FeedParams {
    lang: Option<String>,
    category: Option<String>,
    window: Option<i64>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/cron/pipeline",
            get(trigger_pipeline).post(trigger_pipeline),
        )
        .route(
            "/api/cron/cleanup",
            get(trigger_cleanup).post(trigger_cleanup),
        )
        .route("/api/feed", get(feed))
        .route("/api/facets", get(facets))
        .with_state(state)
}

/// Binds and runs the API server.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    info!("Server running on http://{}", addr);

    axum::serve(listener, router(state).into_make_service()).await?;

    Ok(())
}

/// Checks a scheduler credential against the configured secret.
///
/// Reads the raw `Authorization` header so that a missing, malformed
/// (non-Bearer), and mismatched credential all reject with 401 before
/// any lock or database interaction.
fn check_cron_auth(headers: &HeaderMap, secret: &str) -> Result<(), StatusCode> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match token {
        Some(token) if token == secret => Ok(()),
        Some(_) => {
            warn!(target: TARGET_WEB_REQUEST, "Cron request with incorrect credential");
            Err(StatusCode::UNAUTHORIZED)
        }
        None => {
            warn!(target: TARGET_WEB_REQUEST, "Cron request with missing or malformed credential");
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

fn is_force(params: &TriggerParams) -> bool {
    matches!(params.force.as_deref(), Some("1") | Some("true"))
}

/// Hides internal error detail unless dev mode is on.
fn internal_error(config: &AppConfig, err: &anyhow::Error) -> (StatusCode, Json<serde_json::Value>) {
    let message = if config.dev_mode {
        format!("{:#}", err)
    } else {
        "internal error".to_string()
    };

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"ok": false, "error": message})),
    )
}

/// Scheduler-facing trigger for the content pipeline.
async fn trigger_pipeline(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TriggerParams>,
) -> Result<impl IntoResponse, StatusCode> {
    check_cron_auth(&headers, &state.config.cron_secret)?;

    let force = is_force(&params);

    match state.runner.run(force).await {
        Ok(RunOutcome::Skipped { reason }) => {
            Ok(Json(json!({"ok": true, "skipped": true, "reason": reason})).into_response())
        }
        Ok(RunOutcome::Completed(stats)) => Ok(Json(json!({
            "ok": true,
            "articles_ingested": stats.articles_ingested,
            "incidents_created": stats.incidents_created,
            "incidents_updated": stats.incidents_updated,
            "summaries_written": stats.summaries_written,
            "summaries_flagged": stats.summaries_flagged,
        }))
        .into_response()),
        Err(e) => {
            error!(target: TARGET_WEB_REQUEST, "Pipeline run failed: {:#}", e);
            Ok(internal_error(&state.config, &e).into_response())
        }
    }
}

/// Scheduler-facing trigger for retention cleanup.
async fn trigger_cleanup(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, StatusCode> {
    check_cron_auth(&headers, &state.config.cron_secret)?;

    let cutoff = retention::retention_cutoff();

    match retention::purge_older_than(&state.db, &cutoff).await {
        Ok(report) => {
            // Sample of ids only; a big purge should not produce a big body.
            let sample: Vec<i64> = report.deleted_ids.iter().take(20).copied().collect();

            Ok(Json(json!({
                "deleted": report.deleted_count,
                "clusterIds": sample,
                "cutoffDate": report.cutoff,
            }))
            .into_response())
        }
        Err(e) => {
            error!(target: TARGET_WEB_REQUEST, "Retention cleanup failed: {:#}", e);
            Ok(internal_error(&state.config, &e).into_response())
        }
    }
}

/// Builds the cache key for a feed query.
///
/// The category pair is omitted entirely when no category filter was
/// given, so an explicit empty category can never share a cached payload
/// with the unfiltered feed.
fn feed_cache_key(query: &FeedQuery) -> String {
    let mut params = vec![
        ("lang", query.language.clone()),
        ("window", query.window_hours.to_string()),
        ("limit", query.limit.to_string()),
        ("offset", query.offset.to_string()),
    ];

    if let Some(category) = &query.category {
        params.push(("category", category.clone()));
    }

    cache::build_key("feed", &params)
}

/// Public feed of published incidents, cache first.
async fn feed(
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let query = FeedQuery {
        language: params.lang.unwrap_or_else(|| "en".to_string()),
        category: params.category,
        window_hours: params.window.unwrap_or(24).clamp(1, 24 * 7),
        limit: params.limit.unwrap_or(50).clamp(1, 100),
        offset: params.offset.unwrap_or(0).max(0),
    };

    let key = feed_cache_key(&query);

    if let Some(cached) = state.cache.get(&key) {
        return Ok(Json(cached));
    }

    let incidents = incident::get_published_incidents(&state.db, &query)
        .await
        .map_err(|e| {
            error!(target: TARGET_WEB_REQUEST, "Feed query failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let payload = json!({"incidents": incidents});

    // Best-effort: a cache write can never fail the request.
    state.cache.set(&key, payload.clone(), FEED_CACHE_TTL_SECONDS);

    Ok(Json(payload))
}

/// Facet/filter metadata: distinct categories of live published incidents.
async fn facets(State(state): State<AppState>) -> Result<Json<serde_json::Value>, StatusCode> {
    let key = cache::build_key("facets", &[]);

    if let Some(cached) = state.cache.get(&key) {
        return Ok(Json(cached));
    }

    let categories = incident::get_live_categories(&state.db)
        .await
        .map_err(|e| {
            error!(target: TARGET_WEB_REQUEST, "Facet query failed: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let payload = json!({"categories": categories});

    state
        .cache
        .set(&key, payload.clone(), FACET_CACHE_TTL_SECONDS);

    Ok(Json(payload))
}
