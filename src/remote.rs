//! HTTP adapters for the external pipeline collaborators.
//!
//! Fetching, semantic clustering, and summary generation run as separate
//! services; this module is the only place that knows how to talk to them.
//! Each adapter implements one collaborator trait by POSTing JSON to a
//! configured endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;
use tracing::info;

use crate::db::article::NewArticle;
use crate::db::incident::IncidentDigest;
use crate::pipeline::{ArticleSource, ClusterDecision, Clusterer, GeneratedSummary, Summarizer};
use crate::TARGET_WEB_REQUEST;

const COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Deserialize)]
struct RemoteArticle {
    source_id: String,
    title: Option<String>,
    url: String,
    raw_text: String,
    image_url: Option<String>,
    language: Option<String>,
}

#[derive(Serialize)]
struct ClusterRequest<'a> {
    article_title: Option<&'a str>,
    article_text: &'a str,
    candidates: Vec<ClusterCandidate<'a>>,
}

#[derive(Serialize)]
struct ClusterCandidate<'a> {
    incident_id: i64,
    category: Option<&'a str>,
    recent_titles: &'a [String],
}

#[derive(Deserialize)]
struct ClusterResponse {
    incident_id: Option<i64>,
    category: Option<String>,
}

#[derive(Serialize)]
struct SummarizeRequest<'a> {
    source_texts: &'a [String],
    language: &'a str,
}

#[derive(Deserialize)]
struct SummarizeResponse {
    headline: String,
    body: String,
}

pub struct RemoteArticleSource {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteArticleSource {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        RemoteArticleSource { client, endpoint }
    }
}

#[async_trait]
impl ArticleSource for RemoteArticleSource {
    async fn fetch_articles(&self) -> Result<Vec<NewArticle>> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(COLLABORATOR_TIMEOUT)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("fetcher returned status {}", response.status()));
        }

        let articles: Vec<RemoteArticle> = response.json().await?;
        info!(target: TARGET_WEB_REQUEST, "Fetcher returned {} articles", articles.len());

        Ok(articles
            .into_iter()
            .map(|a| NewArticle {
                source_id: a.source_id,
                title: a.title,
                url: a.url,
                raw_text: a.raw_text,
                image_url: a.image_url,
                language: a.language,
            })
            .collect())
    }
}

pub struct RemoteClusterer {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteClusterer {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        RemoteClusterer { client, endpoint }
    }
}

#[async_trait]
impl Clusterer for RemoteClusterer {
    async fn assign(
        &self,
        article: &NewArticle,
        candidates: &[IncidentDigest],
    ) -> Result<ClusterDecision> {
        let request = ClusterRequest {
            article_title: article.title.as_deref(),
            article_text: &article.raw_text,
            candidates: candidates
                .iter()
                .map(|digest| ClusterCandidate {
                    incident_id: digest.id,
                    category: digest.category.as_deref(),
                    recent_titles: &digest.recent_titles,
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(COLLABORATOR_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("clusterer returned status {}", response.status()));
        }

        let decision: ClusterResponse = response.json().await?;

        Ok(match decision.incident_id {
            Some(id) => ClusterDecision::Existing(id),
            None => ClusterDecision::New {
                category: decision.category,
            },
        })
    }
}

pub struct RemoteSummarizer {
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteSummarizer {
    pub fn new(client: reqwest::Client, endpoint: String) -> Self {
        RemoteSummarizer { client, endpoint }
    }
}

#[async_trait]
impl Summarizer for RemoteSummarizer {
    async fn summarize(
        &self,
        source_texts: &[String],
        language: &str,
    ) -> Result<GeneratedSummary> {
        let request = SummarizeRequest {
            source_texts,
            language,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(COLLABORATOR_TIMEOUT)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("summarizer returned status {}", response.status()));
        }

        let generated: SummarizeResponse = response.json().await?;

        Ok(GeneratedSummary {
            headline: generated.headline,
            body: generated.body,
        })
    }
}
