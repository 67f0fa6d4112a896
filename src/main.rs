use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use chronicle::api::{self, AppState};
use chronicle::cache::ResponseCache;
use chronicle::db::Database;
use chronicle::environment::AppConfig;
use chronicle::logging;
use chronicle::pipeline::PipelineRunner;
use chronicle::remote::{RemoteArticleSource, RemoteClusterer, RemoteSummarizer};

#[tokio::main]
async fn main() -> Result<()> {
    logging::configure_logging();

    let config = AppConfig::from_env()?;

    let db = Database::new(&config.database_path).await?;
    let cache = Arc::new(ResponseCache::new(1024));

    let client = reqwest::Client::new();
    let runner = Arc::new(PipelineRunner::new(
        db.clone(),
        cache.clone(),
        Arc::new(RemoteArticleSource::new(
            client.clone(),
            config.fetcher_url.clone(),
        )),
        Arc::new(RemoteClusterer::new(
            client.clone(),
            config.clusterer_url.clone(),
        )),
        Arc::new(RemoteSummarizer::new(
            client.clone(),
            config.summarizer_url.clone(),
        )),
        config.languages.clone(),
    ));

    info!(
        "Starting chronicle with languages {:?}, database {}",
        config.languages, config.database_path
    );

    let port = config.port;
    let state = AppState {
        db,
        cache,
        runner,
        config: Arc::new(config),
    };

    api::serve(state, port).await
}
