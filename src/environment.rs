use std::env;

/// Retrieves an environment variable and splits it into a vector of strings based on a delimiter.
///
/// # Arguments
/// - `var`: The name of the environment variable.
/// - `delimiter`: The character to split the environment variable's value by.
///
/// # Returns
/// - `Vec<String>`
pub fn get_env_var_as_vec(var: &str, delimiter: char) -> Vec<String> {
    env::var(var)
        .unwrap_or_default()
        .split(delimiter)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Runtime configuration, read once at startup.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Path to the SQLite database file.
    pub database_path: String,
    /// Port the HTTP server binds to.
    pub port: u16,
    /// Shared secret the external scheduler presents as a bearer token.
    pub cron_secret: String,
    /// Languages summaries are generated in (ISO 639-1 codes).
    pub languages: Vec<String>,
    /// Endpoint of the article-fetching collaborator service.
    pub fetcher_url: String,
    /// Endpoint of the clustering collaborator service.
    pub clusterer_url: String,
    /// Endpoint of the summarization collaborator service.
    pub summarizer_url: String,
    /// When true, internal error detail is included in 500 responses.
    pub dev_mode: bool,
}

impl AppConfig {
    /// Builds the configuration from environment variables.
    ///
    /// `CRON_SECRET` is required; everything else has a default.
    pub fn from_env() -> anyhow::Result<Self> {
        let cron_secret = env::var("CRON_SECRET")
            .map_err(|_| anyhow::anyhow!("CRON_SECRET environment variable required"))?;

        let database_path =
            env::var("DATABASE_PATH").unwrap_or_else(|_| "chronicle.db".to_string());

        let port: u16 = env::var("PORT")
            .ok()
            .and_then(|p| p.parse::<u16>().ok())
            .unwrap_or(8080);

        let mut languages = get_env_var_as_vec("LANGUAGES", ',');
        if languages.is_empty() {
            languages.push("en".to_string());
        }

        let fetcher_url = env::var("FETCHER_URL")
            .map_err(|_| anyhow::anyhow!("FETCHER_URL environment variable required"))?;
        let clusterer_url = env::var("CLUSTERER_URL")
            .map_err(|_| anyhow::anyhow!("CLUSTERER_URL environment variable required"))?;
        let summarizer_url = env::var("SUMMARIZER_URL")
            .map_err(|_| anyhow::anyhow!("SUMMARIZER_URL environment variable required"))?;

        let dev_mode = env::var("DEV_MODE")
            .map(|v| v == "1" || v == "true")
            .unwrap_or(false);

        Ok(AppConfig {
            database_path,
            port,
            cron_secret,
            languages,
            fetcher_url,
            clusterer_url,
            summarizer_url,
            dev_mode,
        })
    }
}
