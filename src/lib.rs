pub mod api;
pub mod cache;
pub mod db;
pub mod environment;
pub mod factcheck;
pub mod lock;
pub mod logging;
pub mod pipeline;
pub mod remote;
pub mod retention;
pub mod util;

pub const TARGET_WEB_REQUEST: &str = "web_request";
pub const TARGET_PIPELINE: &str = "pipeline";
pub const TARGET_DB: &str = "db_query";

/// Name of the lock row guarding the content pipeline.
pub const PIPELINE_LOCK_NAME: &str = "content_pipeline";

/// How long a pipeline lock stays valid before it is treated as abandoned.
pub const LOCK_TTL_SECONDS: i64 = 600;

/// Incidents and their dependents are purged once they are older than this.
pub const RETENTION_DAYS: i64 = 30;

/// Cache lifetime for feed/list responses.
pub const FEED_CACHE_TTL_SECONDS: i64 = 300;

/// Cache lifetime for facet/filter metadata, which changes rarely.
pub const FACET_CACHE_TTL_SECONDS: i64 = 3600;
