//! Redis-backed durable queue.

mod queue;

pub use queue::{RedisConnector, RedisQueue};

use crate::error::{JobError, JobResult};
use crawlq_config::RedisConfig;
use deadpool_redis::{Config, Pool, Runtime};
use tracing::info;

/// Create a Redis connection pool and verify it with a `PING`.
pub async fn create_pool(config: &RedisConfig) -> JobResult<Pool> {
    info!(
        host = %config.host,
        port = config.port,
        db = config.db,
        "Creating Redis connection pool for job queue"
    );

    let cfg = Config::from_url(config.url());

    let pool = cfg
        .builder()
        .map_err(|e| JobError::Configuration(format!("Invalid Redis config: {}", e)))?
        .max_size(config.pool_size)
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| JobError::Configuration(format!("Failed to create pool: {}", e)))?;

    let ping = async {
        let mut conn = pool.get().await?;
        redis::cmd("PING").query_async::<String>(&mut *conn).await?;
        Ok::<_, JobError>(())
    };

    tokio::time::timeout(config.connect_timeout(), ping)
        .await
        .map_err(|_| {
            JobError::BackendUnavailable(format!(
                "Redis did not answer PING within {} ms",
                config.connect_timeout_ms
            ))
        })??;

    info!("Redis connection pool created successfully");

    Ok(pool)
}

/// Redis key builder for one named queue.
#[derive(Debug, Clone)]
pub struct RedisKeys {
    base: String,
}

impl RedisKeys {
    /// Create a key builder for `queue_name` under `prefix`.
    pub fn new(prefix: &str, queue_name: &str) -> Self {
        Self {
            base: format!("{}:{}", prefix, queue_name),
        }
    }

    /// Ready job IDs (sorted set by priority + enqueue time).
    pub fn waiting(&self) -> String {
        format!("{}:waiting", self.base)
    }

    /// Retry job IDs (sorted set by due time in ms).
    pub fn delayed(&self) -> String {
        format!("{}:delayed", self.base)
    }

    /// Jobs handed to a worker (hash: job_id -> start time).
    pub fn active(&self) -> String {
        format!("{}:active", self.base)
    }

    /// Job record.
    pub fn job(&self, job_id: &str) -> String {
        format!("{}:job:{}", self.base, job_id)
    }

    /// Dead-letter records (list, newest at the head).
    pub fn dead_letter(&self) -> String {
        format!("{}:dead-letter", self.base)
    }

    /// Completed job IDs (sorted set by completion time).
    pub fn completed(&self) -> String {
        format!("{}:completed", self.base)
    }
}
