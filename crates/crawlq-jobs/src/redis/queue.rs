//! Redis job queue implementation.

use super::{create_pool, RedisKeys};
use crate::adapter::{DeadLetterRecord, QueueAdapter, QueueMode};
use crate::controller::DurableConnector;
use crate::error::{JobError, JobResult};
use crate::job::{Job, JobId};
use async_trait::async_trait;
use chrono::Utc;
use crawlq_config::RedisConfig;
use deadpool_redis::Pool;
use redis::{AsyncCommands, Script};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Longest an idle `dequeue` sleeps before returning empty.
const IDLE_WAIT: Duration = Duration::from_millis(250);

/// Lease age after which an active job is presumed abandoned.
const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Added to the worker job timeout when deriving the stale threshold.
const LEASE_GRACE: Duration = Duration::from_secs(30);

/// Minimum gap between two stale-lease scans from `dequeue`.
const RECOVERY_INTERVAL_MS: i64 = 30_000;

/// Pops the best waiting job and records its lease in one step.
const POP_AND_LEASE: &str = r#"
    local popped = redis.call("ZPOPMIN", KEYS[1])
    if #popped == 0 then
        return false
    end
    redis.call("HSET", KEYS[2], popped[1], ARGV[1])
    return popped[1]
"#;

/// Moves one job from the delayed set to the waiting set.
const PROMOTE: &str = r#"
    if redis.call("ZREM", KEYS[1], ARGV[1]) == 1 then
        redis.call("ZADD", KEYS[2], ARGV[2], ARGV[1])
        return 1
    end
    return 0
"#;

/// Requeues a job whose lease is unchanged since the scan read it.
const REQUEUE_LEASE: &str = r#"
    if redis.call("HGET", KEYS[1], ARGV[1]) ~= ARGV[2] then
        return 0
    end
    redis.call("HDEL", KEYS[1], ARGV[1])
    redis.call("SET", KEYS[2], ARGV[3])
    redis.call("ZADD", KEYS[3], ARGV[4], ARGV[1])
    return 1
"#;

/// Dead-letters a job whose lease is unchanged since the scan read it.
const DEAD_LETTER_LEASE: &str = r#"
    if redis.call("HGET", KEYS[1], ARGV[1]) ~= ARGV[2] then
        return 0
    end
    redis.call("HDEL", KEYS[1], ARGV[1])
    redis.call("DEL", KEYS[2])
    redis.call("LPUSH", KEYS[3], ARGV[3])
    return 1
"#;

/// Drops a lease that points at a missing or unreadable record.
const RELEASE_LEASE: &str = r#"
    if redis.call("HGET", KEYS[1], ARGV[1]) == ARGV[2] then
        return redis.call("HDEL", KEYS[1], ARGV[1])
    end
    return 0
"#;

/// What happens to a job whose consumer never reported back.
#[derive(Debug)]
enum Reclaim {
    Requeue(Job),
    DeadLetter(DeadLetterRecord),
}

/// Charges the lost delivery as a failed attempt.
fn reclaim(mut job: Job, stale_after: Duration) -> Reclaim {
    let err = JobError::LeaseExpired(stale_after);
    job.begin_attempt();
    job.mark_failed(&err);
    if job.is_exhausted() {
        job.mark_dead_lettered();
        Reclaim::DeadLetter(DeadLetterRecord::new(job, err.to_string()))
    } else {
        job.requeue();
        Reclaim::Requeue(job)
    }
}

/// An unreadable lease never ages out on its own, so it counts as expired.
fn lease_expired(lease: &str, now_ms: i64, stale_after: Duration) -> bool {
    let stale_ms = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
    lease
        .parse::<i64>()
        .map_or(true, |started_ms| now_ms.saturating_sub(started_ms) >= stale_ms)
}

/// Redis-backed job queue.
///
/// Layout per queue: a `waiting` sorted set of job IDs scored by priority
/// and enqueue time, a `delayed` sorted set scored by due time, an `active`
/// hash, one string key per job record, and a `dead-letter` list.
///
/// Every delivery leaves a lease (the start time in ms) in `active` until
/// the worker reports back. Leases older than the stale threshold belong to
/// a consumer that died mid-job; [`RedisQueue::recover_stale_jobs`] charges
/// them an attempt and puts the job back, so delivery is at-least-once.
pub struct RedisQueue {
    pool: Pool,
    keys: RedisKeys,
    remove_on_complete: bool,
    stale_after: Duration,
    last_recovery_ms: AtomicI64,
    closed: AtomicBool,
}

impl RedisQueue {
    /// Create a queue over an existing pool.
    pub fn new(pool: Pool, config: &RedisConfig) -> Self {
        Self {
            pool,
            keys: RedisKeys::new(&config.key_prefix, &config.queue_name),
            remove_on_complete: config.remove_on_complete,
            stale_after: DEFAULT_STALE_AFTER,
            last_recovery_ms: AtomicI64::new(0),
            closed: AtomicBool::new(false),
        }
    }

    /// Override the lease age after which an active job is reclaimed.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Get a connection from the pool.
    async fn conn(&self) -> JobResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// Calculate priority score for the waiting set.
    /// Higher priority = lower score (processed first); ties go by enqueue time.
    fn priority_score(priority: Option<i32>, enqueued_at_ms: i64) -> f64 {
        let priority_component = -f64::from(priority.unwrap_or(0)) * 1_000_000_000_000.0;
        priority_component + enqueued_at_ms as f64
    }

    /// Move due retries from the delayed set to the waiting set.
    pub async fn promote_delayed(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = conn.zrangebyscore(self.keys.delayed(), 0i64, now).await?;

        let mut moved = 0u64;
        for job_id in due {
            let job_json: Option<String> = conn.get(self.keys.job(&job_id)).await?;
            let priority = job_json
                .as_deref()
                .and_then(|json| Job::from_json(json).ok())
                .and_then(|job| job.priority);

            // Only the consumer whose ZREM succeeds re-adds the entry.
            let promoted: i32 = Script::new(PROMOTE)
                .key(self.keys.delayed())
                .key(self.keys.waiting())
                .arg(&job_id)
                .arg(Self::priority_score(priority, now))
                .invoke_async(&mut *conn)
                .await?;
            moved += promoted as u64;
        }

        if moved > 0 {
            debug!(count = moved, "Promoted delayed jobs");
        }

        Ok(moved)
    }

    /// Reclaim jobs whose lease is older than the stale threshold.
    ///
    /// Each reclaimed job is charged the lost attempt. It goes back to the
    /// waiting set, or to the dead-letter list once its attempts are used up.
    pub async fn recover_stale_jobs(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let now = Utc::now().timestamp_millis();

        let active: HashMap<String, String> = conn.hgetall(self.keys.active()).await?;

        let mut recovered = 0u64;
        for (job_id, lease) in active {
            if !lease_expired(&lease, now, self.stale_after) {
                continue;
            }

            let job_json: Option<String> = conn.get(self.keys.job(&job_id)).await?;
            let Some(job) = job_json.as_deref().and_then(|json| Job::from_json(json).ok()) else {
                warn!(job_id = %job_id, "Releasing lease on missing job record");
                let _: i32 = Script::new(RELEASE_LEASE)
                    .key(self.keys.active())
                    .arg(&job_id)
                    .arg(&lease)
                    .invoke_async(&mut *conn)
                    .await?;
                continue;
            };

            // A zero result means the worker reported back after the scan read the lease.
            let claimed: i32 = match reclaim(job, self.stale_after) {
                Reclaim::Requeue(job) => {
                    let score = Self::priority_score(job.priority, now);
                    let claimed: i32 = Script::new(REQUEUE_LEASE)
                        .key(self.keys.active())
                        .key(self.keys.job(&job_id))
                        .key(self.keys.waiting())
                        .arg(&job_id)
                        .arg(&lease)
                        .arg(job.to_json()?)
                        .arg(score)
                        .invoke_async(&mut *conn)
                        .await?;
                    if claimed == 1 {
                        warn!(job_id = %job_id, attempts = job.attempts, "Requeued job with expired lease");
                    }
                    claimed
                }
                Reclaim::DeadLetter(record) => {
                    let attempts = record.job.attempts;
                    let claimed: i32 = Script::new(DEAD_LETTER_LEASE)
                        .key(self.keys.active())
                        .key(self.keys.job(&job_id))
                        .key(self.keys.dead_letter())
                        .arg(&job_id)
                        .arg(&lease)
                        .arg(serde_json::to_string(&record)?)
                        .invoke_async(&mut *conn)
                        .await?;
                    if claimed == 1 {
                        error!(
                            job_id = %job_id,
                            attempts,
                            payload = %record.job.payload,
                            "Dead-lettered job with expired lease"
                        );
                    }
                    claimed
                }
            };
            recovered += claimed as u64;
        }

        if recovered > 0 {
            info!(count = recovered, "Recovered stale jobs");
        }

        Ok(recovered)
    }

    /// Claims the next periodic recovery slot.
    fn recovery_due(&self, now_ms: i64) -> bool {
        let last = self.last_recovery_ms.load(Ordering::SeqCst);
        now_ms.saturating_sub(last) >= RECOVERY_INTERVAL_MS
            && self
                .last_recovery_ms
                .compare_exchange(last, now_ms, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }
}

#[async_trait]
impl QueueAdapter for RedisQueue {
    fn mode(&self) -> QueueMode {
        QueueMode::Durable
    }

    async fn enqueue(&self, job: Job) -> JobResult<JobId> {
        let job_id = job.id.clone();
        let job_json = job.to_json()?;
        let score = Self::priority_score(job.priority, Utc::now().timestamp_millis());

        let mut conn = self.conn().await?;
        let _: () = redis::pipe()
            .atomic()
            .set(self.keys.job(job_id.as_str()), &job_json)
            .ignore()
            .zadd(self.keys.waiting(), job_id.as_str(), score)
            .ignore()
            .query_async(&mut *conn)
            .await?;

        debug!(job_id = %job_id, priority = ?job.priority, "Enqueued job in Redis");

        Ok(job_id)
    }

    async fn dequeue(&self, wait: Duration) -> JobResult<Option<Job>> {
        if self.closed.load(Ordering::SeqCst) {
            return Ok(None);
        }

        if let Err(e) = self.promote_delayed().await {
            warn!(error = %e, "Failed to promote delayed jobs");
        }

        let now = Utc::now().timestamp_millis();
        if self.recovery_due(now) {
            if let Err(e) = self.recover_stale_jobs().await {
                warn!(error = %e, "Failed to recover stale jobs");
            }
        }

        let mut conn = self.conn().await?;

        // The pop and the lease land together, so a crash between them cannot lose the job.
        let popped: Option<String> = Script::new(POP_AND_LEASE)
            .key(self.keys.waiting())
            .key(self.keys.active())
            .arg(now)
            .invoke_async(&mut *conn)
            .await?;
        let Some(job_id) = popped else {
            drop(conn);
            tokio::time::sleep(wait.min(IDLE_WAIT)).await;
            return Ok(None);
        };

        let job_json: Option<String> = conn.get(self.keys.job(&job_id)).await?;
        let Some(json) = job_json else {
            warn!(job_id = %job_id, "Job record missing; skipping");
            let _: () = conn.hdel(self.keys.active(), &job_id).await?;
            return Ok(None);
        };

        match Job::from_json(&json) {
            Ok(job) => {
                debug!(job_id = %job_id, attempts = job.attempts, "Dequeued job");
                Ok(Some(job))
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "Failed to deserialize job record");
                Ok(None)
            }
        }
    }

    async fn complete(&self, job: &Job) -> JobResult<()> {
        let job_id = job.id.as_str();
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic().hdel(self.keys.active(), job_id).ignore();
        if self.remove_on_complete {
            pipe.del(self.keys.job(job_id)).ignore();
        } else {
            pipe.set(self.keys.job(job_id), job.to_json()?)
                .ignore()
                .zadd(
                    self.keys.completed(),
                    job_id,
                    Utc::now().timestamp_millis() as f64,
                )
                .ignore();
        }
        let _: () = pipe.query_async(&mut *conn).await?;

        debug!(job_id = %job_id, "Completed job");

        Ok(())
    }

    async fn retry(&self, job: Job, delay: Duration) -> JobResult<()> {
        let job_id = job.id.as_str();
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn().await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(self.keys.job(job_id), job.to_json()?)
            .ignore()
            .hdel(self.keys.active(), job_id)
            .ignore();
        if delay.is_zero() {
            pipe.zadd(
                self.keys.waiting(),
                job_id,
                Self::priority_score(job.priority, now),
            )
            .ignore();
        } else {
            let due = now.saturating_add(i64::try_from(delay.as_millis()).unwrap_or(i64::MAX));
            pipe.zadd(self.keys.delayed(), job_id, due as f64).ignore();
        }
        let _: () = pipe.query_async(&mut *conn).await?;

        debug!(job_id = %job_id, delay_ms = delay.as_millis() as u64, "Scheduled retry");

        Ok(())
    }

    async fn dead_letter(&self, record: DeadLetterRecord) -> JobResult<()> {
        let job_id = record.job.id.to_string();
        let write_failed = |reason: String| JobError::DeadLetterWrite {
            job_id: job_id.clone(),
            reason,
        };

        let record_json = serde_json::to_string(&record).map_err(|e| write_failed(e.to_string()))?;
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| write_failed(e.to_string()))?;

        let _: () = redis::pipe()
            .atomic()
            .lpush(self.keys.dead_letter(), &record_json)
            .ignore()
            .hdel(self.keys.active(), &job_id)
            .ignore()
            .del(self.keys.job(&job_id))
            .ignore()
            .query_async(&mut *conn)
            .await
            .map_err(|e| write_failed(e.to_string()))?;

        Ok(())
    }

    async fn depth(&self) -> JobResult<u64> {
        let mut conn = self.conn().await?;
        let (waiting, delayed): (u64, u64) = redis::pipe()
            .zcard(self.keys.waiting())
            .zcard(self.keys.delayed())
            .query_async(&mut *conn)
            .await?;
        Ok(waiting + delayed)
    }

    async fn dead_letters(&self, limit: usize) -> JobResult<Vec<DeadLetterRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn().await?;
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;
        let raw: Vec<String> = conn.lrange(self.keys.dead_letter(), 0, stop).await?;

        Ok(raw
            .iter()
            .filter_map(|json| match serde_json::from_str(json) {
                Ok(record) => Some(record),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable dead-letter record");
                    None
                }
            })
            .collect())
    }

    async fn close(&self) -> JobResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.pool.close();
        info!("Redis queue closed");
        Ok(())
    }
}

/// Opens [`RedisQueue`]s from configuration.
#[derive(Debug, Clone)]
pub struct RedisConnector {
    config: RedisConfig,
    stale_after: Duration,
}

impl RedisConnector {
    /// Create a connector for the given settings.
    pub fn new(config: RedisConfig) -> Self {
        Self {
            config,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Derive the stale threshold from the worker job timeout, so a lease
    /// only expires once its worker has certainly given up on the job.
    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.stale_after = job_timeout.saturating_add(LEASE_GRACE);
        self
    }
}

#[async_trait]
impl DurableConnector for RedisConnector {
    /// Opens the pool and reclaims leases left by a previous process.
    async fn connect(&self) -> JobResult<Arc<dyn QueueAdapter>> {
        let pool = create_pool(&self.config).await?;
        let queue = RedisQueue::new(pool, &self.config).with_stale_after(self.stale_after);

        queue
            .last_recovery_ms
            .store(Utc::now().timestamp_millis(), Ordering::SeqCst);
        if let Err(e) = queue.recover_stale_jobs().await {
            warn!(error = %e, "Failed to recover stale jobs on connect");
        }

        let queue: Arc<dyn QueueAdapter> = Arc::new(queue);
        Ok(queue)
    }
}
