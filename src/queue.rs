use core::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use error_stack::{Context, Result, ResultExt};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::RedisConfig;
use crate::gitlab::MergeEvent;

/// Queues expire a day after the last push if nothing drains them.
const QUEUE_TTL_SECS: i64 = 24 * 60 * 60;

#[derive(Debug)]
pub enum Error {
    Connect,
    Redis(String),
    Serialize,
}

impl Context for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connect => f.write_str("can't connect to Redis"),
            Error::Redis(op) => write!(f, "Redis operation failed: {op}"),
            Error::Serialize => f.write_str("can't serialise job"),
        }
    }
}

/// Processing a job failed; the queue decides whether to retry.
#[derive(Debug)]
pub struct JobError;

impl Context for JobError {}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("job processing failed")
    }
}

/// One webhook delivery bound to a `(project, mr)` queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookJob {
    pub id: String,
    pub project_id: String,
    pub mr_iid: u64,
    pub webhook_type: String,
    pub payload: MergeEvent,
    pub created_at: i64,
    pub attempts: u32,
    pub max_attempts: u32,
}

#[async_trait]
pub trait JobProcessor: Send + Sync {
    async fn process_job(&self, job: &WebhookJob) -> Result<(), JobError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub total_queues: usize,
    pub total_jobs: u64,
    pub processing_jobs: usize,
    pub queue_details: Vec<QueueDetail>,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueDetail {
    pub project_id: String,
    pub mr_iid: u64,
    pub job_count: u64,
}

/// Redis-backed per-MR FIFO queues with a distributed lock per MR and
/// bounded retries. Multiple replicas share the queues safely; the
/// `SET NX PX` lock is the single point of serialisation per MR.
pub struct QueueManager {
    client: redis::Client,
    connection: OnceCell<ConnectionManager>,
    queue_prefix: String,
    lock_prefix: String,
    processing_prefix: String,
    lock_ttl: Duration,
    max_retries: u32,
    process_interval: Duration,
    stop: CancellationToken,
}

impl QueueManager {
    /// Does not connect; the first operation establishes the managed
    /// connection.
    pub fn new(config: &RedisConfig) -> Result<Self, Error> {
        let client = redis::Client::open(config.url.as_str()).change_context(Error::Connect)?;
        Ok(Self {
            client,
            connection: OnceCell::new(),
            queue_prefix: config.queue_prefix.clone(),
            lock_prefix: config.lock_prefix.clone(),
            processing_prefix: config.processing_prefix.clone(),
            lock_ttl: Duration::from_secs(config.lock_ttl_secs),
            max_retries: config.max_retries,
            process_interval: Duration::from_millis(config.process_interval_ms),
            stop: CancellationToken::new(),
        })
    }

    async fn connection(&self) -> Result<ConnectionManager, Error> {
        let manager = self
            .connection
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()))
            .await
            .change_context(Error::Connect)?;
        Ok(manager.clone())
    }

    pub async fn health(&self) -> Result<(), Error> {
        let mut conn = self.connection().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .change_context(Error::Redis("PING".to_string()))?;
        Ok(())
    }

    /// Serialise the event into a job and push it onto the MR's queue.
    pub async fn enqueue(&self, event: MergeEvent, webhook_type: &str) -> Result<String, Error> {
        let job = WebhookJob {
            id: Uuid::new_v4().to_string(),
            project_id: event.project.id.to_string(),
            mr_iid: event.object_attributes.iid,
            webhook_type: webhook_type.to_string(),
            payload: event,
            created_at: Utc::now().timestamp(),
            attempts: 0,
            max_attempts: self.max_retries,
        };

        let data = serde_json::to_string(&job).change_context(Error::Serialize)?;
        let queue_key = queue_key(&self.queue_prefix, &job.project_id, job.mr_iid);

        let mut conn = self.connection().await?;
        let _: () = conn
            .lpush(&queue_key, data)
            .await
            .change_context(Error::Redis("LPUSH".to_string()))?;
        if let Err(reason) = conn.expire::<_, ()>(&queue_key, QUEUE_TTL_SECS).await {
            warn!(%queue_key, %reason, "failed to set queue expiration");
        }

        info!(
            job_id = %job.id,
            project_id = %job.project_id,
            mr_iid = job.mr_iid,
            "enqueued webhook job"
        );
        Ok(job.id)
    }

    /// Drain one MR's queue under its lock. Returns immediately when
    /// another worker holds the lock.
    pub async fn drain_mr_queue(
        &self,
        project_id: &str,
        mr_iid: u64,
        processor: &dyn JobProcessor,
    ) -> Result<(), Error> {
        let queue_key = queue_key(&self.queue_prefix, project_id, mr_iid);
        let lock_key = format!("{}:{project_id}:{mr_iid}", self.lock_prefix);

        if !self.acquire_lock(&lock_key).await? {
            debug!(project_id, mr_iid, "MR is already being processed");
            return Ok(());
        }

        let result = self.drain_locked(&queue_key, project_id, mr_iid, processor).await;

        // The lock is released even when the drain errored; its TTL only
        // bounds the damage of a dead worker.
        if let Err(reason) = self.release_lock(&lock_key).await {
            error!(%lock_key, ?reason, "error releasing MR lock");
        }

        result
    }

    async fn drain_locked(
        &self,
        queue_key: &str,
        project_id: &str,
        mr_iid: u64,
        processor: &dyn JobProcessor,
    ) -> Result<(), Error> {
        loop {
            let Some(mut job) = self.dequeue_job(queue_key).await? else {
                return Ok(());
            };

            info!(job_id = %job.id, project_id, mr_iid, "processing job");
            if let Err(reason) = self.mark_processing(&job).await {
                warn!(job_id = %job.id, ?reason, "failed to mark job as processing");
            }

            match processor.process_job(&job).await {
                Ok(()) => {
                    info!(job_id = %job.id, project_id, mr_iid, "successfully processed job");
                    if let Err(reason) = self.remove_processing(&job.id).await {
                        warn!(job_id = %job.id, ?reason, "failed to remove job from processing");
                    }
                }
                Err(reason) => {
                    error!(job_id = %job.id, project_id, mr_iid, ?reason, "error processing job");
                    job.attempts += 1;
                    if job.attempts < job.max_attempts {
                        info!(
                            job_id = %job.id,
                            attempt = job.attempts,
                            max_attempts = job.max_attempts,
                            "retrying job"
                        );
                        let data = serde_json::to_string(&job).change_context(Error::Serialize)?;
                        let mut conn = self.connection().await?;
                        let _: () = conn
                            .lpush(queue_key, data)
                            .await
                            .change_context(Error::Redis("LPUSH".to_string()))?;
                    } else {
                        error!(
                            job_id = %job.id,
                            max_attempts = job.max_attempts,
                            "job failed after max attempts; dropping"
                        );
                        if let Err(reason) = self.remove_processing(&job.id).await {
                            warn!(job_id = %job.id, ?reason, "failed to drop job from processing");
                        }
                    }
                }
            }
        }
    }

    /// Start the periodic scheduler: every tick, scan all queues and
    /// drain the non-empty ones. Stops on the cancellation token or the
    /// manager's own stop signal.
    pub fn start(
        self: &Arc<Self>,
        processor: Arc<dyn JobProcessor>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        info!("starting MR queue processor");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(manager.process_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = manager.stop.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(reason) = manager.scan_queues(processor.as_ref()).await {
                            error!(?reason, "error processing queues");
                        }
                    }
                }
            }
            info!("queue processor stopped");
        })
    }

    pub fn stop(&self) {
        info!("stopping MR queue processor");
        self.stop.cancel();
    }

    async fn scan_queues(&self, processor: &dyn JobProcessor) -> Result<(), Error> {
        let mut conn = self.connection().await?;
        let keys: Vec<String> = conn
            .keys(format!("{}:*", self.queue_prefix))
            .await
            .change_context(Error::Redis("KEYS".to_string()))?;

        for key in keys {
            let Some((project_id, mr_iid)) = parse_queue_key(&self.queue_prefix, &key) else {
                continue;
            };
            let length: u64 = match conn.llen(&key).await {
                Ok(length) => length,
                Err(reason) => {
                    warn!(%key, %reason, "failed to get queue length");
                    continue;
                }
            };
            if length > 0 {
                if let Err(reason) = self.drain_mr_queue(&project_id, mr_iid, processor).await {
                    warn!(project_id, mr_iid, ?reason, "error draining MR queue");
                }
            }
        }

        Ok(())
    }

    pub async fn stats(&self) -> Result<QueueStats, Error> {
        let mut conn = self.connection().await?;
        let queue_keys: Vec<String> = conn
            .keys(format!("{}:*", self.queue_prefix))
            .await
            .change_context(Error::Redis("KEYS".to_string()))?;
        let processing_keys: Vec<String> = conn
            .keys(format!("{}:*", self.processing_prefix))
            .await
            .change_context(Error::Redis("KEYS".to_string()))?;

        let mut total_jobs = 0;
        let mut queue_details = Vec::new();
        for key in &queue_keys {
            let Some((project_id, mr_iid)) = parse_queue_key(&self.queue_prefix, key) else {
                continue;
            };
            let job_count: u64 = match conn.llen(key).await {
                Ok(count) => count,
                Err(reason) => {
                    warn!(%key, %reason, "failed to get queue length");
                    continue;
                }
            };
            total_jobs += job_count;
            if job_count > 0 {
                queue_details.push(QueueDetail {
                    project_id,
                    mr_iid,
                    job_count,
                });
            }
        }

        Ok(QueueStats {
            total_queues: queue_keys.len(),
            total_jobs,
            processing_jobs: processing_keys.len(),
            queue_details,
        })
    }

    async fn acquire_lock(&self, lock_key: &str) -> Result<bool, Error> {
        let mut conn = self.connection().await?;
        let acquired: Option<String> = redis::cmd("SET")
            .arg(lock_key)
            .arg(Utc::now().timestamp())
            .arg("NX")
            .arg("PX")
            .arg(self.lock_ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .change_context(Error::Redis("SET NX".to_string()))?;
        Ok(acquired.is_some())
    }

    async fn release_lock(&self, lock_key: &str) -> Result<(), Error> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(lock_key)
            .await
            .change_context(Error::Redis("DEL".to_string()))
    }

    async fn dequeue_job(&self, queue_key: &str) -> Result<Option<WebhookJob>, Error> {
        let mut conn = self.connection().await?;
        let data: Option<String> = conn
            .rpop(queue_key, None)
            .await
            .change_context(Error::Redis("RPOP".to_string()))?;
        match data {
            None => Ok(None),
            Some(data) => serde_json::from_str(&data)
                .map(Some)
                .change_context(Error::Serialize),
        }
    }

    async fn mark_processing(&self, job: &WebhookJob) -> Result<(), Error> {
        let data = serde_json::to_string(job).change_context(Error::Serialize)?;
        let mut conn = self.connection().await?;
        let _: Option<String> = redis::cmd("SET")
            .arg(format!("{}:{}", self.processing_prefix, job.id))
            .arg(data)
            .arg("PX")
            .arg(self.lock_ttl.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .change_context(Error::Redis("SET".to_string()))?;
        Ok(())
    }

    async fn remove_processing(&self, job_id: &str) -> Result<(), Error> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(format!("{}:{}", self.processing_prefix, job_id))
            .await
            .change_context(Error::Redis("DEL".to_string()))
    }
}

fn queue_key(prefix: &str, project_id: &str, mr_iid: u64) -> String {
    format!("{prefix}:{project_id}:{mr_iid}")
}

/// Recover `(project, mr)` from a queue key; the prefix itself may
/// contain colons.
fn parse_queue_key(prefix: &str, key: &str) -> Option<(String, u64)> {
    let suffix = key.strip_prefix(prefix)?.strip_prefix(':')?;
    let (project_id, mr_iid) = suffix.split_once(':')?;
    let mr_iid = mr_iid.parse().ok()?;
    Some((project_id.to_string(), mr_iid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gitlab::parse_merge_event;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn merge_event() -> MergeEvent {
        let payload = json!({
            "object_kind": "merge_request",
            "project": { "id": 42, "name": "widgets" },
            "object_attributes": {
                "iid": 7,
                "action": "open",
                "source_branch": "feature/x",
                "target_branch": "main",
                "last_commit": { "id": "abc123" }
            }
        });
        parse_merge_event(payload.to_string().as_bytes()).unwrap()
    }

    #[test]
    fn queue_keys_embed_project_and_mr() {
        assert_eq!(queue_key("gitlab:mr:queue", "42", 7), "gitlab:mr:queue:42:7");
    }

    #[test]
    fn queue_keys_parse_back() {
        let key = queue_key("gitlab:mr:queue", "42", 7);
        assert_eq!(
            parse_queue_key("gitlab:mr:queue", &key),
            Some(("42".to_string(), 7))
        );
        assert_eq!(parse_queue_key("gitlab:mr:queue", "other:key"), None);
        assert_eq!(parse_queue_key("gitlab:mr:queue", "gitlab:mr:queue:42:x"), None);
    }

    #[test]
    fn jobs_survive_a_serde_round_trip() {
        let job = WebhookJob {
            id: "job-1".to_string(),
            project_id: "42".to_string(),
            mr_iid: 7,
            webhook_type: "merge_request".to_string(),
            payload: merge_event(),
            created_at: 1_750_000_000,
            attempts: 1,
            max_attempts: 3,
        };
        let data = serde_json::to_string(&job).unwrap();
        let parsed: WebhookJob = serde_json::from_str(&data).unwrap();
        assert_eq!(parsed.id, job.id);
        assert_eq!(parsed.project_id, job.project_id);
        assert_eq!(parsed.mr_iid, job.mr_iid);
        assert_eq!(parsed.attempts, 1);
        assert_eq!(parsed.payload.project.id, 42);
        assert_eq!(
            parsed.payload.object_attributes.last_commit.unwrap().id,
            "abc123"
        );
    }

    #[test]
    fn manager_construction_does_not_connect() {
        let config = RedisConfig::default();
        let manager = QueueManager::new(&config).unwrap();
        assert_eq!(manager.max_retries, 3);
        assert_eq!(manager.lock_ttl, Duration::from_secs(300));
    }
}
