use crate::queue::{JobQueue, QueueError};
use crate::types::{ExecutionResult, SubmissionJob};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use uuid::Uuid;

/// Redis queue semantics - defines only key layout and commands
/// Ensures API and worker never drift and Redis keys are deterministic

pub const JOB_QUEUE: &str = "flowrun:queue:jobs";
pub const RESULT_PREFIX: &str = "flowrun:result";

/// Default lifetime of an uncollected result
pub const DEFAULT_RESULT_TTL_SECS: u64 = 300;

/// Generate the per-submission result key
pub fn result_key(submission_id: &Uuid) -> String {
    format!("{}:{}", RESULT_PREFIX, submission_id)
}

/// Push a job to the inbound queue
/// Uses RPUSH for FIFO semantics
pub async fn push_job(conn: &mut ConnectionManager, job: &SubmissionJob) -> Result<(), QueueError> {
    let payload = serde_json::to_string(job)?;
    conn.rpush::<_, _, ()>(JOB_QUEUE, payload).await?;
    Ok(())
}

/// Pop the oldest job from the inbound queue
/// Uses BLPOP with a timeout so the caller can check for shutdown
pub async fn pop_job(conn: &mut ConnectionManager, timeout_seconds: f64) -> Result<Option<SubmissionJob>, QueueError> {
    let popped: Option<(String, String)> = conn.blpop(JOB_QUEUE, timeout_seconds).await?;

    match popped {
        Some((_key, payload)) => Ok(Some(serde_json::from_str(&payload)?)),
        None => Ok(None),
    }
}

/// Store a result on its submission's own list
/// RPUSH and EXPIRE run as one transaction so an abandoned result always expires
pub async fn store_result(
    conn: &mut ConnectionManager,
    result: &ExecutionResult,
    ttl_seconds: u64,
) -> Result<(), QueueError> {
    let key = result_key(&result.submission_id);
    let payload = serde_json::to_string(result)?;

    redis::pipe()
        .atomic()
        .rpush(&key, payload)
        .ignore()
        .cmd("EXPIRE")
        .arg(&key)
        .arg(ttl_seconds)
        .ignore()
        .query_async::<_, ()>(conn)
        .await?;

    Ok(())
}

/// Take the result for a submission, if published
/// LPOP is atomic, so concurrent gateways never both receive it
pub async fn take_result(
    conn: &mut ConnectionManager,
    submission_id: &Uuid,
) -> Result<Option<ExecutionResult>, QueueError> {
    let payload: Option<String> = redis::cmd("LPOP")
        .arg(result_key(submission_id))
        .query_async(conn)
        .await?;

    match payload {
        Some(data) => Ok(Some(serde_json::from_str(&data)?)),
        None => Ok(None),
    }
}

/// Number of jobs waiting to be picked up
pub async fn queue_depth(conn: &mut ConnectionManager) -> Result<usize, QueueError> {
    let depth: usize = conn.llen(JOB_QUEUE).await?;
    Ok(depth)
}

/// `JobQueue` backed by Redis lists
///
/// The connection manager reconnects on its own, so a Redis restart shows up
/// as errors on in-flight calls rather than a dead client.
#[derive(Clone)]
pub struct RedisQueue {
    conn: ConnectionManager,
    result_ttl_seconds: u64,
}

impl RedisQueue {
    pub fn new(conn: ConnectionManager, result_ttl_seconds: u64) -> Self {
        Self {
            conn,
            result_ttl_seconds,
        }
    }

    /// Open a client and connect
    pub async fn connect(redis_url: &str, result_ttl_seconds: u64) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, result_ttl_seconds))
    }
}

#[async_trait]
impl JobQueue for RedisQueue {
    async fn enqueue_job(&self, job: &SubmissionJob) -> Result<(), QueueError> {
        push_job(&mut self.conn.clone(), job).await
    }

    async fn dequeue_job(&self, wait: Duration) -> Result<Option<SubmissionJob>, QueueError> {
        pop_job(&mut self.conn.clone(), wait.as_secs_f64()).await
    }

    async fn publish_result(&self, result: &ExecutionResult) -> Result<(), QueueError> {
        store_result(&mut self.conn.clone(), result, self.result_ttl_seconds).await
    }

    async fn find_and_remove_result(&self, submission_id: &Uuid) -> Result<Option<ExecutionResult>, QueueError> {
        take_result(&mut self.conn.clone(), submission_id).await
    }

    async fn pending_jobs(&self) -> Result<usize, QueueError> {
        queue_depth(&mut self.conn.clone()).await
    }
}
