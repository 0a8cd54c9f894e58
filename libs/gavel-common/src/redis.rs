use crate::types::{ResultEnvelope, SubmissionEnvelope};
use redis::{AsyncCommands, RedisResult};

/// Redis key semantics shared by the worker and whatever feeds it.
/// Keys are deterministic so producers and workers never drift.

pub const SUBMISSION_QUEUE: &str = "gavel:queue:submission";
pub const RESULT_QUEUE: &str = "gavel:queue:result";
pub const TESTCASE_PREFIX: &str = "gavel:testcase";

/// Cache key holding the serialized testcase list of a problem
pub fn testcase_key(problem_id: &str) -> String {
    format!("{}:{}", TESTCASE_PREFIX, problem_id)
}

fn json_error(desc: &'static str, e: serde_json::Error) -> redis::RedisError {
    redis::RedisError::from((redis::ErrorKind::TypeError, desc, e.to_string()))
}

/// Push a submission onto a queue (RPUSH, FIFO with `pop_submission`)
pub async fn push_submission(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
    submission: &SubmissionEnvelope,
) -> RedisResult<()> {
    let payload = serde_json::to_string(submission).map_err(|e| json_error("serialization error", e))?;
    conn.rpush(queue, payload).await
}

/// Pop a submission from a queue.
/// Uses BLPOP with timeout so the caller can notice shutdown between polls.
pub async fn pop_submission(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
    timeout_seconds: f64,
) -> RedisResult<Option<SubmissionEnvelope>> {
    let result: Option<(String, String)> = conn.blpop(queue, timeout_seconds).await?;

    match result {
        Some((_key, payload)) => {
            let submission: SubmissionEnvelope =
                serde_json::from_str(&payload).map_err(|e| json_error("deserialization error", e))?;
            Ok(Some(submission))
        }
        None => Ok(None),
    }
}

/// Publish one result message. Serialization happens before the call so a
/// marshal failure stays with the caller's message.
pub async fn publish_result(
    conn: &mut redis::aio::ConnectionManager,
    queue: &str,
    payload: &str,
) -> RedisResult<()> {
    conn.rpush(queue, payload).await
}

pub fn encode_result(envelope: &ResultEnvelope) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}
