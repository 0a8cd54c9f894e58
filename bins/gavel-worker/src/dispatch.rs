// Runs one submission through the judge and publishes every message it
// streams as a result envelope.

use gavel_common::redis;
use gavel_common::types::{ResultCode, ResultEnvelope, SubmissionEnvelope};
use gavel_judge::{HandlerError, JudgeHandler, JudgeMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};

/// Messages buffered between the judge and the publisher
const RESULT_BUFFER: usize = 32;

pub fn envelope_for(submission_id: &str, message: JudgeMessage) -> ResultEnvelope {
    match message {
        Ok(result) => ResultEnvelope::judged(submission_id, result),
        Err(e) => ResultEnvelope::failed(submission_id, e.result_code(), e.user_message()),
    }
}

/// Serialize an envelope. A marshal failure is itself reported as a
/// ServerError envelope for the same submission.
pub fn encode(envelope: &ResultEnvelope) -> Option<String> {
    match redis::encode_result(envelope) {
        Ok(payload) => Some(payload),
        Err(e) => {
            let err = HandlerError::Marshal(e);
            error!(submission_id = %envelope.submission_id, error = %err, "Failed to marshal result");
            let fallback = ResultEnvelope::failed(&envelope.submission_id, err.result_code(), err.user_message());
            redis::encode_result(&fallback).ok()
        }
    }
}

async fn publish(conn: &mut ::redis::aio::ConnectionManager, queue: &str, envelope: &ResultEnvelope) {
    let Some(payload) = encode(envelope) else {
        return;
    };
    match redis::publish_result(conn, queue, &payload).await {
        Ok(()) => {}
        Err(e) => {
            // Non-fatal - the transport owns redelivery
            error!(submission_id = %envelope.submission_id, error = %e, "Failed to publish result");
        }
    }
}

#[instrument(skip_all, fields(submission_id = %submission.submission_id))]
pub async fn process_submission(
    handler: Arc<JudgeHandler>,
    mut conn: ::redis::aio::ConnectionManager,
    result_queue: &str,
    submission: SubmissionEnvelope,
) {
    let start = std::time::Instant::now();
    let submission_id = submission.submission_id;

    let data = match serde_json::to_vec(&submission.body) {
        Ok(data) => data,
        Err(e) => {
            let envelope = envelope_for(&submission_id, Err(HandlerError::Marshal(e)));
            publish(&mut conn, result_queue, &envelope).await;
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel(RESULT_BUFFER);
    let judge = {
        let handler = handler.clone();
        let submission_id = submission_id.clone();
        tokio::spawn(async move { handler.handle(&submission_id, &data, tx).await })
    };

    let mut published = 0usize;
    while let Some(message) = rx.recv().await {
        let envelope = envelope_for(&submission_id, message);
        publish(&mut conn, result_queue, &envelope).await;
        published += 1;
    }

    // The stream closes early only if the judge itself died
    if let Err(e) = judge.await {
        warn!(error = %e, "Judge task aborted");
        let envelope = ResultEnvelope::failed(&submission_id, ResultCode::ServerError, format!("judge aborted: {}", e));
        publish(&mut conn, result_queue, &envelope).await;
        published += 1;
    }

    info!(
        messages = published,
        elapsed_ms = start.elapsed().as_millis(),
        "Submission finished"
    );
}
