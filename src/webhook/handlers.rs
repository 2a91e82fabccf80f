use anyhow::Context;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Router,
};
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use super::signature::SignatureCheck;
use crate::{
    entries::{completion::write_completion, intake::dispatch_analysis, CompletionOutcome},
    error::ApiError,
    inference::{Attempt, JobMetadata},
    normalize::normalize_response,
    state::AppState,
};

const COMPLETED_EVENT: &str = "response.completed";
const COMPLETED_JOB: &str = "completed";

pub fn router() -> Router<AppState> {
    Router::new().route("/webhooks/inference", post(inference_webhook))
}

/// What a delivery led to. Every variant is acknowledged with 200.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event type other than job completion.
    Ignored,
    /// No job id in the event or no entry id in the job's metadata.
    Unroutable,
    /// The retrieved job has not finished; nothing was written.
    NotFinished,
    Completed(CompletionOutcome),
    /// The primary job had no structured output; a relaxed job was dispatched.
    RetriedRelaxed,
    /// Replay of a primary result whose relaxed job is already in flight.
    RetryInFlight,
    /// Retrieval, normalization or the store failed; the entry stays non-terminal.
    Failed,
}

/// POST /webhooks/inference
///
/// The body is verified byte for byte before it is parsed.
#[instrument(skip_all)]
pub async fn inference_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let check = match &state.webhook {
        Some(verifier) => verifier.verify(&headers, &body),
        None => SignatureCheck::NotConfigured,
    };
    if !check.is_accepted() {
        warn!(?check, "webhook signature rejected");
        return Err(ApiError::Unauthorized("invalid webhook signature".into()));
    }

    let event: Value = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("invalid webhook body: {e}")))?;

    let outcome = process_event(&state, &event).await;
    debug!(?outcome, "webhook handled");
    Ok(StatusCode::OK)
}

pub(crate) async fn process_event(state: &AppState, event: &Value) -> WebhookOutcome {
    let event_type = event
        .get("type")
        .or_else(|| event.get("event"))
        .and_then(Value::as_str)
        .unwrap_or_default();
    // Events without a type are treated as completion signals.
    if !event_type.is_empty() && event_type != COMPLETED_EVENT {
        info!(event_type, "ignoring webhook event");
        return WebhookOutcome::Ignored;
    }

    let Some(job_id) = job_id(event) else {
        warn!(event_type, "webhook event without a job id");
        return WebhookOutcome::Unroutable;
    };

    match handle_completed(state, job_id).await {
        Ok(outcome) => outcome,
        Err(e) => {
            error!(job_id, error = %format!("{e:#}"), "webhook processing failed");
            WebhookOutcome::Failed
        }
    }
}

fn job_id(event: &Value) -> Option<&str> {
    [
        event.pointer("/data/id"),
        event.pointer("/response/id"),
        event.get("id"),
    ]
    .into_iter()
    .flatten()
    .find_map(Value::as_str)
    .filter(|id| !id.is_empty())
}

#[instrument(skip(state))]
async fn handle_completed(state: &AppState, job_id: &str) -> anyhow::Result<WebhookOutcome> {
    // The event only signals completion; the job itself is the source of truth.
    let job = state
        .inference
        .retrieve(job_id)
        .await
        .with_context(|| format!("retrieve job {job_id}"))?;

    // A missing status is read as finished; anything else must say so.
    if let Some(status) = job.get("status").and_then(Value::as_str) {
        if status != COMPLETED_JOB {
            info!(job_id, status, "job not finished; nothing to apply");
            return Ok(WebhookOutcome::NotFinished);
        }
    }

    let Some(meta) = JobMetadata::from_response(&job) else {
        warn!(job_id, "job has no entry_id metadata");
        return Ok(WebhookOutcome::Unroutable);
    };
    let entry_id = meta.entry_id;
    debug!(%entry_id, user_id = ?meta.user_id, attempt = meta.attempt.as_str(), "routing job result");

    let normalized = normalize_response(&job);
    if !normalized.has_structure() && meta.attempt == Attempt::Primary {
        match retry_relaxed(state, entry_id).await {
            Ok(RelaxedRetry::Dispatched) => return Ok(WebhookOutcome::RetriedRelaxed),
            Ok(RelaxedRetry::AlreadyClaimed) => {
                info!(%entry_id, "relaxed retry already dispatched; replay ignored");
                return Ok(WebhookOutcome::RetryInFlight);
            }
            Ok(RelaxedRetry::NotApplicable) => {}
            Err(e) => warn!(
                %entry_id,
                error = %format!("{e:#}"),
                "relaxed retry failed; completing with primary result"
            ),
        }
    }

    let outcome = write_completion(state.entries.as_ref(), entry_id, &normalized, &job).await?;
    Ok(WebhookOutcome::Completed(outcome))
}

#[derive(Debug, PartialEq, Eq)]
enum RelaxedRetry {
    Dispatched,
    /// An earlier delivery of the same primary result already claimed it.
    AlreadyClaimed,
    /// Entry gone or no longer processing.
    NotApplicable,
}

/// Dispatches the single relaxed attempt once its store claim is won.
async fn retry_relaxed(state: &AppState, entry_id: Uuid) -> anyhow::Result<RelaxedRetry> {
    let Some(entry) = state.entries.get(entry_id).await? else {
        return Ok(RelaxedRetry::NotApplicable);
    };
    if entry.status.is_terminal() {
        return Ok(RelaxedRetry::NotApplicable);
    }
    if !state.entries.claim_relaxed_retry(entry_id).await? {
        return Ok(RelaxedRetry::AlreadyClaimed);
    }
    info!(%entry_id, "no structured output; retrying with relaxed schema");
    dispatch_analysis(
        state,
        entry.id,
        entry.user_id,
        entry.raw_text,
        entry.image_path.as_deref(),
        Attempt::Relaxed,
    )
    .await?;
    Ok(RelaxedRetry::Dispatched)
}
