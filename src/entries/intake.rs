use anyhow::Context;
use time::OffsetDateTime;
use tracing::{info, instrument};
use uuid::Uuid;

use super::model::NewEntry;
use crate::inference::{Attempt, InferenceJob, JobHandle};
use crate::state::AppState;
use crate::uploads::ValidatedUpload;

/// A submission whose uploads already passed validation.
#[derive(Debug)]
pub struct IntakeRequest {
    pub text: Option<String>,
    pub timezone: String,
    pub image: Option<ValidatedUpload>,
    pub audio: Option<ValidatedUpload>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntakeResult {
    pub entry_id: Uuid,
    pub image_path: Option<String>,
    pub audio_path: Option<String>,
}

/// User text first, transcript second.
pub fn join_context(text: Option<&str>, transcript: Option<&str>) -> Option<String> {
    let parts: Vec<&str> = [text, transcript]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    (!parts.is_empty()).then(|| parts.join("\n"))
}

fn now_ms() -> i128 {
    OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000
}

/// Creates the entry, stores uploads, transcribes audio and dispatches the
/// analysis job. Any failure after the insert leaves the entry in
/// `processing`; each successful step is persisted before the next starts.
#[instrument(skip(state, req), fields(%user_id))]
pub async fn submit_entry(
    state: &AppState,
    user_id: Uuid,
    req: IntakeRequest,
) -> anyhow::Result<IntakeResult> {
    let IntakeRequest {
        text,
        timezone,
        image,
        audio,
    } = req;

    // 1) the entry exists before any async work
    let entry = state
        .entries
        .create(NewEntry {
            id: Uuid::new_v4(),
            user_id,
            raw_text: text.clone().filter(|t| !t.trim().is_empty()),
            timezone,
        })
        .await?;
    let entry_id = entry.id;
    info!(%entry_id, tz = %entry.timezone_snapshot, "entry created");

    // 2) audio: store, then transcribe into raw_text
    let mut raw_text = entry.raw_text.clone();
    let mut audio_path = None;
    if let Some(audio) = audio {
        let path = audio.object_path(user_id, entry_id, now_ms());
        state
            .storage
            .put_object(&path, audio.body.clone(), &audio.content_type)
            .await
            .context("upload audio")?;
        state
            .entries
            .attach_upload(entry_id, audio.kind, &path)
            .await?;
        info!(%entry_id, %path, "audio stored");

        let file_name = format!("audio.{}", audio.ext);
        let transcript = state
            .transcriber
            .transcribe(audio.body, &audio.content_type, &file_name)
            .await
            .context("transcribe audio")?;
        if let Some(joined) = join_context(text.as_deref(), Some(&transcript)) {
            state.entries.set_raw_text(entry_id, &joined).await?;
            raw_text = Some(joined);
        }
        audio_path = Some(path);
    }

    // 3) image: store; the signed URL only travels with the job
    let mut image_path = None;
    if let Some(image) = image {
        let path = image.object_path(user_id, entry_id, now_ms());
        state
            .storage
            .put_object(&path, image.body, &image.content_type)
            .await
            .context("upload image")?;
        state
            .entries
            .attach_upload(entry_id, image.kind, &path)
            .await?;
        info!(%entry_id, %path, "image stored");
        image_path = Some(path);
    }

    // 4) dispatch and return without waiting
    dispatch_analysis(
        state,
        entry_id,
        user_id,
        raw_text,
        image_path.as_deref(),
        Attempt::Primary,
    )
    .await?;

    Ok(IntakeResult {
        entry_id,
        image_path,
        audio_path,
    })
}

/// Signs the stored image path (if any) and starts an inference job tagged
/// with the entry and user ids.
pub(crate) async fn dispatch_analysis(
    state: &AppState,
    entry_id: Uuid,
    user_id: Uuid,
    text: Option<String>,
    image_path: Option<&str>,
    attempt: Attempt,
) -> anyhow::Result<JobHandle> {
    let image_url = match image_path {
        Some(path) => Some(
            state
                .storage
                .presign_get(path, state.config.limits.signed_url_ttl_secs)
                .await
                .context("sign image url")?,
        ),
        None => None,
    };

    let job = InferenceJob {
        entry_id,
        user_id,
        text,
        image_url,
        attempt,
    };
    let handle = state
        .inference
        .dispatch(&job)
        .await
        .context("dispatch inference job")?;
    info!(%entry_id, job_id = %handle.id, attempt = attempt.as_str(), "inference job dispatched");
    Ok(handle)
}
