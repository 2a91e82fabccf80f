use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::dto::{CreatedEntryResponse, EntryDetails};
use super::intake::{submit_entry, IntakeRequest};
use super::model::EntryStatusView;
use crate::{
    auth::AuthUser,
    config::LimitsConfig,
    error::ApiError,
    state::AppState,
    uploads::{validate, UploadKind, ValidatedUpload},
};

const DEFAULT_TIMEZONE: &str = "UTC";

pub fn router(limits: &LimitsConfig) -> Router<AppState> {
    // Room for both uploads plus the text fields and multipart framing.
    let body_limit = limits.image_max_bytes + limits.audio_max_bytes + 1024 * 1024;
    Router::new()
        .route("/entries", post(create_entry))
        .route("/entries/:id", get(get_entry))
        .route("/entries/:id/status", get(get_status))
        .layer(DefaultBodyLimit::max(body_limit))
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

/// POST /entries (multipart: text, timezone, image, audio)
///
/// Every upload is validated before the entry row is created.
#[instrument(skip(state, mp))]
pub async fn create_entry(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    mut mp: Multipart,
) -> Result<Json<CreatedEntryResponse>, ApiError> {
    let limits = &state.config.limits;
    let mut text: Option<String> = None;
    let mut timezone: Option<String> = None;
    let mut image: Option<ValidatedUpload> = None;
    let mut audio: Option<ValidatedUpload> = None;

    while let Some(field) = mp.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "text" => text = Some(field.text().await.map_err(multipart_error)?),
            "timezone" => timezone = Some(field.text().await.map_err(multipart_error)?),
            "image" | "audio" => {
                let kind = if name == "image" {
                    UploadKind::Image
                } else {
                    UploadKind::Audio
                };
                let slot = match kind {
                    UploadKind::Image => &mut image,
                    UploadKind::Audio => &mut audio,
                };
                if slot.is_some() {
                    return Err(ApiError::BadRequest(format!("only one {kind} is allowed")));
                }
                let content_type = field.content_type().map(str::to_string);
                let body = field.bytes().await.map_err(multipart_error)?;
                let upload = validate(kind, content_type.as_deref(), body, limits).map_err(|e| {
                    warn!(%user_id, error = %e, "upload rejected");
                    e
                })?;
                *slot = Some(upload);
            }
            other => debug!(field = other, "ignoring multipart field"),
        }
    }

    let timezone = timezone
        .map(|tz| tz.trim().to_string())
        .filter(|tz| !tz.is_empty())
        .unwrap_or_else(|| DEFAULT_TIMEZONE.to_string());

    let res = submit_entry(
        &state,
        user_id,
        IntakeRequest {
            text,
            timezone,
            image,
            audio,
        },
    )
    .await?;

    Ok(Json(CreatedEntryResponse {
        entry_id: res.entry_id,
        image_path: res.image_path,
        audio_path: res.audio_path,
    }))
}

#[instrument(skip(state))]
pub async fn get_entry(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EntryDetails>, ApiError> {
    let entry = state
        .entries
        .get_for_user(user_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("entry not found".into()))?;
    Ok(Json(entry.into()))
}

/// The narrow read the client poller performs.
#[instrument(skip(state))]
pub async fn get_status(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Path(id): Path<Uuid>,
) -> Result<Json<EntryStatusView>, ApiError> {
    let view = state
        .entries
        .status_for_user(user_id, id)
        .await?
        .ok_or_else(|| ApiError::NotFound("entry not found".into()))?;
    Ok(Json(view))
}
