use std::fmt;

use bytes::Bytes;
use thiserror::Error;
use uuid::Uuid;

use crate::config::LimitsConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Image,
    Audio,
}

impl UploadKind {
    pub fn as_str(self) -> &'static str {
        match self {
            UploadKind::Image => "image",
            UploadKind::Audio => "audio",
        }
    }

    fn default_content_type(self) -> &'static str {
        match self {
            UploadKind::Image => "image/jpeg",
            UploadKind::Audio => "audio/m4a",
        }
    }

    fn max_bytes(self, limits: &LimitsConfig) -> usize {
        match self {
            UploadKind::Image => limits.image_max_bytes,
            UploadKind::Audio => limits.audio_max_bytes,
        }
    }
}

impl fmt::Display for UploadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("{kind} upload is {size} bytes, limit is {max} bytes")]
    TooLarge {
        kind: UploadKind,
        size: usize,
        max: usize,
    },
    #[error("{kind} upload has unsupported content type {content_type}")]
    UnsupportedType {
        kind: UploadKind,
        content_type: String,
    },
    #[error("{kind} upload is empty")]
    Empty { kind: UploadKind },
}

/// An upload that passed type and size checks and may be persisted.
#[derive(Debug, Clone)]
pub struct ValidatedUpload {
    pub kind: UploadKind,
    pub content_type: String,
    pub ext: &'static str,
    pub body: Bytes,
}

impl ValidatedUpload {
    /// Object key under `user/{user_id}/entry/{entry_id}/{kind}_{timestamp}.{ext}`.
    pub fn object_path(&self, user_id: Uuid, entry_id: Uuid, timestamp_ms: i128) -> String {
        object_path(user_id, entry_id, self.kind, timestamp_ms, self.ext)
    }
}

pub fn object_path(
    user_id: Uuid,
    entry_id: Uuid,
    kind: UploadKind,
    timestamp_ms: i128,
    ext: &str,
) -> String {
    format!("user/{user_id}/entry/{entry_id}/{kind}_{timestamp_ms}.{ext}")
}

pub fn validate(
    kind: UploadKind,
    content_type: Option<&str>,
    body: Bytes,
    limits: &LimitsConfig,
) -> Result<ValidatedUpload, UploadError> {
    if body.is_empty() {
        return Err(UploadError::Empty { kind });
    }
    let max = kind.max_bytes(limits);
    if body.len() > max {
        return Err(UploadError::TooLarge {
            kind,
            size: body.len(),
            max,
        });
    }

    let content_type = normalize_content_type(content_type, kind);
    let ext = match kind {
        UploadKind::Image => image_ext(&content_type),
        UploadKind::Audio => audio_ext(&content_type),
    }
    .ok_or_else(|| UploadError::UnsupportedType {
        kind,
        content_type: content_type.clone(),
    })?;

    Ok(ValidatedUpload {
        kind,
        content_type,
        ext,
        body,
    })
}

// Missing or generic content types fall back to the default for the field.
fn normalize_content_type(raw: Option<&str>, kind: UploadKind) -> String {
    let essence = raw
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if essence.is_empty() || essence == "application/octet-stream" {
        kind.default_content_type().to_string()
    } else {
        essence
    }
}

fn image_ext(ct: &str) -> Option<&'static str> {
    match ct {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/heic" | "image/heif" => Some("heic"),
        _ => None,
    }
}

fn audio_ext(ct: &str) -> Option<&'static str> {
    match ct {
        "audio/m4a" | "audio/x-m4a" | "audio/mp4" | "audio/aac" => Some("m4a"),
        "audio/mpeg" | "audio/mp3" => Some("mp3"),
        "audio/wav" | "audio/x-wav" | "audio/wave" => Some("wav"),
        "audio/webm" => Some("webm"),
        "audio/ogg" => Some("ogg"),
        _ => None,
    }
}
