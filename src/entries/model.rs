use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use thiserror::Error;
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use crate::normalize::Macros;

/// Lifecycle of an entry. Only `pending -> processing -> {complete|error}` is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Pending => "pending",
            EntryStatus::Processing => "processing",
            EntryStatus::Complete => "complete",
            EntryStatus::Error => "error",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, EntryStatus::Complete | EntryStatus::Error)
    }

    pub fn can_transition_to(self, next: EntryStatus) -> bool {
        use EntryStatus::*;
        matches!(
            (self, next),
            (Pending, Processing) | (Processing, Complete) | (Processing, Error)
        )
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown entry status {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for EntryStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EntryStatus::Pending),
            "processing" => Ok(EntryStatus::Processing),
            "complete" => Ok(EntryStatus::Complete),
            "error" => Ok(EntryStatus::Error),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Entry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: EntryStatus,
    pub raw_text: Option<String>,
    pub has_text: bool,
    pub has_image: bool,
    pub has_audio: bool,
    pub image_path: Option<String>,
    pub audio_path: Option<String>,
    pub model_output: Option<serde_json::Value>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub calories_kcal: Option<f64>,
    pub confidence: Option<f64>,
    pub processed_at: Option<OffsetDateTime>,
    pub local_day: Date,
    pub timezone_snapshot: String,
    pub created_at: OffsetDateTime,
}

impl Entry {
    pub fn status_view(&self) -> EntryStatusView {
        EntryStatusView {
            id: self.id,
            status: self.status,
            protein_g: self.protein_g,
            carbs_g: self.carbs_g,
            fat_g: self.fat_g,
            calories_kcal: self.calories_kcal,
            raw_text: self.raw_text.clone(),
        }
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct EntryRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub status: String,
    pub raw_text: Option<String>,
    pub has_text: bool,
    pub has_image: bool,
    pub has_audio: bool,
    pub image_path: Option<String>,
    pub audio_path: Option<String>,
    pub model_output: Option<serde_json::Value>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub calories_kcal: Option<f64>,
    pub confidence: Option<f64>,
    pub processed_at: Option<OffsetDateTime>,
    pub local_day: Date,
    pub timezone_snapshot: String,
    pub created_at: OffsetDateTime,
}

impl TryFrom<EntryRow> for Entry {
    type Error = UnknownStatus;

    fn try_from(r: EntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            user_id: r.user_id,
            status: r.status.parse()?,
            raw_text: r.raw_text,
            has_text: r.has_text,
            has_image: r.has_image,
            has_audio: r.has_audio,
            image_path: r.image_path,
            audio_path: r.audio_path,
            model_output: r.model_output,
            protein_g: r.protein_g,
            carbs_g: r.carbs_g,
            fat_g: r.fat_g,
            calories_kcal: r.calories_kcal,
            confidence: r.confidence,
            processed_at: r.processed_at,
            local_day: r.local_day,
            timezone_snapshot: r.timezone_snapshot,
            created_at: r.created_at,
        })
    }
}

/// The narrow read the client poller performs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryStatusView {
    pub id: Uuid,
    pub status: EntryStatus,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub calories_kcal: Option<f64>,
    pub raw_text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub raw_text: Option<String>,
    pub timezone: String,
}

impl NewEntry {
    pub fn has_text(&self) -> bool {
        self.raw_text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }
}

/// Terminal write produced from a normalized provider result.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub macros: Macros,
    pub confidence: Option<f64>,
    pub model_output: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    Applied,
    /// The entry was already complete or errored; nothing was written.
    AlreadyTerminal,
    /// The entry has not reached `processing`; nothing was written.
    NotProcessing,
    NotFound,
}

impl CompletionOutcome {
    /// Outcome of a completion refused because the entry sits in `current`.
    pub fn rejected(current: EntryStatus) -> Self {
        if current.is_terminal() {
            CompletionOutcome::AlreadyTerminal
        } else {
            CompletionOutcome::NotProcessing
        }
    }
}
