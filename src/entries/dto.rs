use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};
use uuid::Uuid;

use super::model::{Entry, EntryStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatedEntryResponse {
    pub entry_id: Uuid,
    pub image_path: Option<String>,
    pub audio_path: Option<String>,
}

/// Full entry as returned to its owner. `model_output` is internal and omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryDetails {
    pub id: Uuid,
    pub status: EntryStatus,
    pub raw_text: Option<String>,
    pub has_text: bool,
    pub has_image: bool,
    pub has_audio: bool,
    pub image_path: Option<String>,
    pub audio_path: Option<String>,
    pub protein_g: Option<f64>,
    pub carbs_g: Option<f64>,
    pub fat_g: Option<f64>,
    pub calories_kcal: Option<f64>,
    pub confidence: Option<f64>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
    pub local_day: Date,
    pub timezone_snapshot: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<Entry> for EntryDetails {
    fn from(e: Entry) -> Self {
        Self {
            id: e.id,
            status: e.status,
            raw_text: e.raw_text,
            has_text: e.has_text,
            has_image: e.has_image,
            has_audio: e.has_audio,
            image_path: e.image_path,
            audio_path: e.audio_path,
            protein_g: e.protein_g,
            carbs_g: e.carbs_g,
            fat_g: e.fat_g,
            calories_kcal: e.calories_kcal,
            confidence: e.confidence,
            processed_at: e.processed_at,
            local_day: e.local_day,
            timezone_snapshot: e.timezone_snapshot,
            created_at: e.created_at,
        }
    }
}
