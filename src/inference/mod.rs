//! Asynchronous analysis jobs at the external inference provider.

pub mod openai;
pub mod prompt;

use axum::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

pub use openai::OpenAiResponses;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("provider request failed: {0}")]
    Network(#[from] reqwest::Error),

    #[error("provider returned {status}: {body}")]
    Http { status: u16, body: String },

    #[error("unexpected provider response: {0}")]
    Parse(String),
}

/// Which output contract the job was dispatched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Attempt {
    /// Strict JSON schema.
    Primary,
    /// Plain JSON object; dispatched once when the primary result had no structure.
    Relaxed,
}

impl Attempt {
    pub fn as_str(self) -> &'static str {
        match self {
            Attempt::Primary => "primary",
            Attempt::Relaxed => "relaxed",
        }
    }

    /// Unknown or missing values are treated as a primary attempt.
    pub fn parse(s: Option<&str>) -> Self {
        match s {
            Some("relaxed") => Attempt::Relaxed,
            _ => Attempt::Primary,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InferenceJob {
    pub entry_id: Uuid,
    pub user_id: Uuid,
    pub text: Option<String>,
    /// Short-lived signed URL; never persisted.
    pub image_url: Option<String>,
    pub attempt: Attempt,
}

impl InferenceJob {
    /// Correlation tags carried by the job and echoed back on retrieval.
    pub fn metadata(&self) -> Value {
        json!({
            "entry_id": self.entry_id.to_string(),
            "user_id": self.user_id.to_string(),
            "attempt": self.attempt.as_str(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JobHandle {
    pub id: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Correlation recovered from a retrieved job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobMetadata {
    pub entry_id: Uuid,
    pub user_id: Option<Uuid>,
    pub attempt: Attempt,
}

impl JobMetadata {
    pub fn from_response(job: &Value) -> Option<Self> {
        let meta = job.get("metadata")?.as_object()?;
        let field = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| meta.get(*k))
                .find_map(Value::as_str)
                .map(str::trim)
        };
        let entry_id = field(&["entry_id", "entryId"])?.parse().ok()?;
        let user_id = field(&["user_id", "userId"]).and_then(|s| s.parse().ok());
        let attempt = Attempt::parse(field(&["attempt"]));
        Some(Self {
            entry_id,
            user_id,
            attempt,
        })
    }
}

#[async_trait]
pub trait InferenceProvider: Send + Sync {
    /// Starts a background job; returns as soon as the provider accepts it.
    async fn dispatch(&self, job: &InferenceJob) -> Result<JobHandle, InferenceError>;

    /// Fetches the authoritative state of a job by id.
    async fn retrieve(&self, job_id: &str) -> Result<Value, InferenceError>;
}
