//! Client-side discovery of entry completion.
//!
//! The server and the client only share the persisted `status` field: the
//! client submits, shows an optimistic placeholder, then polls with backoff
//! until the entry is terminal or the deadline passes. A timeout only stops
//! the watching; the server keeps working.

pub mod client;
pub mod machine;

use axum::async_trait;
use serde::Serialize;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::entries::dto::EntryDetails;
use crate::entries::EntryStatusView;
use crate::normalize::Macros;

pub use client::{ClientError, HttpEntryClient, StaticToken, Submission, TokenSource};
pub use machine::{PollConfig, PollEvent, PollMachine, PollState};

pub const STILL_PROCESSING_MESSAGE: &str =
    "Processing is taking longer than expected. It will finish in the background.";

#[async_trait]
pub trait EntryStatusSource: Send + Sync {
    async fn fetch_status(&self, entry_id: Uuid) -> Result<EntryStatusView, ClientError>;
    async fn fetch_entry(&self, entry_id: Uuid) -> Result<EntryDetails, ClientError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed {
        status: EntryStatusView,
        /// Refreshed full entry; `None` if the refresh itself failed.
        entry: Option<EntryDetails>,
    },
    Errored {
        status: EntryStatusView,
        entry: Option<EntryDetails>,
    },
    /// Deadline passed without a terminal status. Not a failure.
    StillProcessing { message: String },
    Unreachable { last_error: String },
}

/// Polls `entry_id` until it is terminal, the deadline elapses, or the
/// transport fails too many times in a row.
#[instrument(skip(source, config))]
pub async fn poll_until_terminal(
    source: &dyn EntryStatusSource,
    entry_id: Uuid,
    config: PollConfig,
) -> PollOutcome {
    let deadline = Instant::now() + config.deadline;
    let mut machine = PollMachine::new(config);
    machine.handle(PollEvent::Started);

    while let Some(delay) = machine.next_delay() {
        if timeout_at(deadline, sleep(delay)).await.is_err() {
            machine.handle(PollEvent::DeadlineElapsed);
            break;
        }
        let event = match timeout_at(deadline, source.fetch_status(entry_id)).await {
            Err(_) => PollEvent::DeadlineElapsed,
            Ok(Ok(view)) => PollEvent::Status(view),
            Ok(Err(e)) => {
                debug!(%entry_id, error = %e, "status poll failed");
                PollEvent::TransportFailure(e.to_string())
            }
        };
        machine.handle(event);
    }

    match machine.state().clone() {
        PollState::Completed(status) => PollOutcome::Completed {
            entry: refresh(source, entry_id).await,
            status,
        },
        PollState::Errored(status) => PollOutcome::Errored {
            entry: refresh(source, entry_id).await,
            status,
        },
        PollState::Unreachable { last_error } => {
            warn!(%entry_id, %last_error, "gave up polling");
            PollOutcome::Unreachable { last_error }
        }
        // The loop only exits on a terminal state, so this is the deadline.
        PollState::TimedOut | PollState::Submitted | PollState::Polling { .. } => {
            info!(%entry_id, "entry still processing at deadline");
            PollOutcome::StillProcessing {
                message: STILL_PROCESSING_MESSAGE.to_string(),
            }
        }
    }
}

async fn refresh(source: &dyn EntryStatusSource, entry_id: Uuid) -> Option<EntryDetails> {
    match source.fetch_entry(entry_id).await {
        Ok(entry) => Some(entry),
        Err(e) => {
            warn!(%entry_id, error = %e, "failed to refresh entry");
            None
        }
    }
}

/// The row a client shows while an entry is in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Placeholder {
    pub entry_id: Uuid,
    pub text: Option<String>,
    pub has_image: bool,
    pub macros: Macros,
    pub processing: bool,
    pub notice: Option<String>,
}

impl Placeholder {
    /// Zero macros, tagged as processing.
    pub fn optimistic(entry_id: Uuid, text: Option<&str>, has_image: bool) -> Self {
        Self {
            entry_id,
            text: text.map(str::to_string),
            has_image,
            macros: Macros::ZERO,
            processing: true,
            notice: None,
        }
    }

    /// Applies a poll outcome. Terminal outcomes drop the processing tag.
    pub fn resolve(mut self, outcome: &PollOutcome) -> Self {
        match outcome {
            PollOutcome::Completed { status, .. } | PollOutcome::Errored { status, .. } => {
                self.macros = Macros {
                    protein_g: status.protein_g.unwrap_or_default(),
                    carbs_g: status.carbs_g.unwrap_or_default(),
                    fat_g: status.fat_g.unwrap_or_default(),
                    calories_kcal: status.calories_kcal.unwrap_or_default(),
                };
                if status.raw_text.is_some() {
                    self.text = status.raw_text.clone();
                }
                self.processing = false;
                self.notice = None;
            }
            PollOutcome::StillProcessing { message } => self.notice = Some(message.clone()),
            PollOutcome::Unreachable { .. } => {}
        }
        self
    }
}
