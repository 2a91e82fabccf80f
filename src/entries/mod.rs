pub mod completion;
pub mod dto;
pub mod handlers;
pub mod intake;
#[cfg(test)]
pub mod memory;
pub mod model;
pub mod repo;
pub mod sweep;

use axum::Router;

use crate::{config::LimitsConfig, state::AppState};

pub use model::{
    Completion, CompletionOutcome, Entry, EntryStatus, EntryStatusView, NewEntry,
};
pub use repo::{EntryStore, PgEntryStore};

pub fn router(limits: &LimitsConfig) -> Router<AppState> {
    handlers::router(limits)
}
