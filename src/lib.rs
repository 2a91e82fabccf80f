pub mod app;
pub mod auth;
pub mod config;
pub mod entries;
pub mod error;
pub mod inference;
pub mod normalize;
pub mod poller;
pub mod state;
pub mod storage;
pub mod transcription;
pub mod uploads;
pub mod webhook;
