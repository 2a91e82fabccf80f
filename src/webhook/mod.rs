//! Signed completion callbacks from the inference provider.

pub mod handlers;
pub mod signature;

pub use handlers::{router, WebhookOutcome};
pub use signature::{SignatureCheck, WebhookVerifier};
