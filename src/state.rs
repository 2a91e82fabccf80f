use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;

use crate::auth::{CredentialProvider, JwtCredentials};
use crate::config::AppConfig;
use crate::entries::{EntryStore, PgEntryStore};
use crate::inference::{InferenceProvider, OpenAiResponses};
use crate::storage::{Storage, StorageClient};
use crate::transcription::{OpenAiTranscriber, Transcriber};
use crate::webhook::WebhookVerifier;

/// Collaborators shared by every request. No request state lives here.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub entries: Arc<dyn EntryStore>,
    pub storage: Arc<dyn StorageClient>,
    pub credentials: Arc<dyn CredentialProvider>,
    pub transcriber: Arc<dyn Transcriber>,
    pub inference: Arc<dyn InferenceProvider>,
    /// `None` when no webhook secret is configured.
    pub webhook: Option<Arc<WebhookVerifier>>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = PgPoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await?;

        if let Err(e) = sqlx::migrate!("./migrations").run(&db).await {
            tracing::warn!(error = %e, "migration failed; continuing");
        }

        let storage = Arc::new(Storage::new(&config.storage).await?) as Arc<dyn StorageClient>;

        let webhook = config
            .provider
            .webhook_secret
            .as_deref()
            .map(|secret| Arc::new(WebhookVerifier::new(secret)));
        if webhook.is_none() {
            tracing::warn!("OPENAI_WEBHOOK_SECRET not set; webhook signatures are not verified");
        }

        Ok(Self {
            entries: Arc::new(PgEntryStore::new(db)),
            storage,
            credentials: Arc::new(JwtCredentials::new(&config.jwt)),
            transcriber: Arc::new(OpenAiTranscriber::new(&config.provider)?),
            inference: Arc::new(OpenAiResponses::new(&config.provider)?),
            webhook,
            config,
        })
    }
}
