use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub inference_model: String,
    pub transcription_model: String,
    /// `None` means webhook signatures are not checked (development mode).
    pub webhook_secret: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    pub image_max_bytes: usize,
    pub audio_max_bytes: usize,
    pub signed_url_ttl_secs: u64,
    /// 0 disables the stale-entry sweep.
    pub stale_entry_minutes: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            image_max_bytes: 6 * 1024 * 1024,
            audio_max_bytes: 25 * 1024 * 1024,
            signed_url_ttl_secs: 600,
            stale_entry_minutes: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub storage: StorageConfig,
    pub provider: ProviderConfig,
    pub limits: LimitsConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = required("DATABASE_URL")?;
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "shudo".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "authenticated".into()),
        };
        let storage = StorageConfig {
            endpoint: required("S3_ENDPOINT")?,
            bucket: required("S3_BUCKET")?,
            access_key: required("S3_ACCESS_KEY")?,
            secret_key: required("S3_SECRET_KEY")?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".into()),
        };
        let provider = ProviderConfig {
            api_key: required("OPENAI_API_KEY")?,
            base_url: std::env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into()),
            inference_model: std::env::var("INFERENCE_MODEL").unwrap_or_else(|_| "gpt-5".into()),
            transcription_model: std::env::var("TRANSCRIPTION_MODEL")
                .unwrap_or_else(|_| "gpt-4o-transcribe".into()),
            webhook_secret: std::env::var("OPENAI_WEBHOOK_SECRET")
                .ok()
                .filter(|s| !s.trim().is_empty()),
        };

        let defaults = LimitsConfig::default();
        let limits = LimitsConfig {
            image_max_bytes: env_parse("IMAGE_MAX_BYTES").unwrap_or(defaults.image_max_bytes),
            audio_max_bytes: env_parse("AUDIO_MAX_BYTES").unwrap_or(defaults.audio_max_bytes),
            signed_url_ttl_secs: env_parse("SIGNED_URL_TTL_SECS")
                .unwrap_or(defaults.signed_url_ttl_secs),
            stale_entry_minutes: env_parse("STALE_ENTRY_MINUTES")
                .unwrap_or(defaults.stale_entry_minutes),
        };

        Ok(Self {
            database_url,
            jwt,
            storage,
            provider,
            limits,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("missing required env var {key}"))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}
