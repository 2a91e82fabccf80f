use axum::async_trait;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::config::JwtConfig;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    Missing,
    #[error("invalid or expired token")]
    Invalid,
}

/// Resolves a bearer token issued by the credential service to a user id.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn authenticate(&self, token: &str) -> Result<Uuid, AuthError>;
}

/// Access token payload issued by the credential service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,   // user ID
    pub exp: usize,  // expires at (unix timestamp)
    pub iss: String, // issuer
    pub aud: String, // audience
}

/// Verifies HS256 access tokens locally with the shared secret.
#[derive(Clone)]
pub struct JwtCredentials {
    decoding: DecodingKey,
    issuer: String,
    audience: String,
}

impl JwtCredentials {
    pub fn new(cfg: &JwtConfig) -> Self {
        Self {
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
        }
    }

    pub fn verify(&self, token: &str) -> anyhow::Result<Claims> {
        let mut validation = Validation::default();
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        debug!(user_id = %data.claims.sub, "jwt verified");
        Ok(data.claims)
    }
}

#[async_trait]
impl CredentialProvider for JwtCredentials {
    async fn authenticate(&self, token: &str) -> Result<Uuid, AuthError> {
        if token.trim().is_empty() {
            return Err(AuthError::Missing);
        }
        self.verify(token)
            .map(|c| c.sub)
            .map_err(|_| AuthError::Invalid)
    }
}
