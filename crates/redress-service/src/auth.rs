//! Bearer-token authentication.
//!
//! The credential store itself is an external collaborator; this module only
//! consumes its interface: something that turns a bearer token into an actor.
//! The shipped implementation is a token registry loaded once from a JSON
//! credentials file. Inactive accounts never become actors.

use crate::ApiError;
use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use redress_core::{Actor, RedressError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CredentialsError {
    #[error("credentials file IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("credentials file parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Resolves a bearer token to the actor it authenticates.
#[async_trait]
pub trait CredentialVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<Actor>;
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub token: String,
    #[serde(flatten)]
    pub actor: Actor,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct CredentialsFile {
    credentials: Vec<CredentialRecord>,
}

/// In-memory token map, immutable once the service is serving.
#[derive(Debug, Default)]
pub struct TokenRegistry {
    records: HashMap<String, CredentialRecord>,
}

impl TokenRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self, CredentialsError> {
        let path = path.into();
        let file: CredentialsFile = if path.exists() {
            let bytes = fs::read(&path)?;
            if bytes.is_empty() {
                CredentialsFile::default()
            } else {
                serde_json::from_slice(&bytes)?
            }
        } else {
            CredentialsFile::default()
        };

        Ok(Self::from_records(file.credentials))
    }

    pub fn from_records(records: Vec<CredentialRecord>) -> Self {
        Self {
            records: records
                .into_iter()
                .map(|record| (record.token.clone(), record))
                .collect(),
        }
    }

    /// Register an active actor under a fresh opaque token.
    pub fn issue(&mut self, actor: Actor) -> String {
        let token = Uuid::new_v4().to_string();
        self.records.insert(
            token.clone(),
            CredentialRecord {
                token: token.clone(),
                actor,
                is_active: true,
            },
        );
        token
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl CredentialVerifier for TokenRegistry {
    async fn verify(&self, token: &str) -> Option<Actor> {
        self.records
            .get(token)
            .filter(|record| record.is_active)
            .map(|record| record.actor)
    }
}

/// Authenticated actor extractor for protected routes.
pub struct AuthActor(pub Actor);

#[async_trait]
impl FromRequestParts<crate::ServiceState> for AuthActor {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &crate::ServiceState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(ApiError::Core(RedressError::Authentication))?;

        let actor = state
            .verifier
            .verify(token)
            .await
            .ok_or(ApiError::Core(RedressError::Authentication))?;

        Ok(AuthActor(actor))
    }
}
