//! AuthService — cache-backed token authentication.

use std::sync::Arc;
use std::time::Duration;

use tonic::metadata::MetadataMap;
use tracing::{debug, warn};

use crate::cache::{CachedOutcome, TokenCache};
use crate::error::{AuthError, AuthResult};

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub name: String,
    pub groups: Vec<String>,
}

/// Backend that renders a verdict on a raw token.
///
/// `Ok(Some(principal))` means valid, `Ok(None)` means the token was
/// definitively rejected, `Err(_)` means the reviewer itself failed and
/// no verdict should be cached.
#[tonic::async_trait]
pub trait TokenReviewer: Send + Sync {
    async fn review(&self, token: &str) -> AuthResult<Option<Principal>>;
}

/// Cache-first authenticator.
pub struct AuthService {
    reviewer: Arc<dyn TokenReviewer>,
    cache: TokenCache,
}

impl AuthService {
    pub fn new(reviewer: Arc<dyn TokenReviewer>, valid_ttl: Duration, invalid_ttl: Duration) -> Self {
        Self {
            reviewer,
            cache: TokenCache::new(valid_ttl, invalid_ttl),
        }
    }

    /// Authenticate a raw token, consulting the cache before the reviewer.
    pub async fn authenticate(&self, token: &str) -> AuthResult<Principal> {
        match self.cache.get(token) {
            Some(CachedOutcome::Valid(principal)) => return Ok(principal),
            Some(CachedOutcome::Invalid) => {
                debug!("rejecting token from negative cache");
                return Err(AuthError::InvalidToken);
            }
            None => {}
        }

        match self.reviewer.review(token).await {
            Ok(Some(principal)) => {
                self.cache
                    .put(token, CachedOutcome::Valid(principal.clone()));
                debug!(principal = %principal.name, "token reviewed: valid");
                Ok(principal)
            }
            Ok(None) => {
                self.cache.put(token, CachedOutcome::Invalid);
                debug!("token reviewed: invalid");
                Err(AuthError::InvalidToken)
            }
            Err(err) => {
                // Reviewer failures are transient; never cache them.
                warn!(error = %err, "token review failed");
                Err(err)
            }
        }
    }

    /// Authenticate a request from its gRPC metadata.
    pub async fn authenticate_request(&self, metadata: &MetadataMap) -> AuthResult<Principal> {
        let token = bearer_token(metadata)?;
        self.authenticate(&token).await
    }

    pub fn cache(&self) -> &TokenCache {
        &self.cache
    }
}

/// Extract the bearer token from the `authorization` metadata entry.
pub fn bearer_token(metadata: &MetadataMap) -> AuthResult<String> {
    let value = metadata
        .get("authorization")
        .ok_or(AuthError::MissingToken)?;
    let value = value.to_str().map_err(|_| AuthError::MissingToken)?;
    match value.strip_prefix("Bearer ").or_else(|| value.strip_prefix("bearer ")) {
        Some(token) if !token.is_empty() => Ok(token.to_string()),
        _ => Err(AuthError::MissingToken),
    }
}
