//! Identity resolution for the WebSocket upgrade.
//!
//! Credential verification belongs to an external collaborator behind the
//! [`Authenticator`] trait. The gateway only decides which identity to
//! trust: a verified bearer token when one is presented, otherwise the
//! `identity` query parameter set by an upstream authenticating proxy.

use std::collections::HashMap;
use std::fmt;

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use crate::domain::UserId;
use crate::error::GatewayError;

/// Verifies a bearer credential and returns the identity it belongs to.
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Verifies `token`.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Unauthorized`] if the token is not valid.
    fn verify(&self, token: &str) -> Result<UserId, GatewayError>;
}

/// Authenticator backed by a fixed token → identity table.
#[derive(Clone, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenAuthenticator {
    /// Creates an authenticator that accepts no tokens.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a token for `identity`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, identity: impl Into<UserId>) -> Self {
        self.tokens.insert(token.into(), identity.into());
        self
    }

    /// Parses `token:identity` pairs separated by commas.
    ///
    /// Blank entries are skipped; entries without a `:` or with an empty
    /// side are ignored with a warning.
    #[must_use]
    pub fn from_pairs(pairs: &str) -> Self {
        let mut tokens = HashMap::new();
        for entry in pairs.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match entry.split_once(':') {
                Some((token, identity)) if !token.is_empty() && !identity.is_empty() => {
                    tokens.insert(token.to_string(), UserId::new(identity));
                }
                _ => tracing::warn!("ignoring malformed AUTH_TOKENS entry"),
            }
        }
        Self { tokens }
    }

    /// Returns the number of known tokens.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Returns `true` if no token is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl fmt::Debug for StaticTokenAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenAuthenticator")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn verify(&self, token: &str) -> Result<UserId, GatewayError> {
        self.tokens
            .get(token)
            .cloned()
            .ok_or_else(|| GatewayError::Unauthorized("invalid credentials".to_string()))
    }
}

/// Picks the identity for an upgrade request.
///
/// 1. `Authorization: Bearer <token>` or a `token` query parameter is
///    verified by `authenticator`.
/// 2. Otherwise a non-empty `identity` query parameter is trusted.
///
/// # Errors
///
/// - [`GatewayError::Unauthorized`] if a credential is present but
///   malformed or rejected.
/// - [`GatewayError::MissingIdentity`] if neither source is present.
pub fn resolve_identity(
    authenticator: &dyn Authenticator,
    headers: &HeaderMap,
    token_param: Option<&str>,
    identity_param: Option<&str>,
) -> Result<UserId, GatewayError> {
    if let Some(header) = headers.get(AUTHORIZATION) {
        let token = header
            .to_str()
            .ok()
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| GatewayError::Unauthorized("expected a Bearer token".to_string()))?;
        return authenticator.verify(token);
    }

    if let Some(token) = token_param.filter(|t| !t.is_empty()) {
        return authenticator.verify(token);
    }

    match identity_param {
        Some(identity) if !identity.is_empty() => Ok(UserId::new(identity)),
        _ => Err(GatewayError::MissingIdentity),
    }
}
