//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use crate::auth::{Authenticator, StaticTokenAuthenticator};
use crate::config::GatewayConfig;
use crate::domain::{CommandRegistry, ConnectionRegistry};

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Command name → handler table, filled at startup.
    pub commands: Arc<CommandRegistry>,
    /// Identity → live connection map.
    pub connections: Arc<ConnectionRegistry>,
    /// Verifies bearer credentials presented at upgrade time.
    pub authenticator: Arc<dyn Authenticator>,
    /// Runtime configuration.
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    /// Builds state around an already populated command registry, with
    /// an empty connection registry and the static token authenticator
    /// described by `config.auth_tokens`.
    #[must_use]
    pub fn new(commands: CommandRegistry, config: GatewayConfig) -> Self {
        let authenticator = StaticTokenAuthenticator::from_pairs(&config.auth_tokens);
        if authenticator.is_empty() {
            tracing::info!("no auth tokens configured, trusting the identity query parameter");
        } else {
            tracing::info!(tokens = authenticator.len(), "static token authenticator loaded");
        }
        Self {
            commands: Arc::new(commands),
            connections: Arc::new(ConnectionRegistry::new()),
            authenticator: Arc::new(authenticator),
            config: Arc::new(config),
        }
    }

    /// Replaces the authenticator.
    #[must_use]
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = authenticator;
        self
    }
}
