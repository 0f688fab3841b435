//! Service layer: domain handlers exposed as duplex commands.
//!
//! [`build_command_registry`] wires every command the gateway serves into
//! a [`CommandRegistry`] once at startup.

pub mod location_service;

pub use location_service::{Location, LocationService, LocationUpdate};

use serde_json::Value;

use crate::config::GatewayConfig;
use crate::domain::{CommandRegistry, DispatchContext};

/// Command name for live location sharing.
pub const SHARE_LOCATION: &str = "share_location";

/// Command name for the liveness probe.
pub const PING: &str = "ping";

/// Builds the startup command table, applying the configured handler
/// deadline.
#[must_use]
pub fn build_command_registry(config: &GatewayConfig) -> CommandRegistry {
    let registry = match config.handler_timeout {
        Some(limit) => CommandRegistry::new().with_handler_timeout(limit),
        None => CommandRegistry::new(),
    };
    register_commands(&registry, LocationService::new());
    registry
}

/// Registers the gateway's domain commands on `registry`.
pub fn register_commands(registry: &CommandRegistry, locations: LocationService) {
    registry.register(SHARE_LOCATION, move |location: Location, ctx: DispatchContext| async move {
        locations.share_location(&ctx, location)
    });
    registry.register(PING, |_: Value, _ctx| async move { Ok("pong") });
    tracing::info!(commands = ?registry.command_names(), "commands registered");
}
