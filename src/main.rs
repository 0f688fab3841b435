//! ride-gateway server entry point.
//!
//! Starts the Axum HTTP server with the WebSocket command channel.

use ride_gateway::api;
use ride_gateway::app_state::AppState;
use ride_gateway::config::GatewayConfig;
use ride_gateway::service::build_command_registry;
use ride_gateway::telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = GatewayConfig::from_env()?;

    // Initialize tracing
    telemetry::init(config.log_format);
    tracing::info!(addr = %config.listen_addr, "starting ride-gateway");

    // Register commands before accepting any connection
    let commands = build_command_registry(&config);

    // Build application state
    let listen_addr = config.listen_addr;
    let app_state = AppState::new(commands, config);

    // Build router
    let app = api::build_app(app_state);

    // Start server
    let listener = tokio::net::TcpListener::bind(listen_addr).await?;
    tracing::info!(addr = %listen_addr, "server listening");

    axum::serve(listener, app).await?;

    Ok(())
}
