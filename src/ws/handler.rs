//! Axum WebSocket upgrade handler.

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use utoipa::IntoParams;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::auth::resolve_identity;
use crate::error::{ErrorResponse, GatewayError};

/// Query parameters accepted on `GET /ws`.
#[derive(Debug, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ConnectParams {
    /// Pre-authenticated identity, trusted when no credential is sent.
    pub identity: Option<String>,
    /// Bearer token for clients that cannot set headers.
    pub token: Option<String>,
}

/// `GET /ws`: upgrades the HTTP connection to WebSocket.
///
/// The identity is resolved before the upgrade is examined, so a request
/// without one is rejected before any registry interaction.
///
/// # Errors
///
/// Returns [`GatewayError::MissingIdentity`] (400) when no identity is
/// supplied and [`GatewayError::Unauthorized`] (401) when a credential is
/// rejected.
#[utoipa::path(
    get,
    path = "/ws",
    tag = "Realtime",
    summary = "Open a command channel",
    description = "Upgrades to a WebSocket. Each text frame is a request envelope `{command, payload, target_id}`; responses are delivered to the connection registered for `target_id`.",
    params(ConnectParams),
    responses(
        (status = 101, description = "Switching protocols"),
        (status = 400, description = "No identity supplied", body = ErrorResponse),
        (status = 401, description = "Credential rejected", body = ErrorResponse),
    )
)]
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, GatewayError> {
    let identity = resolve_identity(
        state.authenticator.as_ref(),
        &headers,
        params.token.as_deref(),
        params.identity.as_deref(),
    )
    .inspect_err(|err| tracing::warn!(error = %err, "ws upgrade rejected"))?;

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return Ok(rejection.into_response()),
    };

    tracing::debug!(identity = %identity, "ws upgrade accepted");
    let max_message_bytes = state.config.max_message_bytes;
    Ok(ws
        .max_message_size(max_message_bytes)
        .on_upgrade(move |socket| run_connection(socket, state, identity))
        .into_response())
}
