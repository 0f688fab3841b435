//! HTTP layer: system routes, OpenAPI document and router composition.

pub mod handlers;

use axum::Router;
use axum::routing::get;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

use crate::app_state::AppState;
use crate::error::{ErrorBody, ErrorResponse};
use crate::ws::handler::ws_handler;

/// OpenAPI description of the HTTP surface.
#[derive(Debug, OpenApi)]
#[openapi(
    info(
        title = "ride-gateway",
        description = "Command dispatch and connection routing over WebSocket"
    ),
    paths(handlers::system::health_handler, crate::ws::handler::ws_handler),
    components(schemas(handlers::system::HealthResponse, ErrorResponse, ErrorBody)),
    tags(
        (name = "System", description = "Service health"),
        (name = "Realtime", description = "WebSocket command channel"),
    )
)]
pub struct ApiDoc;

/// Builds the router without state: system routes and `/ws`.
pub fn build_router() -> Router<AppState> {
    let router = Router::new()
        .merge(handlers::system::routes())
        .route("/ws", get(ws_handler));

    #[cfg(feature = "swagger-ui")]
    let router = router.merge(
        utoipa_swagger_ui::SwaggerUi::new("/swagger-ui")
            .url("/api-docs/openapi.json", ApiDoc::openapi()),
    );

    router
}

/// Builds the complete application with tracing and CORS layers.
pub fn build_app(state: AppState) -> Router {
    build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::config::GatewayConfig;
    use crate::service::build_command_registry;

    fn app() -> Router {
        let config = GatewayConfig::default();
        build_app(AppState::new(build_command_registry(&config), config))
    }

    #[tokio::test]
    async fn health_is_ok() {
        let Ok(request) = Request::get("/health").body(Body::empty()) else {
            panic!("request build failed");
        };
        let Ok(response) = app().oneshot(request).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn ws_without_identity_is_bad_request() {
        let Ok(request) = Request::get("/ws").body(Body::empty()) else {
            panic!("request build failed");
        };
        let Ok(response) = app().oneshot(request).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn ws_with_bad_token_is_unauthorized() {
        let Ok(request) = Request::get("/ws?token=forged&identity=alice").body(Body::empty()) else {
            panic!("request build failed");
        };
        let Ok(response) = app().oneshot(request).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn ws_with_identity_but_no_upgrade_is_rejected_by_transport() {
        let Ok(request) = Request::get("/ws?identity=alice").body(Body::empty()) else {
            panic!("request build failed");
        };
        let Ok(response) = app().oneshot(request).await;
        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn openapi_lists_paths() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/health"));
        assert!(doc.paths.paths.contains_key("/ws"));
    }
}
