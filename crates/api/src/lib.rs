//! HTTP layer of the kalends CalDAV server
//!
//! The router is two wildcard routes behind the Digest gate; all real
//! routing happens in the dispatcher's state machine, which owns the
//! `/principal/collection/resource` path model.

use axum::middleware as axum_middleware;
use axum::routing::any;
use axum::Router;
use kalends_core::Store;
use tower_http::trace::TraceLayer;

pub mod config;
pub mod error;
pub mod middleware;
pub mod props;
pub mod routes;
pub mod xml;

/// WebDAV compliance classes advertised on every successful response.
pub const DAV_CLASSES: &str = "1, access-control, calendar-access, calendar-proxy";

/// Request bodies past this size are refused outright.
pub const MAX_BODY_SIZE: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub realm: String,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", any(routes::dav::dispatch_root))
        .route("/{*path}", any(routes::dav::dispatch))
        .layer(axum_middleware::from_fn(
            middleware::headers::dav_capabilities,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::digest::digest_gate,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run(state: AppState, config: &config::Config) -> Result<(), std::io::Error> {
    let app = create_router(state);
    let addr = format!("{}:{}", config.host, config.port);

    tracing::info!("CalDAV server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await
}
