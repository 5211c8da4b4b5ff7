//! Web relay: axum REST snapshot API and websocket event stream.
//!
//! Shared state is the live tracker (read-only here, the tracker task is the
//! writer) and the tracker event broadcaster each websocket subscribes to.

use std::io;
use std::sync::{Arc, RwLock};

use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};

use ogn_core::tracker::{TrackEvent, Tracker};

use crate::broadcast::Broadcaster;

pub mod routes;
pub mod ws;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct AppState {
    pub tracker: Arc<RwLock<Tracker>>,
    pub events: Broadcaster<TrackEvent>,
    /// Cancelled on process shutdown; open websockets close on it.
    pub shutdown: CancellationToken,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", axum::routing::get(ws::ws_handler))
        .route("/api/aircraft", axum::routing::get(routes::api_aircraft))
        .route(
            "/api/aircraft/:id",
            axum::routing::get(routes::api_aircraft_detail),
        )
        .with_state(state)
        .layer(cors)
}

/// Serve on an already-bound listener until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> io::Result<()> {
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "Relay server listening on http://{addr}");
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    tracing::info!("Relay server stopped");
    Ok(())
}
