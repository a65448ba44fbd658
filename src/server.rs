use std::{net::SocketAddr, sync::Arc};

use axum::{http::StatusCode, response::IntoResponse, routing::get, Extension, Json, Router};
use tokio::sync::oneshot;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    bridge::{Bridge, Status},
    config::Config,
    error::Error,
    serial::{serial_port::SystemPorts, PortInfo},
    websocket,
};

async fn run(
    config: Config,
    bridge: Bridge,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    config.validate()?;

    let app = Router::new()
        .route("/", get(show_root))
        .route("/ws", get(websocket::ws_handler))
        .route("/status", get(show_status))
        .route("/ports", get(show_ports))
        .route("/config", get(show_config))
        .route("/version", get(show_version))
        .layer(
            ServiceBuilder::new()
                // Each websocket needs to be able to reach the bridge
                .layer(Extension(bridge))
                // The config should be known to the web server
                .layer(Extension(config.clone())),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], port.unwrap_or(0)));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Server(format!("Could not bind to {addr}: {e}")))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            warn!("Nobody is waiting for the allocated port");
        }
    }

    info!("listening on {}", addr);

    server.await.map_err(|e| Error::Server(e.to_string()))
}

/// Start the server on an arbitrary available port, using the given bridge.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(
    config: Config,
    bridge: Bridge,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error> {
    run(config, bridge, None, Some(allocated_port)).await
}

/// Start the server on the given port, bridging the serial ports of this machine.
pub async fn run_on_port(config: Config, port: u16) -> Result<(), Error> {
    let bridge = Bridge::new(&config, Arc::new(SystemPorts))?;
    bridge.connect_on_start(&config).await;

    run(config, bridge, Some(port), None).await
}

async fn show_root() -> impl IntoResponse {
    Json(serde_json::json!({
        "data": "Serial Bridge API",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn show_status(Extension(bridge): Extension<Bridge>) -> Result<Json<Status>, StatusCode> {
    // Listing ports may touch the OS, keep it off the async workers.
    tokio::task::spawn_blocking(move || bridge.status())
        .await
        .map(Json)
        .map_err(|e| {
            warn!(?e, "Status task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn show_ports(
    Extension(bridge): Extension<Bridge>,
) -> Result<Json<Vec<PortInfo>>, (StatusCode, Json<Error>)> {
    let ports = tokio::task::spawn_blocking(move || bridge.ports())
        .await
        .map_err(|e| Error::PortListing(e.to_string()))
        .and_then(|ports| ports);

    ports
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, Json(e)))
}

async fn show_config(Extension(config): Extension<Config>) -> impl IntoResponse {
    config
        .serialize_pretty()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

async fn show_version() -> impl IntoResponse {
    format!("Serial Bridge v{}\n", env!("CARGO_PKG_VERSION"))
}
