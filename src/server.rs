use std::net::{IpAddr, SocketAddr};

use axum::{response::IntoResponse, routing::get, Extension, Router};
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::{config::ServerConfig, error::Error, sink::BroadcastSink, websocket};

/// The default port to run the server on.
pub const DEFAULT_PORT: u16 = 5000;

async fn run(
    config: ServerConfig,
    sink: BroadcastSink,
    port: Option<u16>,
    allocated_port: Option<oneshot::Sender<u16>>,
) -> Result<(), Error> {
    let host: IpAddr = config
        .host
        .parse()
        .map_err(|e| Error::BadConfig(format!("Bad host `{}`: {e}", config.host)))?;

    let app = Router::new()
        .route("/telemetry", get(websocket::ws_handler))
        .route("/version", get(show_version))
        // Each websocket subscribes to the records published here
        .layer(Extension(sink))
        .layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(host, port.unwrap_or(0));
    let server = axum::Server::try_bind(&addr)
        .map_err(|e| Error::Server(format!("Could not bind {addr}: {e}")))?
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());
    let addr = server.local_addr();

    if let Some(port_reply) = allocated_port {
        if port_reply.send(addr.port()).is_err() {
            info!("Nobody wanted to know the allocated port");
        }
    }

    info!("listening on {}", addr);

    server.await.map_err(|e| Error::Server(e.to_string()))
}

/// Start the server on an arbitrary available port.
/// The port allocated will be sent on the provided channel.
pub async fn run_any_port(
    config: ServerConfig,
    sink: BroadcastSink,
    allocated_port: oneshot::Sender<u16>,
) -> Result<(), Error> {
    run(config, sink, None, Some(allocated_port)).await
}

/// Start the server on the configured port.
pub async fn run_on_port(config: ServerConfig, sink: BroadcastSink) -> Result<(), Error> {
    let port = config.port;
    run(config, sink, Some(port), None).await
}

async fn show_version() -> impl IntoResponse {
    format!("ESC Telemetry v{}\n", env!("CARGO_PKG_VERSION"))
}
