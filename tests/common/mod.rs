#![allow(dead_code)]

use std::time::Duration;

use axum::http::StatusCode;
use color_eyre::Result;
use esc_telemetry::{config::ServerConfig, sink::BroadcastSink};
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::info;

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Start a server publishing from `sink`, returning the port it got.
pub async fn start_server(sink: BroadcastSink) -> u16 {
    let (port_tx, port_rx) = oneshot::channel();
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        ..ServerConfig::default()
    };

    tokio::spawn(async move { esc_telemetry::server::run_any_port(config, sink, port_tx).await });

    port_rx
        .await
        .expect("Server should reply with allocated port")
}

pub async fn connect(port: u16) -> Result<Client> {
    info!("Connecting to server on port {port}");
    let (stream, http_response) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/telemetry")).await?;

    assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

    Ok(stream)
}

/// Receive the next record as the JSON text sent.
pub async fn receive(client: &mut Client) -> Result<String> {
    let message = timeout(Duration::from_secs(5), client.next())
        .await?
        .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;

    Ok(message.to_text()?.to_owned())
}

/// Expect nothing to arrive for a little while.
pub async fn receive_nothing(client: &mut Client) {
    assert!(
        timeout(Duration::from_millis(200), client.next())
            .await
            .is_err(),
        "Expected no message"
    );
}
