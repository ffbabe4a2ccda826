use std::net::SocketAddr;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, WebSocketUpgrade,
    },
    response::IntoResponse,
    Extension, TypedHeader,
};
use futures::{sink::Sink, stream::Stream, SinkExt, StreamExt};
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{sink::BroadcastSink, telemetry::Record};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(sink): Extension<BroadcastSink>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    } else {
        info!("`{addr}` connected");
    }

    // Subscribe before the upgrade response goes out,
    // so records published right after the client sees it are not missed.
    let records = BroadcastStream::new(sink.subscribe());

    ws.on_upgrade(move |socket| {
        let span = info_span!("Subscriber", %addr);

        handle_websocket(socket, records).instrument(span)
    })
}

pub(crate) async fn read<S>(mut receiver: S)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                trace!(%text, "Ignoring subscriber text");
            }
            Message::Binary(_) => {
                debug!("client sent binary data");
            }
            Message::Ping(_) => {
                debug!("socket ping");
            }
            Message::Pong(_) => {
                debug!("socket pong");
            }
            Message::Close(_) => {
                debug!("client disconnected");
            }
        }
    }

    debug!("no more stuff");
}

pub(crate) async fn write(mut sender: impl Sink<Message> + Unpin, mut records: BroadcastStream<Record>) {
    while let Some(record) = records.next().await {
        let record = match record {
            Ok(record) => record,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("Subscriber lagging behind, skipped {skipped} record(s)");
                continue;
            }
        };

        let json = match serde_json::to_string(&record) {
            Ok(json) => json,
            Err(e) => {
                warn!("Could not serialize record: {e}");
                continue;
            }
        };

        if sender.send(Message::Text(json)).await.is_err() {
            debug!("client disconnected");
            return;
        }
        trace!("Record flushed");
    }

    debug!("Record stream ended");
}

pub(crate) async fn handle_websocket(websocket: WebSocket, records: BroadcastStream<Record>) {
    let (stream_sender, stream_receiver) = websocket.split();

    let write_handle =
        tokio::spawn(write(stream_sender, records).instrument(info_span!("Write")));

    read(stream_receiver).await;

    debug!("Aborting write task");
    // This ensures the underlying TCP connection gets closed,
    // which signals the peer that the session is over.
    write_handle.abort();
}
