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
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, trace, warn, Instrument};

use crate::{bridge::Bridge, error::Error};

pub(crate) async fn ws_handler(
    ws: WebSocketUpgrade,
    user_agent: Option<TypedHeader<headers::UserAgent>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(bridge): Extension<Bridge>,
) -> impl IntoResponse {
    if let Some(TypedHeader(user_agent)) = user_agent {
        info!("`{}`@`{addr}` connected", user_agent.as_str());
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, addr, bridge))
}

/// Every text message is handed to the bridge.
/// Errors from handling it go back to this client only.
pub(crate) async fn read<S>(mut receiver: S, errors: mpsc::UnboundedSender<Error>, bridge: Bridge)
where
    S: Unpin,
    S: Stream<Item = Result<Message, axum::Error>>,
{
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Text(text) => {
                trace!(%text, "client message");

                if let Err(e) = bridge.handle_inbound_message(&text).await {
                    if errors.send(e).is_err() {
                        debug!("writer gone");
                        break;
                    }
                }
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
                break;
            }
        }
    }

    debug!("no more stuff");
}

fn error_text(e: Error) -> Option<String> {
    info!("Error response: <{e}>");

    let response: Result<(), Error> = Err(e);
    match serde_json::to_string(&response) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(?e, "Could not serialize error response");
            None
        }
    }
}

/// Device lines and error replies go out on the socket.
/// If the registry drops us, the socket is closed.
pub(crate) async fn write(
    mut sender: impl Sink<Message> + Unpin,
    mut lines: mpsc::Receiver<String>,
    mut errors: mpsc::UnboundedReceiver<Error>,
) {
    loop {
        let text = tokio::select! {
            line = lines.recv() => match line {
                Some(line) => line,
                None => {
                    debug!("no longer receiving device output, closing");
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                }
            },
            Some(e) = errors.recv() => match error_text(e) {
                Some(text) => text,
                None => continue,
            },
        };

        if sender.send(Message::Text(text)).await.is_err() {
            debug!("client disconnected");
            return;
        }
        trace!("Line flushed");
    }
}

pub(crate) async fn handle_websocket(websocket: WebSocket, addr: SocketAddr, bridge: Bridge) {
    let (id, lines) = bridge.attach();

    let span = info_span!("Client", %id, %addr);

    let (stream_sender, stream_receiver) = websocket.split();
    let (error_sender, error_receiver) = mpsc::unbounded_channel();

    let read_handle = tokio::spawn(
        read(stream_receiver, error_sender, bridge.clone())
            .instrument(info_span!(parent: &span, "Read")),
    );
    let write_handle = tokio::spawn(
        write(stream_sender, lines, error_receiver)
            .instrument(info_span!(parent: &span, "Write")),
    );
    drop(span);

    match read_handle.await {
        Ok(()) => debug!("Read task joined"),
        Err(e) => warn!("Read task join error: {e:?}"),
    }

    bridge.detach(id);

    debug!("Aborting write task");
    // This ensures the underlying TCP connection gets closed,
    // which signals the peer that the session is over.
    write_handle.abort();
}
