#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::http::StatusCode;
use color_eyre::Result;
use futures::{SinkExt, StreamExt};
use serial_bridge::{
    bridge::Bridge,
    config::{Config, WriteMode},
    logging,
    mock::MockPorts,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::oneshot,
    time::timeout,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{info, Level};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const TIMEOUT: Duration = Duration::from_secs(5);

pub fn test_config() -> Config {
    Config {
        write_mode: WriteMode::Bulk,
        ..Default::default()
    }
}

/// A server bridging the given mock ports.
/// Returns the bridge (to peek at its state) and the port the server listens on.
pub async fn start_server(ports: &MockPorts) -> (Bridge, u16) {
    start_server_with(ports, test_config()).await
}

pub async fn start_server_with(ports: &MockPorts, config: Config) -> (Bridge, u16) {
    logging::init(Level::DEBUG, None);

    let bridge = Bridge::new(&config, Arc::new(ports.clone())).expect("Test config should be valid");
    let (port_tx, port_rx) = oneshot::channel();

    let server_bridge = bridge.clone();
    tokio::spawn(async move {
        serial_bridge::server::run_any_port(config, server_bridge, port_tx).await
    });
    let port = port_rx
        .await
        .expect("Server should reply with allocated port");

    (bridge, port)
}

pub async fn connect(port: u16) -> Result<Client> {
    info!("Connecting to server on port {port}");
    let (stream, http_response) =
        tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/ws")).await?;

    assert_eq!(http_response.status(), StatusCode::SWITCHING_PROTOCOLS);

    Ok(stream)
}

/// Connect a client and wait until the bridge knows about it.
pub async fn connect_attached(bridge: &Bridge, port: u16) -> Result<Client> {
    let before = bridge.client_count();
    let client = connect(port).await?;

    wait_until(|| bridge.client_count() > before).await?;

    Ok(client)
}

pub async fn wait_until<F: Fn() -> bool>(condition: F) -> Result<()> {
    timeout(TIMEOUT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    Ok(())
}

pub async fn send(client: &mut Client, text: &str) -> Result<()> {
    client
        .send(tungstenite::Message::Text(text.to_owned()))
        .await?;

    Ok(())
}

pub async fn receive(client: &mut Client) -> Result<String> {
    loop {
        let message = timeout(TIMEOUT, client.next())
            .await?
            .ok_or_else(|| color_eyre::eyre::eyre!("Stream closed"))??;

        match message {
            tungstenite::Message::Text(text) => return Ok(text),
            tungstenite::Message::Close(_) => {
                return Err(color_eyre::eyre::eyre!("Server closed the socket"))
            }
            _ => continue,
        }
    }
}

/// True if nothing arrives on the socket during `wait`.
pub async fn is_silent(client: &mut Client, wait: Duration) -> bool {
    timeout(wait, client.next()).await.is_err()
}

/// A plain HTTP GET, returning the body.
pub async fn http_get(port: u16, path: &str) -> Result<String> {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await?;

    stream
        .write_all(
            format!("GET {path} HTTP/1.1\r\nHost: 127.0.0.1\r\nConnection: close\r\n\r\n")
                .as_bytes(),
        )
        .await?;

    let mut response = String::new();
    timeout(TIMEOUT, stream.read_to_string(&mut response)).await??;

    let (head, body) = response
        .split_once("\r\n\r\n")
        .ok_or_else(|| color_eyre::eyre::eyre!("No body in {response:?}"))?;
    assert!(head.starts_with("HTTP/1.1 200"), "{head}");

    Ok(body.to_owned())
}
