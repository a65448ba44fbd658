//! The session with the serial device.
//!
//! There is at most one open port at any time.
//! While a port is open, a single reader task forwards every line the device
//! emits to the [`ConnectionRegistry`].
//!
//! All access to the open port goes through one lock:
//! connecting, disconnecting, writing, and the reader tearing the session down
//! after a device fault.

use std::{
    fmt::{Debug, Display},
    io,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::{codec::FramedRead, sync::CancellationToken};
use tracing::{debug, error, info, info_span, trace, warn, Instrument};

use crate::{
    config::Config,
    error::Error,
    registry::ConnectionRegistry,
    serial::{
        codecs::lines::LinesCodec, error::SerialPortError, Ports, SerialHandle, SerialMessage,
    },
};

/// Where in its lifecycle the session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkState {
    /// No port is open.
    Disconnected,

    /// A port is being opened.
    Connecting,

    /// A port is open and being read from.
    Connected,
}

impl Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkState::Disconnected => write!(f, "disconnected"),
            LinkState::Connecting => write!(f, "connecting"),
            LinkState::Connected => write!(f, "connected"),
        }
    }
}

/// A snapshot of the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    /// Lifecycle state.
    pub state: LinkState,

    /// The port in use. Empty unless connected (or connecting).
    pub port_path: String,

    /// The baud rate last asked for.
    pub baud: u32,
}

impl SessionState {
    /// True when a port is open.
    pub fn is_connected(&self) -> bool {
        self.state == LinkState::Connected
    }
}

/// The knobs of a [`DeviceSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wait this long after each written byte.
    /// `None` writes everything at once.
    pub write_delay: Option<Duration>,

    /// Appended to every write.
    pub line_terminator: Vec<u8>,

    /// Splits device output into lines.
    pub read_delimiter: u8,

    /// How long a disconnect waits for the reader to stop.
    pub reader_stop_timeout: Duration,

    /// Reported as the baud rate before anything connected.
    pub default_baud: u32,
}

impl TryFrom<&Config> for SessionConfig {
    type Error = Error;

    fn try_from(config: &Config) -> Result<Self, Self::Error> {
        Ok(Self {
            write_delay: config.write_delay(),
            line_terminator: config.line_terminator.clone().into_bytes(),
            read_delimiter: config.read_delimiter_byte()?,
            reader_stop_timeout: config.reader_stop_timeout(),
            default_baud: config.default_baud,
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        let config = Config::default();

        Self {
            write_delay: config.write_delay(),
            line_terminator: config.line_terminator.clone().into_bytes(),
            read_delimiter: b'\n',
            reader_stop_timeout: config.reader_stop_timeout(),
            default_baud: config.default_baud,
        }
    }
}

/// An open port and the reader bound to it.
struct Link {
    generation: u64,
    port_path: String,
    writer: WriteHalf<SerialHandle>,
    cancel: CancellationToken,
    reader: JoinHandle<()>,
}

/// Counts a reader task for as long as it lives.
struct ActiveReader(Arc<AtomicUsize>);

impl ActiveReader {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveReader {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct Shared {
    config: SessionConfig,
    ports: Arc<dyn Ports>,
    registry: ConnectionRegistry,
    link: Mutex<Option<Link>>,
    state: watch::Sender<SessionState>,
    generation: AtomicU64,
    active_readers: Arc<AtomicUsize>,
}

impl Shared {
    fn publish(&self, state: LinkState, port_path: &str, baud: u32) {
        self.state.send_replace(SessionState {
            state,
            port_path: port_path.into(),
            baud,
        });
    }

    fn publish_disconnected(&self) {
        self.state.send_modify(|state| {
            state.state = LinkState::Disconnected;
            state.port_path.clear();
        });
    }

    /// Close the link in the slot, if any.
    ///
    /// The reader is cancelled before it is waited for,
    /// so it never blocks on the lock the caller holds.
    async fn close(&self, slot: &mut Option<Link>) {
        let Some(Link {
            port_path,
            writer,
            cancel,
            reader,
            ..
        }) = slot.take()
        else {
            return;
        };

        info!(%port_path, "Disconnecting");

        cancel.cancel();
        drop(writer);

        match tokio::time::timeout(self.config.reader_stop_timeout, reader).await {
            Ok(Ok(())) => debug!("Reader stopped"),
            Ok(Err(e)) => warn!(?e, "Reader task join error"),
            Err(_) => warn!("Reader did not stop in time, it will finish on its own"),
        }

        self.publish_disconnected();
    }

    /// Called by a reader whose device failed.
    async fn reader_failed(&self, generation: u64, cancel: &CancellationToken) {
        let mut slot = tokio::select! {
            biased;

            // Whoever cancelled us holds the lock and is closing the link.
            _ = cancel.cancelled() => return,
            slot = self.link.lock() => slot,
        };

        match slot.take() {
            Some(link) if link.generation == generation => {
                warn!(port_path = %link.port_path, "Closing session after device fault");

                // Dropping our own join handle just detaches this task.
                drop(link);
                self.publish_disconnected();
            }
            other => *slot = other,
        }
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(link) = self.link.get_mut().take() {
            link.cancel.cancel();
        }
    }
}

async fn read_lines(
    shared: Weak<Shared>,
    registry: ConnectionRegistry,
    generation: u64,
    mut lines: FramedRead<ReadHalf<SerialHandle>, LinesCodec>,
    cancel: CancellationToken,
    _active: ActiveReader,
) {
    let fault = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Reader told to stop");
                return;
            }
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    let message = SerialMessage::new_lossy(line);
                    trace!("Message from port: `{message}`");

                    registry.broadcast(message.as_str());
                }
                Some(Err(e)) => break e,
                None => break SerialPortError::Disconnected,
            }
        }
    };

    error!(%fault, "Serial port error, exiting");
    drop(lines);

    if let Some(shared) = shared.upgrade() {
        shared.reader_failed(generation, &cancel).await;
    }
}

async fn write_paced<W>(writer: &mut W, bytes: &[u8], delay: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    for byte in bytes {
        writer.write_all(std::slice::from_ref(byte)).await?;
        writer.flush().await?;
        tokio::time::sleep(delay).await;
    }

    Ok(())
}

async fn write_bulk<W>(writer: &mut W, bytes: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(bytes).await?;
    writer.flush().await
}

/// The session with the serial device.
///
/// Cloning gives another handle to the same session.
#[derive(Clone)]
pub struct DeviceSession {
    shared: Arc<Shared>,
}

impl Debug for DeviceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceSession")
            .field("state", &*self.shared.state.borrow())
            .field("config", &self.shared.config)
            .field("ports", &self.shared.ports)
            .finish()
    }
}

impl DeviceSession {
    /// A disconnected session.
    /// Lines read from the device will be broadcast on the given registry.
    pub fn new(config: SessionConfig, ports: Arc<dyn Ports>, registry: ConnectionRegistry) -> Self {
        let (state, _) = watch::channel(SessionState {
            state: LinkState::Disconnected,
            port_path: String::new(),
            baud: config.default_baud,
        });

        Self {
            shared: Arc::new(Shared {
                config,
                ports,
                registry,
                link: Mutex::new(None),
                state,
                generation: AtomicU64::new(0),
                active_readers: Arc::default(),
            }),
        }
    }

    /// Open the given port and start reading from it.
    ///
    /// An already open port is fully closed first.
    /// If opening fails, the session is left disconnected.
    pub async fn connect(&self, port: &str, baud: u32) -> Result<(), Error> {
        let mut slot = self.shared.link.lock().await;

        self.shared.close(&mut slot).await;
        self.shared.publish(LinkState::Connecting, port, baud);

        let handle = match self.shared.ports.open(port, baud) {
            Ok(handle) => handle,
            Err(e) => {
                warn!(%port, %baud, %e, "Could not connect");
                self.shared.publish_disconnected();
                return Err(e);
            }
        };

        let (reader, writer) = tokio::io::split(handle);
        let lines = FramedRead::new(reader, LinesCodec::new(self.shared.config.read_delimiter));

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        let reader = tokio::spawn(
            read_lines(
                Arc::downgrade(&self.shared),
                self.shared.registry.clone(),
                generation,
                lines,
                cancel.clone(),
                ActiveReader::new(&self.shared.active_readers),
            )
            .instrument(info_span!("tty", %port)),
        );

        *slot = Some(Link {
            generation,
            port_path: port.into(),
            writer,
            cancel,
            reader,
        });

        self.shared.publish(LinkState::Connected, port, baud);
        info!(%port, %baud, "Connected");

        Ok(())
    }

    /// Close the port, if open.
    pub async fn disconnect(&self) {
        let mut slot = self.shared.link.lock().await;

        if slot.is_none() {
            debug!("Already disconnected");
            return;
        }

        self.shared.close(&mut slot).await;
    }

    /// Write the payload followed by the line terminator.
    ///
    /// Depending on configuration the bytes are paced, see [`SessionConfig::write_delay`].
    /// Other session operations wait until the write is done.
    pub async fn write(&self, payload: &str) -> Result<(), Error> {
        let mut slot = self.shared.link.lock().await;

        let Some(link) = slot.as_mut() else {
            warn!(message = %SerialMessage::from(payload), "Not connected, dropping write");
            return Err(Error::NotConnected);
        };

        let mut bytes = payload.as_bytes().to_vec();
        bytes.extend_from_slice(&self.shared.config.line_terminator);

        let written = match self.shared.config.write_delay {
            Some(delay) => write_paced(&mut link.writer, &bytes, delay).await,
            None => write_bulk(&mut link.writer, &bytes).await,
        };

        if let Err(e) = written {
            error!(?e, "Serial port error in write, closing session");
            self.shared.close(&mut slot).await;

            return Err(SerialPortError::from(e).into());
        }

        trace!("Wrote {} byte(s)", bytes.len());
        Ok(())
    }

    /// A snapshot of the current state.
    pub fn state(&self) -> SessionState {
        self.shared.state.borrow().clone()
    }

    /// True when a port is open.
    pub fn is_connected(&self) -> bool {
        self.shared.state.borrow().is_connected()
    }

    /// Get notified when the state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// How many reader tasks are alive.
    pub fn active_readers(&self) -> usize {
        self.shared.active_readers.load(Ordering::SeqCst)
    }
}
