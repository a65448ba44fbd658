//! A mock, useful to test serial port functionality without the actual serial ports.
//!
//! Opening a mock port creates an in-memory pipe.
//! The bridge gets one end, just like a real serial port.
//! The other end is a [`MockDevice`], which tests use to play the part of the hardware.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    io,
    pin::Pin,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
    task::{Context, Poll},
    time::Duration,
};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream, ReadBuf};
use tracing::{debug, info};

use crate::{
    error::Error,
    serial::{PortInfo, Ports, SerialHandle},
};

const PIPE_SIZE: usize = 4096;

#[derive(Debug)]
struct OpenGuard(Arc<AtomicUsize>);

impl OpenGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The bridge's end of a mock port.
#[derive(Debug)]
struct MockSerial {
    stream: DuplexStream,
    _open: OpenGuard,
}

impl AsyncRead for MockSerial {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for MockSerial {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}

/// The hardware end of a mock port.
#[derive(Debug)]
pub struct MockDevice {
    path: String,
    stream: DuplexStream,
}

impl MockDevice {
    /// Which port this device sits behind.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Send bytes towards the bridge, as if the device printed them.
    pub async fn emit<B: AsRef<[u8]>>(&mut self, bytes: B) -> io::Result<()> {
        self.stream.write_all(bytes.as_ref()).await?;
        self.stream.flush().await
    }

    /// Read exactly `len` bytes the bridge wrote.
    pub async fn read_bytes(&mut self, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// Read what the bridge wrote up to and including `terminator`.
    /// The terminator is not returned.
    pub async fn read_line(&mut self, terminator: &[u8]) -> io::Result<Vec<u8>> {
        let mut line = vec![];

        loop {
            line.push(self.stream.read_u8().await?);

            if line.ends_with(terminator) {
                break;
            }
        }

        line.truncate(line.len() - terminator.len());
        Ok(line)
    }

    /// True if the bridge writes nothing during `wait`.
    /// A closed port is quiet too.
    pub async fn is_quiet(&mut self, wait: Duration) -> bool {
        !matches!(
            tokio::time::timeout(wait, self.stream.read_u8()).await,
            Ok(Ok(_))
        )
    }

    /// Pull the plug.
    pub fn unplug(self) {
        info!(path = %self.path, "Unplugging mock device");
    }
}

#[derive(Debug, Default)]
struct Inner {
    known: BTreeMap<String, PortInfo>,
    devices: HashMap<String, VecDeque<MockDevice>>,
    times_opened: usize,
}

/// Mock serial ports.
///
/// Cloning gives another handle to the same set of ports.
#[derive(Debug, Clone, Default)]
pub struct MockPorts {
    inner: Arc<Mutex<Inner>>,
    open_handles: Arc<AtomicUsize>,
}

impl MockPorts {
    /// Mock ports with the given names.
    pub fn new<S: AsRef<str>>(names: &[S]) -> Self {
        let ports = Self::default();
        for name in names {
            ports.add_port(name.as_ref());
        }
        ports
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make a port available.
    pub fn add_port(&self, name: &str) {
        let info = PortInfo {
            desc: Some(format!("Mock port {name}")),
            hwid: Some("MOCK".into()),
            ..PortInfo::new(name)
        };
        self.inner().known.insert(name.into(), info);
    }

    /// Make a port unavailable.
    /// Ports already open stay open.
    pub fn remove_port(&self, name: &str) {
        self.inner().known.remove(name);
    }

    /// How many mock ports are open right now.
    pub fn open_handles(&self) -> usize {
        self.open_handles.load(Ordering::SeqCst)
    }

    /// How many times any port was opened successfully.
    pub fn times_opened(&self) -> usize {
        self.inner().times_opened
    }

    /// Take the device side of the oldest not yet taken opening of `path`.
    pub fn take_device(&self, path: &str) -> Option<MockDevice> {
        self.inner().devices.get_mut(path)?.pop_front()
    }
}

impl Ports for MockPorts {
    fn open(&self, path: &str, baud: u32) -> Result<SerialHandle, Error> {
        let mut inner = self.inner();

        if !inner.known.contains_key(path) {
            return Err(Error::device_open(path, "No such mock port"));
        }

        debug!(%path, %baud, "Opening mock port");

        let (bridge_side, device_side) = tokio::io::duplex(PIPE_SIZE);

        inner.times_opened += 1;
        inner
            .devices
            .entry(path.into())
            .or_default()
            .push_back(MockDevice {
                path: path.into(),
                stream: device_side,
            });

        Ok(Box::new(MockSerial {
            stream: bridge_side,
            _open: OpenGuard::new(&self.open_handles),
        }))
    }

    fn list(&self) -> Result<Vec<PortInfo>, Error> {
        Ok(self.inner().known.values().cloned().collect())
    }
}
