use std::fmt::{Debug, Display};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Error;

/// Serial port related errors.
pub(crate) mod error;

/// Opening and listing real serial ports.
pub mod serial_port;

/// Codecs for decoding messages from wire.
pub(crate) mod codecs;

/// The message data type used for serial.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Deserialize, Serialize)]
pub struct SerialMessage(String);

impl SerialMessage {
    /// Create a serial message from bytes, ignoring any bad utf8 bytes.
    pub fn new_lossy<B: AsRef<[u8]>>(bytes: B) -> Self {
        Self(String::from_utf8_lossy(bytes.as_ref()).to_string())
    }

    /// Borrowed form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<T: AsRef<str>> From<T> for SerialMessage {
    fn from(string_like: T) -> Self {
        Self(string_like.as_ref().into())
    }
}

impl Display for SerialMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = self.0.chars().take(48).collect::<String>();

        write!(f, "{}", s.trim())
    }
}

/// The message data type used for serial bytes.
pub type SerialMessageBytes = Vec<u8>;

/// Anything which behaves like an open serial port.
pub trait SerialIo: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> SerialIo for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An open, exclusively owned serial device.
pub type SerialHandle = Box<dyn SerialIo>;

/// Information about a serial port available on the host.
///
/// Every field is optional since platforms differ in what they report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortInfo {
    /// The path used to open the port, e.g. `/dev/ttyUSB0` or `COM3`.
    pub device: Option<String>,

    /// A short name for the port.
    pub name: Option<String>,

    /// A human readable description.
    pub desc: Option<String>,

    /// Hardware identification, e.g. `USB VID:PID=0403:6001 SER=FT0TCWAS`.
    pub hwid: Option<String>,

    /// Where the device is physically attached, if known.
    pub location: Option<String>,

    /// The interface of a composite device, if known.
    pub interface: Option<String>,
}

impl PortInfo {
    /// Port info where only the device path is known.
    pub fn new(device: &str) -> Self {
        Self {
            device: Some(device.into()),
            name: device.rsplit(['/', '\\']).next().map(Into::into),
            ..Default::default()
        }
    }
}

/// Where serial ports come from.
///
/// The system implementation is [`serial_port::SystemPorts`].
/// Tests use [`crate::mock::MockPorts`].
pub trait Ports: Send + Sync + Debug {
    /// Open the port at `path` with the given baud rate.
    fn open(&self, path: &str, baud: u32) -> Result<SerialHandle, Error>;

    /// List the ports currently available.
    fn list(&self) -> Result<Vec<PortInfo>, Error>;
}
