use std::io;

use thiserror::Error;

use crate::error::Error;

/// Errors on the wire, below the session.
#[derive(Debug, Error)]
pub enum SerialPortError {
    /// IO related errors.
    #[error("Underlying IO problem: {0}")]
    IO(#[from] io::Error),

    /// The device stopped producing data, likely unplugged.
    #[error("Serial port disconnected")]
    Disconnected,
}

impl From<SerialPortError> for Error {
    fn from(e: SerialPortError) -> Self {
        Error::DeviceIo(e.to_string())
    }
}
