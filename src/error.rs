use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors thay may occur in this library.
#[derive(Debug, Error, Serialize, Deserialize, PartialEq, Eq, Clone)]
pub enum Error {
    /// A structured command was missing required fields,
    /// or the fields had the wrong shape.
    #[error("The command was not valid. Problem: `{0}`")]
    Validation(String),

    /// The serial device could not be opened.
    #[error("Could not open port `{port}`. Problem: {problem}")]
    DeviceOpen {
        /// The port we tried to open.
        port: String,

        /// Why opening failed.
        problem: String,
    },

    /// Reading from or writing to an open device failed.
    /// The session is torn down when this happens.
    #[error("Serial device I/O failed: {0}")]
    DeviceIo(String),

    /// A write was requested, but no device is connected.
    #[error("No serial device is connected")]
    NotConnected,

    /// The configuration is not usable.
    #[error("Bad configuration: {0}")]
    BadConfig(String),

    /// The operating system could not list serial ports.
    #[error("Could not list serial ports: {0}")]
    PortListing(String),

    /// The server stopped with an error.
    #[error("Server problem: {0}")]
    Server(String),
}

impl Error {
    pub(crate) fn device_open(port: &str, problem: impl ToString) -> Self {
        Self::DeviceOpen {
            port: port.into(),
            problem: problem.to_string(),
        }
    }

    /// Returns the inner message if this is a [`Error::BadConfig`].
    pub fn try_into_bad_config(self) -> Result<String, Self> {
        if let Self::BadConfig(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }

    /// Returns the inner message if this is a [`Error::Validation`].
    pub fn try_into_validation(self) -> Result<String, Self> {
        if let Self::Validation(v) = self {
            Ok(v)
        } else {
            Err(self)
        }
    }
}
