use std::fmt::Display;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::{error::Error, serial::SerialMessage, session::DeviceSession};

/// The `cmd` value asking the bridge to open a port.
pub const SERIAL_CONNECT: &str = "serial_connect";

/// The `cmd` value asking the bridge to close the port.
pub const SERIAL_DISCONNECT: &str = "serial_disconnect";

/// A message from a client, parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    /// Open the given port.
    /// Any open port is closed first.
    Connect {
        /// Path to the port.
        port: String,

        /// Baud rate.
        baud: u32,
    },

    /// Close the port.
    Disconnect,

    /// Write this to the device, as is.
    Passthrough {
        /// What to write. The line terminator is added when writing.
        payload: String,
    },
}

impl Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect { port, baud } => write!(f, "connect: {port} @ {baud}"),
            Command::Disconnect => write!(f, "disconnect"),
            Command::Passthrough { payload } => {
                write!(f, "passthrough: {}", SerialMessage::from(payload))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConnectArgs {
    port: String,
    baud: u32,
}

fn connect_from(object: Map<String, Value>) -> Result<Command, Error> {
    let ConnectArgs { port, baud } = serde_json::from_value(Value::Object(object))
        .map_err(|e| Error::Validation(format!("{SERIAL_CONNECT} needs `port` and `baud`: {e}")))?;

    if port.is_empty() {
        return Err(Error::Validation(format!(
            "{SERIAL_CONNECT} needs a non-empty `port`"
        )));
    }

    if baud == 0 {
        return Err(Error::Validation(format!(
            "{SERIAL_CONNECT} needs a positive `baud`"
        )));
    }

    Ok(Command::Connect { port, baud })
}

impl Command {
    /// Parse a message from a client.
    ///
    /// Anything which is not a JSON object is passed through untouched.
    /// JSON objects are passed through re-serialized, unless their `cmd`
    /// names something the bridge handles itself.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let object = match serde_json::from_str::<Value>(raw) {
            Ok(Value::Object(object)) => object,
            Ok(_) => {
                debug!("JSON but not an object, passing through");
                return Ok(Self::passthrough(raw));
            }
            Err(e) => {
                debug!(%e, "Not JSON, passing through");
                return Ok(Self::passthrough(raw));
            }
        };

        let name = object.get("cmd").and_then(Value::as_str).map(str::to_owned);

        match name.as_deref() {
            Some(SERIAL_CONNECT) => connect_from(object),
            Some(SERIAL_DISCONNECT) => Ok(Self::Disconnect),
            _ => {
                let payload = serde_json::to_string(&Value::Object(object))
                    .map_err(|e| Error::Validation(e.to_string()))?;

                Ok(Self::Passthrough { payload })
            }
        }
    }

    /// Write this payload as is.
    pub fn passthrough(payload: &str) -> Self {
        Self::Passthrough {
            payload: payload.into(),
        }
    }

    /// The JSON a client sends to connect.
    pub fn example_connect() -> Value {
        serde_json::json!({ "cmd": SERIAL_CONNECT, "port": "/dev/ttyUSB0", "baud": 115_200 })
    }

    /// The JSON a client sends to disconnect.
    pub fn example_disconnect() -> Value {
        serde_json::json!({ "cmd": SERIAL_DISCONNECT })
    }

    /// Carry out the command on the session.
    pub async fn dispatch(self, session: &DeviceSession) -> Result<(), Error> {
        info!("client requested command: {self}");

        match self {
            Command::Connect { port, baud } => session.connect(&port, baud).await,
            Command::Disconnect => {
                session.disconnect().await;
                Ok(())
            }
            Command::Passthrough { payload } => session.write(&payload).await,
        }
    }
}
