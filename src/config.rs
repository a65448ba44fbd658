use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The default port to run the server on.
pub const DEFAULT_LISTEN_PORT: u16 = 8000;

/// The baud rate used when nothing else is said.
pub const DEFAULT_BAUD: u32 = 115_200;

/// How writes are put on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteMode {
    /// Write a single byte at a time, waiting between each.
    /// Needed by devices with small input buffers.
    Paced {
        /// The wait after each byte, in milliseconds.
        delay_ms: u64,
    },

    /// Write everything at once.
    Bulk,
}

impl Default for WriteMode {
    fn default() -> Self {
        Self::Paced { delay_ms: 25 }
    }
}

/// A port to connect to as soon as the server starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectTarget {
    /// The path to the port.
    /// Likely "/dev/ttyUSBx" or "COMx".
    pub port: String,

    /// The baud rate. Uses [`Config::default_baud`] if not given.
    #[serde(default)]
    pub baud: Option<u32>,
}

/// The configuration used for running the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which TCP port the server listens on.
    pub listen_port: u16,

    /// Baud rate reported before anything has connected,
    /// and used by [`Config::connect_on_start`] when it has no baud.
    pub default_baud: u32,

    /// How writes are put on the wire.
    pub write_mode: WriteMode,

    /// Appended to every write.
    pub line_terminator: String,

    /// Splits the device output into lines.
    /// Must be ASCII.
    pub read_delimiter: char,

    /// How many lines may be queued for a single client before
    /// the client is considered too slow and is dropped.
    pub client_buffer: usize,

    /// How long a disconnect waits for the reader task to stop.
    pub reader_stop_timeout_ms: u64,

    /// Connect to this port when starting up.
    pub connect_on_start: Option<ConnectTarget>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: DEFAULT_LISTEN_PORT,
            default_baud: DEFAULT_BAUD,
            write_mode: WriteMode::default(),
            line_terminator: "\r\n".into(),
            read_delimiter: '\n',
            client_buffer: 1024,
            reader_stop_timeout_ms: 500,
            connect_on_start: None,
        }
    }
}

impl Config {
    fn ron() -> ron::Options {
        ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .with_default_extension(ron::extensions::Extensions::UNWRAP_NEWTYPES)
    }

    /// Deserialize a .ron file's contents.
    pub fn deserialize(input: &str) -> Result<Self, Error> {
        Self::ron()
            .from_str::<Config>(input)
            .map_err(|e| Error::BadConfig(format!("Could not parse configuration: {e}")))
    }

    /// An example configuration with some fields filled in.
    pub fn example() -> Self {
        Self {
            write_mode: WriteMode::Paced { delay_ms: 10 },
            connect_on_start: Some(ConnectTarget {
                port: "/dev/ttyUSB0".into(),
                baud: Some(9600),
            }),
            ..Default::default()
        }
    }

    /// Serialize the configuration in a "pretty" (i.e. non-compact) fashion.
    pub fn serialize_pretty(&self) -> Result<String, Error> {
        Self::ron()
            .to_string_pretty(self, ron::ser::PrettyConfig::default())
            .map_err(|e| Error::BadConfig(e.to_string()))
    }

    /// Setup a new configuration from a RON file.
    pub fn new_from_path<P: AsRef<Path>>(p: P) -> Result<Self, Error> {
        let path = p.as_ref();
        let s = std::fs::read_to_string(path)
            .map_err(|e| Error::BadConfig(format!("Could not read {path:?}: {e}")))?;

        Self::deserialize(&s)
    }

    /// The delay between paced bytes, or `None` when writing in bulk.
    pub fn write_delay(&self) -> Option<Duration> {
        match self.write_mode {
            WriteMode::Paced { delay_ms } => Some(Duration::from_millis(delay_ms)),
            WriteMode::Bulk => None,
        }
    }

    /// See [`Config::reader_stop_timeout_ms`].
    pub fn reader_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.reader_stop_timeout_ms)
    }

    /// The read delimiter as a byte.
    pub fn read_delimiter_byte(&self) -> Result<u8, Error> {
        u8::try_from(self.read_delimiter)
            .ok()
            .filter(u8::is_ascii)
            .ok_or_else(|| {
                Error::BadConfig(format!(
                    "The read delimiter must be ASCII, got `{}`",
                    self.read_delimiter.escape_default()
                ))
            })
    }

    fn check_baud(&self) -> Result<(), Error> {
        if self.default_baud == 0 {
            return Err(Error::BadConfig("The default baud rate must be positive".into()));
        }

        match &self.connect_on_start {
            Some(ConnectTarget { baud: Some(0), port }) => Err(Error::BadConfig(format!(
                "The baud rate for connecting to `{port}` on start must be positive"
            ))),
            Some(ConnectTarget { port, .. }) if port.is_empty() => Err(Error::BadConfig(
                "The port to connect to on start is empty".into(),
            )),
            _ => Ok(()),
        }
    }

    fn check_delimiter(&self) -> Result<(), Error> {
        self.read_delimiter_byte().map(|_| ())
    }

    fn check_client_buffer(&self) -> Result<(), Error> {
        if self.client_buffer == 0 {
            Err(Error::BadConfig(
                "Clients need room for at least one queued line".into(),
            ))
        } else {
            Ok(())
        }
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), Error> {
        self.check_baud()?;
        self.check_delimiter()?;
        self.check_client_buffer()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn serialize() {
        let c = Config::example();

        println!("{}", c.serialize_pretty().unwrap());
    }

    #[test]
    fn example_survives_serialization() {
        let c = Config::example();
        let s = c.serialize_pretty().unwrap();

        assert_eq!(Config::deserialize(&s).unwrap(), c);
    }

    #[test]
    fn deserialize() {
        let input = r#"
(
    listen_port: 9000,
    write_mode: Bulk,
    line_terminator: "\n",
    read_delimiter: '\r',
    connect_on_start: (
        port: "COM3",
    ),
)
"#;
        let config = Config::deserialize(input).unwrap();

        assert_eq!(config.listen_port, 9000);
        assert_eq!(config.write_mode, WriteMode::Bulk);
        assert_eq!(config.write_delay(), None);
        assert_eq!(config.read_delimiter_byte(), Ok(b'\r'));
        assert_eq!(
            config.connect_on_start,
            Some(ConnectTarget {
                port: "COM3".into(),
                baud: None
            })
        );

        // Omitted fields fall back to defaults.
        assert_eq!(config.default_baud, DEFAULT_BAUD);
        assert_eq!(config.client_buffer, 1024);
        config.validate().unwrap();
    }

    #[test]
    fn paced_by_default() {
        let config = Config::deserialize("()").unwrap();

        assert_eq!(config.write_delay(), Some(Duration::from_millis(25)));
        assert_eq!(config.line_terminator, "\r\n");
    }

    #[test]
    fn garbage_is_bad_config() {
        let err = Config::deserialize("(listen_port: \"nope\")").unwrap_err();

        assert!(matches!(err, Error::BadConfig(_)));
    }

    #[test]
    fn bad_config_delimiter() {
        let c = Config {
            read_delimiter: 'ø',
            ..Default::default()
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        assert!(err.contains("ASCII"));
        assert!(c.read_delimiter_byte().is_err());

        // Would truncate to b'\n' if cast.
        let c = Config {
            read_delimiter: '\u{10a}',
            ..Default::default()
        };
        assert!(matches!(c.read_delimiter_byte(), Err(Error::BadConfig(_))));
    }

    #[test]
    fn bad_config_zero_baud() {
        let c = Config {
            connect_on_start: Some(ConnectTarget {
                port: "COM1".into(),
                baud: Some(0),
            }),
            ..Default::default()
        };

        let err = c.validate().unwrap_err().try_into_bad_config().unwrap();

        // Error message mentions the port
        assert!(err.contains("COM1"));
    }

    #[test]
    fn bad_config_client_buffer() {
        let c = Config {
            client_buffer: 0,
            ..Default::default()
        };

        assert!(matches!(c.validate(), Err(Error::BadConfig(_))));
    }
}
