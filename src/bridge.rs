use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    command::Command,
    config::Config,
    error::Error,
    registry::{ClientId, ConnectionRegistry},
    serial::{PortInfo, Ports},
    session::{DeviceSession, SessionConfig},
};

/// What the bridge reports about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Is a serial port open.
    pub is_connected: bool,

    /// The open port, or empty.
    pub connected_port: String,

    /// The baud rate last asked for.
    pub connected_baud: u32,

    /// The serial ports on this machine.
    pub port_list: Vec<PortInfo>,
}

impl Status {
    /// An example status with a connected port.
    pub fn example() -> Self {
        Self {
            is_connected: true,
            connected_port: "/dev/ttyUSB0".into(),
            connected_baud: 115_200,
            port_list: vec![PortInfo {
                desc: Some("FTDI FT232R USB UART".into()),
                hwid: Some("USB VID:PID=0403:6001 SER=FT0TCWAS".into()),
                ..PortInfo::new("/dev/ttyUSB0")
            }],
        }
    }
}

/// Ties clients to the serial device.
///
/// Messages from any client go to the device,
/// and lines from the device go to every client.
///
/// Cloning gives another handle to the same bridge.
#[derive(Debug, Clone)]
pub struct Bridge {
    session: DeviceSession,
    registry: ConnectionRegistry,
    ports: Arc<dyn Ports>,
}

impl Bridge {
    /// A bridge which opens ports from `ports`.
    /// Nothing is connected yet.
    ///
    /// Fails if the configuration does not validate.
    pub fn new(config: &Config, ports: Arc<dyn Ports>) -> Result<Self, Error> {
        config.validate()?;

        let registry = ConnectionRegistry::new(config.client_buffer);
        let session = DeviceSession::new(
            SessionConfig::try_from(config)?,
            Arc::clone(&ports),
            registry.clone(),
        );

        Ok(Self {
            session,
            registry,
            ports,
        })
    }

    /// Connect to [`Config::connect_on_start`], if given.
    ///
    /// A failure is logged, the bridge stays usable.
    pub async fn connect_on_start(&self, config: &Config) {
        let Some(target) = &config.connect_on_start else {
            return;
        };

        let baud = target.baud.unwrap_or(config.default_baud);
        info!(port = %target.port, %baud, "Connecting on start");

        if let Err(e) = self.session.connect(&target.port, baud).await {
            warn!(%e, "Could not connect on start, waiting for clients to connect");
        }
    }

    /// A client arrived.
    /// Device output for it is put on the returned queue.
    pub fn attach(&self) -> (ClientId, mpsc::Receiver<String>) {
        let (id, rx) = self.registry.attach();
        info!(%id, clients = self.registry.len(), "Client attached");

        (id, rx)
    }

    /// A client left.
    pub fn detach(&self, id: ClientId) {
        self.registry.unregister(id);
        info!(%id, clients = self.registry.len(), "Client detached");
    }

    /// Handle a message from a client.
    pub async fn handle_inbound_message(&self, raw: &str) -> Result<(), Error> {
        Command::parse(raw)?.dispatch(&self.session).await
    }

    /// What the bridge is up to.
    ///
    /// A failure to list ports gives an empty list.
    pub fn status(&self) -> Status {
        let state = self.session.state();

        let port_list = self.ports().unwrap_or_else(|e| {
            warn!(%e, "Could not list ports for status");
            vec![]
        });

        Status {
            is_connected: state.is_connected(),
            connected_port: state.port_path,
            connected_baud: state.baud,
            port_list,
        }
    }

    /// The serial ports on this machine.
    pub fn ports(&self) -> Result<Vec<PortInfo>, Error> {
        self.ports.list()
    }

    /// How many clients are attached.
    pub fn client_count(&self) -> usize {
        self.registry.len()
    }

    /// The device session.
    pub fn session(&self) -> &DeviceSession {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use tokio::time::timeout;

    use super::*;
    use crate::{config::WriteMode, mock::MockPorts};

    fn bridge(ports: &MockPorts) -> Bridge {
        let config = Config {
            write_mode: WriteMode::Bulk,
            ..Default::default()
        };

        Bridge::new(&config, Arc::new(ports.clone())).unwrap()
    }

    #[tokio::test]
    async fn connect_command_updates_status() {
        let ports = MockPorts::new(&["COM3", "COM4"]);
        let bridge = bridge(&ports);

        bridge
            .handle_inbound_message(r#"{"cmd":"serial_connect","port":"COM3","baud":9600}"#)
            .await
            .unwrap();

        let status = bridge.status();
        assert!(status.is_connected);
        assert_eq!(status.connected_port, "COM3");
        assert_eq!(status.connected_baud, 9600);
        assert_eq!(status.port_list, ports.list().unwrap());
    }

    #[tokio::test]
    async fn status_serializes_camel_case() {
        let ports = MockPorts::new(&["COM3"]);
        let bridge = bridge(&ports);

        let status = serde_json::to_value(bridge.status()).unwrap();

        assert_eq!(status["isConnected"], false);
        assert_eq!(status["connectedPort"], "");
        assert_eq!(status["connectedBaud"], 115_200);
        assert_eq!(status["portList"][0]["device"], "COM3");
    }

    #[tokio::test]
    async fn ping_without_connection() {
        let ports = MockPorts::new(&["COM3"]);
        let bridge = bridge(&ports);

        let result = bridge.handle_inbound_message("PING").await;

        assert_eq!(result, Err(Error::NotConnected));
        assert_eq!(ports.times_opened(), 0);
    }

    #[tokio::test]
    async fn invalid_connect_is_reported() {
        let ports = MockPorts::new(&["COM3"]);
        let bridge = bridge(&ports);

        let result = bridge
            .handle_inbound_message(r#"{"cmd":"serial_connect","port":"COM3"}"#)
            .await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(!bridge.status().is_connected);
    }

    #[tokio::test]
    async fn device_output_fans_out() {
        let ports = MockPorts::new(&["COM3"]);
        let bridge = bridge(&ports);

        let (_, mut rx_1) = bridge.attach();
        let (id_2, mut rx_2) = bridge.attach();
        assert_eq!(bridge.client_count(), 2);

        bridge.session().connect("COM3", 9600).await.unwrap();
        let mut device = ports.take_device("COM3").unwrap();

        device.emit("OK\n").await.unwrap();
        for rx in [&mut rx_1, &mut rx_2] {
            assert_eq!(timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap(), "OK");
        }

        bridge.detach(id_2);
        assert_eq!(bridge.client_count(), 1);

        device.emit("again\n").await.unwrap();
        assert_eq!(
            timeout(Duration::from_secs(5), rx_1.recv()).await.unwrap().unwrap(),
            "again"
        );
        assert_eq!(rx_2.recv().await, None);
    }

    #[test]
    fn bad_config_is_refused() {
        let ports = MockPorts::new(&["COM3"]);
        let config = Config {
            read_delimiter: '\u{10a}',
            ..Default::default()
        };

        let err = Bridge::new(&config, Arc::new(ports)).unwrap_err();

        assert!(matches!(err, Error::BadConfig(_)));
    }

    #[tokio::test]
    async fn connect_on_start() {
        let ports = MockPorts::new(&["COM3"]);
        let config = Config {
            connect_on_start: Some(crate::config::ConnectTarget {
                port: "COM3".into(),
                baud: None,
            }),
            ..Default::default()
        };
        let bridge = Bridge::new(&config, Arc::new(ports.clone())).unwrap();

        bridge.connect_on_start(&config).await;

        let status = bridge.status();
        assert!(status.is_connected);
        assert_eq!(status.connected_baud, config.default_baud);
    }

    #[tokio::test]
    async fn connect_on_start_failure_is_not_fatal() {
        let ports = MockPorts::new(&["COM3"]);
        let config = Config {
            connect_on_start: Some(crate::config::ConnectTarget {
                port: "COM9".into(),
                baud: Some(9600),
            }),
            ..Default::default()
        };
        let bridge = Bridge::new(&config, Arc::new(ports.clone())).unwrap();

        bridge.connect_on_start(&config).await;

        assert!(!bridge.status().is_connected);
    }
}
