use itertools::Itertools;
use serialport::{SerialPortInfo, SerialPortType};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tracing::{debug, info};

use crate::{
    error::Error,
    serial::{PortInfo, Ports, SerialHandle},
};

fn try_create_serial_port(path: &str, baud: u32) -> Result<SerialStream, Error> {
    tokio_serial::new(path, baud)
        .data_bits(tokio_serial::DataBits::Eight)
        .parity(tokio_serial::Parity::None)
        .stop_bits(tokio_serial::StopBits::One)
        .flow_control(tokio_serial::FlowControl::None)
        .open_native_async()
        .map_err(|e| Error::device_open(path, format!("{e:#?}")))
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let mut port = PortInfo::new(&info.port_name);

        match info.port_type {
            SerialPortType::UsbPort(usb) => {
                let mut hwid = format!("USB VID:PID={:04X}:{:04X}", usb.vid, usb.pid);
                if let Some(serial_number) = &usb.serial_number {
                    hwid += &format!(" SER={serial_number}");
                }

                port.desc = match (&usb.manufacturer, &usb.product) {
                    (Some(manufacturer), Some(product)) => Some(format!("{manufacturer} {product}")),
                    (None, Some(product)) => Some(product.clone()),
                    (Some(manufacturer), None) => Some(manufacturer.clone()),
                    (None, None) => None,
                };
                port.hwid = Some(hwid);
                port.interface = usb.product;
            }
            SerialPortType::PciPort => {
                port.desc = Some("PCI serial port".into());
                port.hwid = Some("PCI".into());
            }
            SerialPortType::BluetoothPort => {
                port.desc = Some("Bluetooth serial port".into());
                port.hwid = Some("BLUETOOTH".into());
            }
            SerialPortType::Unknown => {
                port.hwid = Some("n/a".into());
            }
        }

        port
    }
}

/// The serial ports of the host machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl Ports for SystemPorts {
    fn open(&self, path: &str, baud: u32) -> Result<SerialHandle, Error> {
        info!(%path, %baud, "Opening serial port");

        let stream = try_create_serial_port(path, baud)?;

        Ok(Box::new(stream))
    }

    fn list(&self) -> Result<Vec<PortInfo>, Error> {
        let available =
            tokio_serial::available_ports().map_err(|e| Error::PortListing(e.to_string()))?;

        if available.is_empty() {
            debug!("No serial ports available");
        }

        // The same port may be enumerated more than once.
        Ok(available
            .into_iter()
            .sorted_by(|a, b| a.port_name.cmp(&b.port_name))
            .unique_by(|info| info.port_name.clone())
            .map(Into::into)
            .collect())
    }
}
