// Serial port backend, for boards reached through a USB-serial bridge

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;

use super::Bus;

/// Default serial configuration for the bridge
pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

pub struct SerialBus {
    port: Box<dyn SerialPort>,
}

impl SerialBus {
    /// Open the serial bridge
    pub fn open(port_name: &str) -> Result<Self, serialport::Error> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    /// Open with custom baudrate
    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }
}

impl Bus for SerialBus {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        self.port.read_exact(buf)
    }
}
