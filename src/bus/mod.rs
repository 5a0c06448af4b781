// Byte-level bus backends for the motor board
//
// Provides:
// - Linux I2C character device access (the real boards)
// - Serial port access for boards behind a USB-serial bridge
// - An in-process simulated board for testing without hardware

#[cfg(target_os = "linux")]
pub mod i2c;
pub mod serial;
pub mod sim;

#[cfg(target_os = "linux")]
pub use i2c::I2cBus;
pub use serial::SerialBus;
pub use sim::SimBus;

/// A raw byte pipe to a single device on the bus.
///
/// The bus carries no framing of its own: one `write` is one transaction and
/// one `read` returns exactly `buf.len()` bytes or fails.
pub trait Bus: Send {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<()>;
}
