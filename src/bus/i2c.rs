// Linux I2C character device (/dev/i2c-N)
//
// The device node is opened once and bound to the board's address with the
// I2C_SLAVE ioctl; after that plain read/write calls become bus transactions.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::path::PathBuf;

use tracing::debug;

use super::Bus;

/// ioctl request binding a file descriptor to a slave address
const I2C_SLAVE: u16 = 0x0703;

/// I2C bus handle bound to one device address
pub struct I2cBus {
    file: File,
    address: u8,
}

impl I2cBus {
    /// Open `/dev/i2c-<bus_number>` and bind it to `address`
    pub fn open(bus_number: u8, address: u8) -> std::io::Result<Self> {
        let path = PathBuf::from(format!("/dev/i2c-{}", bus_number));
        let file = OpenOptions::new().read(true).write(true).open(&path)?;

        // SAFETY: `file` is an open descriptor owned by this struct and
        // I2C_SLAVE takes the address by value.
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), I2C_SLAVE as _, address as libc::c_ulong) };
        if rc < 0 {
            return Err(std::io::Error::last_os_error());
        }

        debug!("Bound {} to address 0x{:02X}", path.display(), address);
        Ok(Self { file, address })
    }

    pub fn address(&self) -> u8 {
        self.address
    }
}

impl Bus for I2cBus {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        // A short write would split the command across two transactions
        let written = self.file.write(bytes)?;
        if written != bytes.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                format!("short I2C write: {} of {} bytes", written, bytes.len()),
            ));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let read = self.file.read(buf)?;
        if read != buf.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("short I2C read: {} of {} bytes", read, buf.len()),
            ));
        }
        Ok(())
    }
}
