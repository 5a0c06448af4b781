// Startup parameters: bus, power limits, watchdog, camera, request surface
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::camera::{CameraConfig, Orientation};
use crate::dispatch::{DriveLayout, Polarity, PowerLimits};

// Bus defaults (PicoBorg Reverse on the Raspberry Pi's I2C bus 1)
pub const DEFAULT_I2C_BUS: u8 = 1;
pub const DEFAULT_SERIAL_PORT: &str = "/dev/ttyUSB0";

// Power settings: battery pack voltage and the motors' rated voltage,
// limited to 95% so the Pi keeps uninterrupted power
pub const DEFAULT_BATTERY_VOLTAGE: f32 = 12.0;
pub const DEFAULT_RATED_VOLTAGE: f32 = 12.0 * 0.95;

// Command timeout for watchdog
pub const DEFAULT_WATCHDOG_MS: u64 = 1000;

// Camera
pub const DEFAULT_WIDTH: u32 = 240;
pub const DEFAULT_HEIGHT: u32 = 192;
pub const DEFAULT_FRAME_RATE: u32 = 30;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

// Zenoh key prefix; requests arrive on <prefix>/**
pub const DEFAULT_KEY_PREFIX: &str = "borg";
pub const HEALTH_SUFFIX: &str = "state/health";

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum BusKind {
    /// Linux I2C character device
    I2c,
    /// USB-serial bridge
    Serial,
    /// In-process simulated board (no hardware)
    Sim,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum CameraKind {
    /// Generated test pattern (no camera)
    TestPattern,
    /// Raw RGB24 stream from a file or FIFO (`--camera-path`)
    File,
    /// Raw RGB24 stream from a command's stdout (`--camera-command`)
    Command,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

fn parse_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|e| format!("invalid I2C address {:?}: {}", s, e))
}

/// Robot runtime: motor control, watchdog and live camera over zenoh
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Args {
    /// Bus backend used to reach the motor board
    #[arg(long, value_enum, env = "BORG_BUS", default_value_t = BusKind::I2c)]
    pub bus: BusKind,

    /// I2C bus number (/dev/i2c-N)
    #[arg(long, env = "BORG_I2C_BUS", default_value_t = DEFAULT_I2C_BUS)]
    pub i2c_bus: u8,

    /// Board I2C address, decimal or 0x-prefixed hex
    #[arg(long, env = "BORG_I2C_ADDRESS", value_parser = parse_address, default_value = "0x44")]
    pub i2c_address: u8,

    /// Serial port for `--bus serial`
    #[arg(long, env = "BORG_SERIAL_PORT", default_value = DEFAULT_SERIAL_PORT)]
    pub serial_port: String,

    #[arg(long, env = "BORG_BAUD_RATE", default_value_t = crate::bus::serial::DEFAULT_BAUDRATE)]
    pub baud_rate: u32,

    /// Total battery voltage supplied to the board
    #[arg(long, env = "BORG_BATTERY_VOLTAGE", default_value_t = DEFAULT_BATTERY_VOLTAGE)]
    pub battery_voltage: f32,

    /// Maximum voltage the motors should see
    #[arg(long, env = "BORG_RATED_VOLTAGE", default_value_t = DEFAULT_RATED_VOLTAGE)]
    pub rated_voltage: f32,

    /// Left motor mounting; the stock chassis mirrors it
    #[arg(long, value_enum, env = "BORG_LEFT_POLARITY", default_value_t = Polarity::Inverted)]
    pub left_polarity: Polarity,

    #[arg(long, value_enum, env = "BORG_RIGHT_POLARITY", default_value_t = Polarity::Normal)]
    pub right_polarity: Polarity,

    /// Silence (ms) after which the motors are switched off
    #[arg(long, env = "BORG_WATCHDOG_MS", default_value_t = DEFAULT_WATCHDOG_MS)]
    pub watchdog_ms: u64,

    /// Mirror the watchdog state on the board LED
    #[arg(long, env = "BORG_STATUS_LED")]
    pub status_led: bool,

    /// Also enable the board's own quarter-second comms failsafe
    #[arg(long, env = "BORG_BOARD_FAILSAFE")]
    pub board_failsafe: bool,

    /// Camera source
    #[arg(long, value_enum, env = "BORG_CAMERA", default_value_t = CameraKind::TestPattern)]
    pub camera: CameraKind,

    /// Raw stream path for `--camera file`
    #[arg(long, env = "BORG_CAMERA_PATH")]
    pub camera_path: Option<PathBuf>,

    /// Capture command for `--camera command`, run through `sh -c`
    #[arg(long, env = "BORG_CAMERA_COMMAND")]
    pub camera_command: Option<String>,

    #[arg(long, env = "BORG_WIDTH", default_value_t = DEFAULT_WIDTH)]
    pub width: u32,

    #[arg(long, env = "BORG_HEIGHT", default_value_t = DEFAULT_HEIGHT)]
    pub height: u32,

    /// Target capture rate (frames per second)
    #[arg(long, env = "BORG_FRAME_RATE", default_value_t = DEFAULT_FRAME_RATE)]
    pub frame_rate: u32,

    /// JPEG quality, smaller is faster, higher looks better
    #[arg(long, env = "BORG_JPEG_QUALITY", default_value_t = DEFAULT_JPEG_QUALITY,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,

    /// Orientation fix applied to every frame
    #[arg(long, value_enum, env = "BORG_ORIENTATION", default_value_t = Orientation::Rotate180)]
    pub orientation: Orientation,

    /// Directory photos are saved to
    #[arg(long, env = "BORG_PHOTO_DIR", default_value = ".")]
    pub photo_dir: PathBuf,

    /// Zenoh key prefix for requests and health
    #[arg(long, env = "BORG_KEY_PREFIX", default_value = DEFAULT_KEY_PREFIX)]
    pub key_prefix: String,

    #[arg(long, value_enum, env = "BORG_LOG_FORMAT", default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Args {
    pub fn watchdog_timeout(&self) -> Duration {
        Duration::from_millis(self.watchdog_ms)
    }

    pub fn power_limits(&self) -> PowerLimits {
        PowerLimits {
            battery_voltage: self.battery_voltage,
            rated_output_voltage: self.rated_voltage,
        }
    }

    pub fn drive_layout(&self) -> DriveLayout {
        DriveLayout {
            left: self.left_polarity,
            right: self.right_polarity,
        }
    }

    pub fn camera_config(&self) -> CameraConfig {
        CameraConfig {
            width: self.width,
            height: self.height,
            frame_rate: self.frame_rate,
            jpeg_quality: self.jpeg_quality,
            orientation: self.orientation,
        }
    }

    pub fn request_key(&self) -> String {
        format!("{}/**", self.key_prefix)
    }

    pub fn health_key(&self) -> String {
        format!("{}/{}", self.key_prefix, HEALTH_SUFFIX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["borg-runtime"]);
        assert_eq!(args.bus, BusKind::I2c);
        assert_eq!(args.i2c_address, crate::protocol::DEFAULT_ADDRESS);
        assert_eq!(args.watchdog_timeout(), Duration::from_secs(1));
        assert_eq!(args.request_key(), "borg/**");
        assert_eq!(args.health_key(), "borg/state/health");
        assert!((args.power_limits().max_power() - 0.95).abs() < 1e-6);
        assert_eq!(args.drive_layout(), DriveLayout::default());
    }

    #[test]
    fn test_overrides() {
        let args = Args::parse_from([
            "borg-runtime",
            "--bus",
            "sim",
            "--i2c-address",
            "0x15",
            "--watchdog-ms",
            "250",
            "--orientation",
            "flip-vertical",
            "--left-polarity",
            "normal",
            "--camera",
            "command",
            "--camera-command",
            "cat /tmp/cam.fifo",
        ]);
        assert_eq!(args.bus, BusKind::Sim);
        assert_eq!(args.i2c_address, 0x15);
        assert_eq!(args.watchdog_timeout(), Duration::from_millis(250));
        assert_eq!(args.camera_config().orientation, Orientation::FlipVertical);
        assert_eq!(args.camera_command.as_deref(), Some("cat /tmp/cam.fifo"));
        assert_eq!(args.drive_layout().left, Polarity::Normal);
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("68"), Ok(68));
        assert_eq!(parse_address("0x44"), Ok(0x44));
        assert!(parse_address("0x1FF").is_err());
    }
}
