// Request handling surface
//
// Every request counts as activity for the watchdog before anything else
// happens, including requests that only read the camera or are not understood.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::camera::{Frame, FrameSlot};
use crate::messages::DriveStatus;
use crate::motor::{Motor, MotorController, MotorError};
use crate::watchdog::WatchdogHandle;

/// Motor side driven by each half of a drive request
const LEFT_MOTOR: Motor = Motor::A;
const RIGHT_MOTOR: Motor = Motor::B;

/// Mounting direction of one side's motor
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Polarity {
    Normal,
    /// Wired or mounted mirrored: forward on the board drives the wheel backwards
    Inverted,
}

impl Polarity {
    /// Map between request sign and board sign (its own inverse)
    pub fn apply(self, power: f32) -> f32 {
        match self {
            Polarity::Normal => power,
            // Subtraction keeps a stopped motor at +0 rather than -0
            Polarity::Inverted => 0.0 - power,
        }
    }
}

/// Polarity of each drive side
///
/// The stock chassis mounts the two motors as mirror images, so the left side
/// runs inverted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveLayout {
    pub left: Polarity,
    pub right: Polarity,
}

impl Default for DriveLayout {
    fn default() -> Self {
        Self {
            left: Polarity::Inverted,
            right: Polarity::Normal,
        }
    }
}

/// Battery and motor voltage ratings used to derate drive power
#[derive(Debug, Clone, Copy)]
pub struct PowerLimits {
    pub battery_voltage: f32,
    pub rated_output_voltage: f32,
}

impl PowerLimits {
    /// Fraction of full PWM that keeps the motors within their rating
    pub fn max_power(&self) -> f32 {
        if self.battery_voltage <= 0.0 || self.rated_output_voltage >= self.battery_voltage {
            1.0
        } else {
            (self.rated_output_voltage / self.battery_voltage).max(0.0)
        }
    }
}

/// A parsed operator request
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// `set/<left>/<right>`, powers in [-1, 1]
    SetDrive { left: f32, right: f32 },
    /// `off`
    AllOff,
    /// `cam.jpg`
    LatestFrame,
    /// `photo`
    SavePhoto,
    /// `status`
    Status,
    /// Anything else, echoed back
    Unknown(String),
}

impl Request {
    /// Parse the request path (the part after the key prefix)
    ///
    /// Unparsable drive values become 0, so a garbled request stops the motors
    /// rather than being ignored.
    pub fn parse(path: &str) -> Self {
        let trimmed = path.trim_matches('/');
        let mut parts = trimmed.split('/');

        match parts.next().unwrap_or_default() {
            "set" => {
                let mut value = || {
                    parts
                        .next()
                        .and_then(|v| v.parse::<f32>().ok())
                        .filter(|v| v.is_finite())
                };
                match (value(), value()) {
                    (Some(left), Some(right)) => Request::SetDrive { left, right },
                    _ => Request::SetDrive {
                        left: 0.0,
                        right: 0.0,
                    },
                }
            }
            "off" => Request::AllOff,
            "cam.jpg" => Request::LatestFrame,
            "photo" => Request::SavePhoto,
            "status" => Request::Status,
            _ => Request::Unknown(path.to_string()),
        }
    }
}

/// Reply to a request
#[derive(Debug, Clone)]
pub enum Response {
    Text(String),
    Image(Arc<Frame>),
    NoFrame,
}

/// Error types for photo capture
#[derive(Debug, thiserror::Error)]
pub enum PhotoError {
    #[error("No camera frame captured yet")]
    NoFrame,

    #[error("Failed to store photo: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable storage for photos
pub trait PhotoStore: Send + Sync {
    /// Persist one encoded frame, returning where it went
    fn store(&self, frame: &Frame) -> std::io::Result<PathBuf>;
}

/// Stores photos as timestamped JPEG files in a directory
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PhotoStore for DirectoryStore {
    fn store(&self, frame: &Frame) -> std::io::Result<PathBuf> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        let path = self.dir.join(format!(
            "photo-{}.{:03}-{}.jpg",
            now.as_secs(),
            now.subsec_millis(),
            frame.sequence
        ));
        std::fs::write(&path, frame.bytes())?;
        Ok(path)
    }
}

/// Composes motors, camera slot and watchdog behind one request surface
pub struct CommandDispatcher {
    motors: Arc<MotorController>,
    watchdog: WatchdogHandle,
    frames: Arc<FrameSlot>,
    photos: Arc<dyn PhotoStore>,
    layout: DriveLayout,
    max_power: f32,
}

impl CommandDispatcher {
    pub fn new(
        motors: Arc<MotorController>,
        watchdog: WatchdogHandle,
        frames: Arc<FrameSlot>,
        photos: Arc<dyn PhotoStore>,
        limits: PowerLimits,
        layout: DriveLayout,
    ) -> Self {
        let max_power = limits.max_power();
        info!("Drive output limited to {:.1}%", max_power * 100.0);
        debug!("Drive layout: {:?}", layout);
        Self {
            motors,
            watchdog,
            frames,
            photos,
            layout,
            max_power,
        }
    }

    /// Set left and right drive from powers in [-1, 1]
    ///
    /// Returns the requested (clamped) levels without reading them back.
    pub fn set_drive(&self, left: f32, right: f32) -> DriveStatus {
        self.watchdog.activity();

        let status = DriveStatus {
            left: left.clamp(-1.0, 1.0),
            right: right.clamp(-1.0, 1.0),
        };

        // Failures are already logged by the controller; the watchdog is the
        // backstop for a missed command
        let left = self.layout.left.apply(status.left) * self.max_power;
        let right = self.layout.right.apply(status.right) * self.max_power;
        let _ = self.motors.set_drive(LEFT_MOTOR, left);
        let _ = self.motors.set_drive(RIGHT_MOTOR, right);
        status
    }

    pub fn all_off(&self) {
        self.watchdog.activity();
        self.motors.all_off();
    }

    /// Latest published camera frame
    pub fn latest_frame(&self) -> Option<Arc<Frame>> {
        self.watchdog.activity();
        self.frames.latest()
    }

    /// Persist the latest frame to `destination`
    pub fn save_photo(&self, destination: &dyn PhotoStore) -> Result<PathBuf, PhotoError> {
        self.watchdog.activity();

        let frame = self.frames.latest().ok_or(PhotoError::NoFrame)?;
        let path = destination.store(&frame)?;
        info!("Saved photo {}", path.display());
        Ok(path)
    }

    /// Board and drive readback, one line per item
    pub fn status(&self) -> String {
        self.watchdog.activity();

        let mut text = String::new();
        let _ = writeln!(text, "Watchdog: {:?}", self.watchdog.state());
        let sides = [
            ("Left", LEFT_MOTOR, self.layout.left),
            ("Right", RIGHT_MOTOR, self.layout.right),
        ];
        for (side, motor, polarity) in sides {
            match self.motors.get_drive(motor) {
                Ok(power) => {
                    let _ = writeln!(text, "{}: {:.0} %", side, polarity.apply(power) * 100.0);
                }
                Err(e) => {
                    let _ = writeln!(text, "{}: unavailable ({})", side, e);
                }
            }
        }
        let flag = |result: Result<bool, MotorError>| match result {
            Ok(true) => "yes".to_string(),
            Ok(false) => "no".to_string(),
            Err(e) => format!("unavailable ({})", e),
        };
        let _ = writeln!(text, "EPO tripped: {}", flag(self.motors.get_epo()));
        let _ = writeln!(text, "Drive fault: {}", flag(self.motors.get_drive_fault()));
        text
    }

    /// Handle one parsed request
    pub fn handle(&self, request: &Request) -> Response {
        debug!("Handling {:?}", request);
        match request {
            Request::SetDrive { left, right } => {
                let status = self.set_drive(*left, *right);
                Response::Text(format!(
                    "Speeds: {:.0} %, {:.0} %",
                    status.left_percent(),
                    status.right_percent()
                ))
            }
            Request::AllOff => {
                self.all_off();
                Response::Text("Speeds: 0 %, 0 %".to_string())
            }
            Request::LatestFrame => match self.latest_frame() {
                Some(frame) => Response::Image(frame),
                None => Response::NoFrame,
            },
            Request::SavePhoto => match self.save_photo(self.photos.as_ref()) {
                Ok(path) => Response::Text(format!("Photo saved to {}", path.display())),
                Err(e) => {
                    warn!("Photo not saved: {}", e);
                    Response::Text("Failed to take photo!".to_string())
                }
            },
            Request::Status => Response::Text(self.status()),
            Request::Unknown(path) => {
                self.watchdog.activity();
                Response::Text(format!("Path : \"{}\"", path))
            }
        }
    }
}
