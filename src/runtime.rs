// Robot runtime: builds every unit once, serves requests over zenoh
// Note: the request path and the watchdog are independent. If the operator
// disappears, or this task stalls, the watchdog thread still cuts the motors.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

// local imports
use crate::bus::{Bus, SerialBus, SimBus};
use crate::camera::{
    CameraPipeline, CommandSource, FrameSlot, FrameSource, StreamSource, TestPattern,
};
use crate::config::{Args, BusKind, CameraKind};
use crate::dispatch::{CommandDispatcher, DirectoryStore, Request, Response};
use crate::messages::WatchdogState;
use crate::motor::MotorController;
use crate::shutdown::Shutdown;
use crate::transport::Transport;
use crate::watchdog::Watchdog;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Everything the robot runs, constructed once at startup
pub struct Robot {
    motors: Arc<MotorController>,
    dispatcher: Arc<CommandDispatcher>,
    watchdog: Watchdog,
    camera: CameraPipeline,
    shutdown: Shutdown,
    health: watch::Receiver<WatchdogState>,
}

#[cfg(target_os = "linux")]
fn open_i2c(args: &Args) -> Result<Box<dyn Bus>, BoxError> {
    info!(
        "Opening I2C bus {} at address 0x{:02X}",
        args.i2c_bus, args.i2c_address
    );
    Ok(Box::new(crate::bus::I2cBus::open(
        args.i2c_bus,
        args.i2c_address,
    )?))
}

#[cfg(not(target_os = "linux"))]
fn open_i2c(_args: &Args) -> Result<Box<dyn Bus>, BoxError> {
    Err("the I2C bus backend is only available on Linux".into())
}

fn open_bus(args: &Args) -> Result<Box<dyn Bus>, BoxError> {
    match args.bus {
        BusKind::I2c => open_i2c(args),
        BusKind::Serial => {
            info!("Opening serial bus on {}", args.serial_port);
            Ok(Box::new(SerialBus::open_with_baudrate(
                &args.serial_port,
                args.baud_rate,
            )?))
        }
        BusKind::Sim => {
            warn!("Using the simulated board, no motors will move");
            Ok(Box::new(SimBus::new()))
        }
    }
}

fn open_camera(args: &Args, shutdown: &Shutdown) -> Result<Box<dyn FrameSource>, BoxError> {
    let (width, height) = (args.width, args.height);
    match args.camera {
        CameraKind::TestPattern => Ok(Box::new(TestPattern::new(width, height))),
        CameraKind::File => {
            let path = args
                .camera_path
                .as_ref()
                .ok_or("--camera file needs --camera-path")?;
            Ok(Box::new(StreamSource::open(
                path,
                width,
                height,
                shutdown.clone(),
            )?))
        }
        CameraKind::Command => {
            let command = args
                .camera_command
                .as_deref()
                .ok_or("--camera command needs --camera-command")?;
            Ok(Box::new(CommandSource::spawn(
                command,
                width,
                height,
                shutdown.clone(),
            )?))
        }
    }
}

impl Robot {
    /// Open the hardware and start the watchdog and camera threads
    ///
    /// Any failure here aborts startup; units already started are stopped
    /// by their destructors.
    pub fn start(args: &Args) -> Result<Self, BoxError> {
        Self::with_bus(args, open_bus(args)?)
    }

    /// Same as `start`, over an already opened bus
    pub fn with_bus(args: &Args, bus: Box<dyn Bus>) -> Result<Self, BoxError> {
        let motors = Arc::new(MotorController::new(Transport::new(bus)));

        match motors.identify() {
            Ok(true) => info!("Found motor board"),
            Ok(false) => {
                return Err(format!(
                    "device at 0x{:02X} is not a PicoBorg Reverse",
                    args.i2c_address
                )
                .into());
            }
            Err(e) => return Err(format!("motor board not responding: {}", e).into()),
        }
        motors.set_failsafe(args.board_failsafe)?;
        motors.all_off();

        let shutdown = Shutdown::new();
        let (health_tx, health) = watch::channel(WatchdogState::Tripped);

        let watchdog = Watchdog::spawn(args.watchdog_timeout(), shutdown.clone(), {
            let motors = Arc::clone(&motors);
            let status_led = args.status_led;
            move |state| {
                if state == WatchdogState::Tripped {
                    motors.all_off();
                }
                if status_led {
                    if let Err(e) = motors.set_led(state == WatchdogState::Armed) {
                        warn!("Failed to set status LED: {}", e);
                    }
                }
                health_tx.send_replace(state);
            }
        })?;

        let frames = Arc::new(FrameSlot::new());
        let camera = CameraPipeline::spawn(
            open_camera(args, &shutdown)?,
            &args.camera_config(),
            Arc::clone(&frames),
            shutdown.clone(),
        )?;

        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&motors),
            watchdog.handle(),
            frames,
            Arc::new(DirectoryStore::new(&args.photo_dir)),
            args.power_limits(),
            args.drive_layout(),
        ));

        Ok(Self {
            motors,
            dispatcher,
            watchdog,
            camera,
            shutdown,
            health,
        })
    }

    pub fn dispatcher(&self) -> Arc<CommandDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn health(&self) -> watch::Receiver<WatchdogState> {
        self.health.clone()
    }

    /// Stop every unit and leave the motors off. Blocks until all threads exit.
    ///
    /// The motors go off before anything is joined: once the watchdog has
    /// stopped nothing else would cut them.
    pub fn shutdown(self) {
        info!("Shutting down...");
        self.motors.all_off();

        self.shutdown.trigger();
        self.watchdog.stop();
        self.watchdog.join();
        self.camera.join();

        // Again, for any request that was still in flight
        self.motors.all_off();
        info!("Motors off");
    }
}

/// Answer one query on the blocking pool
async fn respond(query: zenoh::query::Query, dispatcher: Arc<CommandDispatcher>, prefix: String) {
    let key = query.key_expr().clone();
    let path = key
        .as_str()
        .strip_prefix(prefix.as_str())
        .unwrap_or(key.as_str())
        .to_string();

    let request = Request::parse(&path);
    let response = match tokio::task::spawn_blocking(move || dispatcher.handle(&request)).await {
        Ok(response) => response,
        Err(e) => {
            warn!("Request {} failed: {}", path, e);
            return;
        }
    };

    let sent = match response {
        Response::Text(text) => query.reply(key, text).await,
        Response::Image(frame) => query.reply(key, frame.bytes().to_vec()).await,
        Response::NoFrame => query.reply_err("no frame yet").await,
    };
    if let Err(e) = sent {
        warn!("Failed to reply to {}: {}", path, e);
    }
}

async fn serve(args: &Args, robot: &Robot) -> Result<(), BoxError> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up queryable and publishers...");
    let queryable = session.declare_queryable(args.request_key()).await?;
    let pub_health = session.declare_publisher(args.health_key()).await?;

    let prefix = format!("{}/", args.key_prefix);
    let mut health = robot.health();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    info!(
        "Runtime started: {}ms watchdog timeout",
        args.watchdog_timeout().as_millis()
    );
    info!("Serving requests on: {}", args.request_key());
    info!("Publishing health to: {}", args.health_key());

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("User shutdown");
                break;
            }
            changed = health.changed() => {
                if changed.is_err() {
                    return Err("watchdog stopped unexpectedly".into());
                }
                let state = *health.borrow_and_update();
                let health_json = serde_json::to_string(&state)?;
                pub_health.put(health_json).await?;
            }
            query = queryable.recv_async() => {
                tokio::spawn(respond(query?, robot.dispatcher(), prefix.clone()));
            }
        }
    }

    Ok(())
}

pub async fn run(args: Args) -> Result<(), BoxError> {
    let robot = Robot::start(&args)?;
    let result = serve(&args, &robot).await;

    tokio::task::spawn_blocking(move || robot.shutdown()).await?;
    result
}
