// Keyboard teleop: W/S drive, A/D spin, R/F power, Space stop, P photo, Q quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const POWERS: [f32; 3] = [0.3, 0.6, 1.0];
const INPUT_TIMEOUT_MS: u64 = 150; // Stop driving after this much time with no input
const SEND_PERIOD_MS: u64 = 100; // Well inside the robot's 1s watchdog

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let prefix = std::env::args().nth(1).unwrap_or_else(|| "borg".to_string());

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Controls: W/S=drive, A/D=spin, R/F=power, Space=stop, P=photo, Q=quit");
    info!("Power: LOW");

    enable_raw_mode()?;
    let result = run_teleop(&session, &prefix).await;
    disable_raw_mode()?;

    // Leave the robot stopped whatever happened above
    request(&session, &format!("{}/off", prefix)).await?;
    result
}

/// Send one request and log the replies
async fn request(session: &zenoh::Session, key: &str) -> Result<(), BoxError> {
    let replies = session.get(key).await?;
    while let Ok(reply) = replies.recv_async().await {
        match reply.result() {
            Ok(sample) => match sample.payload().try_to_string() {
                Ok(text) => debug!("{}: {}", key, text),
                Err(_) => debug!("{}: {} bytes", key, sample.payload().len()),
            },
            Err(err) => warn!("{}: {:?}", key, err.payload().try_to_string()),
        }
    }
    Ok(())
}

async fn run_teleop(session: &zenoh::Session, prefix: &str) -> Result<(), BoxError> {
    let mut power_idx: usize = 0;

    // Persistent drive state
    let mut left = 0.0;
    let mut right = 0.0;
    let mut last_movement_input = Instant::now();
    let mut last_send = Instant::now();

    loop {
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;
                let power = POWERS[power_idx];

                match code {
                    KeyCode::Char('w') if pressed => {
                        (left, right) = (power, power);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('s') if pressed => {
                        (left, right) = (-power, -power);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('a') if pressed => {
                        (left, right) = (-power, power);
                        last_movement_input = Instant::now();
                    }
                    KeyCode::Char('d') if pressed => {
                        (left, right) = (power, -power);
                        last_movement_input = Instant::now();
                    }

                    KeyCode::Char(' ') if pressed => {
                        (left, right) = (0.0, 0.0);
                        request(session, &format!("{}/off", prefix)).await?;
                    }
                    KeyCode::Char('p') if pressed => {
                        request(session, &format!("{}/photo", prefix)).await?;
                    }

                    KeyCode::Char('r') if pressed => {
                        power_idx = (power_idx + 1).min(POWERS.len() - 1);
                        print_power(power_idx);
                    }
                    KeyCode::Char('f') if pressed => {
                        power_idx = power_idx.saturating_sub(1);
                        print_power(power_idx);
                    }

                    KeyCode::Char('q') | KeyCode::Esc if pressed => break,

                    _ => {}
                }
            }
        }

        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            (left, right) = (0.0, 0.0);
        }

        // Keep feeding the robot's watchdog even while idle
        if last_send.elapsed() >= Duration::from_millis(SEND_PERIOD_MS) {
            request(session, &format!("{}/set/{}/{}", prefix, left, right)).await?;
            last_send = Instant::now();
        }
    }

    Ok(())
}

fn print_power(idx: usize) {
    let label = ["LOW", "MED", "HIGH"][idx];
    info!("Power: {}", label);
}
