// Bus diagnostic: read back everything the motor board reports
//
// Sends only GET commands. The controller still switches the motors off
// when it is dropped at exit.
//
// Usage: cargo run --example bus_diagnostic -- [i2c-bus | serial-port | sim] [address]
// Example: cargo run --example bus_diagnostic -- 1 0x44

use borg_runtime::bus::{Bus, SerialBus, SimBus};
use borg_runtime::motor::{Motor, MotorController};
use borg_runtime::protocol::DEFAULT_ADDRESS;
use borg_runtime::transport::Transport;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

fn open_bus(target: &str, address: u8) -> Result<Box<dyn Bus>, BoxError> {
    if target == "sim" {
        return Ok(Box::new(SimBus::new()));
    }
    #[cfg(target_os = "linux")]
    if let Ok(bus_number) = target.parse::<u8>() {
        return Ok(Box::new(borg_runtime::bus::I2cBus::open(bus_number, address)?));
    }
    let _ = address;
    Ok(Box::new(SerialBus::open(target)?))
}

fn parse_address(s: &str) -> Result<u8, BoxError> {
    Ok(match s.strip_prefix("0x") {
        Some(hex) => u8::from_str_radix(hex, 16)?,
        None => s.parse()?,
    })
}

fn report<T: std::fmt::Display>(label: &str, value: Result<T, borg_runtime::motor::MotorError>) {
    match value {
        Ok(v) => println!("    {:<16} {}", label, v),
        Err(e) => println!("    {:<16} ERROR - {}", label, e),
    }
}

fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .init();

    let target = std::env::args().nth(1).unwrap_or_else(|| "1".to_string());
    let address = match std::env::args().nth(2) {
        Some(s) => parse_address(&s)?,
        None => DEFAULT_ADDRESS,
    };

    println!("Motor board diagnostic (read-only)");
    println!("Bus: {}  Address: 0x{:02X}", target, address);
    println!();

    println!("Step 1: Opening bus...");
    let bus = match open_bus(&target, address) {
        Ok(bus) => {
            println!("  ✓ Bus opened");
            bus
        }
        Err(e) => {
            println!("  ✗ Failed to open bus: {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check I2C is enabled and /dev/i2c-N exists");
            println!("  - Check the user may access the device (i2c group)");
            println!("  - Run i2cdetect to confirm the board address");
            return Err(e);
        }
    };
    let board = MotorController::new(Transport::new(bus));
    println!();

    println!("Step 2: Identifying board...");
    match board.identify() {
        Ok(true) => println!("  ✓ PicoBorg Reverse responding"),
        Ok(false) => {
            println!("  ✗ Device answered but is not a PicoBorg Reverse");
            return Ok(());
        }
        Err(e) => {
            println!("  ✗ No response: {}", e);
            return Ok(());
        }
    }
    println!();

    println!("Step 3: Reading board state...");
    report("Motor A power:", board.get_drive(Motor::A));
    report("Motor B power:", board.get_drive(Motor::B));
    report("EPO tripped:", board.get_epo());
    report("EPO ignored:", board.get_epo_ignore());
    report("Drive fault:", board.get_drive_fault());
    report("Comms failsafe:", board.get_failsafe());
    report("LED:", board.get_led());
    println!();

    println!("Diagnostic complete.");
    println!("A drive fault reading while stopped is normal; it only matters while driving.");
    Ok(())
}
