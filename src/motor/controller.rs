// High-level motor controller for the two-channel drive board
//
// Translates normalized drive powers into board commands. Holds no state
// beyond the transport; the transport sits behind a mutex so the request
// handlers and the watchdog never write to the bus at the same time.

use std::sync::{Mutex, MutexGuard};

use tracing::{debug, info, warn};

use crate::protocol::{self, Opcode, PWM_MAX, RESPONSE_LEN};
use crate::transport::{Transport, TransportError};

/// Error types for motor commands
#[derive(Debug, thiserror::Error)]
pub enum MotorError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Unexpected reply to {opcode:?}: {reply:02X?}")]
    UnexpectedReply { opcode: Opcode, reply: Vec<u8> },
}

pub type Result<T> = std::result::Result<T, MotorError>;

/// Motor channels on the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motor {
    A,
    B,
}

impl Motor {
    fn set_opcode(self, direction: Direction) -> Opcode {
        match (self, direction) {
            (Motor::A, Direction::Forward) => Opcode::SetAFwd,
            (Motor::A, Direction::Reverse) => Opcode::SetARev,
            (Motor::B, Direction::Forward) => Opcode::SetBFwd,
            (Motor::B, Direction::Reverse) => Opcode::SetBRev,
        }
    }

    fn get_opcode(self) -> Opcode {
        match self {
            Motor::A => Opcode::GetA,
            Motor::B => Opcode::GetB,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Direction and PWM magnitude as the board encodes a drive level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorReading {
    pub direction: Direction,
    pub magnitude: u8,
}

impl MotorReading {
    /// Encode a power in [-1, 1]; out-of-range values are clamped first
    pub fn from_power(power: f32) -> Self {
        let power = if power.is_nan() { 0.0 } else { power.clamp(-1.0, 1.0) };
        let direction = if power >= 0.0 {
            Direction::Forward
        } else {
            Direction::Reverse
        };
        // Truncates like the board library: 0.5 -> 127
        let magnitude = (power.abs() * PWM_MAX as f32).min(PWM_MAX as f32) as u8;
        Self {
            direction,
            magnitude,
        }
    }

    /// Signed power in [-1, 1]
    pub fn power(&self) -> f32 {
        let power = self.magnitude as f32 / PWM_MAX as f32;
        match self.direction {
            Direction::Forward => power,
            Direction::Reverse => -power,
        }
    }
}

/// Motor controller for the drive board
pub struct MotorController {
    transport: Mutex<Transport>,
}

impl MotorController {
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    fn transport(&self) -> MutexGuard<'_, Transport> {
        // A panic mid-command leaves no partial state in the transport
        self.transport
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Set the drive power of one motor, from -1 (full reverse) to 1 (full forward)
    ///
    /// A failed send is logged here and handed back; callers may treat it as
    /// a missed command.
    pub fn set_drive(&self, motor: Motor, power: f32) -> Result<()> {
        let reading = MotorReading::from_power(power);
        let opcode = motor.set_opcode(reading.direction);
        debug!("Setting motor {:?} to {:.3} ({:?})", motor, power, reading);

        self.transport()
            .write(opcode, &[reading.magnitude])
            .map_err(|e| {
                warn!("Failed sending motor {:?} drive level: {}", motor, e);
                MotorError::from(e)
            })
    }

    /// Read back the drive power of one motor
    pub fn get_drive(&self, motor: Motor) -> Result<f32> {
        let opcode = motor.get_opcode();
        let reply = self.transport().read(opcode, RESPONSE_LEN)?;

        let direction = match reply.get(1).copied() {
            Some(protocol::VALUE_FWD) => Direction::Forward,
            Some(protocol::VALUE_REV) => Direction::Reverse,
            _ => return Err(MotorError::UnexpectedReply { opcode, reply }),
        };
        let magnitude = reply.get(2).copied().unwrap_or(0);

        Ok(MotorReading {
            direction,
            magnitude,
        }
        .power())
    }

    /// Set both motors to the same power in one command
    pub fn set_all(&self, power: f32) -> Result<()> {
        let reading = MotorReading::from_power(power);
        let opcode = match reading.direction {
            Direction::Forward => Opcode::SetAllFwd,
            Direction::Reverse => Opcode::SetAllRev,
        };

        self.transport()
            .write(opcode, &[reading.magnitude])
            .map_err(|e| {
                warn!("Failed sending all drive levels: {}", e);
                MotorError::from(e)
            })
    }

    /// Stop all motors. Best effort: failures are logged, never returned.
    pub fn all_off(&self) {
        info!("Stopping all motors");
        if let Err(e) = self.transport().write(Opcode::AllOff, &[0]) {
            warn!("Failed sending motors off command: {}", e);
        }
    }

    /// Check that the device answering on the bus is the expected board
    pub fn identify(&self) -> Result<bool> {
        let reply = self.transport().read(Opcode::GetId, RESPONSE_LEN)?;
        Ok(reply.get(1) == Some(&protocol::BOARD_ID))
    }

    pub fn set_led(&self, on: bool) -> Result<()> {
        self.write_flag(Opcode::SetLed, on)
    }

    pub fn get_led(&self) -> Result<bool> {
        self.read_flag(Opcode::GetLed)
    }

    /// Clear the emergency power-off latch
    pub fn reset_epo(&self) -> Result<()> {
        self.transport().write(Opcode::ResetEpo, &[0])?;
        Ok(())
    }

    /// True if the emergency power-off latch has tripped
    pub fn get_epo(&self) -> Result<bool> {
        self.read_flag(Opcode::GetEpo)
    }

    pub fn set_epo_ignore(&self, ignore: bool) -> Result<()> {
        self.write_flag(Opcode::SetEpoIgnore, ignore)
    }

    pub fn get_epo_ignore(&self) -> Result<bool> {
        self.read_flag(Opcode::GetEpoIgnore)
    }

    /// True if the board reports a drive fault (short circuit, under voltage)
    pub fn get_drive_fault(&self) -> Result<bool> {
        self.read_flag(Opcode::GetDriveFault)
    }

    /// Enable the board's own failsafe, which stops the motors unless
    /// commanded at least every quarter second
    pub fn set_failsafe(&self, enabled: bool) -> Result<()> {
        self.write_flag(Opcode::SetFailsafe, enabled)
    }

    pub fn get_failsafe(&self) -> Result<bool> {
        self.read_flag(Opcode::GetFailsafe)
    }

    fn write_flag(&self, opcode: Opcode, on: bool) -> Result<()> {
        self.transport().write(opcode, &[protocol::flag_byte(on)])?;
        Ok(())
    }

    fn read_flag(&self, opcode: Opcode) -> Result<bool> {
        let reply = self.transport().read(opcode, RESPONSE_LEN)?;
        Ok(reply.get(1).is_some_and(|&b| b != protocol::VALUE_OFF))
    }
}

impl Drop for MotorController {
    fn drop(&mut self) {
        // Last chance to leave the robot stopped
        self.all_off();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{Bus, SimBus};
    use crate::bus::sim::SimBoard;
    use std::sync::Arc;

    fn sim_controller() -> (MotorController, Arc<Mutex<SimBoard>>) {
        let bus = SimBus::new();
        let board = bus.board();
        (MotorController::new(Transport::new(Box::new(bus))), board)
    }

    #[test]
    fn test_set_drive_scenarios() {
        let (motors, board) = sim_controller();

        motors.set_drive(Motor::A, 0.75).unwrap();
        motors.set_drive(Motor::A, -0.5).unwrap();

        let board = board.lock().unwrap();
        assert_eq!(board.writes[0], vec![Opcode::SetAFwd.as_byte(), 191]);
        assert_eq!(board.writes[1], vec![Opcode::SetARev.as_byte(), 127]);
    }

    #[test]
    fn test_power_encoding() {
        for i in -20..=20 {
            let p = i as f32 / 20.0;
            let reading = MotorReading::from_power(p);
            let expected = (p.abs() * 255.0) as u8;
            assert_eq!(reading.magnitude, expected, "power {}", p);
            assert_eq!(reading.direction == Direction::Forward, p >= 0.0);
        }
    }

    #[test]
    fn test_power_is_clamped() {
        assert_eq!(MotorReading::from_power(3.0).magnitude, 255);
        assert_eq!(MotorReading::from_power(-7.5).direction, Direction::Reverse);
        assert_eq!(MotorReading::from_power(-7.5).magnitude, 255);
        assert_eq!(MotorReading::from_power(f32::NAN).magnitude, 0);
    }

    #[test]
    fn test_get_drive_reads_back_set_drive() {
        let (motors, _board) = sim_controller();

        for &p in &[1.0f32, 0.62, 0.0, -0.01, -0.33, -1.0] {
            motors.set_drive(Motor::B, p).unwrap();
            let read = motors.get_drive(Motor::B).unwrap();
            assert!((read - p).abs() <= 1.0 / 255.0, "set {} read {}", p, read);
            if p != 0.0 && read != 0.0 {
                assert_eq!(read.signum(), p.signum());
            }
        }
    }

    #[test]
    fn test_get_drive_reports_communication_failure() {
        let (motors, board) = sim_controller();
        board.lock().unwrap().corrupt_reads = 3;

        let err = motors.get_drive(Motor::A).unwrap_err();
        assert!(matches!(
            err,
            MotorError::Transport(TransportError::CommunicationFailure { .. })
        ));
    }

    #[test]
    fn test_get_drive_rejects_unknown_direction() {
        struct OddBus;
        impl Bus for OddBus {
            fn write(&mut self, _bytes: &[u8]) -> std::io::Result<()> {
                Ok(())
            }
            fn read(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
                buf.copy_from_slice(&[Opcode::GetA.as_byte(), 9, 10, 0]);
                Ok(())
            }
        }

        let motors = MotorController::new(Transport::new(Box::new(OddBus)));
        let err = motors.get_drive(Motor::A).unwrap_err();
        assert!(matches!(err, MotorError::UnexpectedReply { .. }));
    }

    #[test]
    fn test_all_off_swallows_failures() {
        let (motors, board) = sim_controller();
        motors.set_drive(Motor::A, 0.4).unwrap();

        board.lock().unwrap().fail_writes = true;
        motors.all_off();
        assert!(motors.set_drive(Motor::A, 0.4).is_err());

        board.lock().unwrap().fail_writes = false;
        motors.all_off();
        assert_eq!(board.lock().unwrap().drive_a.pwm, 0);
    }

    #[test]
    fn test_board_flags() {
        let (motors, board) = sim_controller();

        assert!(motors.identify().unwrap());
        motors.set_led(true).unwrap();
        assert!(motors.get_led().unwrap());
        motors.set_failsafe(true).unwrap();
        assert!(motors.get_failsafe().unwrap());

        board.lock().unwrap().epo_latched = true;
        assert!(motors.get_epo().unwrap());
        motors.reset_epo().unwrap();
        assert!(!motors.get_epo().unwrap());
        assert!(!motors.get_drive_fault().unwrap());
    }

    #[test]
    fn test_drop_stops_motors() {
        let (motors, board) = sim_controller();
        motors.set_all(-0.8).unwrap();
        assert!(board.lock().unwrap().drive_a.reverse);

        drop(motors);
        let board = board.lock().unwrap();
        assert_eq!(board.drive_a.pwm, 0);
        assert_eq!(board.drive_b.pwm, 0);
    }
}
