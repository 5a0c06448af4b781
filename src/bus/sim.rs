// Simulated motor board
//
// Emulates the board's register behaviour in memory so the runtime can run
// without hardware (`--bus sim`) and tests can inspect what was sent.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::debug;

use super::Bus;
use crate::protocol::{self, Opcode, RESPONSE_LEN};

/// Drive state of one simulated motor channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimDrive {
    pub reverse: bool,
    pub pwm: u8,
}

/// Observable state of the simulated board
#[derive(Debug, Default)]
pub struct SimBoard {
    pub drive_a: SimDrive,
    pub drive_b: SimDrive,
    pub led: bool,
    pub epo_latched: bool,
    pub epo_ignore: bool,
    pub drive_fault: bool,
    pub failsafe: bool,
    /// Every frame written to the board, in order
    pub writes: Vec<Vec<u8>>,
    /// Number of upcoming reads whose echo byte gets corrupted
    pub corrupt_reads: usize,
    /// Fail every write with an I/O error
    pub fail_writes: bool,
}

impl SimBoard {
    fn apply(&mut self, frame: &[u8]) -> Option<[u8; RESPONSE_LEN]> {
        let (&op, payload) = frame.split_first()?;
        let arg = payload.first().copied().unwrap_or(0);
        let opcode = match Opcode::try_from(op) {
            Ok(opcode) => opcode,
            Err(unknown) => {
                debug!("Simulated board ignoring opcode 0x{:02X}", unknown);
                return None;
            }
        };

        let flag_reply = |on: bool| Some([op, protocol::flag_byte(on), 0, 0]);
        let drive_reply = |drive: SimDrive| {
            let dir = if drive.reverse {
                protocol::VALUE_REV
            } else {
                protocol::VALUE_FWD
            };
            Some([op, dir, drive.pwm, 0])
        };

        match opcode {
            Opcode::SetLed => self.led = arg == protocol::VALUE_ON,
            Opcode::GetLed => return flag_reply(self.led),
            Opcode::SetAFwd => self.drive_a = SimDrive { reverse: false, pwm: arg },
            Opcode::SetARev => self.drive_a = SimDrive { reverse: true, pwm: arg },
            Opcode::GetA => return drive_reply(self.drive_a),
            Opcode::SetBFwd => self.drive_b = SimDrive { reverse: false, pwm: arg },
            Opcode::SetBRev => self.drive_b = SimDrive { reverse: true, pwm: arg },
            Opcode::GetB => return drive_reply(self.drive_b),
            Opcode::AllOff => {
                self.drive_a = SimDrive::default();
                self.drive_b = SimDrive::default();
            }
            Opcode::ResetEpo => self.epo_latched = false,
            Opcode::GetEpo => return flag_reply(self.epo_latched),
            Opcode::SetEpoIgnore => self.epo_ignore = arg == protocol::VALUE_ON,
            Opcode::GetEpoIgnore => return flag_reply(self.epo_ignore),
            Opcode::GetDriveFault => return flag_reply(self.drive_fault),
            Opcode::SetAllFwd => {
                self.drive_a = SimDrive { reverse: false, pwm: arg };
                self.drive_b = self.drive_a;
            }
            Opcode::SetAllRev => {
                self.drive_a = SimDrive { reverse: true, pwm: arg };
                self.drive_b = self.drive_a;
            }
            Opcode::SetFailsafe => self.failsafe = arg == protocol::VALUE_ON,
            Opcode::GetFailsafe => return flag_reply(self.failsafe),
            Opcode::GetId => return Some([op, protocol::BOARD_ID, 0, 0]),
        }
        None
    }
}

/// Bus handle to a simulated board
pub struct SimBus {
    board: Arc<Mutex<SimBoard>>,
    pending: Option<[u8; RESPONSE_LEN]>,
}

impl SimBus {
    pub fn new() -> Self {
        Self {
            board: Arc::new(Mutex::new(SimBoard::default())),
            pending: None,
        }
    }

    /// Shared handle to the board state, usable after the bus is moved away
    pub fn board(&self) -> Arc<Mutex<SimBoard>> {
        Arc::clone(&self.board)
    }

    fn lock(&self) -> MutexGuard<'_, SimBoard> {
        // A panicked test thread must not wedge the simulated board
        self.board.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for SimBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Bus for SimBus {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        let mut board = self.lock();
        if board.fail_writes {
            return Err(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "simulated write failure",
            ));
        }
        board.writes.push(bytes.to_vec());
        let reply = board.apply(bytes);
        drop(board);
        self.pending = reply;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
        let mut reply = self.pending.take().unwrap_or([0; RESPONSE_LEN]);
        let mut board = self.lock();
        if board.corrupt_reads > 0 {
            board.corrupt_reads -= 1;
            reply[0] = !reply[0];
        }
        for (dst, src) in buf.iter_mut().zip(reply.iter().chain(std::iter::repeat(&0))) {
            *dst = *src;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_reflects_previous_set() {
        let mut bus = SimBus::new();
        bus.write(&[Opcode::SetBRev.as_byte(), 200]).unwrap();
        bus.write(&[Opcode::GetB.as_byte()]).unwrap();

        let mut reply = [0u8; 4];
        bus.read(&mut reply).unwrap();
        assert_eq!(reply, [Opcode::GetB.as_byte(), protocol::VALUE_REV, 200, 0]);
    }

    #[test]
    fn test_all_off_clears_both_drives() {
        let mut bus = SimBus::new();
        let board = bus.board();
        bus.write(&[Opcode::SetAllFwd.as_byte(), 90]).unwrap();
        assert_eq!(board.lock().unwrap().drive_b.pwm, 90);

        bus.write(&[Opcode::AllOff.as_byte(), 0]).unwrap();
        let board = board.lock().unwrap();
        assert_eq!(board.drive_a, SimDrive::default());
        assert_eq!(board.drive_b, SimDrive::default());
        assert_eq!(board.writes.len(), 2);
    }
}
