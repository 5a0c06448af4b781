// Request/response framing over the motor bus
//
// The bus has no framing or checksum of its own. The echoed opcode in byte 0
// of every reply is the only integrity signal, so a mismatched echo is
// treated as a desynchronised read and retried.

use tracing::{debug, warn};

use crate::bus::Bus;
use crate::protocol::{MAX_PAYLOAD, Opcode};

/// Default number of attempts for a read
pub const DEFAULT_RETRIES: usize = 3;

/// Error types for bus communication
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Bus I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No valid reply to {opcode:?} after retries")]
    CommunicationFailure { opcode: Opcode },

    #[error("Payload for {opcode:?} is {len} bytes, at most 3 allowed")]
    PayloadTooLong { opcode: Opcode, len: usize },
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Framed command session bound to one device on the bus
pub struct Transport {
    bus: Box<dyn Bus>,
}

impl Transport {
    pub fn new(bus: Box<dyn Bus>) -> Self {
        Self { bus }
    }

    /// Send an opcode and its payload as a single bus transaction
    pub fn write(&mut self, opcode: Opcode, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_PAYLOAD {
            return Err(TransportError::PayloadTooLong {
                opcode,
                len: payload.len(),
            });
        }

        let mut frame = [0u8; 1 + MAX_PAYLOAD];
        frame[0] = opcode.as_byte();
        frame[1..=payload.len()].copy_from_slice(payload);
        debug!("Bus write {:?}: {:02X?}", opcode, payload);
        self.bus.write(&frame[..=payload.len()])?;
        Ok(())
    }

    /// Issue a GET command and read back `expected_len` bytes
    pub fn read(&mut self, opcode: Opcode, expected_len: usize) -> Result<Vec<u8>> {
        self.read_with_retries(opcode, expected_len, DEFAULT_RETRIES)
    }

    /// Issue a GET command, retrying while the echoed opcode does not match
    ///
    /// `retries` is the total number of attempts. Bus I/O errors are returned
    /// immediately; only echo mismatches are retried.
    pub fn read_with_retries(
        &mut self,
        opcode: Opcode,
        expected_len: usize,
        retries: usize,
    ) -> Result<Vec<u8>> {
        let mut reply = vec![0u8; expected_len.max(1)];

        for attempt in 1..=retries {
            self.write(opcode, &[])?;
            self.bus.read(&mut reply)?;

            if reply[0] == opcode.as_byte() {
                return Ok(reply);
            }
            debug!(
                "Echo mismatch for {:?} on attempt {}/{}: got 0x{:02X}",
                opcode, attempt, retries, reply[0]
            );
        }

        warn!("Giving up on {:?} after {} attempts", opcode, retries);
        Err(TransportError::CommunicationFailure { opcode })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    /// Bus that records writes and serves scripted replies
    #[derive(Clone, Default)]
    struct ScriptedBus {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        replies: Arc<Mutex<VecDeque<Vec<u8>>>>,
    }

    impl ScriptedBus {
        fn with_replies(replies: &[&[u8]]) -> Self {
            let bus = Self::default();
            bus.replies
                .lock()
                .unwrap()
                .extend(replies.iter().map(|r| r.to_vec()));
            bus
        }
    }

    impl Bus for ScriptedBus {
        fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
            self.writes.lock().unwrap().push(bytes.to_vec());
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<()> {
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| std::io::Error::from(std::io::ErrorKind::TimedOut))?;
            buf.copy_from_slice(&reply[..buf.len()]);
            Ok(())
        }
    }

    #[test]
    fn test_write_frames_opcode_and_payload() {
        let bus = ScriptedBus::default();
        let mut transport = Transport::new(Box::new(bus.clone()));

        transport.write(Opcode::SetAFwd, &[191]).unwrap();
        transport.write(Opcode::GetA, &[]).unwrap();

        let writes = bus.writes.lock().unwrap();
        assert_eq!(writes[0], vec![3, 191]);
        assert_eq!(writes[1], vec![5]);
    }

    #[test]
    fn test_write_rejects_oversized_payload() {
        let bus = ScriptedBus::default();
        let mut transport = Transport::new(Box::new(bus.clone()));

        let err = transport.write(Opcode::SetLed, &[1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, TransportError::PayloadTooLong { len: 4, .. }));
        assert!(bus.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn test_read_succeeds_on_last_attempt() {
        let bus = ScriptedBus::with_replies(&[&[0, 0, 0, 0], &[7, 1, 2, 3], &[5, 1, 128, 0]]);
        let mut transport = Transport::new(Box::new(bus.clone()));

        let reply = transport.read(Opcode::GetA, 4).unwrap();
        assert_eq!(reply, vec![5, 1, 128, 0]);
        // One GET write per attempt
        assert_eq!(bus.writes.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_read_fails_after_all_mismatches() {
        let bus = ScriptedBus::with_replies(&[&[0; 4], &[0; 4], &[0; 4], &[5, 1, 1, 0]]);
        let mut transport = Transport::new(Box::new(bus.clone()));

        let err = transport.read(Opcode::GetA, 4).unwrap_err();
        assert!(matches!(
            err,
            TransportError::CommunicationFailure {
                opcode: Opcode::GetA
            }
        ));
        assert_eq!(bus.writes.lock().unwrap().len(), 3);
        // The fourth scripted reply was never consumed
        assert_eq!(bus.replies.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_read_does_not_retry_io_errors() {
        let bus = ScriptedBus::default();
        let mut transport = Transport::new(Box::new(bus.clone()));

        let err = transport.read(Opcode::GetId, 4).unwrap_err();
        assert!(matches!(err, TransportError::Io(_)));
        assert_eq!(bus.writes.lock().unwrap().len(), 1);
    }
}
