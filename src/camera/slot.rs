use std::sync::{Arc, Mutex, MutexGuard};

use super::Frame;

/// Holder of the most recently published frame
///
/// Both critical sections only move an `Arc`, so readers never wait on an
/// encode and never see a frame that is still being written.
#[derive(Debug, Default)]
pub struct FrameSlot {
    latest: Mutex<Option<Arc<Frame>>>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Frame>>> {
        self.latest
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Replace the current frame
    pub fn publish(&self, frame: Frame) {
        let frame = Arc::new(frame);
        let previous = self.lock().replace(frame);
        // Old frame freed outside the lock
        drop(previous);
    }

    /// Snapshot of the current frame, if any has been published
    pub fn latest(&self) -> Option<Arc<Frame>> {
        self.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn patterned_frame(sequence: u64) -> Frame {
        // Length and content both depend on the sequence, so a mix of two
        // frames is detectable
        let fill = (sequence % 251) as u8;
        Frame {
            jpeg: vec![fill; 4096 + sequence as usize],
            width: 1,
            height: 1,
            sequence,
            captured_at: Instant::now(),
        }
    }

    #[test]
    fn test_empty_until_published() {
        let slot = FrameSlot::new();
        assert!(slot.latest().is_none());

        slot.publish(patterned_frame(1));
        slot.publish(patterned_frame(2));
        assert_eq!(slot.latest().unwrap().sequence, 2);
    }

    #[test]
    fn test_snapshot_outlives_replacement() {
        let slot = FrameSlot::new();
        slot.publish(patterned_frame(1));
        let held = slot.latest().unwrap();

        slot.publish(patterned_frame(2));
        assert_eq!(held.sequence, 1);
        assert_eq!(held.jpeg.len(), 4097);
    }

    #[test]
    fn test_concurrent_readers_never_see_torn_frames() {
        let slot = Arc::new(FrameSlot::new());
        slot.publish(patterned_frame(0));

        let readers: Vec<_> = (0..8)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    let mut last_seq = 0;
                    for _ in 0..2_000 {
                        let frame = slot.latest().unwrap();
                        let fill = (frame.sequence % 251) as u8;
                        assert_eq!(frame.jpeg.len(), 4096 + frame.sequence as usize);
                        assert!(frame.jpeg.iter().all(|&b| b == fill));
                        assert!(frame.sequence >= last_seq);
                        last_seq = frame.sequence;
                    }
                })
            })
            .collect();

        for sequence in 1..=500 {
            slot.publish(patterned_frame(sequence));
        }

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(slot.latest().unwrap().sequence, 500);
    }
}
