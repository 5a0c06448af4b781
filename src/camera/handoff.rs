// Single-slot handoff between frame capture and frame processing
//
// Two signals: `ready` (a filled buffer is waiting for the processor) and
// `free` (the processor has finished and the slot can take a new buffer).
// The producer never queues: when the slot stays occupied it drops the frame.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::RawFrame;

#[derive(Debug)]
enum SlotState {
    /// Idle, optionally holding a recycled buffer for the producer
    Free(Option<RawFrame>),
    /// Filled by the producer, not yet taken
    Ready(RawFrame),
    /// Taken by the processor
    Busy,
}

#[derive(Debug)]
pub struct Handoff {
    state: Mutex<SlotState>,
    ready: Condvar,
    free: Condvar,
}

impl Default for Handoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Handoff {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Free(None)),
            ready: Condvar::new(),
            free: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a filled frame to the processor
    ///
    /// Waits up to `retry` for the slot to free up. On success returns the
    /// recycled buffer (if any) for the next capture; if the slot is still
    /// occupied the frame is handed back so the producer can reuse it.
    pub fn offer(&self, frame: RawFrame, retry: Duration) -> Result<Option<RawFrame>, RawFrame> {
        let guard = self.lock();
        let (mut state, _) = self
            .free
            .wait_timeout_while(guard, retry, |state| !matches!(state, SlotState::Free(_)))
            .unwrap_or_else(PoisonError::into_inner);

        let spare = match &mut *state {
            SlotState::Free(spare) => spare.take(),
            _ => return Err(frame),
        };
        *state = SlotState::Ready(frame);
        drop(state);
        self.ready.notify_one();
        Ok(spare)
    }

    /// Take the waiting frame, blocking up to `timeout`
    pub fn take(&self, timeout: Duration) -> Option<RawFrame> {
        let guard = self.lock();
        let (mut state, _) = self
            .ready
            .wait_timeout_while(guard, timeout, |state| !matches!(state, SlotState::Ready(_)))
            .unwrap_or_else(PoisonError::into_inner);

        match std::mem::replace(&mut *state, SlotState::Busy) {
            SlotState::Ready(frame) => Some(frame),
            other => {
                *state = other;
                None
            }
        }
    }

    /// Return a processed buffer and mark the slot free
    pub fn release(&self, frame: RawFrame) {
        *self.lock() = SlotState::Free(Some(frame));
        self.free.notify_one();
    }

    /// True while a frame is waiting or being processed
    #[cfg(test)]
    fn is_occupied(&self) -> bool {
        !matches!(*self.lock(), SlotState::Free(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn frame(tag: u8) -> RawFrame {
        let mut frame = RawFrame::new(2, 1);
        frame.pixels.fill(tag);
        frame
    }

    #[test]
    fn test_offer_then_take() {
        let handoff = Handoff::new();
        let spare = handoff.offer(frame(1), Duration::ZERO).unwrap();
        assert!(spare.is_none());

        let taken = handoff.take(Duration::ZERO).unwrap();
        assert_eq!(taken.pixels[0], 1);
        assert!(handoff.is_occupied());
    }

    #[test]
    fn test_busy_slot_discards_instead_of_queuing() {
        let handoff = Handoff::new();
        handoff.offer(frame(1), Duration::ZERO).unwrap();

        // Not yet taken
        let rejected = handoff.offer(frame(2), Duration::from_millis(5)).unwrap_err();
        assert_eq!(rejected.pixels[0], 2);

        // Taken, still processing
        let taken = handoff.take(Duration::ZERO).unwrap();
        let rejected = handoff.offer(frame(3), Duration::from_millis(5)).unwrap_err();
        assert_eq!(rejected.pixels[0], 3);

        // Released: the processed buffer comes back to the producer
        handoff.release(taken);
        let spare = handoff.offer(frame(4), Duration::ZERO).unwrap().unwrap();
        assert_eq!(spare.pixels[0], 1);
        assert_eq!(handoff.take(Duration::ZERO).unwrap().pixels[0], 4);
    }

    #[test]
    fn test_take_times_out_when_empty() {
        let handoff = Handoff::new();
        assert!(handoff.take(Duration::from_millis(10)).is_none());
        assert!(!handoff.is_occupied());
    }

    #[test]
    fn test_offer_waits_for_release() {
        let handoff = Arc::new(Handoff::new());
        handoff.offer(frame(1), Duration::ZERO).unwrap();
        let taken = handoff.take(Duration::ZERO).unwrap();

        let releaser = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                handoff.release(taken);
            })
        };

        let spare = handoff.offer(frame(2), Duration::from_secs(5));
        assert!(spare.is_ok());
        releaser.join().unwrap();
    }

    #[test]
    fn test_take_wakes_on_offer() {
        let handoff = Arc::new(Handoff::new());
        let consumer = {
            let handoff = Arc::clone(&handoff);
            thread::spawn(move || handoff.take(Duration::from_secs(5)))
        };

        thread::sleep(Duration::from_millis(20));
        handoff.offer(frame(9), Duration::ZERO).unwrap();
        assert_eq!(consumer.join().unwrap().unwrap().pixels[0], 9);
    }
}
