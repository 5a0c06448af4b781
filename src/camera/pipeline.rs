// Capture and processing threads
//
// FrameCapture reads raw frames at the target rate and hands them over one at
// a time; FrameProcessor fixes orientation, encodes and publishes. A slow
// encode makes capture drop frames, never queue them.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::{
    CameraConfig, CameraError, Frame, FrameEncoder, FrameSlot, FrameSource, Handoff, RawFrame,
};
use crate::shutdown::Shutdown;

/// How long capture waits for the processor before dropping a frame
const HANDOFF_RETRY: Duration = Duration::from_millis(10);

/// Longest the processor sleeps before re-checking the shutdown flag
const PROCESS_WAIT: Duration = Duration::from_secs(1);

/// Running camera pipeline (capture + processing threads)
pub struct CameraPipeline {
    capture: Option<JoinHandle<()>>,
    processor: Option<JoinHandle<()>>,
}

impl CameraPipeline {
    /// Start both threads, publishing into `slot`
    pub fn spawn(
        source: Box<dyn FrameSource>,
        config: &CameraConfig,
        slot: Arc<FrameSlot>,
        shutdown: Shutdown,
    ) -> std::io::Result<Self> {
        let handoff = Arc::new(Handoff::new());
        let encoder = FrameEncoder::new(config.orientation, config.jpeg_quality);
        let period = Duration::from_secs_f64(1.0 / config.frame_rate.max(1) as f64);

        let processor = thread::Builder::new().name("frame-processor".into()).spawn({
            let handoff = Arc::clone(&handoff);
            let shutdown = shutdown.clone();
            move || process_loop(&handoff, encoder, &slot, &shutdown)
        })?;

        let capture = thread::Builder::new()
            .name("frame-capture".into())
            .spawn(move || capture_loop(source, &handoff, period, &shutdown))?;

        info!(
            "Camera pipeline started: {}x{} @ {}fps, quality {}, {:?}",
            config.width, config.height, config.frame_rate, config.jpeg_quality, config.orientation
        );
        Ok(Self {
            capture: Some(capture),
            processor: Some(processor),
        })
    }

    /// Wait for both threads to exit. The shutdown flag must already be raised.
    pub fn join(mut self) {
        for (name, handle) in [
            ("capture", self.capture.take()),
            ("processor", self.processor.take()),
        ] {
            if let Some(handle) = handle {
                if handle.join().is_err() {
                    warn!("Frame {} thread panicked", name);
                }
            }
        }
    }
}

fn capture_loop(
    mut source: Box<dyn FrameSource>,
    handoff: &Handoff,
    period: Duration,
    shutdown: &Shutdown,
) {
    let (width, height) = source.resolution();
    let mut buffer = RawFrame::new(width, height);
    let mut dropped: u64 = 0;

    while !shutdown.is_triggered() {
        let started = Instant::now();

        match source.capture(&mut buffer) {
            Ok(()) => buffer.captured_at = Instant::now(),
            // Stream reads give up once shutdown is raised
            Err(_) if shutdown.is_triggered() => break,
            Err(CameraError::EndOfStream) => {
                warn!("Camera stream ended, capture stopping");
                break;
            }
            Err(e) => {
                warn!("Frame capture failed: {}", e);
                thread::sleep(period);
                continue;
            }
        }

        buffer = match handoff.offer(buffer, HANDOFF_RETRY) {
            Ok(spare) => spare.unwrap_or_else(|| RawFrame::new(width, height)),
            Err(rejected) => {
                dropped += 1;
                debug!("Processor busy, dropped frame ({} so far)", dropped);
                rejected
            }
        };

        if let Some(rest) = period.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    info!("Frame capture stopped ({} frames dropped)", dropped);
}

fn process_loop(handoff: &Handoff, encoder: FrameEncoder, slot: &FrameSlot, shutdown: &Shutdown) {
    let mut sequence: u64 = 0;

    while !shutdown.is_triggered() {
        let Some(mut raw) = handoff.take(PROCESS_WAIT) else {
            continue;
        };

        match encoder.encode(&mut raw) {
            Ok(jpeg) => {
                sequence += 1;
                slot.publish(Frame {
                    jpeg,
                    width: raw.width,
                    height: raw.height,
                    sequence,
                    captured_at: raw.captured_at,
                });
            }
            // The slot keeps the previous frame
            Err(e) => warn!("Dropping frame: {}", e),
        }

        handoff.release(raw);
    }

    info!("Frame processing stopped ({} frames published)", sequence);
}
