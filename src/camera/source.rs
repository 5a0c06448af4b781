// Raw frame sources
//
// Cameras are driven by an external capture process that writes packed RGB24
// frames back to back, e.g.
//   ffmpeg -f v4l2 -video_size 240x192 -i /dev/video0 -f rawvideo -pix_fmt rgb24 pipe:
// The stream is either read from a path (FIFO, file) or from a command's stdout.
// Both wait for data in short polls, so a stalled camera never blocks shutdown.

use std::fs::File;
use std::io::{BufReader, ErrorKind, Read};
use std::os::fd::AsRawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::{Child, ChildStdout, Command, Stdio};

use tracing::{info, warn};

use super::{CameraError, RawFrame};
use crate::shutdown::Shutdown;

/// Longest a blocked stream read goes without checking the shutdown flag
const POLL_INTERVAL_MS: libc::c_int = 100;

/// Anything that can fill a raw frame buffer
pub trait FrameSource: Send {
    /// Frame size in pixels (width, height)
    fn resolution(&self) -> (u32, u32);

    /// Capture the next frame into `frame`, resizing its buffer if needed
    fn capture(&mut self, frame: &mut RawFrame) -> Result<(), CameraError>;
}

/// Fixed-size RGB24 frames read back to back from a byte stream
pub struct StreamSource<R> {
    reader: R,
    width: u32,
    height: u32,
}

impl<R: Read + Send> StreamSource<R> {
    pub fn new(reader: R, width: u32, height: u32) -> Self {
        Self {
            reader,
            width,
            height,
        }
    }
}

impl StreamSource<BufReader<PollReader<File>>> {
    /// Open a file or FIFO carrying the raw stream
    ///
    /// Reads give up with an error once `shutdown` is raised.
    pub fn open(
        path: impl AsRef<Path>,
        width: u32,
        height: u32,
        shutdown: Shutdown,
    ) -> std::io::Result<Self> {
        let path = path.as_ref();
        info!("Opening raw camera stream {}", path.display());
        let file = File::open(path)?;
        Ok(Self::new(
            BufReader::new(PollReader::new(file, shutdown)),
            width,
            height,
        ))
    }
}

impl<R: Read + Send> FrameSource for StreamSource<R> {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&mut self, frame: &mut RawFrame) -> Result<(), CameraError> {
        frame.width = self.width;
        frame.height = self.height;
        frame
            .pixels
            .resize(RawFrame::expected_len(self.width, self.height), 0);

        self.reader.read_exact(&mut frame.pixels).map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                CameraError::EndOfStream
            } else {
                CameraError::Io(e)
            }
        })
    }
}

/// Blocking reader over a file descriptor that polls for data
///
/// Each wait lasts at most `POLL_INTERVAL_MS`; once the shutdown flag is
/// raised the next read fails instead of waiting for data that may never come.
pub struct PollReader<R> {
    inner: R,
    shutdown: Shutdown,
}

impl<R: Read + AsRawFd> PollReader<R> {
    pub fn new(inner: R, shutdown: Shutdown) -> Self {
        Self { inner, shutdown }
    }
}

impl<R: Read + AsRawFd> Read for PollReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            if self.shutdown.is_triggered() {
                return Err(std::io::Error::other("camera read cancelled by shutdown"));
            }

            let mut fds = libc::pollfd {
                fd: self.inner.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: `fds` is a single valid pollfd for the duration of the call
            let ready = unsafe { libc::poll(&mut fds, 1, POLL_INTERVAL_MS) };
            if ready < 0 {
                let err = std::io::Error::last_os_error();
                if err.kind() == ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }
            // Readable, hung up or errored: the read itself reports which
            if ready > 0 {
                return self.inner.read(buf);
            }
        }
    }
}

/// Raw stream from the stdout of a capture command
pub struct CommandSource {
    child: Child,
    stream: StreamSource<BufReader<PollReader<ChildStdout>>>,
}

impl CommandSource {
    /// Run `command` through `sh -c` and read frames from its stdout
    ///
    /// The command runs in its own process group, which is killed when the
    /// source is dropped.
    pub fn spawn(
        command: &str,
        width: u32,
        height: u32,
        shutdown: Shutdown,
    ) -> std::io::Result<Self> {
        info!("Starting camera command: {}", command);
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("camera command has no stdout"))?;

        Ok(Self {
            child,
            stream: StreamSource::new(
                BufReader::new(PollReader::new(stdout, shutdown)),
                width,
                height,
            ),
        })
    }
}

impl FrameSource for CommandSource {
    fn resolution(&self) -> (u32, u32) {
        self.stream.resolution()
    }

    fn capture(&mut self, frame: &mut RawFrame) -> Result<(), CameraError> {
        self.stream.capture(frame)
    }
}

impl Drop for CommandSource {
    fn drop(&mut self) {
        // `sh -c` may have forked the real capture process; kill the group
        let group = self.child.id() as libc::pid_t;
        // SAFETY: plain signal send, no memory is shared with the callee
        if unsafe { libc::kill(-group, libc::SIGKILL) } != 0 {
            warn!(
                "Failed to stop camera command: {}",
                std::io::Error::last_os_error()
            );
        }
        let _ = self.child.wait();
    }
}

/// Synthetic moving gradient, for running without a camera
pub struct TestPattern {
    width: u32,
    height: u32,
    tick: u32,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            tick: 0,
        }
    }
}

impl FrameSource for TestPattern {
    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn capture(&mut self, frame: &mut RawFrame) -> Result<(), CameraError> {
        frame.width = self.width;
        frame.height = self.height;
        frame
            .pixels
            .resize(RawFrame::expected_len(self.width, self.height), 0);

        let width = self.width.max(1);
        for (i, px) in frame.pixels.chunks_exact_mut(3).enumerate() {
            let x = i as u32 % width;
            let y = i as u32 / width;
            px[0] = (x.wrapping_add(self.tick) & 0xFF) as u8;
            px[1] = (y & 0xFF) as u8;
            px[2] = (self.tick & 0xFF) as u8;
        }
        self.tick = self.tick.wrapping_add(1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_stream_source_splits_frames() {
        // Two 2x1 frames, then a truncated third
        let bytes: Vec<u8> = (0..15).collect();
        let mut source = StreamSource::new(Cursor::new(bytes), 2, 1);
        let mut frame = RawFrame::new(0, 0);

        source.capture(&mut frame).unwrap();
        assert_eq!(frame.pixels, vec![0, 1, 2, 3, 4, 5]);
        source.capture(&mut frame).unwrap();
        assert_eq!(frame.pixels, vec![6, 7, 8, 9, 10, 11]);
        assert_eq!((frame.width, frame.height), (2, 1));

        let err = source.capture(&mut frame).unwrap_err();
        assert!(matches!(err, CameraError::EndOfStream));
    }

    #[test]
    fn test_pattern_changes_between_frames() {
        let mut source = TestPattern::new(8, 4);
        let mut first = RawFrame::new(8, 4);
        let mut second = RawFrame::new(8, 4);

        source.capture(&mut first).unwrap();
        source.capture(&mut second).unwrap();
        assert_eq!(first.pixels.len(), 8 * 4 * 3);
        assert_ne!(first.pixels, second.pixels);
    }

    #[test]
    fn test_command_source_reads_stdout() {
        let mut source = CommandSource::spawn("printf 'abcdef'", 2, 1, Shutdown::new()).unwrap();
        let mut frame = RawFrame::new(2, 1);

        source.capture(&mut frame).unwrap();
        assert_eq!(frame.pixels, b"abcdef".to_vec());
        assert!(matches!(
            source.capture(&mut frame).unwrap_err(),
            CameraError::EndOfStream
        ));
    }

    #[test]
    fn test_stalled_command_read_gives_up_on_shutdown() {
        let shutdown = Shutdown::new();
        let mut source = CommandSource::spawn("sleep 30", 2, 1, shutdown.clone()).unwrap();
        let mut frame = RawFrame::new(2, 1);

        let trigger = std::thread::spawn({
            let shutdown = shutdown.clone();
            move || {
                std::thread::sleep(std::time::Duration::from_millis(150));
                shutdown.trigger();
            }
        });

        let started = std::time::Instant::now();
        assert!(matches!(
            source.capture(&mut frame).unwrap_err(),
            CameraError::Io(_)
        ));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        trigger.join().unwrap();

        // Killing the group must not wait for `sleep` to finish
        let started = std::time::Instant::now();
        drop(source);
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
    }
}
