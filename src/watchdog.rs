// Communication watchdog
// Note: if the operator's connection drops mid-drive, nothing else would stop
// the robot. The watchdog cuts the motors once no request has arrived within
// the timeout, and does so exactly once per silence episode.

use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::messages::WatchdogState;
use crate::shutdown::Shutdown;

/// Default silence allowed before the motors are cut
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

/// Watchdog transition logic, independent of threads and clocks
#[derive(Debug)]
pub struct WatchdogCore {
    state: WatchdogState,
    timeout: Duration,
    seen_activity: u64,
}

impl WatchdogCore {
    /// Starts tripped: nothing has been heard yet
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: WatchdogState::Tripped,
            timeout,
            seen_activity: 0,
        }
    }

    pub fn state(&self) -> WatchdogState {
        self.state
    }

    /// Evaluate one wakeup
    ///
    /// `activity_seq` counts activity signals so far and `since_activity` is
    /// the time since the most recent one. Returns the new state if it changed.
    pub fn poll(&mut self, activity_seq: u64, since_activity: Duration) -> Option<WatchdogState> {
        if activity_seq != self.seen_activity {
            self.seen_activity = activity_seq;
            if self.state == WatchdogState::Tripped {
                self.state = WatchdogState::Armed;
                return Some(WatchdogState::Armed);
            }
        }

        if self.state == WatchdogState::Armed && since_activity >= self.timeout {
            self.state = WatchdogState::Tripped;
            return Some(WatchdogState::Tripped);
        }

        None
    }

    /// How long to sleep before the next poll
    pub fn next_wait(&self, since_activity: Duration) -> Duration {
        match self.state {
            WatchdogState::Tripped => self.timeout,
            WatchdogState::Armed => self.timeout.saturating_sub(since_activity),
        }
    }
}

struct Shared {
    epoch: Instant,
    last_activity_ns: AtomicU64,
    activity_seq: AtomicU64,
    state: AtomicU8,
    shutdown: Shutdown,
    thread: OnceLock<Thread>,
}

impl Shared {
    fn since_activity(&self) -> Duration {
        let last = Duration::from_nanos(self.last_activity_ns.load(Ordering::Acquire));
        self.epoch.elapsed().saturating_sub(last)
    }

    fn wake(&self) {
        if let Some(thread) = self.thread.get() {
            thread.unpark();
        }
    }
}

fn encode_state(state: WatchdogState) -> u8 {
    match state {
        WatchdogState::Armed => 0,
        WatchdogState::Tripped => 1,
    }
}

fn decode_state(raw: u8) -> WatchdogState {
    if raw == 0 {
        WatchdogState::Armed
    } else {
        WatchdogState::Tripped
    }
}

/// Cheap, cloneable handle for reporting activity from request handlers
#[derive(Clone)]
pub struct WatchdogHandle {
    shared: Arc<Shared>,
}

impl WatchdogHandle {
    /// Record that a request arrived. Lock-free; callable from any thread.
    pub fn activity(&self) {
        let now = self.shared.epoch.elapsed().as_nanos() as u64;
        self.shared.last_activity_ns.fetch_max(now, Ordering::AcqRel);
        self.shared.activity_seq.fetch_add(1, Ordering::AcqRel);
        self.shared.wake();
    }

    pub fn state(&self) -> WatchdogState {
        decode_state(self.shared.state.load(Ordering::Acquire))
    }

    /// Number of activity signals recorded so far
    #[cfg(test)]
    pub(crate) fn activity_count(&self) -> u64 {
        self.shared.activity_seq.load(Ordering::Acquire)
    }
}

/// Watchdog timer thread
pub struct Watchdog {
    handle: WatchdogHandle,
    thread: Option<JoinHandle<()>>,
}

impl Watchdog {
    /// Start the watchdog thread
    ///
    /// `on_transition` runs on the watchdog thread for every state change;
    /// it receives `Tripped` exactly once per silence episode and must not
    /// block for long.
    pub fn spawn<F>(timeout: Duration, shutdown: Shutdown, on_transition: F) -> std::io::Result<Self>
    where
        F: FnMut(WatchdogState) + Send + 'static,
    {
        let shared = Arc::new(Shared {
            epoch: Instant::now(),
            last_activity_ns: AtomicU64::new(0),
            activity_seq: AtomicU64::new(0),
            state: AtomicU8::new(encode_state(WatchdogState::Tripped)),
            shutdown,
            thread: OnceLock::new(),
        });

        let thread = thread::Builder::new().name("watchdog".into()).spawn({
            let shared = Arc::clone(&shared);
            move || run(shared, timeout, on_transition)
        })?;
        let _ = shared.thread.set(thread.thread().clone());

        info!("Watchdog started: {}ms timeout", timeout.as_millis());
        Ok(Self {
            handle: WatchdogHandle { shared },
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> WatchdogHandle {
        self.handle.clone()
    }

    pub fn activity(&self) {
        self.handle.activity();
    }

    pub fn state(&self) -> WatchdogState {
        self.handle.state()
    }

    /// Raise the shutdown flag; the loop exits at its next wakeup
    pub fn stop(&self) {
        self.handle.shared.shutdown.trigger();
        self.handle.shared.wake();
    }

    /// Wait for the thread to exit. The shutdown flag must already be raised.
    pub fn join(mut self) {
        self.join_thread();
    }

    fn join_thread(&mut self) {
        if let Some(thread) = self.thread.take() {
            self.handle.shared.wake();
            if thread.join().is_err() {
                warn!("Watchdog thread panicked");
            }
        }
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if self.thread.is_some() {
            self.stop();
            self.join_thread();
        }
    }
}

fn run<F>(shared: Arc<Shared>, timeout: Duration, mut on_transition: F)
where
    F: FnMut(WatchdogState),
{
    let mut core = WatchdogCore::new(timeout);

    while !shared.shutdown.is_triggered() {
        let seq = shared.activity_seq.load(Ordering::Acquire);
        let since = shared.since_activity();

        if let Some(state) = core.poll(seq, since) {
            shared.state.store(encode_state(state), Ordering::Release);
            match state {
                WatchdogState::Armed => info!("Reconnected..."),
                WatchdogState::Tripped => warn!("Timed out ({:?} without a request)", since),
            }
            on_transition(state);
            continue;
        }

        thread::park_timeout(core.next_wait(since));
    }

    info!("Watchdog stopped");
}
