//! Connection liveness monitor.
//!
//! The [`HeartbeatMonitor`] tracks one outstanding heartbeat at a time. A
//! polling task ticks at a short interval and, while a probe is
//! unacknowledged, accumulates the elapsed time into the measured latency.
//! Once the latency exceeds the configured timeout the monitor moves to
//! [`HeartbeatPhase::TimedOut`], invokes the registered timeout callback
//! exactly once and the polling task exits.
//!
//! # Cancellation
//!
//! Each run of the polling task is tagged with a generation number and
//! owns the receiving half of a fresh `watch` channel. `stop()` and the
//! timeout path both bump the generation and drop the sender, so a task
//! from a superseded run wakes up, sees it is stale and exits without
//! touching state that belongs to a later `start()`.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Errors raised by [`HeartbeatMonitor::start`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeartbeatError {
    /// The monitor is already polling.
    #[error("heartbeat monitor is already running")]
    AlreadyRunning,

    /// `start()` was called outside a Tokio runtime.
    #[error("heartbeat monitor requires a Tokio runtime")]
    NoRuntime,
}

/// Lifecycle of the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatPhase {
    /// Not polling.
    Idle,
    /// Polling for acknowledgement timeouts.
    Running,
    /// A probe went unacknowledged for too long. Terminal until restarted.
    TimedOut,
}

/// Passed to the timeout callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatTimeout {
    /// Measured latency when the timeout fired.
    pub latency: Duration,
    /// The configured limit it exceeded.
    pub timeout: Duration,
}

/// Callback invoked once per timed-out run.
pub type TimeoutCallback = Arc<dyn Fn(HeartbeatTimeout) + Send + Sync>;

#[derive(Debug)]
struct State {
    phase: HeartbeatPhase,
    latency: Duration,
    outstanding: bool,
    generation: u64,
    cancel: Option<watch::Sender<()>>,
}

impl State {
    /// Retire the current run: stale tasks exit on their next wake-up.
    fn retire(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        self.cancel = None;
    }
}

struct Shared {
    timeout: Duration,
    poll_interval: Duration,
    state: Mutex<State>,
    on_timeout: Mutex<Option<TimeoutCallback>>,
}

enum Tick {
    Continue,
    Stop,
    TimedOut(HeartbeatTimeout),
}

/// Detects a dead gateway connection from heartbeat acknowledgement timing.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    shared: Arc<Shared>,
}

impl HeartbeatMonitor {
    /// Create an idle monitor.
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                timeout,
                poll_interval,
                state: Mutex::new(State {
                    phase: HeartbeatPhase::Idle,
                    latency: Duration::ZERO,
                    outstanding: false,
                    generation: 0,
                    cancel: None,
                }),
                on_timeout: Mutex::new(None),
            }),
        }
    }

    /// Register the callback invoked when a probe times out, replacing any
    /// previous one.
    pub fn on_timeout(&self, callback: impl Fn(HeartbeatTimeout) + Send + Sync + 'static) {
        *self.shared.on_timeout.lock() = Some(Arc::new(callback));
    }

    /// Start polling.
    ///
    /// # Errors
    ///
    /// Returns [`HeartbeatError::AlreadyRunning`] while a previous run is
    /// still active and [`HeartbeatError::NoRuntime`] outside Tokio.
    pub fn start(&self) -> Result<(), HeartbeatError> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Err(HeartbeatError::NoRuntime);
        };
        let (generation, cancel) = {
            let mut state = self.shared.state.lock();
            if state.phase == HeartbeatPhase::Running {
                return Err(HeartbeatError::AlreadyRunning);
            }
            state.retire();
            let (tx, rx) = watch::channel(());
            state.cancel = Some(tx);
            state.phase = HeartbeatPhase::Running;
            state.latency = Duration::ZERO;
            state.outstanding = false;
            (state.generation, rx)
        };
        debug!(
            generation,
            timeout = ?self.shared.timeout,
            "heartbeat monitor started"
        );
        runtime.spawn(poll(Arc::clone(&self.shared), generation, cancel));
        Ok(())
    }

    /// Stop polling and return to [`HeartbeatPhase::Idle`]. Idempotent.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.retire();
        state.phase = HeartbeatPhase::Idle;
        state.latency = Duration::ZERO;
        state.outstanding = false;
    }

    /// A heartbeat was just sent: reset the latency and mark it outstanding.
    pub fn sent(&self) {
        let mut state = self.shared.state.lock();
        state.latency = Duration::ZERO;
        state.outstanding = true;
    }

    /// The server acknowledged the outstanding heartbeat.
    pub fn acknowledged(&self) {
        let mut state = self.shared.state.lock();
        state.outstanding = false;
    }

    /// Current phase.
    pub fn phase(&self) -> HeartbeatPhase {
        self.shared.state.lock().phase
    }

    /// Whether the polling task is active.
    pub fn is_running(&self) -> bool {
        self.phase() == HeartbeatPhase::Running
    }

    /// Whether the last run ended in a timeout.
    pub fn has_timed_out(&self) -> bool {
        self.phase() == HeartbeatPhase::TimedOut
    }

    /// Whether a heartbeat is awaiting acknowledgement.
    pub fn has_unacknowledged_probe(&self) -> bool {
        self.shared.state.lock().outstanding
    }

    /// Time the outstanding heartbeat has waited so far.
    pub fn latency(&self) -> Duration {
        self.shared.state.lock().latency
    }

    /// The configured timeout.
    pub fn timeout(&self) -> Duration {
        self.shared.timeout
    }
}

impl fmt::Debug for HeartbeatMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("HeartbeatMonitor")
            .field("phase", &state.phase)
            .field("latency", &state.latency)
            .field("outstanding", &state.outstanding)
            .field("timeout", &self.shared.timeout)
            .finish_non_exhaustive()
    }
}

async fn poll(shared: Arc<Shared>, generation: u64, mut cancel: watch::Receiver<()>) {
    let mut ticker = tokio::time::interval(shared.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    let mut last = Instant::now();

    loop {
        tokio::select! {
            // Resolves with an error once the sender is dropped.
            _ = cancel.changed() => break,
            _ = ticker.tick() => {}
        }
        let now = Instant::now();
        let elapsed = now.duration_since(last);
        last = now;

        match tick(&shared, generation, elapsed) {
            Tick::Continue => {}
            Tick::Stop => break,
            Tick::TimedOut(timeout) => {
                warn!(
                    latency = ?timeout.latency,
                    timeout = ?timeout.timeout,
                    "heartbeat acknowledgement timed out"
                );
                let callback = shared.on_timeout.lock().clone();
                if let Some(callback) = callback {
                    callback(timeout);
                }
                break;
            }
        }
    }
    debug!(generation, "heartbeat poll loop exited");
}

fn tick(shared: &Shared, generation: u64, elapsed: Duration) -> Tick {
    let mut state = shared.state.lock();
    if state.generation != generation || state.phase != HeartbeatPhase::Running {
        return Tick::Stop;
    }
    if !state.outstanding {
        return Tick::Continue;
    }
    state.latency = state.latency.saturating_add(elapsed);
    if state.latency <= shared.timeout {
        return Tick::Continue;
    }
    state.phase = HeartbeatPhase::TimedOut;
    state.retire();
    Tick::TimedOut(HeartbeatTimeout {
        latency: state.latency,
        timeout: shared.timeout,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use tokio::time::sleep;

    use super::*;

    fn monitor() -> (HeartbeatMonitor, Arc<AtomicUsize>) {
        let monitor = HeartbeatMonitor::new(Duration::from_millis(1000), Duration::from_millis(100));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        monitor.on_timeout(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (monitor, fired)
    }

    #[tokio::test(start_paused = true)]
    async fn unacknowledged_probe_times_out_once() {
        let (monitor, fired) = monitor();
        monitor.start().unwrap();
        monitor.sent();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(monitor.has_timed_out());
        assert!(monitor.latency() > Duration::from_millis(1000));

        sleep(Duration::from_millis(5000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn acknowledged_probe_never_times_out() {
        let (monitor, fired) = monitor();
        monitor.start().unwrap();
        monitor.sent();
        sleep(Duration::from_millis(500)).await;
        monitor.acknowledged();
        sleep(Duration::from_millis(3000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(monitor.is_running());
        assert!(!monitor.has_unacknowledged_probe());
    }

    #[tokio::test(start_paused = true)]
    async fn resending_resets_latency() {
        let (monitor, fired) = monitor();
        monitor.start().unwrap();
        for _ in 0..5 {
            monitor.sent();
            sleep(Duration::from_millis(700)).await;
        }
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(monitor.latency() <= Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn start_twice_fails() {
        let (monitor, _) = monitor();
        monitor.start().unwrap();
        assert_eq!(monitor.start(), Err(HeartbeatError::AlreadyRunning));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_resets() {
        let (monitor, fired) = monitor();
        monitor.stop();
        monitor.start().unwrap();
        monitor.sent();
        monitor.stop();
        monitor.stop();
        assert_eq!(monitor.phase(), HeartbeatPhase::Idle);
        assert!(!monitor.has_unacknowledged_probe());
        sleep(Duration::from_millis(3000)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop_ignores_stale_loop() {
        let (monitor, fired) = monitor();
        monitor.start().unwrap();
        monitor.stop();
        monitor.start().unwrap();
        monitor.sent();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn can_restart_after_timeout() {
        let (monitor, fired) = monitor();
        monitor.start().unwrap();
        monitor.sent();
        sleep(Duration::from_millis(1500)).await;
        assert!(monitor.has_timed_out());

        monitor.start().unwrap();
        assert!(monitor.is_running());
        assert_eq!(monitor.latency(), Duration::ZERO);
        monitor.sent();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn start_outside_runtime_fails() {
        let (monitor, _) = monitor();
        assert_eq!(monitor.start(), Err(HeartbeatError::NoRuntime));
    }
}
