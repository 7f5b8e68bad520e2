//! Background I/O worker
//!
//! The worker owns the active [`Connection`] and runs a loop on its own
//! thread: flush the [`OutboundQueue`], perform one read, decode it and hand
//! the text to the consumer. It is driven from a control thread through
//! [`IoWorker::pause`], [`IoWorker::resume`], [`IoWorker::send_line`] and
//! [`IoWorker::shutdown`], none of which block.
//!
//! Replacing the connection uses a fixed handshake:
//!
//! 1. `pause()`
//! 2. poll `is_paused()` until it reports `true`
//! 3. build the new connection (this may fail)
//! 4. `resume(Some(new))`, or `resume(None)` if step 3 failed
//!
//! [`IoWorker::swap_connection`] runs exactly this sequence. The handshake
//! assumes a single controlling caller; concurrent drivers are not supported.

use crate::core::codec::{decode_lossy, decode_unit};
use crate::core::connection::{Connection, ConnectionError};
use crate::core::queue::{OutboundQueue, QueueConfig, QueueError};
use crossbeam_channel::Receiver;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// How often the control side re-checks `is_paused()` during a swap
const HANDSHAKE_POLL: Duration = Duration::from_millis(10);

/// Worker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Reading and writing
    Running,
    /// Pause asked for, not yet observed by the loop
    PauseRequested,
    /// Idle, the connection is untouched and may be swapped
    Paused,
    /// Stopped for good
    Shutdown,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::PauseRequested => write!(f, "pause requested"),
            Self::Paused => write!(f, "paused"),
            Self::Shutdown => write!(f, "shut down"),
        }
    }
}

/// Worker tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Idle wait while paused, and back-off after a failed read
    pub idle_poll_ms: u64,
    /// Outbound queue sizing
    pub queue: QueueConfig,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            idle_poll_ms: 100,
            queue: QueueConfig::default(),
        }
    }
}

impl WorkerConfig {
    /// Idle wait as a duration
    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}

/// Control API errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// A connection was offered while the worker was not paused
    #[error("Connection can only be swapped while paused (worker is {0})")]
    NotPaused(WorkerState),

    /// The worker has been shut down
    #[error("Worker has shut down")]
    ShutDown,

    /// The worker thread could not be started
    #[error("Failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    /// Outbound queue refused the line
    #[error(transparent)]
    Queue(#[from] QueueError),
}

/// Hot-swap handshake errors
#[derive(Error, Debug)]
pub enum SwapError {
    /// The worker did not reach the paused state in time
    #[error("Worker did not pause within {0:?}")]
    PauseTimeout(Duration),

    /// The new connection could not be opened; the old one is still active
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Control API error
    #[error(transparent)]
    Worker(#[from] WorkerError),
}

/// Worker counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Units delivered to the consumer
    pub units_received: u64,
    /// Bytes read from connections
    pub bytes_received: u64,
    /// Outbound lines sent
    pub lines_sent: u64,
    /// Outbound lines that failed to send
    pub send_failures: u64,
    /// Outbound lines evicted from a full queue
    pub lines_dropped: u64,
    /// Failed reads
    pub read_errors: u64,
    /// Units that needed replacement characters
    pub decode_errors: u64,
    /// Connection swaps
    pub swaps: u64,
}

#[derive(Debug, Default)]
struct Counters {
    units_received: AtomicU64,
    bytes_received: AtomicU64,
    lines_sent: AtomicU64,
    send_failures: AtomicU64,
    read_errors: AtomicU64,
    decode_errors: AtomicU64,
    swaps: AtomicU64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

struct Shared {
    state: Mutex<WorkerState>,
    state_changed: Condvar,
    connection: Mutex<Box<dyn Connection>>,
    queue: OutboundQueue,
    counters: Counters,
    idle_poll: Duration,
}

impl Shared {
    fn set_state(&self, state: &mut WorkerState, next: WorkerState) {
        *state = next;
        self.state_changed.notify_all();
    }
}

/// Handle to a running worker thread
///
/// Dropping the handle shuts the worker down and waits for its thread.
pub struct IoWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl IoWorker {
    /// Start a worker reading from `connection`
    ///
    /// `on_data` is called on the worker thread, once per decoded unit.
    pub fn spawn<F>(
        connection: Box<dyn Connection>,
        config: WorkerConfig,
        on_data: F,
    ) -> Result<Self, WorkerError>
    where
        F: FnMut(String) + Send + 'static,
    {
        let description = connection.describe();
        let shared = Arc::new(Shared {
            state: Mutex::new(WorkerState::Running),
            state_changed: Condvar::new(),
            connection: Mutex::new(connection),
            queue: OutboundQueue::new(config.queue),
            counters: Counters::default(),
            idle_poll: config.idle_poll(),
        });

        let worker_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("io-worker".into())
            .spawn(move || run(&worker_shared, on_data))
            .map_err(WorkerError::Spawn)?;

        info!(connection = %description, "io worker started");

        Ok(Self {
            shared,
            handle: Some(handle),
        })
    }

    /// Start a worker that delivers units through a channel
    ///
    /// Once the receiver is dropped the worker keeps running and discards
    /// what it reads. The first discarded unit is logged at debug level.
    pub fn spawn_with_channel(
        connection: Box<dyn Connection>,
        config: WorkerConfig,
    ) -> Result<(Self, Receiver<String>), WorkerError> {
        let (tx, rx) = crossbeam_channel::unbounded();
        let mut receiver_gone = false;
        let worker = Self::spawn(connection, config, move |unit| {
            if tx.send(unit).is_err() && !receiver_gone {
                receiver_gone = true;
                debug!("receiver dropped, discarding received units");
            }
        })?;
        Ok((worker, rx))
    }

    /// Ask the worker to pause; returns immediately
    pub fn pause(&self) {
        let mut state = self.shared.state.lock();
        if *state == WorkerState::Running {
            self.shared.set_state(&mut state, WorkerState::PauseRequested);
            debug!("pause requested");
        }
    }

    /// Resume the worker, optionally adopting a new connection first
    ///
    /// A new connection is only accepted while the worker is
    /// [`WorkerState::Paused`]; otherwise it is dropped and
    /// [`WorkerError::NotPaused`] is returned. Without a connection, a pending
    /// pause request is cancelled and resuming a running worker does nothing.
    pub fn resume(&self, connection: Option<Box<dyn Connection>>) -> Result<(), WorkerError> {
        let mut state = self.shared.state.lock();
        match (*state, connection) {
            (WorkerState::Shutdown, _) => Err(WorkerError::ShutDown),
            (WorkerState::Paused, Some(next)) => {
                let description = next.describe();
                // The loop is idle while paused, so it does not hold this lock
                let previous = std::mem::replace(&mut *self.shared.connection.lock(), next);
                info!(from = %previous.describe(), to = %description, "connection swapped");
                drop(previous);
                bump(&self.shared.counters.swaps, 1);
                self.shared.set_state(&mut state, WorkerState::Running);
                Ok(())
            }
            (current, Some(_)) => Err(WorkerError::NotPaused(current)),
            (WorkerState::Running, None) => Ok(()),
            (_, None) => {
                self.shared.set_state(&mut state, WorkerState::Running);
                debug!("resumed");
                Ok(())
            }
        }
    }

    /// Stop the worker for good; returns immediately
    pub fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        if *state != WorkerState::Shutdown {
            self.shared.set_state(&mut state, WorkerState::Shutdown);
            info!("io worker shutdown requested");
        }
    }

    /// Queue a line for sending
    ///
    /// Lines are delivered in order the next time the loop runs, which only
    /// happens while the worker is running.
    pub fn send_line(&self, line: impl Into<String>) -> Result<(), WorkerError> {
        self.shared.queue.push(line)?;
        Ok(())
    }

    /// Whether the loop has observed a pause request and is idle
    pub fn is_paused(&self) -> bool {
        *self.shared.state.lock() == WorkerState::Paused
    }

    /// Current state
    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    /// Block until the worker reports paused, for at most `timeout`
    ///
    /// Returns `false` if it did not pause in time or no pause is pending.
    pub fn wait_until_paused(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        loop {
            match *state {
                WorkerState::Paused => return true,
                WorkerState::Running | WorkerState::Shutdown => return false,
                WorkerState::PauseRequested => {}
            }
            if self
                .shared
                .state_changed
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return *state == WorkerState::Paused;
            }
        }
    }

    /// Replace the active connection using the pause/poll/open/resume handshake
    ///
    /// If `open` fails the worker resumes on its current connection and the
    /// error is returned. If the worker does not pause within `timeout` the
    /// pause request is withdrawn.
    pub fn swap_connection<F>(&self, open: F, timeout: Duration) -> Result<(), SwapError>
    where
        F: FnOnce() -> Result<Box<dyn Connection>, ConnectionError>,
    {
        self.pause();
        let deadline = Instant::now() + timeout;
        while !self.is_paused() {
            if self.state() == WorkerState::Shutdown {
                return Err(WorkerError::ShutDown.into());
            }
            if Instant::now() >= deadline {
                self.resume(None)?;
                return Err(SwapError::PauseTimeout(timeout));
            }
            thread::sleep(HANDSHAKE_POLL);
        }

        match open() {
            Ok(next) => {
                self.resume(Some(next))?;
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "new connection failed, keeping the current one");
                self.resume(None)?;
                Err(err.into())
            }
        }
    }

    /// Snapshot of the worker counters
    pub fn stats(&self) -> WorkerStats {
        let c = &self.shared.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        WorkerStats {
            units_received: load(&c.units_received),
            bytes_received: load(&c.bytes_received),
            lines_sent: load(&c.lines_sent),
            send_failures: load(&c.send_failures),
            lines_dropped: self.shared.queue.dropped(),
            read_errors: load(&c.read_errors),
            decode_errors: load(&c.decode_errors),
            swaps: load(&c.swaps),
        }
    }

    /// Lines waiting to be sent
    pub fn pending_lines(&self) -> usize {
        self.shared.queue.len()
    }

    /// Whether the worker thread has exited
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Shut down and wait for the worker thread to exit
    pub fn join(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("io worker thread panicked");
            }
        }
    }
}

impl Drop for IoWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F: FnMut(String)>(shared: &Shared, mut on_data: F) {
    loop {
        {
            let mut state = shared.state.lock();
            match *state {
                WorkerState::Shutdown => break,
                WorkerState::PauseRequested => {
                    shared.set_state(&mut state, WorkerState::Paused);
                    debug!("io worker paused");
                    continue;
                }
                WorkerState::Paused => {
                    shared.state_changed.wait_for(&mut state, shared.idle_poll);
                    continue;
                }
                WorkerState::Running => {}
            }
        }

        let mut connection = shared.connection.lock();
        let report = shared.queue.drain_into(connection.as_mut());
        // Counted before the read so stats never lag a completed send
        bump(&shared.counters.lines_sent, report.sent as u64);
        bump(&shared.counters.send_failures, report.failed as u64);
        let outcome = connection.read();
        drop(connection);

        match outcome {
            Ok(bytes) if bytes.is_empty() => {}
            Ok(bytes) => deliver(shared, &bytes, &mut on_data),
            Err(err) => {
                warn!(error = %err, "read failed");
                bump(&shared.counters.read_errors, 1);
                let mut state = shared.state.lock();
                if *state == WorkerState::Running {
                    shared.state_changed.wait_for(&mut state, shared.idle_poll);
                }
            }
        }
    }
    info!("io worker stopped");
}

fn deliver<F: FnMut(String)>(shared: &Shared, bytes: &[u8], on_data: &mut F) {
    bump(&shared.counters.units_received, 1);
    bump(&shared.counters.bytes_received, bytes.len() as u64);

    let unit = match decode_unit(bytes) {
        Ok(text) => text,
        Err(err) => {
            debug!(error = %err, "replacing invalid bytes");
            bump(&shared.counters.decode_errors, 1);
            decode_lossy(bytes)
        }
    };
    on_data(unit);
}
