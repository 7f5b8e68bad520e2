//! Outbound line queue
//!
//! Filled from the control thread with [`OutboundQueue::push`], emptied by
//! the worker with [`OutboundQueue::drain_into`] right before every read.

use crate::core::connection::Connection;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{debug, warn};

/// What happens when a line is pushed onto a full queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Refuse the new line
    #[default]
    Reject,
    /// Evict the oldest pending line
    DropOldest,
}

/// Queue sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Maximum number of pending lines
    pub capacity: usize,
    /// Overflow behaviour
    pub overflow: OverflowPolicy,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 1024,
            overflow: OverflowPolicy::Reject,
        }
    }
}

/// Queue errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// Queue is full and the policy rejects new lines
    #[error("Outbound queue is full ({capacity} lines pending)")]
    Full {
        /// Configured capacity
        capacity: usize,
    },
}

/// Outcome of one drain pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Lines handed to the connection
    pub sent: usize,
    /// Lines the connection failed to send
    pub failed: usize,
}

/// Thread-safe FIFO of pending outbound lines
#[derive(Debug)]
pub struct OutboundQueue {
    config: QueueConfig,
    lines: Mutex<VecDeque<String>>,
    dropped: AtomicU64,
}

impl OutboundQueue {
    /// Create an empty queue
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config: QueueConfig {
                capacity: config.capacity.max(1),
                ..config
            },
            lines: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a line without blocking
    pub fn push(&self, line: impl Into<String>) -> Result<(), QueueError> {
        let mut lines = self.lines.lock();
        if lines.len() >= self.config.capacity {
            match self.config.overflow {
                OverflowPolicy::Reject => {
                    return Err(QueueError::Full {
                        capacity: self.config.capacity,
                    });
                }
                OverflowPolicy::DropOldest => {
                    lines.pop_front();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        lines.push_back(line.into());
        Ok(())
    }

    /// Number of pending lines
    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }

    /// Lines evicted by [`OverflowPolicy::DropOldest`]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Send every pending line, oldest first
    ///
    /// Only the worker thread calls this. The queue lock is released while a
    /// line is being sent, so producers never wait on the device. A line that
    /// fails to send is dropped.
    pub fn drain_into(&self, connection: &mut dyn Connection) -> DrainReport {
        let mut report = DrainReport::default();
        while let Some(line) = self.pop() {
            match connection.send(&line) {
                Ok(()) => {
                    debug!(bytes = line.len(), "outbound line sent");
                    report.sent += 1;
                }
                Err(err) => {
                    warn!(error = %err, "dropping outbound line");
                    report.failed += 1;
                }
            }
        }
        report
    }

    fn pop(&self) -> Option<String> {
        self.lines.lock().pop_front()
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}
