//! Shared helpers for integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use serialview_core::{Connection, ConnectionError};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Something a [`RecordingConnection`] was asked to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `read` was called on the named connection
    Read(&'static str),
    /// `send` was called with this text
    Send(&'static str, String),
    /// The connection was dropped
    Dropped(&'static str),
}

impl Event {
    /// Name of the connection the event belongs to
    pub fn source(&self) -> &'static str {
        match self {
            Self::Read(name) | Self::Send(name, _) | Self::Dropped(name) => name,
        }
    }
}

/// Event log shared by any number of connections
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0.lock().push(event);
    }

    pub fn snapshot(&self) -> Vec<Event> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    /// Events recorded after the first `from` entries
    pub fn since(&self, from: usize) -> Vec<Event> {
        self.0.lock().get(from..).map(<[Event]>::to_vec).unwrap_or_default()
    }

    pub fn sent(&self) -> Vec<String> {
        self.0
            .lock()
            .iter()
            .filter_map(|e| match e {
                Event::Send(_, text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Connection that records every call and replays scripted input
pub struct RecordingConnection {
    name: &'static str,
    log: EventLog,
    input: VecDeque<Vec<u8>>,
    read_delay: Duration,
}

impl RecordingConnection {
    pub fn new(name: &'static str, log: &EventLog) -> Self {
        Self {
            name,
            log: log.clone(),
            input: VecDeque::new(),
            read_delay: Duration::from_millis(2),
        }
    }

    /// Queue a unit returned by a later `read`
    #[must_use]
    pub fn with_input(mut self, unit: &[u8]) -> Self {
        self.input.push_back(unit.to_vec());
        self
    }

    /// How long each `read` blocks
    #[must_use]
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn boxed(self) -> Box<dyn Connection> {
        Box::new(self)
    }
}

impl Connection for RecordingConnection {
    fn read(&mut self) -> Result<Vec<u8>, ConnectionError> {
        self.log.push(Event::Read(self.name));
        thread::sleep(self.read_delay);
        Ok(self.input.pop_front().unwrap_or_default())
    }

    fn send(&mut self, text: &str) -> Result<(), ConnectionError> {
        self.log.push(Event::Send(self.name, text.to_string()));
        Ok(())
    }

    fn describe(&self) -> String {
        format!("recording:{}", self.name)
    }
}

impl Drop for RecordingConnection {
    fn drop(&mut self) {
        self.log.push(Event::Dropped(self.name));
    }
}

/// Poll `check` until it holds or `timeout` passes
pub fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    check()
}
