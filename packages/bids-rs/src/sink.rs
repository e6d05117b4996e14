//! Diagnostic sinks handed to the pipeline components.
//!
//! Components never reach for a process-wide logger on their own; the caller
//! constructs a sink and passes it down. [`LogSink`] forwards to the `log`
//! facade, [`MemorySink`] keeps messages around for inspection.

use std::cell::RefCell;

pub use log::Level;

pub trait EventSink {
    fn info(&self, message: &str);

    fn warn(&self, message: &str);

    fn error(&self, message: &str);

    fn debug(&self, _message: &str) {}
}

/// Forwards every event to the `log` crate under a fixed target.
#[derive(Debug, Clone)]
pub struct LogSink {
    target: String,
}

impl LogSink {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new("bids_rs")
    }
}

impl EventSink for LogSink {
    fn info(&self, message: &str) {
        log::info!(target: self.target.as_str(), "{}", message);
    }

    fn warn(&self, message: &str) {
        log::warn!(target: self.target.as_str(), "{}", message);
    }

    fn error(&self, message: &str) {
        log::error!(target: self.target.as_str(), "{}", message);
    }

    fn debug(&self, message: &str) {
        log::debug!(target: self.target.as_str(), "{}", message);
    }
}

/// Records events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: RefCell<Vec<(Level, String)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(Level, String)> {
        self.events.borrow().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.events
            .borrow()
            .iter()
            .any(|(_, message)| message.contains(needle))
    }

    fn push(&self, level: Level, message: &str) {
        self.events.borrow_mut().push((level, message.to_string()));
    }
}

impl EventSink for MemorySink {
    fn info(&self, message: &str) {
        self.push(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(Level::Warn, message);
    }

    fn error(&self, message: &str) {
        self.push(Level::Error, message);
    }

    fn debug(&self, message: &str) {
        self.push(Level::Debug, message);
    }
}
