//! Progress/log/result reporting channel
//!
//! Stages never talk to a presentation layer directly. They receive a
//! [`Reporter`] wrapping whatever [`EventSink`] the caller plugged in.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Separator line used to frame stage output
pub const SEPARATOR: &str = "============================================================";

/// A single reporting event
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Completed work units (one per uploaded file)
    Progress { delta: u32 },

    /// One human-readable log line
    Log { line: String },

    /// Terminal result; exactly one per invocation
    Finished { success: bool, message: String },
}

impl Event {
    pub fn is_finished(&self) -> bool {
        matches!(self, Event::Finished { .. })
    }
}

/// Consumer side of the reporting channel
pub trait EventSink: Send + Sync {
    fn on_progress(&self, delta: u32);

    fn on_log(&self, line: &str);

    fn on_finished(&self, success: bool, message: &str);
}

/// Forwards events into a tokio unbounded channel.
///
/// Sending never blocks, so the sink can be used from the worker thread
/// while an async consumer drains the receiver.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: Event) {
        if self.tx.send(event).is_err() {
            debug!("Event receiver dropped, discarding event");
        }
    }
}

impl EventSink for ChannelSink {
    fn on_progress(&self, delta: u32) {
        self.send(Event::Progress { delta });
    }

    fn on_log(&self, line: &str) {
        self.send(Event::Log {
            line: line.to_string(),
        });
    }

    fn on_finished(&self, success: bool, message: &str) {
        self.send(Event::Finished {
            success,
            message: message.to_string(),
        });
    }
}

/// Records every event in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    /// Snapshot of all recorded events
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Only the log lines
    pub fn lines(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Log { line } => Some(line),
                _ => None,
            })
            .collect()
    }

    /// All terminal events, in order
    pub fn finished(&self) -> Vec<(bool, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Finished { success, message } => Some((success, message)),
                _ => None,
            })
            .collect()
    }

    /// Sum of progress increments
    pub fn progress(&self) -> u32 {
        self.events()
            .iter()
            .map(|event| match event {
                Event::Progress { delta } => *delta,
                _ => 0,
            })
            .sum()
    }
}

impl EventSink for MemorySink {
    fn on_progress(&self, delta: u32) {
        self.push(Event::Progress { delta });
    }

    fn on_log(&self, line: &str) {
        self.push(Event::Log {
            line: line.to_string(),
        });
    }

    fn on_finished(&self, success: bool, message: &str) {
        self.push(Event::Finished {
            success,
            message: message.to_string(),
        });
    }
}

/// Sends events to the tracing subscriber; for headless embedding
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn on_progress(&self, delta: u32) {
        debug!("progress +{}", delta);
    }

    fn on_log(&self, line: &str) {
        info!("{}", line);
    }

    fn on_finished(&self, success: bool, message: &str) {
        if success {
            info!("finished: {}", message);
        } else {
            warn!("finished with failure: {}", message);
        }
    }
}

/// Per-invocation view of a sink.
///
/// Guarantees at most one `Finished`: later calls to [`Reporter::finish`]
/// are dropped.
pub struct Reporter {
    sink: Arc<dyn EventSink>,
    finished: AtomicBool,
}

impl Reporter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            finished: AtomicBool::new(false),
        }
    }

    pub fn progress(&self, delta: u32) {
        self.sink.on_progress(delta);
    }

    pub fn log(&self, line: impl AsRef<str>) {
        self.sink.on_log(line.as_ref());
    }

    pub fn separator(&self) {
        self.sink.on_log(SEPARATOR);
    }

    /// Emit the terminal event. Returns false if one was already sent.
    pub fn finish(&self, success: bool, message: impl AsRef<str>) -> bool {
        if self.finished.swap(true, Ordering::SeqCst) {
            warn!("Dropping duplicate finish: {}", message.as_ref());
            return false;
        }
        self.sink.on_finished(success, message.as_ref());
        true
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}
