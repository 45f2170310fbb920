//! The Event Channel: an unbounded FIFO queue carrying progress and log
//! events from the background worker to whatever renders them.

use std::time::Duration;

use strum::{AsRefStr, Display};
use tracing::trace;

use crate::runtime::types::ConvertError;

/// Discriminant of an [`Event`], used for filtering and rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum EventKind {
    Info,
    Ok,
    Warning,
    Error,
    Log,
    Progress,
    Stage,
    Download,
    Done,
}

/// One immutable record pushed onto the channel.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Info(String),
    Ok(String),
    Warning(String),
    /// The terminal failure of the current run.
    Error(ConvertError),
    /// A raw line of tool output, or the echoed command line.
    Log(String),
    /// Global percentage (0..=100) and the estimated time left, if known.
    Progress {
        percent: f64,
        remaining: Option<Duration>,
    },
    /// The run entered step `index` of its step list.
    Stage { index: usize, label: String },
    /// Tool download progress during acquisition.
    Download {
        downloaded: u64,
        total: Option<u64>,
        percent: Option<f64>,
        bytes_per_sec: u64,
        remaining: Option<Duration>,
    },
    Done { success: bool },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Info(_) => EventKind::Info,
            Event::Ok(_) => EventKind::Ok,
            Event::Warning(_) => EventKind::Warning,
            Event::Error(_) => EventKind::Error,
            Event::Log(_) => EventKind::Log,
            Event::Progress { .. } => EventKind::Progress,
            Event::Stage { .. } => EventKind::Stage,
            Event::Download { .. } => EventKind::Download,
            Event::Done { .. } => EventKind::Done,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Done { .. })
    }
}

/// Constructor for the sender/receiver pair.
pub struct EventChannel;

impl EventChannel {
    pub fn unbounded() -> (EventSender, EventReceiver) {
        let (tx, rx) = flume::unbounded();
        (EventSender { tx }, EventReceiver { rx })
    }
}

/// Producer half. Cheap to clone; sending never blocks.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: flume::Sender<Event>,
}

impl EventSender {
    /// Enqueue `event`. A dropped receiver is not an error for the producer.
    pub fn send(&self, event: Event) {
        if let Err(flume::SendError(event)) = self.tx.send(event) {
            trace!(kind = %event.kind(), "event dropped, receiver is gone");
        }
    }

    pub fn info(&self, msg: impl Into<String>) {
        self.send(Event::Info(msg.into()));
    }

    pub fn ok(&self, msg: impl Into<String>) {
        self.send(Event::Ok(msg.into()));
    }

    pub fn warning(&self, msg: impl Into<String>) {
        self.send(Event::Warning(msg.into()));
    }

    pub fn log(&self, line: impl Into<String>) {
        self.send(Event::Log(line.into()));
    }

    pub fn error(&self, err: ConvertError) {
        self.send(Event::Error(err));
    }

    pub fn progress(&self, percent: f64, remaining: Option<Duration>) {
        self.send(Event::Progress { percent, remaining });
    }

    pub fn stage(&self, index: usize, label: impl Into<String>) {
        self.send(Event::Stage {
            index,
            label: label.into(),
        });
    }

    pub fn done(&self, success: bool) {
        self.send(Event::Done { success });
    }
}

/// Consumer half.
#[derive(Debug, Clone)]
pub struct EventReceiver {
    rx: flume::Receiver<Event>,
}

impl EventReceiver {
    /// Block until the next event arrives. `None` once every sender is gone.
    pub fn recv(&self) -> Option<Event> {
        self.rx.recv().ok()
    }

    /// Block for at most `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Event> {
        self.rx.recv_timeout(timeout).ok()
    }

    pub fn try_recv(&self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Take every event that is queued right now, in order.
    pub fn drain(&self) -> Vec<Event> {
        self.rx.drain().collect()
    }

    pub async fn recv_async(&self) -> Option<Event> {
        self.rx.recv_async().await.ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
