//! Diagnostic event stream.
//!
//! Every protocol action (a segment sent, received, dropped by the loss
//! injector, or resent) is reported as an [`Event`] to an [`EventSink`].  The
//! core never formats logs itself beyond [`Event`]'s `Display`; sinks decide
//! where events go.

use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::packet::SegmentKind;

/// What happened to a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Sent,
    Received,
    /// Discarded by the loss injector (never sent, or never processed).
    Dropped,
    /// Retransmitted by the timer or fast retransmit.
    Resent,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            EventKind::Sent => "snd",
            EventKind::Received => "rcv",
            EventKind::Dropped => "drp",
            EventKind::Resent => "rsnd",
        })
    }
}

/// One protocol event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub kind: EventKind,
    /// Time since the connection started (first SYN sent or received).
    pub elapsed: Duration,
    pub segment: SegmentKind,
    pub seqno: u16,
    /// Payload length in bytes.
    pub len: usize,
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}\t{:>10.2}\t{}\t{}\t{}",
            self.kind,
            self.elapsed.as_secs_f64() * 1000.0,
            self.segment,
            self.seqno,
            self.len
        )
    }
}

/// Destination for protocol events.
pub trait EventSink: Send + Sync {
    fn record(&self, event: Event);
}

/// Forwards every event to the `log` facade at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn record(&self, event: Event) {
        log::debug!("{event}");
    }
}

/// Keeps every event in memory; handy for inspecting a finished transfer.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every event recorded so far, in order.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn record(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Writes one tab-separated line per event to any writer (e.g. a log file).
pub struct WriterSink<W: Write + Send> {
    inner: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Mutex::new(writer),
        }
    }

    /// Append free-form text after the events (e.g. the statistics summary).
    pub fn write_trailer(&self, text: &str) -> std::io::Result<()> {
        let mut w = self
            .inner
            .lock()
            .map_err(|_| std::io::Error::other("event writer poisoned"))?;
        writeln!(w)?;
        w.write_all(text.as_bytes())?;
        w.flush()
    }
}

impl<W: Write + Send> EventSink for WriterSink<W> {
    fn record(&self, event: Event) {
        let Ok(mut w) = self.inner.lock() else {
            return;
        };
        if let Err(e) = writeln!(w, "{event}") {
            log::warn!("failed to write event log: {e}");
        }
    }
}

/// Stamps events with the time elapsed since the connection started and
/// hands them to a sink.
#[derive(Clone)]
pub struct EventRecorder {
    start: Instant,
    sink: Arc<dyn EventSink>,
}

impl EventRecorder {
    /// Start the clock now.
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            start: Instant::now(),
            sink,
        }
    }

    pub fn record(&self, kind: EventKind, segment: SegmentKind, seqno: u16, len: usize) {
        self.sink.record(Event {
            kind,
            elapsed: self.start.elapsed(),
            segment,
            seqno,
            len,
        });
    }
}

impl std::fmt::Debug for EventRecorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventRecorder")
            .field("start", &self.start)
            .finish_non_exhaustive()
    }
}
