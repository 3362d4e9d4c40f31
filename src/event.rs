//! Common record types shared by the parsers, merger and tracker

use serde::Serialize;

/// Logical CPU core identifier as reported by the tracer
pub type CoreId = usize;

/// A single timetrace event
///
/// `timestamp_ns` is relative to the start of whatever timeline the event
/// currently lives in. After a merge, `delta_ns` is the gap to the previously
/// emitted event of the merged stream, not of the event's own source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    pub timestamp_ns: f64,
    pub delta_ns: f64,
    pub message: String,
}

impl Event {
    pub fn new(timestamp_ns: f64, delta_ns: f64, message: impl Into<String>) -> Self {
        Self {
            timestamp_ns,
            delta_ns,
            message: message.into(),
        }
    }
}

/// One parsed log file together with its clock metadata
///
/// Logs written before clock headers existed carry neither
/// `CYCLES_PER_SECOND` nor `START_CYCLES`; they get an identity clock
/// (rate 1.0, origin 0) and their timestamps are used as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceTrace {
    pub events: Vec<Event>,
    pub cycles_per_second: f64,
    pub start_cycles: u64,
}

impl SourceTrace {
    pub const DEFAULT_CYCLES_PER_SECOND: f64 = 1.0;

    pub fn new(events: Vec<Event>, cycles_per_second: f64, start_cycles: u64) -> Self {
        Self {
            events,
            cycles_per_second,
            start_cycles,
        }
    }

    /// A source with an identity clock
    pub fn from_events(events: Vec<Event>) -> Self {
        Self::new(events, Self::DEFAULT_CYCLES_PER_SECOND, 0)
    }

    /// Timestamp of the oldest retained event, if any
    pub fn first_timestamp(&self) -> Option<f64> {
        self.events.first().map(|e| e.timestamp_ns)
    }
}

impl Default for SourceTrace {
    fn default() -> Self {
        Self::from_events(Vec::new())
    }
}
