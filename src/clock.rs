//! Clock normalization across independently-clocked sources
//!
//! Every timetrace source converts its cycle counter to nanoseconds with its
//! own estimate of the tick rate and relative to its own counter origin. To
//! line sources up they are all re-expressed against one reference rate (the
//! slowest declared rate) and shifted by their absolute start cycle:
//!
//! ```text
//! t' = t * (source_rate / reference_rate) + start_cycles / reference_rate * 1e9
//! ```

use crate::event::{Event, SourceTrace};

const NANOS_PER_SECOND: f64 = 1e9;

/// Rescales source timelines onto a shared nanosecond axis
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockNormalizer {
    reference_cycles_per_second: f64,
}

impl ClockNormalizer {
    pub fn new(reference_cycles_per_second: f64) -> Self {
        Self {
            reference_cycles_per_second: sanitize_rate(reference_cycles_per_second),
        }
    }

    /// Use the minimum declared rate among `sources` as the reference
    pub fn for_sources(sources: &[SourceTrace]) -> Self {
        let reference = sources
            .iter()
            .map(|s| sanitize_rate(s.cycles_per_second))
            .reduce(f64::min)
            .unwrap_or(SourceTrace::DEFAULT_CYCLES_PER_SECOND);
        Self::new(reference)
    }

    pub fn reference_cycles_per_second(&self) -> f64 {
        self.reference_cycles_per_second
    }

    /// Multiplier applied to a source's native timestamps
    pub fn scale(&self, source: &SourceTrace) -> f64 {
        sanitize_rate(source.cycles_per_second) / self.reference_cycles_per_second
    }

    /// Shift that places a source's origin on the shared axis
    pub fn offset_ns(&self, source: &SourceTrace) -> f64 {
        source.start_cycles as f64 / self.reference_cycles_per_second * NANOS_PER_SECOND
    }

    /// Consume a source and return its events on the shared axis
    pub fn normalize(&self, source: SourceTrace) -> Vec<Event> {
        let scale = self.scale(&source);
        let offset = self.offset_ns(&source);
        source
            .events
            .into_iter()
            .map(|e| Event {
                timestamp_ns: e.timestamp_ns * scale + offset,
                ..e
            })
            .collect()
    }

    /// Convert an absolute time on the shared axis back to reference cycles
    pub fn ns_to_cycles(&self, ns: f64) -> u64 {
        (ns / NANOS_PER_SECOND * self.reference_cycles_per_second) as u64
    }
}

/// Non-positive or non-finite rates fall back to identity scaling
fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 {
        rate
    } else {
        SourceTrace::DEFAULT_CYCLES_PER_SECOND
    }
}

/// Converts raw cycle stamps of an auxiliary log to nanoseconds since the
/// primary trace's origin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleClock {
    pub cycles_per_second: f64,
    pub start_cycles: f64,
}

impl CycleClock {
    pub fn new(cycles_per_second: f64, start_cycles: f64) -> Self {
        Self {
            cycles_per_second: sanitize_rate(cycles_per_second),
            start_cycles,
        }
    }

    pub fn cycles_to_ns(&self, cycles: f64) -> f64 {
        (cycles - self.start_cycles) / (self.cycles_per_second / NANOS_PER_SECOND)
    }
}

impl Default for CycleClock {
    fn default() -> Self {
        Self::new(NANOS_PER_SECOND, 0.0)
    }
}

/// Maps wall-clock microseconds onto the primary trace's nanosecond axis
///
/// The anchor is taken from a marker event that carries both its trace
/// timestamp and the wall-clock time at which it was logged.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WallClockAnchor {
    origin_us: f64,
}

impl WallClockAnchor {
    pub fn from_marker(marker_ns: f64, wall_clock_us: f64) -> Self {
        Self {
            origin_us: wall_clock_us - marker_ns / 1000.0,
        }
    }

    /// Wall-clock microseconds at trace time zero
    pub fn origin_us(&self) -> f64 {
        self.origin_us
    }

    pub fn us_to_ns(&self, us: f64) -> f64 {
        (us - self.origin_us) * 1e3
    }
}
