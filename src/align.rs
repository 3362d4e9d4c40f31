//! Aligning auxiliary logs with the core occupancy timeline
//!
//! Two periodic logs are interleaved with the snapshots of an
//! [`OccupancyTracker`]:
//!
//! - estimation dumps, multi-line blocks stamped with a raw cycle counter
//!   (`TimeInCycles = <cycles>,`), placed on the coretrace axis relative to the
//!   coretrace's `START_CYCLES`
//! - latency rows, stamped with wall-clock microseconds, placed on the
//!   coretrace axis through the wall-clock time logged by the window-opening
//!   marker
//!
//! Each auxiliary log keeps one pending item. Before a snapshot at time `T`
//! is emitted, pending items due at or before `T` are emitted in time order
//! (a dump wins a tie with a latency row) and replaced by the next item from
//! the same log. Nothing auxiliary is emitted before the first snapshot.

use crate::clock::{CycleClock, WallClockAnchor};
use crate::error::Result;
use crate::occupancy::OccupancyTracker;
use crate::parse::{
    EstimationDump, EstimationDumpReader, LatencyLogReader, LatencyRow, Line, LineClassifier,
};
use crate::render::{Block, Timeline};

/// Next item of an auxiliary log
#[derive(Debug, Clone, PartialEq)]
pub enum Pending<T> {
    Ready(T),
    Exhausted,
}

impl<T> Pending<T> {
    fn from_next(next: Option<T>) -> Self {
        next.map_or(Pending::Exhausted, Pending::Ready)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Pending::Ready(item) => Some(item),
            Pending::Exhausted => None,
        }
    }
}

struct DumpSource<'a> {
    reader: EstimationDumpReader<'a>,
    pending: Pending<EstimationDump>,
}

impl<'a> DumpSource<'a> {
    fn new(content: &'a str) -> Result<Self> {
        let mut reader = EstimationDumpReader::new(content)?;
        let pending = Pending::from_next(reader.next_dump());
        Ok(Self { reader, pending })
    }

    fn advance(&mut self) {
        self.pending = Pending::from_next(self.reader.next_dump());
        if self.pending == Pending::Exhausted {
            tracing::debug!("Estimation log exhausted");
        }
    }
}

struct LatencySource<'a> {
    reader: LatencyLogReader<'a>,
    pending: Pending<LatencyRow>,
}

impl<'a> LatencySource<'a> {
    fn new(content: &'a str) -> Result<Self> {
        let mut reader = LatencyLogReader::new(content)?;
        let pending = Pending::from_next(reader.next_row());
        Ok(Self { reader, pending })
    }

    fn advance(&mut self) {
        self.pending = Pending::from_next(self.reader.next_row());
        if self.pending == Pending::Exhausted {
            tracing::debug!("Latency log exhausted");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Due {
    Dump(f64),
    Latency(f64),
}

/// Interleaves estimation dumps and latency rows into tracker output
pub struct Aligner<'a> {
    tracker: OccupancyTracker,
    dumps: Option<DumpSource<'a>>,
    latency: Option<LatencySource<'a>>,
    primary_cycles_per_second: Option<f64>,
    primary_start_cycles: Option<u64>,
    timeline: Timeline,
    blocks: Vec<Block>,
}

impl<'a> Aligner<'a> {
    /// Pre-read the first item of each auxiliary log that is present; an
    /// absent log behaves as already exhausted
    pub fn new(
        tracker: OccupancyTracker,
        estimation_log: Option<&'a str>,
        latency_log: Option<&'a str>,
    ) -> Result<Self> {
        Ok(Self {
            tracker,
            dumps: estimation_log.map(DumpSource::new).transpose()?,
            latency: latency_log.map(LatencySource::new).transpose()?,
            primary_cycles_per_second: None,
            primary_start_cycles: None,
            timeline: Timeline::default(),
            blocks: Vec::new(),
        })
    }

    pub fn tracker(&self) -> &OccupancyTracker {
        &self.tracker
    }

    /// Clock for estimation-dump cycle stamps: the estimation log's own rate
    /// if it declares one, else the coretrace's, measured from the
    /// coretrace's start cycle
    fn dump_clock(&self) -> CycleClock {
        let default = CycleClock::default();
        let rate = self
            .dumps
            .as_ref()
            .and_then(|d| d.reader.cycles_per_second())
            .or(self.primary_cycles_per_second)
            .unwrap_or(default.cycles_per_second);
        CycleClock::new(rate, self.primary_start_cycles.unwrap_or(0) as f64)
    }

    fn latency_anchor(&self) -> WallClockAnchor {
        self.tracker.anchor().unwrap_or_default()
    }

    fn next_due(&self) -> Option<Due> {
        let dump_at = self
            .dumps
            .as_ref()
            .and_then(|d| d.pending.ready())
            .map(|dump| self.dump_clock().cycles_to_ns(dump.cycles));
        let latency_at = self
            .latency
            .as_ref()
            .and_then(|l| l.pending.ready())
            .map(|row| self.latency_anchor().us_to_ns(row.timestamp_us));

        match (dump_at, latency_at) {
            (Some(d), Some(l)) if d <= l => Some(Due::Dump(d)),
            (_, Some(l)) => Some(Due::Latency(l)),
            (Some(d), None) => Some(Due::Dump(d)),
            (None, None) => None,
        }
    }

    /// Emit (or, before the first snapshot, discard) every auxiliary item
    /// due at or before `until_ns`
    fn drain_until(&mut self, until_ns: f64) {
        loop {
            match self.next_due() {
                Some(Due::Dump(at)) if at <= until_ns => {
                    let Some(source) = self.dumps.as_mut() else {
                        break;
                    };
                    if let Pending::Ready(dump) = &source.pending {
                        if self.timeline.has_emitted() {
                            self.blocks.push(Block::EstimationDump {
                                stamp: self.timeline.stamp(at),
                                text: dump.text.clone(),
                            });
                        }
                    }
                    source.advance();
                }
                Some(Due::Latency(at)) if at <= until_ns => {
                    let Some(source) = self.latency.as_mut() else {
                        break;
                    };
                    if let Pending::Ready(row) = &source.pending {
                        if self.timeline.has_emitted() {
                            self.blocks.push(Block::Latency {
                                stamp: self.timeline.stamp(at),
                                header: source.reader.header().to_string(),
                                row: row.text.clone(),
                            });
                        }
                    }
                    source.advance();
                }
                _ => break,
            }
        }
    }

    fn on_line(&mut self, line: Line) -> Result<()> {
        match line {
            Line::CyclesPerSecond(rate) => {
                self.primary_cycles_per_second.get_or_insert(rate);
            }
            Line::StartCycles(cycles) => {
                self.primary_start_cycles.get_or_insert(cycles);
            }
            Line::Event { event, kind } => {
                if let Some(snapshot) = self.tracker.observe(&event, &kind)? {
                    self.drain_until(snapshot.timestamp_ns);
                    let block = self.timeline.occupancy(snapshot);
                    self.blocks.push(block);
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Replay the coretrace and return all blocks in emission order
    pub fn run(mut self, coretrace: &str) -> Result<Vec<Block>> {
        let classifier = LineClassifier::timetrace()?;
        for line in coretrace.lines() {
            self.on_line(classifier.classify(line))?;
        }
        Ok(self.blocks)
    }
}
