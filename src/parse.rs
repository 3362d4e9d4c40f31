//! Line grammars for timetrace, estimation-dump and latency logs
//!
//! Every input line is classified exactly once by an ordered list of
//! matchers into a typed [`Line`]. Downstream code switches on the variant
//! and never re-matches the raw text.
//!
//! Timetrace grammar:
//!
//! ```text
//! CYCLES_PER_SECOND 2400000000.000000
//! START_CYCLES 81234567890
//!   1042.3 ns (+  12.0 ns): [w3] cpuid: 5
//!   1100.0 ns (+  57.7 ns): CLEANUP: Worker w3 on core 5 going down!
//!   1200.0 ns (+ 100.0 ns): ------CLEANUP CORETRACE: Time: tv_sec=10, tv_usec=20 ------
//! ```

use crate::error::{Result, TraceError};
use crate::event::{CoreId, Event, SourceTrace};
use regex::{Captures, Regex};
use std::fs;
use std::path::Path;

/// What an event's message means to the occupancy tracker
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    /// `[<thread>] cpuid: <core>`
    Migration { thread: String, core: CoreId },
    /// `CLEANUP: Worker <thread> on core <core> going down!`
    ///
    /// Some runtimes report a placeholder core here, so `reported_core` is
    /// informational only.
    Teardown { thread: String, reported_core: CoreId },
    /// A line containing `CLEANUP CORETRACE`, optionally stamped with the
    /// wall-clock time (microseconds) at which it was logged
    WindowMarker { wall_clock_us: Option<f64> },
    Plain,
}

/// A classified input line
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    CyclesPerSecond(f64),
    StartCycles(u64),
    Event { event: Event, kind: MessageKind },
    /// `TimeInCycles = <float>,` inside an estimation dump
    DumpTimestamp(f64),
    /// `END ESTIMATION STATS DUMP`
    DumpEnd,
    /// `<int>,...` row of a latency log
    LatencyRow { timestamp_us: f64 },
    Unmatched,
}

type Build = fn(&Captures<'_>) -> Option<Line>;

struct Matcher {
    regex: Regex,
    build: Build,
}

/// Ordered list of line matchers; the first one that both matches and
/// builds a value wins
pub struct LineClassifier {
    matchers: Vec<Matcher>,
    messages: Option<MessageClassifier>,
}

impl LineClassifier {
    fn from_patterns(
        patterns: &[(&str, Build)],
        messages: Option<MessageClassifier>,
    ) -> Result<Self> {
        let matchers = patterns
            .iter()
            .map(|(pattern, build)| -> Result<Matcher> {
                Ok(Matcher {
                    regex: Regex::new(pattern)?,
                    build: *build,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { matchers, messages })
    }

    /// Grammar of a timetrace (coretrace) log
    pub fn timetrace() -> Result<Self> {
        Self::from_patterns(
            &[
                (r"^\s*CYCLES_PER_SECOND\s+(\S+)", build_cycles_per_second),
                (r"^\s*START_CYCLES\s+(\S+)", build_start_cycles),
                (
                    r"^\s*([0-9.]+) ns \(\+\s*([0-9.]+) ns\): (.*)$",
                    build_event,
                ),
            ],
            Some(MessageClassifier::new()?),
        )
    }

    /// Grammar of an estimation-dump log
    pub fn estimation_dump() -> Result<Self> {
        Self::from_patterns(
            &[
                (r"^\s*CYCLES_PER_SECOND\s+(\S+)", build_cycles_per_second),
                (r"^END ESTIMATION STATS DUMP", build_dump_end),
                (r"^TimeInCycles = ([0-9.]+),", build_dump_timestamp),
            ],
            None,
        )
    }

    /// Grammar of a latency log
    pub fn latency() -> Result<Self> {
        Self::from_patterns(&[(r"^([0-9]+),", build_latency_row)], None)
    }

    pub fn classify(&self, line: &str) -> Line {
        for matcher in &self.matchers {
            let Some(caps) = matcher.regex.captures(line) else {
                continue;
            };
            if let Some(mut parsed) = (matcher.build)(&caps) {
                if let (Line::Event { event, kind }, Some(messages)) =
                    (&mut parsed, &self.messages)
                {
                    *kind = messages.classify(&event.message);
                }
                return parsed;
            }
        }
        Line::Unmatched
    }
}

fn build_cycles_per_second(caps: &Captures<'_>) -> Option<Line> {
    caps[1]
        .parse::<f64>()
        .ok()
        .filter(|rate| rate.is_finite() && *rate > 0.0)
        .map(Line::CyclesPerSecond)
}

fn build_start_cycles(caps: &Captures<'_>) -> Option<Line> {
    caps[1].parse().ok().map(Line::StartCycles)
}

fn build_dump_end(_: &Captures<'_>) -> Option<Line> {
    Some(Line::DumpEnd)
}

fn build_dump_timestamp(caps: &Captures<'_>) -> Option<Line> {
    caps[1].parse().ok().map(Line::DumpTimestamp)
}

fn build_latency_row(caps: &Captures<'_>) -> Option<Line> {
    caps[1]
        .parse()
        .ok()
        .map(|timestamp_us| Line::LatencyRow { timestamp_us })
}

fn build_event(caps: &Captures<'_>) -> Option<Line> {
    let timestamp_ns = caps[1].parse().ok()?;
    let delta_ns = caps[2].parse().ok()?;
    Some(Line::Event {
        event: Event::new(timestamp_ns, delta_ns, &caps[3]),
        kind: MessageKind::Plain,
    })
}

/// Classifies the message part of a timetrace event
struct MessageClassifier {
    marker: Regex,
    teardown: Regex,
    migration: Regex,
}

impl MessageClassifier {
    fn new() -> Result<Self> {
        Ok(Self {
            marker: Regex::new(
                r"CLEANUP CORETRACE(?::\s*Time:\s*tv_sec=([0-9]+),\s*tv_usec=([0-9]+))?",
            )?,
            teardown: Regex::new(r"CLEANUP: Worker (.+) on core ([0-9]+) going down!")?,
            migration: Regex::new(r"^\[(.*)\] cpuid: ([0-9]+)")?,
        })
    }

    fn classify(&self, message: &str) -> MessageKind {
        if let Some(caps) = self.marker.captures(message) {
            let wall_clock_us = match (caps.get(1), caps.get(2)) {
                (Some(sec), Some(usec)) => {
                    match (sec.as_str().parse::<f64>(), usec.as_str().parse::<f64>()) {
                        (Ok(sec), Ok(usec)) => Some(sec * 1_000_000.0 + usec),
                        _ => None,
                    }
                }
                _ => None,
            };
            return MessageKind::WindowMarker { wall_clock_us };
        }
        if let Some(caps) = self.teardown.captures(message) {
            if let Ok(reported_core) = caps[2].parse() {
                return MessageKind::Teardown {
                    thread: caps[1].to_string(),
                    reported_core,
                };
            }
        }
        if let Some(caps) = self.migration.captures(message) {
            if let Ok(core) = caps[2].parse() {
                return MessageKind::Migration {
                    thread: caps[1].to_string(),
                    core,
                };
            }
        }
        MessageKind::Plain
    }
}

/// Read a whole input file, mapping failures to [`TraceError::UnreadableFile`]
pub fn read_input(path: &Path) -> Result<String> {
    fs::read_to_string(path).map_err(|e| TraceError::unreadable(path, e))
}

/// Parse a timetrace log into a [`SourceTrace`]
///
/// The first `CYCLES_PER_SECOND` / `START_CYCLES` header wins; missing or
/// malformed headers leave the identity clock in place.
pub fn parse_source_trace(content: &str) -> Result<SourceTrace> {
    let classifier = LineClassifier::timetrace()?;
    let mut cycles_per_second = None;
    let mut start_cycles = None;
    let mut events = Vec::new();
    let mut unmatched = 0usize;

    for line in content.lines() {
        match classifier.classify(line) {
            Line::CyclesPerSecond(rate) => {
                cycles_per_second.get_or_insert(rate);
            }
            Line::StartCycles(cycles) => {
                start_cycles.get_or_insert(cycles);
            }
            Line::Event { event, .. } => events.push(event),
            _ => unmatched += 1,
        }
    }

    if unmatched > 0 {
        tracing::trace!("Skipped {} unmatched lines", unmatched);
    }
    if cycles_per_second.is_none() || start_cycles.is_none() {
        tracing::debug!(
            "Clock headers missing (rate: {:?}, start: {:?}), using identity scaling",
            cycles_per_second,
            start_cycles
        );
    }

    Ok(SourceTrace::new(
        events,
        cycles_per_second.unwrap_or(SourceTrace::DEFAULT_CYCLES_PER_SECOND),
        start_cycles.unwrap_or(0),
    ))
}

/// Read and parse a timetrace log file
pub fn read_source_trace(path: &Path) -> Result<SourceTrace> {
    let trace = parse_source_trace(&read_input(path)?)?;
    tracing::debug!(
        "Parsed {}: {} events, {} cycles/s, start cycle {}",
        path.display(),
        trace.events.len(),
        trace.cycles_per_second,
        trace.start_cycles
    );
    Ok(trace)
}

/// One block of an estimation-dump log
#[derive(Debug, Clone, PartialEq)]
pub struct EstimationDump {
    /// Raw cycle counter value from `TimeInCycles`
    pub cycles: f64,
    /// Block text including its terminating sentinel line
    pub text: String,
}

/// Incremental reader over estimation-dump blocks
pub struct EstimationDumpReader<'a> {
    lines: std::str::Lines<'a>,
    classifier: LineClassifier,
    cycles_per_second: Option<f64>,
}

impl<'a> EstimationDumpReader<'a> {
    pub fn new(content: &'a str) -> Result<Self> {
        Ok(Self {
            lines: content.lines(),
            classifier: LineClassifier::estimation_dump()?,
            cycles_per_second: None,
        })
    }

    /// Rate declared by the log itself, once its header has been read
    pub fn cycles_per_second(&self) -> Option<f64> {
        self.cycles_per_second
    }

    /// Read the next block, or `None` at end of input
    ///
    /// A trailing block without its sentinel is still returned.
    pub fn next_dump(&mut self) -> Option<EstimationDump> {
        let mut text = String::new();
        let mut cycles = 0.0;

        for line in self.lines.by_ref() {
            match self.classifier.classify(line) {
                Line::CyclesPerSecond(rate) => {
                    self.cycles_per_second.get_or_insert(rate);
                    continue;
                }
                Line::DumpTimestamp(value) => cycles = value,
                Line::DumpEnd => {
                    text.push_str(line);
                    text.push('\n');
                    return Some(EstimationDump { cycles, text });
                }
                _ => {}
            }
            text.push_str(line);
            text.push('\n');
        }

        if text.trim().is_empty() {
            None
        } else {
            Some(EstimationDump { cycles, text })
        }
    }
}

/// One sample row of a latency log
#[derive(Debug, Clone, PartialEq)]
pub struct LatencyRow {
    pub timestamp_us: f64,
    pub text: String,
}

/// Incremental reader over latency rows; the first line is the header
pub struct LatencyLogReader<'a> {
    header: String,
    lines: std::str::Lines<'a>,
    classifier: LineClassifier,
}

impl<'a> LatencyLogReader<'a> {
    pub fn new(content: &'a str) -> Result<Self> {
        let mut lines = content.lines();
        let header = lines.next().unwrap_or_default().to_string();
        Ok(Self {
            header,
            lines,
            classifier: LineClassifier::latency()?,
        })
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    /// Read the next row, skipping lines that are not rows
    pub fn next_row(&mut self) -> Option<LatencyRow> {
        for line in self.lines.by_ref() {
            if let Line::LatencyRow { timestamp_us } = self.classifier.classify(line) {
                return Some(LatencyRow {
                    timestamp_us,
                    text: line.to_string(),
                });
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind_of(line: &str) -> MessageKind {
        match LineClassifier::timetrace().unwrap().classify(line) {
            Line::Event { kind, .. } => kind,
            other => panic!("expected event, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_headers() {
        let classifier = LineClassifier::timetrace().unwrap();
        assert_eq!(
            classifier.classify("CYCLES_PER_SECOND 2400000000.000000"),
            Line::CyclesPerSecond(2.4e9)
        );
        assert_eq!(
            classifier.classify("START_CYCLES 123456"),
            Line::StartCycles(123456)
        );
    }

    #[test]
    fn test_malformed_header_is_unmatched() {
        let classifier = LineClassifier::timetrace().unwrap();
        assert_eq!(classifier.classify("CYCLES_PER_SECOND fast"), Line::Unmatched);
        assert_eq!(classifier.classify("START_CYCLES -4"), Line::Unmatched);
    }

    #[test]
    fn test_classify_plain_event() {
        let classifier = LineClassifier::timetrace().unwrap();
        let line = classifier.classify("  1042.3 ns (+  12.0 ns): request received");
        assert_eq!(
            line,
            Line::Event {
                event: Event::new(1042.3, 12.0, "request received"),
                kind: MessageKind::Plain,
            }
        );
    }

    #[test]
    fn test_classify_migration() {
        assert_eq!(
            kind_of("10.0 ns (+ 10.0 ns): [w3] cpuid: 5"),
            MessageKind::Migration {
                thread: "w3".to_string(),
                core: 5
            }
        );
    }

    #[test]
    fn test_classify_teardown() {
        assert_eq!(
            kind_of("10.0 ns (+ 1.0 ns): CLEANUP: Worker w1 on core 9 going down!"),
            MessageKind::Teardown {
                thread: "w1".to_string(),
                reported_core: 9
            }
        );
    }

    #[test]
    fn test_classify_window_marker_with_wall_clock() {
        assert_eq!(
            kind_of("5.0 ns (+ 5.0 ns): -----CLEANUP CORETRACE: Time: tv_sec=2, tv_usec=500 -----"),
            MessageKind::WindowMarker {
                wall_clock_us: Some(2_000_500.0)
            }
        );
        assert_eq!(
            kind_of("5.0 ns (+ 5.0 ns): CLEANUP CORETRACE"),
            MessageKind::WindowMarker {
                wall_clock_us: None
            }
        );
    }

    #[test]
    fn test_garbage_is_unmatched() {
        let classifier = LineClassifier::timetrace().unwrap();
        assert_eq!(classifier.classify("hello world"), Line::Unmatched);
        assert_eq!(classifier.classify(""), Line::Unmatched);
    }

    #[test]
    fn test_parse_source_trace_first_header_wins() {
        let content = "CYCLES_PER_SECOND 2000\nCYCLES_PER_SECOND 3000\nSTART_CYCLES 7\n\
                       1.0 ns (+ 1.0 ns): a\nnoise\n2.0 ns (+ 1.0 ns): b\n";
        let trace = parse_source_trace(content).unwrap();
        assert_eq!(trace.cycles_per_second, 2000.0);
        assert_eq!(trace.start_cycles, 7);
        assert_eq!(trace.events.len(), 2);
        assert_eq!(trace.events[1].message, "b");
    }

    #[test]
    fn test_parse_source_trace_defaults_to_identity_clock() {
        let trace = parse_source_trace("1.0 ns (+ 1.0 ns): a\n").unwrap();
        assert_eq!(trace.cycles_per_second, 1.0);
        assert_eq!(trace.start_cycles, 0);
    }

    #[test]
    fn test_estimation_dump_reader_blocks() {
        let content = "CYCLES_PER_SECOND 1000000000\n\
                       BEGIN\nTimeInCycles = 1500,\ncores = 3\nEND ESTIMATION STATS DUMP\n\
                       TimeInCycles = 2500,\nEND ESTIMATION STATS DUMP\n\n";
        let mut reader = EstimationDumpReader::new(content).unwrap();

        let first = reader.next_dump().unwrap();
        assert_eq!(first.cycles, 1500.0);
        assert_eq!(
            first.text,
            "BEGIN\nTimeInCycles = 1500,\ncores = 3\nEND ESTIMATION STATS DUMP\n"
        );
        assert_eq!(reader.cycles_per_second(), Some(1e9));

        let second = reader.next_dump().unwrap();
        assert_eq!(second.cycles, 2500.0);
        assert!(reader.next_dump().is_none());
    }

    #[test]
    fn test_latency_reader_skips_non_rows() {
        let content = "time,p50,p99\n100,1,2\n# comment\n250,3,4\n";
        let mut reader = LatencyLogReader::new(content).unwrap();
        assert_eq!(reader.header(), "time,p50,p99");
        assert_eq!(reader.next_row().unwrap().timestamp_us, 100.0);
        let row = reader.next_row().unwrap();
        assert_eq!(row.timestamp_us, 250.0);
        assert_eq!(row.text, "250,3,4");
        assert!(reader.next_row().is_none());
    }
}
