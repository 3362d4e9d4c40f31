//! K-way merge of independently recorded timetraces
//!
//! Sources are first rescaled onto one nanosecond axis (see
//! [`ClockNormalizer`]), then merged by repeatedly emitting the smallest head
//! among all streams. Each step scans every head in source order, so the
//! first-listed source wins ties.

use crate::clock::ClockNormalizer;
use crate::event::{Event, SourceTrace};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{self, Write};

/// How the first emitted timestamp is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartPolicy {
    /// Start at the latest of the sources' oldest events and drop anything
    /// older, so every emitted instant is covered by all sources
    #[default]
    Truncating,
    /// Start at the oldest event of any source and keep everything
    Retentive,
}

/// What happens once a source runs out of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Keep merging the remaining sources until all are exhausted
    #[default]
    Drain,
    /// Stop as soon as any source is exhausted
    StopAtFirst,
}

/// Merge behaviour knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeConfig {
    pub start: StartPolicy,
    pub exhaustion: ExhaustionPolicy,
}

/// Result of a merge, re-based so the first retained instant is `t = 0`
#[derive(Debug, Clone, PartialEq)]
pub struct MergedTrace {
    /// Reference rate all sources were normalized to
    pub cycles_per_second: f64,
    /// Absolute merge start on the normalized axis
    pub start_ns: f64,
    /// `start_ns` expressed in reference cycles
    pub start_cycles: u64,
    pub events: Vec<Event>,
}

impl MergedTrace {
    /// Write the merge in timetrace text form
    ///
    /// The clock headers make the output acceptable as a merge input again.
    pub fn write_text<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "CYCLES_PER_SECOND {:.6}", self.cycles_per_second)?;
        writeln!(out, "START_CYCLES {}", self.start_cycles)?;
        for event in &self.events {
            writeln!(
                out,
                "{:8.1} ns (+{:6.1} ns): {}",
                event.timestamp_ns, event.delta_ns, event.message
            )?;
        }
        Ok(())
    }

    /// Write one JSON object per event
    pub fn write_json_lines<W: Write>(&self, out: &mut W) -> io::Result<()> {
        for event in &self.events {
            serde_json::to_writer(&mut *out, event)?;
            writeln!(out)?;
        }
        Ok(())
    }
}

/// N-way merger over normalized event streams
#[derive(Debug, Clone, Default)]
pub struct StreamMerger {
    config: MergeConfig,
}

impl StreamMerger {
    pub fn new(config: MergeConfig) -> Self {
        Self { config }
    }

    /// Normalize `sources` against their slowest clock and merge them
    pub fn merge_sources(&self, sources: Vec<SourceTrace>) -> MergedTrace {
        let normalizer = ClockNormalizer::for_sources(&sources);
        tracing::info!(
            "Merging {} sources at reference rate {} cycles/s",
            sources.len(),
            normalizer.reference_cycles_per_second()
        );

        let streams = sources
            .into_iter()
            .map(|source| normalizer.normalize(source))
            .collect();
        let (start_ns, events) = self.merge(streams);

        MergedTrace {
            cycles_per_second: normalizer.reference_cycles_per_second(),
            start_ns,
            start_cycles: normalizer.ns_to_cycles(start_ns),
            events,
        }
    }

    /// Merge already-normalized, individually sorted streams
    ///
    /// Returns the chosen start time and the merged events with timestamps
    /// relative to it and deltas relative to the previously emitted event.
    pub fn merge(&self, streams: Vec<Vec<Event>>) -> (f64, Vec<Event>) {
        let start_ns = start_time(self.config.start, &streams).unwrap_or(0.0);
        tracing::info!("Merge start time: {:.1} ns", start_ns);

        let mut queues: Vec<VecDeque<Event>> = streams
            .into_iter()
            .map(|stream| {
                let mut queue = VecDeque::from(stream);
                while queue.front().is_some_and(|e| e.timestamp_ns < start_ns) {
                    queue.pop_front();
                }
                queue
            })
            .collect();

        let total = queues.iter().map(VecDeque::len).sum();
        let mut merged = Vec::with_capacity(total);
        let mut prev_ns = start_ns;

        while let Some(index) = self.next_source(&queues) {
            let Some(event) = queues[index].pop_front() else {
                break;
            };
            merged.push(Event {
                timestamp_ns: event.timestamp_ns - start_ns,
                delta_ns: event.timestamp_ns - prev_ns,
                message: event.message,
            });
            prev_ns = event.timestamp_ns;
        }

        if merged.len() < total {
            tracing::debug!(
                "Stopped at first exhausted source, dropped {} events",
                total - merged.len()
            );
        }
        merged.shrink_to_fit();
        (start_ns, merged)
    }

    /// Index of the source whose head is earliest, first-listed on ties
    fn next_source(&self, queues: &[VecDeque<Event>]) -> Option<usize> {
        let mut chosen: Option<(usize, f64)> = None;
        for (index, queue) in queues.iter().enumerate() {
            match queue.front() {
                None if self.config.exhaustion == ExhaustionPolicy::StopAtFirst => return None,
                None => continue,
                Some(head) => {
                    if chosen.map_or(true, |(_, best)| head.timestamp_ns < best) {
                        chosen = Some((index, head.timestamp_ns));
                    }
                }
            }
        }
        chosen.map(|(index, _)| index)
    }
}

/// Merge start time under `policy`, ignoring empty streams
///
/// `None` when every stream is empty.
pub fn start_time(policy: StartPolicy, streams: &[Vec<Event>]) -> Option<f64> {
    let firsts = streams
        .iter()
        .filter_map(|stream| stream.first().map(|e| e.timestamp_ns));
    match policy {
        StartPolicy::Truncating => firsts.reduce(f64::max),
        StartPolicy::Retentive => firsts.reduce(f64::min),
    }
}
