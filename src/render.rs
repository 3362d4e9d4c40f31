//! Fixed-width rendering of core occupancy reports
//!
//! Cores are shown as hyperthread sibling pairs: core `i` of the low half
//! next to core `i + num_cores / 2`. Every pair gets two 8-character cells
//! around a `|`, the low core right-justified against the separator and its
//! sibling left-justified after it, matching the column header.
//!
//! ```text
//! Total Time (ns)  Delta Time (ns)          0|4                1|5                2|6                3|7
//!           20.00            20.00         w1|                  |                  |                  |
//! ```

use crate::error::Result;
use crate::occupancy::{validate_core_count, Snapshot};

/// Width of the timestamp and delta columns
const STAMP_WIDTH: usize = 15;
/// Width of one thread-name cell
const CELL_WIDTH: usize = 8;

/// Absolute and delta time of one emitted block
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stamp {
    pub timestamp_ns: f64,
    pub delta_ns: f64,
}

/// One unit of occupancy-mode output
#[derive(Debug, Clone, PartialEq)]
pub enum Block {
    Occupancy {
        stamp: Stamp,
        cores: Vec<Vec<String>>,
    },
    EstimationDump {
        stamp: Stamp,
        text: String,
    },
    Latency {
        stamp: Stamp,
        header: String,
        row: String,
    },
}

impl Block {
    pub fn stamp(&self) -> Stamp {
        match self {
            Block::Occupancy { stamp, .. }
            | Block::EstimationDump { stamp, .. }
            | Block::Latency { stamp, .. } => *stamp,
        }
    }
}

/// Delta bookkeeping across everything emitted so far
///
/// Deltas are taken against the previously emitted block of any kind; the
/// first block measures from zero.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Timeline {
    last_emitted_ns: Option<f64>,
}

impl Timeline {
    /// True once any block has been emitted
    pub fn has_emitted(&self) -> bool {
        self.last_emitted_ns.is_some()
    }

    pub fn stamp(&mut self, timestamp_ns: f64) -> Stamp {
        let delta_ns = timestamp_ns - self.last_emitted_ns.unwrap_or(0.0);
        self.last_emitted_ns = Some(timestamp_ns);
        Stamp {
            timestamp_ns,
            delta_ns,
        }
    }

    pub fn occupancy(&mut self, snapshot: Snapshot) -> Block {
        Block::Occupancy {
            stamp: self.stamp(snapshot.timestamp_ns),
            cores: snapshot.cores,
        }
    }
}

/// Formats occupancy blocks as a fixed-width table
#[derive(Debug, Clone, Copy)]
pub struct SnapshotRenderer {
    num_cores: usize,
}

impl SnapshotRenderer {
    pub fn new(num_cores: usize) -> Result<Self> {
        validate_core_count(num_cores)?;
        Ok(Self { num_cores })
    }

    fn siblings(&self) -> usize {
        self.num_cores / 2
    }

    /// Column header line
    pub fn header(&self) -> String {
        let mut out = format!("{:>15}  {:>15} ", "Total Time (ns)", "Delta Time (ns)");
        for core in 0..self.siblings() {
            out.push_str(&format!(
                "  {:>w$}|{:<w$}",
                core,
                core + self.siblings(),
                w = CELL_WIDTH
            ));
        }
        out.push('\n');
        out
    }

    fn stamp_line(stamp: &Stamp) -> String {
        format!(
            "{:>w$.2}  {:>w$.2} ",
            stamp.timestamp_ns,
            stamp.delta_ns,
            w = STAMP_WIDTH
        )
    }

    /// Table rows for one mapping: as many rows as the busiest core has
    /// threads, at least one
    pub fn render_cores(&self, cores: &[Vec<String>]) -> Vec<String> {
        let rows = cores.iter().map(Vec::len).max().unwrap_or(0).max(1);
        (0..rows)
            .map(|row| {
                let mut line = String::new();
                for core in 0..self.siblings() {
                    line.push_str(&format!(
                        "  {:>w$}|{:<w$}",
                        cell(cores, core, row),
                        cell(cores, core + self.siblings(), row),
                        w = CELL_WIDTH
                    ));
                }
                line
            })
            .collect()
    }

    /// Render one block followed by a blank separator line
    pub fn render(&self, block: &Block) -> String {
        let mut out = String::new();
        match block {
            Block::Occupancy { stamp, cores } => {
                let indent = " ".repeat(STAMP_WIDTH * 2 + 3);
                for (i, row) in self.render_cores(cores).iter().enumerate() {
                    if i == 0 {
                        out.push_str(&Self::stamp_line(stamp));
                    } else {
                        out.push_str(&indent);
                    }
                    out.push_str(row);
                    out.push('\n');
                }
            }
            Block::EstimationDump { stamp, text } => {
                out.push_str(&Self::stamp_line(stamp));
                out.push('\n');
                out.push_str(text);
                if !text.ends_with('\n') {
                    out.push('\n');
                }
            }
            Block::Latency { stamp, header, row } => {
                out.push_str(&Self::stamp_line(stamp));
                out.push('\n');
                out.push_str(header);
                out.push('\n');
                out.push_str(row);
                out.push('\n');
            }
        }
        out.push('\n');
        out
    }

    /// Header followed by every block
    pub fn render_report(&self, blocks: &[Block]) -> String {
        let mut out = self.header();
        for block in blocks {
            out.push_str(&self.render(block));
        }
        out
    }
}

fn cell(cores: &[Vec<String>], core: usize, row: usize) -> &str {
    cores
        .get(core)
        .and_then(|threads| threads.get(row))
        .map_or("", String::as_str)
}
