//! Coretrace - offline analysis of per-thread timetrace logs
//!
//! This library merges timetrace logs recorded on independent cycle clocks
//! into one time-ordered stream, tracks which threads occupy which cores,
//! and renders the occupancy as a fixed-width report that can be
//! interleaved with estimation dumps and latency samples.

pub mod align;
pub mod cli;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod merge;
pub mod occupancy;
pub mod parse;
pub mod render;
