//! Core occupancy tracking
//!
//! Replays `[<thread>] cpuid: <core>` migration events against a live
//! thread → core and core → threads mapping and decides when the mapping is
//! worth a snapshot: a tracked thread moved, or a worker went down, while the
//! measured window of the benchmark is open.

use crate::clock::WallClockAnchor;
use crate::error::{Result, TraceError};
use crate::event::{CoreId, Event};
use crate::parse::{Line, LineClassifier, MessageKind};
use crate::render::{Block, Timeline};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Reject core counts that cannot be split into hyperthread sibling halves
pub fn validate_core_count(num_cores: usize) -> Result<()> {
    if num_cores < 2 || num_cores % 2 != 0 {
        return Err(TraceError::InvalidCoreCount(num_cores));
    }
    Ok(())
}

/// Placement history of one thread name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadRecord {
    /// Every core the thread was observed on, oldest first
    pub cores: Vec<CoreId>,
    /// False once the thread was torn down
    pub running: bool,
}

impl ThreadRecord {
    pub fn current_core(&self) -> Option<CoreId> {
        if self.running {
            self.cores.last().copied()
        } else {
            None
        }
    }
}

/// Live core/thread mapping for one tracking run
///
/// A thread name is listed on core `c` iff its current core is `c`. A core
/// may list several names at once (e.g. while two placements race).
#[derive(Debug, Clone, PartialEq)]
pub struct CoreOccupancyState {
    thread_history: HashMap<String, ThreadRecord>,
    core_threads: Vec<Vec<String>>,
}

impl CoreOccupancyState {
    pub fn new(num_cores: usize) -> Result<Self> {
        validate_core_count(num_cores)?;
        Ok(Self {
            thread_history: HashMap::new(),
            core_threads: vec![Vec::new(); num_cores],
        })
    }

    pub fn num_cores(&self) -> usize {
        self.core_threads.len()
    }

    pub fn current_core(&self, thread: &str) -> Option<CoreId> {
        self.thread_history
            .get(thread)
            .and_then(ThreadRecord::current_core)
    }

    pub fn history(&self, thread: &str) -> Option<&ThreadRecord> {
        self.thread_history.get(thread)
    }

    pub fn threads_on(&self, core: CoreId) -> &[String] {
        self.core_threads.get(core).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn core_threads(&self) -> &[Vec<String>] {
        &self.core_threads
    }

    /// Move `thread` onto `core`, returning the core it left
    pub fn place(&mut self, thread: &str, core: CoreId) -> Result<Option<CoreId>> {
        let num_cores = self.num_cores();
        if core >= num_cores {
            return Err(TraceError::CoreOutOfRange { core, num_cores });
        }

        let previous = self.current_core(thread);
        if let Some(previous) = previous {
            self.remove_from(previous, thread);
        }

        let record = self.thread_history.entry(thread.to_string()).or_default();
        record.cores.push(core);
        record.running = true;
        self.core_threads[core].push(thread.to_string());
        Ok(previous)
    }

    /// Take `thread` off the core this state last recorded for it
    ///
    /// Returns the core it was removed from, or `None` if the thread was not
    /// running anywhere.
    pub fn retire(&mut self, thread: &str) -> Option<CoreId> {
        let record = self.thread_history.get_mut(thread)?;
        let core = record.current_core()?;
        record.running = false;
        self.remove_from(core, thread).then_some(core)
    }

    /// Stale entries (the name is not listed on `core`) are left alone
    fn remove_from(&mut self, core: CoreId, thread: &str) -> bool {
        let Some(threads) = self.core_threads.get_mut(core) else {
            return false;
        };
        match threads.iter().position(|t| t == thread) {
            Some(index) => {
                threads.remove(index);
                true
            }
            None => false,
        }
    }

    /// True when every running thread is listed exactly once, on its
    /// current core, and nowhere else
    pub fn is_consistent(&self) -> bool {
        let listed_once = self.thread_history.iter().all(|(name, record)| {
            self.core_threads
                .iter()
                .enumerate()
                .all(|(core, threads)| {
                    let count = threads.iter().filter(|t| *t == name).count();
                    if record.current_core() == Some(core) {
                        count == 1
                    } else {
                        count == 0
                    }
                })
        });
        let no_strangers = self
            .core_threads
            .iter()
            .flatten()
            .all(|name| self.thread_history.contains_key(name));
        listed_once && no_strangers
    }
}

/// Which thread names trigger a snapshot when they migrate
#[derive(Debug, Clone)]
pub struct ThreadFilter {
    pattern: Option<Regex>,
}

impl ThreadFilter {
    pub const WORKERS: &'static str = r"^w[0-9]+";
    pub const WORKERS_AND_VIDEO: &'static str = r"^(w[0-9]+|avid[0-9]+)";

    /// Worker threads (`w<digits>`)
    pub fn workers() -> Result<Self> {
        Self::from_pattern(Self::WORKERS)
    }

    /// Worker threads plus video threads (`avid<digits>`)
    pub fn verbose() -> Result<Self> {
        Self::from_pattern(Self::WORKERS_AND_VIDEO)
    }

    pub fn all() -> Self {
        Self { pattern: None }
    }

    pub fn from_pattern(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Some(Regex::new(pattern)?),
        })
    }

    pub fn matches(&self, thread: &str) -> bool {
        self.pattern.as_ref().map_or(true, |re| re.is_match(thread))
    }
}

/// Whether window markers gate tracking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Track only between the two `CLEANUP CORETRACE` markers
    #[default]
    Markers,
    /// Treat the whole trace as measured
    Always,
}

/// Benchmark phase as delimited by window markers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPhase {
    RampUp,
    Measuring,
    CoolDown,
}

/// The measured region of a run; opens at the first marker and closes for
/// good at the second
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlignmentWindow {
    policy: WindowPolicy,
    phase: WindowPhase,
}

impl AlignmentWindow {
    pub fn new(policy: WindowPolicy) -> Self {
        Self {
            policy,
            phase: WindowPhase::RampUp,
        }
    }

    pub fn phase(&self) -> WindowPhase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        match self.policy {
            WindowPolicy::Always => true,
            WindowPolicy::Markers => self.phase == WindowPhase::Measuring,
        }
    }

    /// Advance on a marker line and return the new phase
    pub fn on_marker(&mut self) -> WindowPhase {
        self.phase = match self.phase {
            WindowPhase::RampUp => WindowPhase::Measuring,
            WindowPhase::Measuring | WindowPhase::CoolDown => WindowPhase::CoolDown,
        };
        self.phase
    }
}

/// Tracker settings
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub num_cores: usize,
    pub tracked: ThreadFilter,
    pub window: WindowPolicy,
}

/// The mapping at the moment a snapshot was taken
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub timestamp_ns: f64,
    pub cores: Vec<Vec<String>>,
}

/// Applies migration, teardown and window events to a
/// [`CoreOccupancyState`]
#[derive(Debug, Clone)]
pub struct OccupancyTracker {
    state: CoreOccupancyState,
    tracked: ThreadFilter,
    window: AlignmentWindow,
    anchor: Option<WallClockAnchor>,
}

impl OccupancyTracker {
    pub fn new(config: TrackerConfig) -> Result<Self> {
        Ok(Self {
            state: CoreOccupancyState::new(config.num_cores)?,
            tracked: config.tracked,
            window: AlignmentWindow::new(config.window),
            anchor: None,
        })
    }

    pub fn state(&self) -> &CoreOccupancyState {
        &self.state
    }

    pub fn window(&self) -> &AlignmentWindow {
        &self.window
    }

    /// Wall-clock anchor from the window-opening marker, if it carried one
    pub fn anchor(&self) -> Option<WallClockAnchor> {
        self.anchor
    }

    /// Apply one event and return a snapshot if it warrants one
    ///
    /// Outside the window, migrations and teardowns leave the mapping
    /// untouched.
    pub fn observe(&mut self, event: &Event, kind: &MessageKind) -> Result<Option<Snapshot>> {
        match kind {
            MessageKind::WindowMarker { wall_clock_us } => {
                let was = self.window.phase();
                let now = self.window.on_marker();
                if was == WindowPhase::RampUp {
                    if let Some(wall_clock_us) = wall_clock_us {
                        self.anchor = Some(WallClockAnchor::from_marker(
                            event.timestamp_ns,
                            *wall_clock_us,
                        ));
                    }
                }
                tracing::debug!(
                    "Window marker at {:.2} ns: {:?} -> {:?}",
                    event.timestamp_ns,
                    was,
                    now
                );
                Ok(None)
            }
            MessageKind::Migration { thread, core } => {
                if !self.window.is_open() {
                    return Ok(None);
                }
                self.state.place(thread, *core)?;
                Ok(self
                    .tracked
                    .matches(thread)
                    .then(|| self.snapshot(event.timestamp_ns)))
            }
            MessageKind::Teardown { thread, .. } => {
                if !self.window.is_open() {
                    return Ok(None);
                }
                Ok(self
                    .state
                    .retire(thread)
                    .map(|_| self.snapshot(event.timestamp_ns)))
            }
            MessageKind::Plain => Ok(None),
        }
    }

    fn snapshot(&self, timestamp_ns: f64) -> Snapshot {
        Snapshot {
            timestamp_ns,
            cores: self.state.core_threads().to_vec(),
        }
    }

    /// Replay a whole timetrace and collect the snapshot blocks
    ///
    /// Each block's delta is measured against the previous snapshot.
    pub fn run(&mut self, content: &str) -> Result<Vec<Block>> {
        let classifier = LineClassifier::timetrace()?;
        let mut timeline = Timeline::default();
        let mut blocks = Vec::new();

        for line in content.lines() {
            if let Line::Event { event, kind } = classifier.classify(line) {
                if let Some(snapshot) = self.observe(&event, &kind)? {
                    blocks.push(timeline.occupancy(snapshot));
                }
            }
        }
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migration(thread: &str, core: CoreId) -> MessageKind {
        MessageKind::Migration {
            thread: thread.to_string(),
            core,
        }
    }

    fn teardown(thread: &str, reported_core: CoreId) -> MessageKind {
        MessageKind::Teardown {
            thread: thread.to_string(),
            reported_core,
        }
    }

    fn marker() -> MessageKind {
        MessageKind::WindowMarker {
            wall_clock_us: None,
        }
    }

    fn at(ts: f64) -> Event {
        Event::new(ts, 0.0, "")
    }

    fn tracker(window: WindowPolicy) -> OccupancyTracker {
        OccupancyTracker::new(TrackerConfig {
            num_cores: 8,
            tracked: ThreadFilter::workers().unwrap(),
            window,
        })
        .unwrap()
    }

    #[test]
    fn test_core_count_validation() {
        assert!(CoreOccupancyState::new(16).is_ok());
        assert!(matches!(
            CoreOccupancyState::new(7),
            Err(TraceError::InvalidCoreCount(7))
        ));
        assert!(CoreOccupancyState::new(0).is_err());
    }

    #[test]
    fn test_place_moves_thread() {
        let mut state = CoreOccupancyState::new(8).unwrap();
        assert_eq!(state.place("w3", 2).unwrap(), None);
        assert_eq!(state.place("w3", 5).unwrap(), Some(2));
        assert!(state.threads_on(2).is_empty());
        assert_eq!(state.threads_on(5), ["w3".to_string()]);
        assert_eq!(state.history("w3").unwrap().cores, vec![2, 5]);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_core_may_host_several_threads() {
        let mut state = CoreOccupancyState::new(4).unwrap();
        state.place("w1", 1).unwrap();
        state.place("w2", 1).unwrap();
        assert_eq!(state.threads_on(1), ["w1".to_string(), "w2".to_string()]);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_place_out_of_range_core() {
        let mut state = CoreOccupancyState::new(4).unwrap();
        assert!(matches!(
            state.place("w1", 4),
            Err(TraceError::CoreOutOfRange {
                core: 4,
                num_cores: 4
            })
        ));
    }

    #[test]
    fn test_retire_uses_recorded_core() {
        let mut state = CoreOccupancyState::new(8).unwrap();
        state.place("w1", 4).unwrap();
        assert_eq!(state.retire("w1"), Some(4));
        assert!(state.threads_on(4).is_empty());
        assert_eq!(state.current_core("w1"), None);
        assert_eq!(state.retire("w1"), None);
        assert_eq!(state.retire("nobody"), None);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_replacement_after_retire_is_first_placement() {
        let mut state = CoreOccupancyState::new(8).unwrap();
        state.place("w1", 4).unwrap();
        state.retire("w1");
        assert_eq!(state.place("w1", 6).unwrap(), None);
        assert_eq!(state.history("w1").unwrap().cores, vec![4, 6]);
        assert!(state.is_consistent());
    }

    #[test]
    fn test_thread_filter_patterns() {
        let workers = ThreadFilter::workers().unwrap();
        assert!(workers.matches("w12"));
        assert!(!workers.matches("avid3"));
        assert!(!workers.matches("main"));

        let verbose = ThreadFilter::verbose().unwrap();
        assert!(verbose.matches("avid3"));
        assert!(verbose.matches("w0"));
        assert!(ThreadFilter::all().matches("anything"));
        assert!(ThreadFilter::from_pattern("(").is_err());
    }

    #[test]
    fn test_window_opens_once_and_stays_closed() {
        let mut window = AlignmentWindow::new(WindowPolicy::Markers);
        assert!(!window.is_open());
        assert_eq!(window.on_marker(), WindowPhase::Measuring);
        assert!(window.is_open());
        assert_eq!(window.on_marker(), WindowPhase::CoolDown);
        assert!(!window.is_open());
        window.on_marker();
        assert!(!window.is_open());
    }

    #[test]
    fn test_always_window_is_open() {
        assert!(AlignmentWindow::new(WindowPolicy::Always).is_open());
    }

    #[test]
    fn test_migration_snapshot_inside_window() {
        let mut t = tracker(WindowPolicy::Markers);
        t.observe(&at(1.0), &marker()).unwrap();
        t.observe(&at(2.0), &migration("w3", 2)).unwrap();
        let snap = t.observe(&at(3.0), &migration("w3", 5)).unwrap().unwrap();
        assert_eq!(snap.timestamp_ns, 3.0);
        assert!(snap.cores[2].is_empty());
        assert_eq!(snap.cores[5], vec!["w3".to_string()]);
    }

    #[test]
    fn test_untracked_thread_updates_without_snapshot() {
        let mut t = tracker(WindowPolicy::Always);
        assert!(t.observe(&at(1.0), &migration("dispatch", 0)).unwrap().is_none());
        assert_eq!(t.state().current_core("dispatch"), Some(0));
    }

    #[test]
    fn test_window_suppresses_migrations() {
        let mut t = tracker(WindowPolicy::Markers);
        assert!(t.observe(&at(1.0), &migration("w1", 1)).unwrap().is_none());
        assert_eq!(t.state().current_core("w1"), None);

        t.observe(&at(2.0), &marker()).unwrap();
        assert!(t.observe(&at(3.0), &migration("w1", 1)).unwrap().is_some());
        t.observe(&at(4.0), &marker()).unwrap();
        assert!(t.observe(&at(5.0), &migration("w1", 2)).unwrap().is_none());
        assert_eq!(t.state().current_core("w1"), Some(1));
    }

    #[test]
    fn test_teardown_ignores_reported_core() {
        let mut t = tracker(WindowPolicy::Always);
        t.observe(&at(1.0), &migration("w1", 4)).unwrap();
        let snap = t.observe(&at(2.0), &teardown("w1", 9)).unwrap().unwrap();
        assert!(snap.cores[4].is_empty());
        assert!(snap.cores.iter().all(Vec::is_empty));
    }

    #[test]
    fn test_teardown_of_unknown_thread_is_silent() {
        let mut t = tracker(WindowPolicy::Always);
        assert!(t.observe(&at(1.0), &teardown("w9", 0)).unwrap().is_none());
    }

    #[test]
    fn test_first_marker_sets_anchor() {
        let mut t = tracker(WindowPolicy::Markers);
        let kind = MessageKind::WindowMarker {
            wall_clock_us: Some(5_000.0),
        };
        t.observe(&at(1000.0), &kind).unwrap();
        assert_eq!(t.anchor().unwrap().origin_us(), 4_999.0);
        t.observe(&at(9000.0), &kind).unwrap();
        assert_eq!(t.anchor().unwrap().origin_us(), 4_999.0);
    }

    #[test]
    fn test_run_measures_delta_between_snapshots() {
        let trace = "\
CYCLES_PER_SECOND 1000000000
10.0 ns (+ 10.0 ns): CLEANUP CORETRACE
20.0 ns (+ 10.0 ns): [w1] cpuid: 1
25.0 ns (+ 5.0 ns): [helper] cpuid: 2
50.0 ns (+ 25.0 ns): [w1] cpuid: 3
60.0 ns (+ 10.0 ns): CLEANUP CORETRACE
70.0 ns (+ 10.0 ns): [w1] cpuid: 0
";
        let blocks = tracker(WindowPolicy::Markers).run(trace).unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].stamp().timestamp_ns, 20.0);
        assert_eq!(blocks[0].stamp().delta_ns, 20.0);
        assert_eq!(blocks[1].stamp().timestamp_ns, 50.0);
        assert_eq!(blocks[1].stamp().delta_ns, 30.0);
    }
}
