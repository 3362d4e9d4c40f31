//! Optional TOML configuration shared by all subcommands
//!
//! # Example coretrace.toml
//!
//! ```toml
//! num_cores = 32
//! tracked_threads = "^(w[0-9]+|dispatch)"
//! keep_old_events = true
//! ```
//!
//! Every key is optional; command-line flags take precedence.

use crate::error::{Result, TraceError};
use crate::merge::{ExhaustionPolicy, MergeConfig, StartPolicy};
use crate::occupancy::{validate_core_count, ThreadFilter};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings loadable from a config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Logical cores in the traced machine, hyperthread siblings included
    pub num_cores: usize,
    /// Regex selecting threads whose migrations produce snapshots
    pub tracked_threads: Option<String>,
    /// Start the merge at the oldest event instead of the latest common one
    pub keep_old_events: bool,
    /// Stop merging when the first source runs dry
    pub stop_at_first_exhausted: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            num_cores: 16,
            tracked_threads: None,
            keep_old_events: false,
            stop_at_first_exhausted: false,
        }
    }
}

impl AnalysisConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = crate::parse::read_input(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| TraceError::Config(e.to_string()))?;
        validate_core_count(config.num_cores)?;
        Ok(config)
    }

    pub fn merge_config(&self) -> MergeConfig {
        MergeConfig {
            start: if self.keep_old_events {
                StartPolicy::Retentive
            } else {
                StartPolicy::Truncating
            },
            exhaustion: if self.stop_at_first_exhausted {
                ExhaustionPolicy::StopAtFirst
            } else {
                ExhaustionPolicy::Drain
            },
        }
    }

    /// Thread filter: the configured pattern, else workers (plus video
    /// threads when `verbose`)
    pub fn thread_filter(&self, verbose: bool) -> Result<ThreadFilter> {
        match (&self.tracked_threads, verbose) {
            (Some(pattern), _) => ThreadFilter::from_pattern(pattern),
            (None, true) => ThreadFilter::verbose(),
            (None, false) => ThreadFilter::workers(),
        }
    }
}
