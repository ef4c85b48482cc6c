//! Progress reporting infrastructure
//!
//! To avoid corrupted terminal output, nothing should be written to stdout
//! or stderr while a report is being displayed. Please use logs for debug
//! messages.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::borrow::Cow;

/// CLI progress report of ongoing pipeline phases
#[derive(Clone, Debug, Default)]
pub struct ProgressReport(MultiProgress);
//
impl ProgressReport {
    /// Prepare to report progress on the cli
    pub fn new() -> Self {
        Self::default()
    }

    /// Report on a phase made of a known number of shard-sized steps
    pub fn add_steps(&self, what: impl Into<Cow<'static, str>>, steps: usize) -> PhaseTracker {
        let bar = ProgressBar::new(steps as u64)
            .with_prefix(what.into())
            .with_style(
                ProgressStyle::with_template("{prefix} {wide_bar} {pos}/{len} ({per_sec})")
                    .expect("the steps template should be a valid indicatif style"),
            );
        if steps > 0 {
            self.0.add(bar.clone());
        }
        PhaseTracker {
            bar,
            report: self.0.clone(),
        }
    }

    /// Report on a phase whose length is not known up front
    pub fn add_spinner(&self, what: impl Into<Cow<'static, str>>) -> PhaseTracker {
        let bar = ProgressBar::new_spinner().with_prefix(what.into()).with_style(
            ProgressStyle::with_template("{prefix} {spinner}")
                .expect("the spinner template should be a valid indicatif style"),
        );
        self.0.add(bar.clone());
        PhaseTracker {
            bar,
            report: self.0.clone(),
        }
    }
}

/// Mechanism to track progress of one pipeline phase
#[derive(Clone, Debug)]
pub struct PhaseTracker {
    /// Progress bar for this specific phase
    bar: ProgressBar,

    /// Underlying process report
    report: MultiProgress,
}
//
impl PhaseTracker {
    /// Show that one step of the phase has completed
    pub fn make_progress(&self) {
        self.bar.inc(1);
    }

    /// Finish the phase and hide its bar
    pub fn finish(&self) {
        self.bar.finish_and_clear();
        self.report.remove(&self.bar);
    }
}
