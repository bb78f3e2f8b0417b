//! Scalar logging for the steps.
//!
//! Steps emit every loss and metric value through [`LogSink`]. The
//! [`MetricLogger`] sink forwards step values to `tracing`, averages epoch
//! values and keeps a history of epoch summaries.

use std::collections::BTreeMap;

use derive_new::new;

/// Where a logged value should show up.
#[derive(new, Clone, Copy, Debug, PartialEq, Eq)]
pub struct LogFlags {
    /// Report the value of this step.
    pub on_step: bool,
    /// Aggregate into the epoch value.
    pub on_epoch: bool,
    /// Show in the progress summary.
    pub prog_bar: bool,
    /// Forward to the experiment logger.
    pub logger: bool,
}

impl LogFlags {
    /// Step and epoch reporting, visible everywhere. Used for losses.
    pub const fn step_and_epoch() -> Self {
        Self {
            on_step: true,
            on_epoch: true,
            prog_bar: true,
            logger: true,
        }
    }

    /// Epoch reporting only.
    pub const fn epoch() -> Self {
        Self {
            on_step: false,
            on_epoch: true,
            prog_bar: true,
            logger: true,
        }
    }
}

/// Receiver of scalar values emitted by the steps.
pub trait LogSink {
    fn log(&mut self, key: &str, value: f64, flags: LogFlags);
}

/// Mean values of one finished epoch.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EpochSummary {
    pub epoch: usize,
    pub values: BTreeMap<String, f64>,
}

impl EpochSummary {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// [`LogSink`] backed by `tracing`.
#[derive(Debug, Default)]
pub struct MetricLogger {
    epoch: usize,
    steps: usize,
    running: BTreeMap<String, (f64, usize)>,
    progress: BTreeMap<String, f64>,
    history: Vec<EpochSummary>,
}

impl MetricLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index of the epoch currently being logged, starting at 1.
    pub fn epoch(&self) -> usize {
        self.epoch + 1
    }

    /// Marks the end of one optimization or evaluation step.
    pub fn end_step(&mut self) {
        self.steps += 1;
    }

    /// Latest values flagged for the progress summary.
    pub fn progress(&self) -> &BTreeMap<String, f64> {
        &self.progress
    }

    /// Closes the current epoch: averages every epoch value, reports it and
    /// starts a new epoch.
    pub fn end_epoch(&mut self) -> EpochSummary {
        let values: BTreeMap<String, f64> = core::mem::take(&mut self.running)
            .into_iter()
            .map(|(key, (sum, count))| (key, sum / count as f64))
            .collect();

        let epoch = self.epoch();
        for (key, value) in &values {
            tracing::info!(epoch, key = %key, value, "epoch summary");
        }

        let summary = EpochSummary { epoch, values };
        self.history.push(summary.clone());
        self.progress.clear();
        self.epoch += 1;
        summary
    }

    pub fn history(&self) -> &[EpochSummary] {
        &self.history
    }

    /// Most recent epoch value of `key`.
    pub fn latest(&self, key: &str) -> Option<f64> {
        self.history.iter().rev().find_map(|summary| summary.get(key))
    }
}

impl LogSink for MetricLogger {
    fn log(&mut self, key: &str, value: f64, flags: LogFlags) {
        if flags.on_step && flags.logger {
            tracing::debug!(epoch = self.epoch(), step = self.steps, key, value, "step");
        }
        if flags.on_epoch {
            let entry = self.running.entry(key.to_owned()).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
        if flags.prog_bar {
            self.progress.insert(key.to_owned(), value);
        }
    }
}
