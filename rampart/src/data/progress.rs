//! Progress reporting for long materialisations.

use log::{debug, info};

/// Logs start and end at `info` and every tenth of the work at `debug`.
pub(crate) struct Progress {
    label: String,
    total: usize,
    done: usize,
    next_report: usize,
}

impl Progress {
    pub(crate) fn new(label: impl Into<String>, total: usize) -> Self {
        let label = label.into();
        info!("{}: {} elements", label, total);
        Self {
            label,
            total,
            done: 0,
            next_report: Self::step(total),
        }
    }

    fn step(total: usize) -> usize {
        (total / 10).max(1)
    }

    pub(crate) fn tick(&mut self) {
        self.done += 1;
        if self.done >= self.next_report && self.done < self.total {
            debug!(
                "{}: {}/{} ({:.0}%)",
                self.label,
                self.done,
                self.total,
                100.0 * self.done as f64 / self.total as f64
            );
            self.next_report += Self::step(self.total);
        }
    }

    pub(crate) fn finish(self) {
        info!("{}: done", self.label);
    }
}
