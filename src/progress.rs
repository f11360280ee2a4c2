//! Progress display and counters.
//!
//! Workers only ever add to the counters here; nothing in the transfer logic
//! reads them back, so relaxed atomics are enough.

use std::io::IsTerminal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Which template a bar uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarKind {
    /// Counts collections during a scan.
    Count,
    /// Counts bytes during transfer.
    Bytes,
}

/// Create a progress bar with a consistent template.
///
/// Returns `ProgressBar::hidden()` when the user passed `--no-progress-bar` or
/// stdout is not a TTY.
pub fn create_progress_bar(no_progress_bar: bool, total: u64, kind: BarKind) -> ProgressBar {
    if no_progress_bar || !std::io::stdout().is_terminal() {
        return ProgressBar::hidden();
    }
    let template = match kind {
        BarKind::Count => "[{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
        BarKind::Bytes => {
            "[{elapsed_precise}] [{bar:40.cyan/blue}] {decimal_bytes}/{decimal_total_bytes} \
             ({decimal_bytes_per_sec}, {eta}) {msg}"
        }
    };
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::with_template(template)
            .expect("valid template")
            .progress_chars("=> "),
    );
    pb
}

/// Running totals for the transfer phase, shared by all workers.
#[derive(Debug)]
pub struct TransferProgress {
    bytes: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    bar: ProgressBar,
}

/// Point-in-time copy of [`TransferProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub bytes: u64,
    pub completed: u64,
    pub failed: u64,
}

impl TransferProgress {
    pub fn new(bar: ProgressBar) -> Self {
        Self {
            bytes: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            bar,
        }
    }

    pub fn hidden() -> Self {
        Self::new(ProgressBar::hidden())
    }

    pub fn bar(&self) -> &ProgressBar {
        &self.bar
    }

    pub fn item_completed(&self, size: u64) {
        self.bytes.fetch_add(size, Ordering::Relaxed);
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.bar.inc(size);
    }

    /// A failed item still advances the bar so the ETA stays honest.
    pub fn item_failed(&self, size: u64) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.bar.inc(size);
    }

    pub fn report(&self) -> TransferReport {
        TransferReport {
            bytes: self.bytes.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Format a byte count with SI units, one decimal: `1.5 MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 8] = ["", "K", "M", "G", "T", "P", "E", "Z"];
    let mut num = bytes as f64;
    for unit in UNITS {
        if num.abs() < 1000.0 {
            return format!("{:.1} {}B", num, unit);
        }
        num /= 1000.0;
    }
    format!("{:.1} YB", num)
}

pub fn format_duration(d: Duration) -> String {
    let total_secs = d.as_secs();
    let hours = total_secs / 3600;
    let mins = (total_secs % 3600) / 60;
    let secs = total_secs % 60;

    if hours > 0 {
        format!("{}h {:02}m {:02}s", hours, mins, secs)
    } else if mins > 0 {
        format!("{}m {:02}s", mins, secs)
    } else {
        format!("{}s", secs)
    }
}
