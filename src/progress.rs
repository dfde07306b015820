//! Progress bar and logging utilities.
//!
//! Stages get a `Progress` value instead of drawing bars themselves. In
//! log-only mode bars are hidden and periodic `info!` lines are emitted,
//! which keeps cron/CI output tail-friendly.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use tracing::info;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ProgressMode {
    #[default]
    Bars,
    LogOnly,
    Hidden,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Progress {
    mode: ProgressMode,
}

impl Progress {
    pub fn new(mode: ProgressMode) -> Self {
        Self { mode }
    }

    /// No bars and no periodic log lines. Used by tests.
    pub fn hidden() -> Self {
        Self::new(ProgressMode::Hidden)
    }

    fn draws(&self) -> bool {
        self.mode == ProgressMode::Bars
    }

    /// Create a progress bar with consistent styling.
    pub fn bar(&self, len: u64, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new(len);
        if self.draws() {
            if let Ok(style) = ProgressStyle::default_bar()
                .template("{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec}, ETA: {eta})")
            {
                pb.set_style(style.progress_chars("=> "));
            }
        } else {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb.set_message(msg.to_string());
        pb
    }

    /// Create a spinner for indeterminate progress.
    pub fn spinner(&self, msg: &str) -> ProgressBar {
        let pb = ProgressBar::new_spinner();
        if self.draws() {
            if let Ok(style) = ProgressStyle::default_spinner().template("{msg} {spinner} [{elapsed_precise}]") {
                pb.set_style(style);
            }
            pb.enable_steady_tick(Duration::from_millis(100));
        } else {
            pb.set_draw_target(ProgressDrawTarget::hidden());
        }
        pb.set_message(msg.to_string());
        pb
    }

    /// Log progress every `interval` items in log-only mode.
    pub fn log(&self, phase: &str, current: u64, total: u64, interval: u64) {
        if self.mode != ProgressMode::LogOnly || total == 0 {
            return;
        }
        if current % interval.max(1) == 0 || current == total {
            let pct = 100.0 * current as f64 / total as f64;
            info!("[{}] {}/{} ({:.1}%)", phase, current, total, pct);
        }
    }
}

/// Format duration in human-readable format
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs_f64();
    if secs < 60.0 {
        format!("{:.1}s", secs)
    } else {
        let mins = secs / 60.0;
        format!("{:.1}m", mins)
    }
}
