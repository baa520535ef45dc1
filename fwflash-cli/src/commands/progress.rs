//! Terminal status sink backed by an indicatif progress bar.

use {
    crate::use_fancy_output,
    console::style,
    fwflash::{SegmentRole, StatusSink},
    indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle},
    std::cell::Cell,
};

/// Renders orchestrator events on stderr.
pub(crate) struct ProgressSink {
    bar: ProgressBar,
    quiet: bool,
    segment: Cell<Option<usize>>,
}

impl ProgressSink {
    pub(crate) fn new(quiet: bool) -> Self {
        let bar = if quiet || !use_fancy_output() {
            ProgressBar::hidden()
        } else {
            let bar = ProgressBar::new(100);
            #[allow(clippy::unwrap_used)] // Static template string
            bar.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}% {msg}")
                    .unwrap()
                    .progress_chars("#>-"),
            );
            bar.set_draw_target(ProgressDrawTarget::stderr());
            bar
        };
        Self {
            bar,
            quiet,
            segment: Cell::new(None),
        }
    }

    pub(crate) fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

fn segment_name(index: usize) -> String {
    SegmentRole::ALL
        .get(index)
        .map_or_else(|| format!("segment {index}"), ToString::to_string)
}

impl StatusSink for ProgressSink {
    fn log(&self, line: &str) {
        if self.quiet {
            return;
        }
        if self.bar.is_hidden() {
            eprintln!("  {} {line}", style("•").dim());
        } else {
            self.bar.println(format!("  {} {line}", style("•").dim()));
        }
    }

    fn status(&self, text: &str) {
        if self.bar.is_hidden() {
            log::info!("{text}");
        } else {
            self.bar.set_message(text.to_string());
        }
    }

    fn progress(&self, segment_index: usize, percent: u8) {
        if self.segment.get() != Some(segment_index) {
            self.segment.set(Some(segment_index));
            self.bar.reset();
            self.bar
                .set_message(format!("Writing {}", segment_name(segment_index)));
        }
        self.bar.set_position(u64::from(percent));
    }
}
