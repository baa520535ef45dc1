//! Status sink: where the orchestrator publishes log lines, status text and
//! progress.
//!
//! Every method is fire-and-forget. Implementations must tolerate a
//! progress update per programmer callback.

use log::info;

/// Receiver for user-visible flash events.
pub trait StatusSink {
    /// Append a log line.
    fn log(&self, line: &str);

    /// Replace the single status-text field.
    fn status(&self, text: &str);

    /// Publish write progress in percent for a plan entry.
    fn progress(&self, segment_index: usize, percent: u8);

    /// Enable or disable the controls that start an operation.
    fn set_controls_enabled(&self, _enabled: bool) {}
}

/// Sink that forwards everything to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl StatusSink for LogSink {
    fn log(&self, line: &str) {
        info!("{line}");
    }

    fn status(&self, text: &str) {
        info!("Status: {text}");
    }

    fn progress(&self, segment_index: usize, percent: u8) {
        log::trace!("Segment {segment_index}: {percent}%");
    }
}
