//! Hard reset through the DTR/RTS lines.
//!
//! On boards with the usual two-transistor auto-reset circuit, DTR and RTS
//! together drive EN and the boot strap pin. The order of the line changes
//! selects the boot mode, so every step runs strictly in sequence.

use {
    crate::{
        error::Result,
        programmer::{ControlLine, Programmer},
    },
    log::{debug, info, trace},
    std::{thread, time::Duration},
};

/// Hold time between line changes.
pub const RESET_HOLD: Duration = Duration::from_millis(100);

/// One step of a reset pulse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetStep {
    /// Drive a control line.
    Set(ControlLine, bool),
    /// Hold the current levels.
    Wait(Duration),
}

/// Sequence that takes the target out of the ROM loader into the application.
pub const HARD_RESET: [ResetStep; 7] = [
    ResetStep::Set(ControlLine::Dtr, false),
    ResetStep::Set(ControlLine::Rts, true),
    ResetStep::Wait(RESET_HOLD),
    ResetStep::Set(ControlLine::Dtr, true),
    ResetStep::Set(ControlLine::Rts, false),
    ResetStep::Wait(RESET_HOLD),
    ResetStep::Set(ControlLine::Dtr, false),
];

/// Source of fixed-duration waits.
pub trait Delay {
    /// Block for `duration`.
    fn delay(&mut self, duration: Duration);
}

/// Blocking delay on the current thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadDelay;

impl Delay for ThreadDelay {
    fn delay(&mut self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Runs a reset pulse against a programmer's control lines.
#[derive(Debug, Clone, Default)]
pub struct ResetSequencer<D: Delay = ThreadDelay> {
    delay: D,
}

impl<D: Delay> ResetSequencer<D> {
    /// Sequencer using a custom delay source.
    pub fn with_delay(delay: D) -> Self {
        Self { delay }
    }

    /// Execute [`HARD_RESET`]. A failing line change aborts the pulse.
    pub fn pulse(&mut self, programmer: &mut dyn Programmer) -> Result<()> {
        info!("Resetting device...");
        for step in HARD_RESET {
            match step {
                ResetStep::Set(line, level) => {
                    trace!("Setting {line} to {level}");
                    programmer.set_control_line(line, level)?;
                },
                ResetStep::Wait(duration) => self.delay.delay(duration),
            }
        }
        debug!("Reset pulse complete");
        Ok(())
    }
}
