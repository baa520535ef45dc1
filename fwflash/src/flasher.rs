//! Flash orchestration.
//!
//! One call to [`FlashOrchestrator::flash`] runs the whole pipeline:
//!
//! ```text
//! Idle -> Downloading -> Writing -> VerifyingSpotCheck -> Resetting -> Done
//!             \             \                                \
//!              +-------------+-------------> Failed <---------+
//! ```
//!
//! Nothing touches the device until all four segments are in memory. A
//! spot-check mismatch is reported but does not stop the device from being
//! reset into the new image.

use {
    crate::{
        digest::{self, ContentDigest, SPOT_CHECK_LEN, VerificationDigest},
        error::{Error, Result},
        firmware::{ContentProvider, DEFAULT_APP_OFFSET, SegmentRole, fetch_all},
        plan::FlashPlan,
        programmer::{Programmer, WriteOptions},
        reset::{Delay, ResetSequencer, ThreadDelay},
        session::DeviceSession,
        sink::StatusSink,
    },
    log::{debug, error, info, warn},
    std::{
        fmt,
        sync::{
            Mutex, PoisonError,
            atomic::{AtomicBool, Ordering},
        },
    },
};

/// Phase of the current (or last) flash operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashState {
    /// No operation has run yet.
    #[default]
    Idle,
    /// Fetching segments.
    Downloading,
    /// Writing the plan.
    Writing,
    /// Reading back the application prefix.
    VerifyingSpotCheck,
    /// Pulsing the reset lines.
    Resetting,
    /// Finished; the device runs the new image.
    Done,
    /// Aborted; see the returned error.
    Failed,
}

impl fmt::Display for FlashState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Downloading => "downloading",
            Self::Writing => "writing",
            Self::VerifyingSpotCheck => "verifying",
            Self::Resetting => "resetting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Orchestrator options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashOptions {
    /// Flash address of the application image.
    pub app_offset: u32,
    /// Bytes read back for the spot check.
    pub spot_check_len: usize,
    /// Run the spot check at all.
    pub verify: bool,
    /// Options forwarded to the programmer.
    pub write: WriteOptions,
}

impl Default for FlashOptions {
    fn default() -> Self {
        Self {
            app_offset: DEFAULT_APP_OFFSET,
            spot_check_len: SPOT_CHECK_LEN,
            verify: true,
            write: WriteOptions::default(),
        }
    }
}

impl FlashOptions {
    /// Override the application offset.
    #[must_use]
    pub fn with_app_offset(mut self, offset: u32) -> Self {
        self.app_offset = offset;
        self
    }

    /// Enable or disable the read-back spot check.
    #[must_use]
    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }
}

/// Outcome of the read-back spot check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Read-back digest equals the expected prefix digest.
    Verified(ContentDigest),
    /// Digests differ.
    Mismatch {
        /// Digest of the fetched image prefix.
        expected: ContentDigest,
        /// Digest of the bytes read from flash.
        actual: ContentDigest,
    },
    /// Read-back failed; treated like a mismatch.
    ReadError(String),
    /// Spot check disabled.
    Skipped,
}

impl Verification {
    /// Whether the device was confirmed to hold the expected prefix.
    #[must_use]
    pub fn is_verified(&self) -> bool {
        matches!(self, Self::Verified(_))
    }
}

/// Summary of a completed flash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashReport {
    /// Addresses written, in plan order.
    pub addresses: Vec<u32>,
    /// Bytes written across all segments.
    pub total_bytes: usize,
    /// Digest of the full application image.
    pub image_digest: VerificationDigest,
    /// Digest of the spot-check window.
    pub prefix_digest: VerificationDigest,
    /// Spot-check outcome.
    pub verification: Verification,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::Busy)?;
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives download, write, spot check and reset for a connected session.
#[derive(Debug)]
pub struct FlashOrchestrator<D: Delay = ThreadDelay> {
    options: FlashOptions,
    busy: AtomicBool,
    state: Mutex<FlashState>,
    reset: Mutex<ResetSequencer<D>>,
}

impl FlashOrchestrator<ThreadDelay> {
    /// Orchestrator with real reset timing.
    #[must_use]
    pub fn new(options: FlashOptions) -> Self {
        Self::with_delay(options, ThreadDelay)
    }
}

impl<D: Delay> FlashOrchestrator<D> {
    /// Orchestrator with a custom reset delay source.
    pub fn with_delay(options: FlashOptions, delay: D) -> Self {
        Self {
            options,
            busy: AtomicBool::new(false),
            state: Mutex::new(FlashState::Idle),
            reset: Mutex::new(ResetSequencer::with_delay(delay)),
        }
    }

    /// Options in use.
    pub fn options(&self) -> &FlashOptions {
        &self.options
    }

    /// Phase of the current or last operation.
    pub fn state(&self) -> FlashState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: FlashState) {
        debug!("Flash state: {state}");
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Flash the firmware served by `provider` onto the session's device.
    ///
    /// Returns `Ok(None)` without side effects when the session is not
    /// connected, and [`Error::Busy`] when another call is in flight.
    pub fn flash(
        &self,
        session: &mut DeviceSession,
        provider: &dyn ContentProvider,
        sink: &dyn StatusSink,
    ) -> Result<Option<FlashReport>> {
        let _guard = BusyGuard::acquire(&self.busy)?;

        let Some(programmer) = session.programmer_mut() else {
            debug!("No device connected, nothing to flash");
            return Ok(None);
        };

        sink.set_controls_enabled(false);
        match self.run(programmer, provider, sink) {
            Ok(report) => {
                self.set_state(FlashState::Done);
                sink.set_controls_enabled(true);
                Ok(Some(report))
            },
            Err(e) => {
                self.set_state(FlashState::Failed);
                error!("Flash failed: {e}");
                sink.log(&format!("Error: {e}"));
                sink.status("Error flashing firmware");
                sink.set_controls_enabled(true);
                Err(e)
            },
        }
    }

    fn run(
        &self,
        programmer: &mut dyn Programmer,
        provider: &dyn ContentProvider,
        sink: &dyn StatusSink,
    ) -> Result<FlashReport> {
        let offset = self.options.app_offset;

        self.set_state(FlashState::Downloading);
        sink.status("Downloading firmware...");
        let segments = fetch_all(provider, offset)?;

        let app = segments
            .iter()
            .find(|s| s.role == SegmentRole::Application)
            .ok_or_else(|| Error::Config("application segment missing".into()))?;
        let window = self.options.spot_check_len.min(app.len());
        let image_digest = VerificationDigest::whole(&app.bytes);
        let prefix_digest = VerificationDigest::prefix(&app.bytes, window);
        sink.log(&format!(
            "Application image: {} bytes, MD5 {}",
            app.len(),
            image_digest.digest
        ));

        let plan = FlashPlan::new(segments, offset)?;
        for entry in plan.entries() {
            sink.log(&format!(
                "{} ({} bytes) -> 0x{:05X}",
                entry.segment.name,
                entry.segment.len(),
                entry.address
            ));
        }

        self.set_state(FlashState::Writing);
        sink.status("Flashing...");
        programmer
            .write_flash(&plan, &self.options.write, &mut |p| {
                sink.progress(p.segment_index, p.percent());
            })
            .map_err(|e| match e {
                Error::WriteFailure(_) => e,
                other => Error::WriteFailure(other.to_string()),
            })?;
        info!("Wrote {} bytes in {} segments", plan.total_bytes(), plan.entries().len());

        let verification = if self.options.verify {
            self.set_state(FlashState::VerifyingSpotCheck);
            sink.status("Verifying...");
            spot_check(programmer, offset, window, prefix_digest.digest, sink)
        } else {
            sink.log("Spot check skipped");
            Verification::Skipped
        };

        self.set_state(FlashState::Resetting);
        self.reset
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pulse(programmer)?;
        sink.log("Device reset");
        if verification == Verification::Skipped {
            sink.status("Done");
        }

        Ok(FlashReport {
            addresses: plan.addresses(),
            total_bytes: plan.total_bytes(),
            image_digest,
            prefix_digest,
            verification,
        })
    }

    /// Pulse the reset lines of a connected device without flashing.
    pub fn reset(&self, session: &mut DeviceSession) -> Result<()> {
        let _guard = BusyGuard::acquire(&self.busy)?;
        let programmer = session.programmer_mut().ok_or(Error::NotConnected)?;
        self.set_state(FlashState::Resetting);
        let result = self
            .reset
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pulse(programmer);
        self.set_state(if result.is_ok() {
            FlashState::Done
        } else {
            FlashState::Failed
        });
        result
    }
}

fn spot_check(
    programmer: &mut dyn Programmer,
    offset: u32,
    window: usize,
    expected: ContentDigest,
    sink: &dyn StatusSink,
) -> Verification {
    let read = programmer.read_flash(offset, window, &mut |done, total| {
        log::trace!("Read back {done}/{total} bytes");
    });

    match read {
        Ok(bytes) => {
            let actual = digest::digest(&bytes);
            if actual == expected {
                info!("Spot check passed: {actual}");
                sink.log(&format!("Verified first {window} bytes (MD5 {actual})"));
                sink.status("Verified");
                Verification::Verified(actual)
            } else {
                warn!("Spot check mismatch: expected {expected}, read {actual}");
                sink.log(&format!(
                    "Verification failed: expected MD5 {expected}, read MD5 {actual}"
                ));
                sink.status("Verification Failed");
                Verification::Mismatch { expected, actual }
            }
        },
        Err(e) => {
            warn!("Spot check read failed: {e}");
            sink.log(&format!("Verification read failed: {e}"));
            sink.status("Verification Failed");
            Verification::ReadError(e.to_string())
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        firmware::ContentProvider,
        programmer::{ControlLine, WriteProgress},
        reset::RESET_HOLD,
        testing::{
            Event, MockProgrammer, MockProvider, RecordingDelay, RecordingSink, SinkEvent,
            connected_session, device_lock,
        },
    };
    use std::{
        sync::{Arc, Condvar},
        thread,
        time::Duration,
    };

    fn orchestrator(events: &Arc<Mutex<Vec<Event>>>) -> FlashOrchestrator<RecordingDelay> {
        FlashOrchestrator::with_delay(FlashOptions::default(), RecordingDelay::new(events.clone()))
    }

    fn reset_events() -> Vec<Event> {
        vec![
            Event::Line(ControlLine::Dtr, false),
            Event::Line(ControlLine::Rts, true),
            Event::Wait(RESET_HOLD),
            Event::Line(ControlLine::Dtr, true),
            Event::Line(ControlLine::Rts, false),
            Event::Wait(RESET_HOLD),
            Event::Line(ControlLine::Dtr, false),
        ]
    }

    #[test]
    fn test_flash_end_to_end() {
        let _device = device_lock();
        let programmer = MockProgrammer::new().with_progress(vec![
            WriteProgress {
                segment_index: 0,
                written: 20000,
                total: 20000,
            },
            WriteProgress {
                segment_index: 3,
                written: 250_000,
                total: 500_000,
            },
        ]);
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider = MockProvider::with_sizes([20000, 3000, 8, 500_000]);
        let sink = RecordingSink::default();
        let flasher = orchestrator(&events);

        let report = flasher.flash(&mut session, &provider, &sink).unwrap().unwrap();

        assert_eq!(report.addresses, vec![0x0, 0x8000, 0xE000, 0x10000]);
        assert_eq!(report.total_bytes, 523_008);
        assert!(report.verification.is_verified());
        assert_eq!(report.prefix_digest.scope, digest::DigestScope::PrefixWindow(256));
        assert_eq!(flasher.state(), FlashState::Done);

        assert_eq!(sink.progress(), vec![(0, 100), (3, 50)]);
        assert!(sink.statuses().contains(&"Verified".to_string()));

        let recorded = events.lock().unwrap().clone();
        assert_eq!(
            recorded[1],
            Event::Write {
                addresses: vec![0x0, 0x8000, 0xE000, 0x10000],
                options: WriteOptions::default(),
            }
        );
        assert_eq!(
            recorded[2],
            Event::Read {
                offset: 0x10000,
                length: 256
            }
        );
        assert_eq!(recorded[3..].to_vec(), reset_events());
    }

    #[test]
    fn test_zero_image_digest_round_trips() {
        let _device = device_lock();
        let programmer = MockProgrammer::new();
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider =
            MockProvider::with_sizes([1024, 256, 8, 0]).with_resource("", vec![0u8; 256]);
        let sink = RecordingSink::default();

        let report = orchestrator(&events)
            .flash(&mut session, &provider, &sink)
            .unwrap()
            .unwrap();

        let expected = "348a9791dc41b89796ec3808b5b5262f";
        assert_eq!(report.image_digest.digest.to_hex(), expected);
        assert_eq!(
            report.verification,
            Verification::Verified(report.prefix_digest.digest)
        );
        assert_eq!(report.prefix_digest.digest.to_hex(), expected);
    }

    #[test]
    fn test_short_image_reads_back_whole_image() {
        let _device = device_lock();
        let programmer = MockProgrammer::new();
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider = MockProvider::with_sizes([1024, 256, 8, 100]);

        orchestrator(&events)
            .flash(&mut session, &provider, &RecordingSink::default())
            .unwrap();

        assert!(events.lock().unwrap().contains(&Event::Read {
            offset: 0x10000,
            length: 100
        }));
    }

    #[test]
    fn test_mismatch_still_resets() {
        let _device = device_lock();
        let programmer = MockProgrammer::new().corrupt_readback();
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider = MockProvider::with_sizes([1024, 256, 8, 4096]);
        let sink = RecordingSink::default();

        let report = orchestrator(&events)
            .flash(&mut session, &provider, &sink)
            .unwrap()
            .unwrap();

        assert!(matches!(report.verification, Verification::Mismatch { .. }));
        assert_eq!(MockProgrammer::line_events(&events), reset_events());
        assert!(sink.statuses().contains(&"Verification Failed".to_string()));
        assert!(sink.logs().iter().any(|l| l.contains("expected MD5")));
    }

    #[test]
    fn test_read_error_counts_as_mismatch() {
        let _device = device_lock();
        let programmer = MockProgrammer::new().fail_read();
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider = MockProvider::with_sizes([1024, 256, 8, 4096]);
        let sink = RecordingSink::default();

        let report = orchestrator(&events)
            .flash(&mut session, &provider, &sink)
            .unwrap()
            .unwrap();

        assert!(matches!(report.verification, Verification::ReadError(_)));
        assert_eq!(MockProgrammer::line_events(&events), reset_events());
        assert!(sink.statuses().contains(&"Verification Failed".to_string()));
    }

    #[test]
    fn test_fetch_failure_never_touches_device() {
        let _device = device_lock();
        let programmer = MockProgrammer::new();
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider = MockProvider::with_sizes([20000, 3000, 8, 500_000]).failing("partitions");
        let sink = RecordingSink::default();
        let flasher = orchestrator(&events);

        let err = flasher.flash(&mut session, &provider, &sink).unwrap_err();

        assert!(matches!(err, Error::Network(_)));
        assert_eq!(flasher.state(), FlashState::Failed);
        assert_eq!(MockProgrammer::write_calls(&events), 0);
        assert!(MockProgrammer::line_events(&events).is_empty());
        assert_eq!(sink.statuses().last().unwrap(), "Error flashing firmware");
        assert_eq!(
            sink.events.lock().unwrap().last(),
            Some(&SinkEvent::Controls(true))
        );
    }

    #[test]
    fn test_write_failure() {
        let _device = device_lock();
        let programmer = MockProgrammer::new().fail_write();
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider = MockProvider::with_sizes([1024, 256, 8, 4096]);
        let sink = RecordingSink::default();
        let flasher = orchestrator(&events);

        let err = flasher.flash(&mut session, &provider, &sink).unwrap_err();

        assert!(matches!(err, Error::WriteFailure(_)));
        assert_eq!(flasher.state(), FlashState::Failed);
        assert!(MockProgrammer::line_events(&events).is_empty());
        assert!(sink.logs().iter().any(|l| l.starts_with("Error:")));
        let controls: Vec<SinkEvent> = sink
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| matches!(e, SinkEvent::Controls(_)))
            .cloned()
            .collect();
        assert_eq!(
            controls,
            vec![SinkEvent::Controls(false), SinkEvent::Controls(true)]
        );
    }

    #[test]
    fn test_reset_failure_fails_flash() {
        let _device = device_lock();
        let programmer = MockProgrammer::new().fail_control_line_after(2);
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider = MockProvider::with_sizes([1024, 256, 8, 4096]);
        let flasher = orchestrator(&events);

        let err = flasher
            .flash(&mut session, &provider, &RecordingSink::default())
            .unwrap_err();

        assert!(matches!(err, Error::ControlLine(_)));
        assert_eq!(flasher.state(), FlashState::Failed);
    }

    #[test]
    fn test_skip_verify() {
        let _device = device_lock();
        let programmer = MockProgrammer::new();
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider = MockProvider::with_sizes([1024, 256, 8, 4096]);
        let flasher = FlashOrchestrator::with_delay(
            FlashOptions::default().with_verify(false),
            RecordingDelay::new(events.clone()),
        );

        let report = flasher
            .flash(&mut session, &provider, &RecordingSink::default())
            .unwrap()
            .unwrap();

        assert_eq!(report.verification, Verification::Skipped);
        assert!(
            !events
                .lock()
                .unwrap()
                .iter()
                .any(|e| matches!(e, Event::Read { .. }))
        );
    }

    #[test]
    fn test_custom_offset() {
        let _device = device_lock();
        let programmer = MockProgrammer::new();
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider = MockProvider::with_sizes([1024, 256, 8, 4096]);
        let flasher = FlashOrchestrator::with_delay(
            FlashOptions::default().with_app_offset(0x20000),
            RecordingDelay::new(events.clone()),
        );

        let report = flasher
            .flash(&mut session, &provider, &RecordingSink::default())
            .unwrap()
            .unwrap();

        assert_eq!(report.addresses, vec![0x0, 0x8000, 0xE000, 0x20000]);
        assert!(events.lock().unwrap().contains(&Event::Read {
            offset: 0x20000,
            length: 256
        }));
    }

    #[test]
    fn test_not_connected_is_noop() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut session = DeviceSession::new();
        let provider = MockProvider::with_sizes([1024, 256, 8, 4096]);
        let sink = RecordingSink::default();
        let flasher = orchestrator(&events);

        let result = flasher.flash(&mut session, &provider, &sink).unwrap();

        assert!(result.is_none());
        assert!(provider.requests().is_empty());
        assert!(sink.events.lock().unwrap().is_empty());
        assert_eq!(flasher.state(), FlashState::Idle);
    }

    #[test]
    fn test_reset_only() {
        let _device = device_lock();
        let programmer = MockProgrammer::new();
        let events = programmer.events();
        let mut session = connected_session(programmer);

        orchestrator(&events).reset(&mut session).unwrap();
        assert_eq!(MockProgrammer::line_events(&events), reset_events());

        let mut idle = DeviceSession::new();
        assert!(matches!(
            orchestrator(&events).reset(&mut idle),
            Err(Error::NotConnected)
        ));
    }

    /// Provider whose fetches block until released.
    struct GatedProvider {
        inner: MockProvider,
        open: Mutex<bool>,
        cond: Condvar,
    }

    impl ContentProvider for GatedProvider {
        fn describe(&self) -> String {
            self.inner.describe()
        }

        fn get(&self, name: &str) -> Result<Vec<u8>> {
            let mut open = self.open.lock().unwrap();
            while !*open {
                open = self.cond.wait(open).unwrap();
            }
            drop(open);
            self.inner.get(name)
        }
    }

    #[test]
    fn test_overlapping_flash_is_rejected() {
        let _device = device_lock();
        let programmer = MockProgrammer::new();
        let events = programmer.events();
        let mut session = connected_session(programmer);
        let provider = GatedProvider {
            inner: MockProvider::with_sizes([1024, 256, 8, 4096]),
            open: Mutex::new(false),
            cond: Condvar::new(),
        };
        let flasher = orchestrator(&events);

        thread::scope(|scope| {
            let first = scope.spawn(|| {
                flasher.flash(&mut session, &provider, &RecordingSink::default())
            });

            while flasher.state() != FlashState::Downloading {
                thread::sleep(Duration::from_millis(1));
            }
            let mut other = DeviceSession::new();
            let second = flasher.flash(&mut other, &provider.inner, &RecordingSink::default());
            assert!(matches!(second, Err(Error::Busy)));

            *provider.open.lock().unwrap() = true;
            provider.cond.notify_all();

            let report = first.join().unwrap().unwrap().unwrap();
            assert!(report.verification.is_verified());
        });

        assert_eq!(MockProgrammer::write_calls(&events), 1);
    }
}
