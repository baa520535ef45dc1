//! # fwflash
//!
//! A library for flashing serial-attached microcontrollers from a firmware
//! server.
//!
//! A flash operation fetches four segments (bootloader, partition table,
//! boot selector, application), writes them in one pass through a chip
//! programmer, reads back a short prefix of the application to spot-check
//! the write, and pulses DTR/RTS to reboot the target into the new image.
//!
//! The bootloader protocol itself is not implemented here. It is reached
//! through the [`Programmer`] trait, with an `espflash` backend behind the
//! `espflash` feature.
//!
//! ## Features
//!
//! - `native` (default): serial port enumeration and handles via `serialport`
//! - `http` (default): [`HttpProvider`] via a blocking `reqwest` client
//! - `espflash`: [`programmer::espflash::EspflashDriver`] backend
//!
//! ## Example
//!
//! ```rust,no_run
//! use fwflash::{
//!     AutoRequester, BuiltinLoader, DeviceSession, DirProvider, FlashOptions,
//!     FlashOrchestrator, LogSink, SessionOptions,
//! };
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut session = DeviceSession::new();
//!     session.connect(
//!         &BuiltinLoader,
//!         &mut AutoRequester::new(),
//!         &SessionOptions::default(),
//!     )?;
//!
//!     let provider = DirProvider::new("build/firmware");
//!     let flasher = FlashOrchestrator::new(FlashOptions::default());
//!     if let Some(report) = flasher.flash(&mut session, &provider, &LogSink)? {
//!         println!("Spot check: {:?}", report.verification);
//!     }
//!
//!     session.disconnect();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod device;
pub mod digest;
pub mod error;
pub mod firmware;
pub mod flasher;
pub mod plan;
pub mod port;
pub mod programmer;
pub mod reset;
pub mod session;
pub mod sink;

#[cfg(test)]
pub(crate) mod testing;

#[cfg(feature = "http")]
pub use firmware::HttpProvider;
pub use {
    device::{AutoRequester, DetectedPort, DeviceFilter, DeviceKind, PortRequester},
    digest::{ContentDigest, DigestScope, SPOT_CHECK_LEN, VerificationDigest},
    error::{Error, Result},
    firmware::{
        ContentProvider, DEFAULT_APP_OFFSET, DirProvider, FirmwareInfo, FirmwareSegment,
        SegmentRole, fetch_all, fetch_info,
    },
    flasher::{FlashOptions, FlashOrchestrator, FlashReport, FlashState, Verification},
    plan::{FlashPlan, PlanEntry},
    port::{DEFAULT_BAUD, SerialConfig},
    programmer::{
        BuiltinLoader, ChipIdentity, ControlLine, Programmer, ProgrammerDriver, ProgrammerLoader,
        WriteOptions, WriteProgress,
    },
    reset::{Delay, ResetSequencer, ThreadDelay},
    session::{DeviceSession, SessionOptions, SessionState},
    sink::{LogSink, StatusSink},
};
