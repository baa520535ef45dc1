//! Capability interface of the external chip programmer.
//!
//! The chip bootloader protocol (framing, stub upload, erase/write
//! primitives) lives outside this crate. A backend is adapted to the
//! [`Programmer`] trait once, when a session binds to a port; nothing else
//! in the crate inspects the backend.
//!
//! ```text
//! ProgrammerLoader --load--> ProgrammerDriver --bind(port)--> Box<dyn Programmer>
//!   (library present?)        (opens handle + transport)      (identify/write/read/lines)
//! ```

#[cfg(feature = "espflash")]
pub mod espflash;

use {
    crate::{device::DetectedPort, error::Result, plan::FlashPlan, port::SerialConfig},
    std::fmt,
};

/// Serial control line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlLine {
    /// Data Terminal Ready.
    Dtr,
    /// Request To Send.
    Rts,
}

impl fmt::Display for ControlLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dtr => write!(f, "DTR"),
            Self::Rts => write!(f, "RTS"),
        }
    }
}

/// Result of the identify exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChipIdentity {
    /// Chip name and revision as reported by the loader.
    pub chip_description: String,
    /// Factory MAC address.
    pub mac_address: String,
}

/// How the flash-size field of the bootloader header is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlashSizeMode {
    /// Leave the field as built.
    #[default]
    Keep,
    /// Patch the field with the detected flash size.
    Detect,
}

/// Options passed to [`Programmer::write_flash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    /// Flash-size header handling.
    pub flash_size: FlashSizeMode,
    /// Compress data on the wire.
    pub compress: bool,
    /// Erase the whole chip before writing instead of only the target regions.
    pub erase_all: bool,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            flash_size: FlashSizeMode::Keep,
            compress: true,
            erase_all: false,
        }
    }
}

/// Write progress for one plan entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteProgress {
    /// Index of the entry in the plan.
    pub segment_index: usize,
    /// Bytes of this entry written so far.
    pub written: usize,
    /// Total bytes of this entry.
    pub total: usize,
}

impl WriteProgress {
    /// `round(written / total * 100)`, clamped to 100. An empty entry is complete.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            return 100;
        }
        let pct = (self.written as f64 / self.total as f64 * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }
}

/// Operations a chip programmer must provide.
pub trait Programmer: Send {
    /// Run the handshake and read the chip identity.
    fn identify(&mut self) -> Result<ChipIdentity>;

    /// Write every plan entry in one operation.
    ///
    /// Options the backend cannot carry out are refused with
    /// [`Error::Config`](crate::Error::Config) before the device is touched.
    fn write_flash(
        &mut self,
        plan: &FlashPlan,
        options: &WriteOptions,
        progress: &mut dyn FnMut(WriteProgress),
    ) -> Result<()>;

    /// Read `length` bytes of flash starting at `offset`.
    fn read_flash(
        &mut self,
        offset: u32,
        length: usize,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<u8>>;

    /// Drive a control line.
    fn set_control_line(&mut self, line: ControlLine, level: bool) -> Result<()>;

    /// Close the framed transport.
    fn disconnect(&mut self) -> Result<()>;

    /// Release the port handle.
    fn close_port(&mut self) -> Result<()>;
}

/// A programmer backend that can bind to a port.
pub trait ProgrammerDriver {
    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Open the port handle and transport for `port`.
    fn bind(&self, port: &DetectedPort, config: &SerialConfig) -> Result<Box<dyn Programmer>>;
}

/// Resolves the programmer backend.
///
/// Fails with [`Error::TransportUnavailable`](crate::Error::TransportUnavailable)
/// when no backend can be adapted.
pub trait ProgrammerLoader {
    /// Resolve the backend.
    fn load(&self) -> Result<Box<dyn ProgrammerDriver>>;
}

impl<F> ProgrammerLoader for F
where
    F: Fn() -> Result<Box<dyn ProgrammerDriver>>,
{
    fn load(&self) -> Result<Box<dyn ProgrammerDriver>> {
        self()
    }
}

/// Loader for the backends compiled into this build.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinLoader;

impl ProgrammerLoader for BuiltinLoader {
    #[cfg(feature = "espflash")]
    fn load(&self) -> Result<Box<dyn ProgrammerDriver>> {
        Ok(Box::new(espflash::EspflashDriver))
    }

    #[cfg(not(feature = "espflash"))]
    fn load(&self) -> Result<Box<dyn ProgrammerDriver>> {
        Err(crate::Error::TransportUnavailable(
            "no programmer backend compiled in (enable the `espflash` feature)".into(),
        ))
    }
}
