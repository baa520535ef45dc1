//! Programmer backend on top of the `espflash` crate.
//!
//! `espflash` speaks the Espressif ROM/stub loader protocol. This module
//! only adapts it: the session hands over a port, we open it, wrap it in an
//! `espflash` connection and expose the result as a [`Programmer`].

use {
    super::{
        ChipIdentity, ControlLine, FlashSizeMode, Programmer, ProgrammerDriver, WriteOptions,
        WriteProgress,
    },
    crate::{
        device::DetectedPort,
        error::{Error, Result},
        plan::FlashPlan,
        port::{SerialConfig, native},
    },
    espflash::{
        connection::{Connection, ResetAfterOperation, ResetBeforeOperation},
        flasher::Flasher,
        image_format::Segment,
        target::ProgressCallbacks,
    },
    log::{debug, trace},
    serialport::SerialPort,
    std::{borrow::Cow, fs},
};

/// Read block size used for flash read-back.
const READ_BLOCK_SIZE: u32 = 0x1000;
/// Outstanding read blocks.
const READ_MAX_IN_FLIGHT: u32 = 64;

/// Reject write options this backend cannot carry out.
///
/// `write_bins_to_flash` always sends compressed blocks and writes segment
/// bytes untouched, so only `compress: true` with [`FlashSizeMode::Keep`]
/// can be honoured.
fn check_write_options(options: &WriteOptions) -> Result<()> {
    if !options.compress {
        return Err(Error::Config(
            "espflash backend cannot write uncompressed".to_string(),
        ));
    }
    if options.flash_size == FlashSizeMode::Detect {
        return Err(Error::Config(
            "espflash backend cannot patch the flash-size header".to_string(),
        ));
    }
    Ok(())
}

/// Driver that binds the `espflash` flasher to a port.
#[derive(Debug, Clone, Copy, Default)]
pub struct EspflashDriver;

impl ProgrammerDriver for EspflashDriver {
    fn name(&self) -> &'static str {
        "espflash"
    }

    fn bind(&self, port: &DetectedPort, config: &SerialConfig) -> Result<Box<dyn Programmer>> {
        let handle = native::open(config)?;
        let usb_info = serialport::UsbPortInfo {
            vid: port.vid.unwrap_or_default(),
            pid: port.pid.unwrap_or_default(),
            serial_number: port.serial.clone(),
            manufacturer: port.manufacturer.clone(),
            product: port.product.clone(),
        };

        // Resets after the write are driven by the orchestrator.
        let connection = Connection::new(
            handle,
            usb_info,
            ResetAfterOperation::NoReset,
            ResetBeforeOperation::DefaultReset,
            config.baud_rate,
        );

        Ok(Box::new(EspflashProgrammer {
            connection: Some(connection),
            flasher: None,
            baud: config.baud_rate,
        }))
    }
}

/// A bound `espflash` connection.
///
/// The flasher is only created by [`Programmer::identify`], since connecting
/// it is what runs the loader sync.
pub struct EspflashProgrammer {
    connection: Option<Connection>,
    flasher: Option<Flasher>,
    baud: u32,
}

impl EspflashProgrammer {
    fn flasher(&mut self) -> Result<&mut Flasher> {
        self.flasher.as_mut().ok_or(Error::NotConnected)
    }
}

impl Programmer for EspflashProgrammer {
    fn identify(&mut self) -> Result<ChipIdentity> {
        let connection = self.connection.take().ok_or(Error::NotConnected)?;
        let mut flasher = Flasher::connect(connection, true, true, true, None, Some(self.baud))
            .map_err(|e| Error::HandshakeFailed(e.to_string()))?;

        let info = flasher
            .device_info()
            .map_err(|e| Error::HandshakeFailed(e.to_string()))?;
        self.flasher = Some(flasher);

        let chip_description = match info.revision {
            Some((major, minor)) => format!("{} (revision v{major}.{minor})", info.chip),
            None => info.chip.to_string(),
        };
        let mac_address = info
            .mac_address
            .map_or_else(|| "unknown".to_string(), |mac| mac.to_string());
        debug!("espflash identified {chip_description}, {}", info.flash_size);

        Ok(ChipIdentity {
            chip_description,
            mac_address,
        })
    }

    fn write_flash(
        &mut self,
        plan: &FlashPlan,
        options: &WriteOptions,
        progress: &mut dyn FnMut(WriteProgress),
    ) -> Result<()> {
        check_write_options(options)?;
        let flasher = self.flasher()?;

        if options.erase_all {
            flasher
                .erase_flash()
                .map_err(|e| Error::WriteFailure(e.to_string()))?;
        }

        let segments: Vec<Segment<'_>> = plan
            .entries()
            .iter()
            .map(|entry| Segment {
                addr: entry.address,
                data: Cow::Borrowed(&entry.segment.bytes[..]),
            })
            .collect();

        let mut callbacks = ProgressAdapter {
            progress,
            index: None,
            total: 0,
        };
        flasher
            .write_bins_to_flash(&segments, &mut callbacks)
            .map_err(|e| Error::WriteFailure(e.to_string()))
    }

    fn read_flash(
        &mut self,
        offset: u32,
        length: usize,
        progress: &mut dyn FnMut(usize, usize),
    ) -> Result<Vec<u8>> {
        let size = u32::try_from(length)
            .map_err(|_| Error::ReadFailure(format!("read of {length} bytes too large")))?;
        let out = tempfile::NamedTempFile::new()?;
        let path = out.path().to_path_buf();

        self.flasher()?
            .read_flash(offset, size, READ_BLOCK_SIZE, READ_MAX_IN_FLIGHT, path.clone())
            .map_err(|e| Error::ReadFailure(e.to_string()))?;

        let bytes = fs::read(&path)?;
        progress(bytes.len(), length);
        Ok(bytes)
    }

    fn set_control_line(&mut self, line: ControlLine, level: bool) -> Result<()> {
        trace!("{line} <- {level}");
        let port = self.flasher()?.connection().serial_port_mut();
        let result = match line {
            ControlLine::Dtr => port.write_data_terminal_ready(level),
            ControlLine::Rts => port.write_request_to_send(level),
        };
        result.map_err(|e| Error::ControlLine(format!("{line}: {e}")))
    }

    fn disconnect(&mut self) -> Result<()> {
        // Dropping the flasher closes the loader connection.
        self.flasher = None;
        Ok(())
    }

    fn close_port(&mut self) -> Result<()> {
        self.connection = None;
        Ok(())
    }
}

/// Maps `espflash` per-segment callbacks onto [`WriteProgress`].
struct ProgressAdapter<'a> {
    progress: &'a mut dyn FnMut(WriteProgress),
    index: Option<usize>,
    total: usize,
}

impl ProgressCallbacks for ProgressAdapter<'_> {
    fn init(&mut self, addr: u32, total: usize) {
        let index = self.index.map_or(0, |i| i + 1);
        trace!("Segment {index} at 0x{addr:X}: {total} bytes");
        self.index = Some(index);
        self.total = total;
        (self.progress)(WriteProgress {
            segment_index: index,
            written: 0,
            total,
        });
    }

    fn update(&mut self, current: usize) {
        (self.progress)(WriteProgress {
            segment_index: self.index.unwrap_or_default(),
            written: current,
            total: self.total,
        });
    }

    fn verifying(&mut self) {}

    fn finish(&mut self, _skipped: bool) {
        (self.progress)(WriteProgress {
            segment_index: self.index.unwrap_or_default(),
            written: self.total,
            total: self.total,
        });
    }
}
