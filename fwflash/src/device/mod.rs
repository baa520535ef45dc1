//! Device discovery, classification and port requests.
//!
//! Ports are enumerated through `serialport` and classified by the USB
//! bridge in front of the target. A [`DeviceFilter`] narrows the candidates
//! to one vendor (and optionally one product) and a [`PortRequester`] turns
//! the candidates into the single port a session should open.

use crate::error::{Error, Result};

#[cfg(feature = "native")]
use log::{debug, info, trace};

/// Known USB bridge/device kinds found on development boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Silicon Labs CP210x USB-to-Serial converter.
    Cp210x,
    /// CH340/CH341/CH9102 USB-to-Serial converter.
    Ch340,
    /// FTDI FT232/FT2232/FT4232 USB-to-Serial converter.
    Ftdi,
    /// Espressif native USB-Serial/JTAG.
    EspressifUsb,
    /// Unknown device.
    Unknown,
}

/// Silicon Labs vendor id, the default device filter.
pub const SILICON_LABS_VID: u16 = 0x10C4;

/// Known USB VID/PID pairs for common USB-to-UART bridges.
const KNOWN_USB_DEVICES: &[(u16, &[u16], DeviceKind)] = &[
    (SILICON_LABS_VID, &[0xEA60, 0xEA70, 0xEA71], DeviceKind::Cp210x),
    (0x1A86, &[0x7523, 0x7522, 0x5523, 0x55D4], DeviceKind::Ch340),
    (0x0403, &[0x6001, 0x6010, 0x6011, 0x6014, 0x6015], DeviceKind::Ftdi),
    (0x303A, &[], DeviceKind::EspressifUsb),
];

impl DeviceKind {
    /// Classify a VID/PID combination.
    #[must_use]
    pub fn from_vid_pid(vid: u16, pid: u16) -> Self {
        for (known_vid, pids, device) in KNOWN_USB_DEVICES {
            if vid == *known_vid && (pids.is_empty() || pids.contains(&pid)) {
                return *device;
            }
        }
        Self::Unknown
    }

    /// Get a human-readable name for the device kind.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cp210x => "CP210x",
            Self::Ch340 => "CH340/CH341",
            Self::Ftdi => "FTDI",
            Self::EspressifUsb => "Espressif USB",
            Self::Unknown => "Unknown",
        }
    }

    /// Check if this is a known/expected device kind.
    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Discovered device endpoint information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectedPort {
    /// Endpoint name/path (e.g., "/dev/ttyUSB0" or "COM3").
    pub name: String,
    /// Classified device kind.
    pub device: DeviceKind,
    /// USB Vendor ID (if available).
    pub vid: Option<u16>,
    /// USB Product ID (if available).
    pub pid: Option<u16>,
    /// Device manufacturer string (if available).
    pub manufacturer: Option<String>,
    /// Device product string (if available).
    pub product: Option<String>,
    /// Serial number (if available).
    pub serial: Option<String>,
}

impl DetectedPort {
    /// Placeholder for a port the user named explicitly but enumeration missed.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device: DeviceKind::Unknown,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            serial: None,
        }
    }
}

/// Vendor/product filter applied when requesting a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceFilter {
    /// USB vendor id.
    pub vid: u16,
    /// USB product id; `None` accepts any product of the vendor.
    pub pid: Option<u16>,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self::vendor(SILICON_LABS_VID)
    }
}

impl DeviceFilter {
    /// Accept any product of the given vendor.
    #[must_use]
    pub fn vendor(vid: u16) -> Self {
        Self { vid, pid: None }
    }

    /// Restrict to a single product.
    #[must_use]
    pub fn with_product(mut self, pid: u16) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Check whether a detected port passes this filter.
    pub fn matches(&self, port: &DetectedPort) -> bool {
        port.vid == Some(self.vid) && self.pid.is_none_or(|pid| port.pid == Some(pid))
    }
}

/// Source of the physical port a session opens.
///
/// Returning [`Error::NoDeviceSelected`] signals user cancellation.
pub trait PortRequester {
    /// Pick one port matching `filter`.
    fn request_port(&mut self, filter: &DeviceFilter) -> Result<DetectedPort>;
}

/// Non-interactive requester: a fixed port name, or the first port passing
/// the filter.
#[derive(Debug, Clone, Default)]
pub struct AutoRequester {
    port: Option<String>,
}

impl AutoRequester {
    /// Use the first port that passes the filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Always use the named port, bypassing the filter.
    #[must_use]
    pub fn with_port(port: impl Into<String>) -> Self {
        Self {
            port: Some(port.into()),
        }
    }
}

impl PortRequester for AutoRequester {
    fn request_port(&mut self, filter: &DeviceFilter) -> Result<DetectedPort> {
        let ports = detect_ports();
        if let Some(name) = &self.port {
            return Ok(ports
                .into_iter()
                .find(|p| p.name == *name)
                .unwrap_or_else(|| DetectedPort::named(name.clone())));
        }
        select_matching(ports, filter)
    }
}

/// First port passing the filter, or [`Error::NoDeviceSelected`].
pub fn select_matching(ports: Vec<DetectedPort>, filter: &DeviceFilter) -> Result<DetectedPort> {
    ports
        .into_iter()
        .find(|p| filter.matches(p))
        .ok_or(Error::NoDeviceSelected)
}

/// Detect all available endpoints with metadata.
#[cfg(feature = "native")]
pub fn detect_ports() -> Vec<DetectedPort> {
    let mut result = Vec::new();

    match serialport::available_ports() {
        Ok(ports) => {
            for port_info in ports {
                let mut detected = DetectedPort::named(port_info.port_name.clone());

                if let serialport::SerialPortType::UsbPort(usb_info) = port_info.port_type {
                    detected.vid = Some(usb_info.vid);
                    detected.pid = Some(usb_info.pid);
                    detected.manufacturer = usb_info.manufacturer;
                    detected.product = usb_info.product;
                    detected.serial = usb_info.serial_number;
                    detected.device = DeviceKind::from_vid_pid(usb_info.vid, usb_info.pid);

                    trace!(
                        "Found USB port: {} (VID: {:04X}, PID: {:04X}, Device: {:?})",
                        port_info.port_name, usb_info.vid, usb_info.pid, detected.device
                    );
                }

                result.push(detected);
            }
        },
        Err(e) => {
            debug!("Failed to enumerate serial ports: {e}");
        },
    }

    result
}

/// Detect all available endpoints (no native support - always empty).
#[cfg(not(feature = "native"))]
pub fn detect_ports() -> Vec<DetectedPort> {
    Vec::new()
}

/// Auto-detect a single endpoint, preferring Espressif native USB.
#[cfg(feature = "native")]
pub fn auto_detect_port() -> Result<DetectedPort> {
    let ports = detect_ports();

    if let Some(port) = ports.iter().find(|p| p.device == DeviceKind::EspressifUsb) {
        info!("Auto-detected Espressif USB device: {}", port.name);
        return Ok(port.clone());
    }

    if let Some(port) = ports.iter().find(|p| p.device.is_known()) {
        info!(
            "Auto-detected {} USB-UART bridge: {}",
            port.device.name(),
            port.name
        );
        return Ok(port.clone());
    }

    Err(Error::NoDeviceSelected)
}

/// Format a list of detected endpoints for display.
pub fn format_port_list(ports: &[DetectedPort]) -> Vec<String> {
    let mut result = Vec::new();

    for port in ports {
        let device_info = if port.device.is_known() {
            format!(" [{}]", port.device.name())
        } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
            format!(" [VID:{vid:04X} PID:{pid:04X}]")
        } else {
            String::new()
        };

        let product_info = port
            .product
            .as_ref()
            .map(|p| format!(" - {p}"))
            .unwrap_or_default();

        result.push(format!("{}{}{}", port.name, device_info, product_info));
    }

    result
}
