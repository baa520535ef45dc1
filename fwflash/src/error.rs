//! Error types for fwflash.

use std::io;
use thiserror::Error;

/// Result type for fwflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for fwflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// The programmer library is missing or cannot be adapted.
    #[error("Programmer unavailable: {0}")]
    TransportUnavailable(String),

    /// The user cancelled port selection or no matching port exists.
    #[error("No device selected")]
    NoDeviceSelected,

    /// Device is present but the identify exchange failed.
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    /// Firmware retrieval failed (transport error or non-success status).
    #[error("Network error: {0}")]
    Network(String),

    /// Firmware retrieval returned no bytes.
    #[error("Empty response for {0}")]
    EmptyResponse(String),

    /// Flash write failed; device contents are indeterminate.
    #[error("Write failed: {0}")]
    WriteFailure(String),

    /// Flash read-back failed.
    #[error("Read failed: {0}")]
    ReadFailure(String),

    /// A control line could not be driven.
    #[error("Control line error: {0}")]
    ControlLine(String),

    /// Another flash operation is already in flight.
    #[error("A flash operation is already in progress")]
    Busy,

    /// The session already holds a device.
    #[error("A device session is already active")]
    SessionActive,

    /// The operation needs a connected device.
    #[error("No device connected")]
    NotConnected,

    /// Firmware metadata could not be parsed.
    #[error("Invalid firmware info: {0}")]
    InvalidInfo(String),

    /// Invalid flash plan or option.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether this error is a user cancellation rather than a failure.
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::NoDeviceSelected)
    }
}
