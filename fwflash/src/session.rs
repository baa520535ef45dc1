//! Device session: the one owned handle to a connected target.
//!
//! A session holds the bound programmer together with the identity read
//! during the handshake. It moves `Disconnected -> Connecting -> Connected`
//! on success and always falls back to `Disconnected` on failure.
//!
//! At most one session per process holds a device at a time.

use {
    crate::{
        device::{DetectedPort, DeviceFilter, PortRequester},
        error::{Error, Result},
        port::{DEFAULT_BAUD, SerialConfig},
        programmer::{Programmer, ProgrammerLoader},
    },
    log::{debug, info, warn},
    std::{
        fmt,
        sync::atomic::{AtomicBool, Ordering},
    },
};

/// Held from the start of a connect until teardown.
static ACTIVE: AtomicBool = AtomicBool::new(false);

/// Connection state of a [`DeviceSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No device held.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Programmer bound and identified.
    Connected,
    /// Teardown in progress.
    Disconnecting,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnecting => write!(f, "disconnecting"),
        }
    }
}

/// Connect-time options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Which ports may be offered.
    pub filter: DeviceFilter,
    /// Serial baud rate.
    pub baud: u32,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            filter: DeviceFilter::default(),
            baud: DEFAULT_BAUD,
        }
    }
}

impl SessionOptions {
    /// Override the device filter.
    #[must_use]
    pub fn with_filter(mut self, filter: DeviceFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Override the baud rate.
    #[must_use]
    pub fn with_baud(mut self, baud: u32) -> Self {
        self.baud = baud;
        self
    }
}

/// Owned connection to one target device.
#[derive(Default)]
pub struct DeviceSession {
    programmer: Option<Box<dyn Programmer>>,
    port: Option<DetectedPort>,
    chip_description: Option<String>,
    mac_address: Option<String>,
    state: SessionState,
    claimed: bool,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("port", &self.port)
            .field("chip_description", &self.chip_description)
            .field("mac_address", &self.mac_address)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Create a disconnected session.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Whether a programmer is bound and identified.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected && self.programmer.is_some()
    }

    /// Chip name and revision, when connected.
    pub fn chip_description(&self) -> Option<&str> {
        self.chip_description.as_deref()
    }

    /// Factory MAC address, when connected.
    pub fn mac_address(&self) -> Option<&str> {
        self.mac_address.as_deref()
    }

    /// Port the session is bound to, when connected.
    pub fn port(&self) -> Option<&DetectedPort> {
        self.port.as_ref()
    }

    /// Bound programmer, when connected.
    pub fn programmer_mut(&mut self) -> Option<&mut (dyn Programmer + 'static)> {
        if self.state != SessionState::Connected {
            return None;
        }
        self.programmer.as_deref_mut()
    }

    /// Resolve the programmer, request a port, bind and identify.
    ///
    /// Makes one handshake attempt. On failure the session is left
    /// `Disconnected` with any half-opened transport torn down.
    ///
    /// Fails with [`Error::SessionActive`] while this or any other session
    /// in the process is connecting or connected.
    pub fn connect(
        &mut self,
        loader: &dyn ProgrammerLoader,
        requester: &mut dyn PortRequester,
        options: &SessionOptions,
    ) -> Result<()> {
        if self.state != SessionState::Disconnected {
            return Err(Error::SessionActive);
        }
        if ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Another session holds a device");
            return Err(Error::SessionActive);
        }
        self.claimed = true;

        self.state = SessionState::Connecting;
        debug!("Session state: {}", self.state);

        match self.try_connect(loader, requester, options) {
            Ok(()) => {
                self.state = SessionState::Connected;
                info!(
                    "Connected to {} (MAC {}) on {}",
                    self.chip_description.as_deref().unwrap_or("unknown chip"),
                    self.mac_address.as_deref().unwrap_or("unknown"),
                    self.port.as_ref().map_or("?", |p| p.name.as_str())
                );
                Ok(())
            },
            Err(e) => {
                if e.is_cancellation() {
                    info!("{e}");
                } else {
                    warn!("Connect failed: {e}");
                }
                self.teardown();
                Err(e)
            },
        }
    }

    fn try_connect(
        &mut self,
        loader: &dyn ProgrammerLoader,
        requester: &mut dyn PortRequester,
        options: &SessionOptions,
    ) -> Result<()> {
        let driver = loader.load()?;
        debug!("Programmer backend: {}", driver.name());

        let port = requester.request_port(&options.filter)?;
        info!("Opening {} at {} baud", port.name, options.baud);
        let config = SerialConfig::new(port.name.clone(), options.baud);

        let programmer = driver.bind(&port, &config)?;
        self.programmer = Some(programmer);
        self.port = Some(port);

        let Some(programmer) = self.programmer.as_deref_mut() else {
            return Err(Error::NotConnected);
        };
        let identity = programmer.identify().map_err(|e| match e {
            Error::HandshakeFailed(_) => e,
            other => Error::HandshakeFailed(other.to_string()),
        })?;

        self.chip_description = Some(identity.chip_description);
        self.mac_address = Some(identity.mac_address);
        Ok(())
    }

    /// Release the device. Safe to call in any state, any number of times.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Disconnected && !self.claimed {
            return;
        }
        self.state = SessionState::Disconnecting;
        debug!("Session state: {}", self.state);
        self.teardown();
        info!("Disconnected");
    }

    fn teardown(&mut self) {
        if let Some(mut programmer) = self.programmer.take() {
            if let Err(e) = programmer.disconnect() {
                warn!("Failed to close transport: {e}");
            }
            if let Err(e) = programmer.close_port() {
                warn!("Failed to close port: {e}");
            }
        }
        self.port = None;
        self.chip_description = None;
        self.mac_address = None;
        self.state = SessionState::Disconnected;
        if std::mem::take(&mut self.claimed) {
            ACTIVE.store(false, Ordering::Release);
        }
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}
