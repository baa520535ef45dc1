//! Interactive serial port selection.
//!
//! This module provides the CLI's [`PortRequester`], with support for:
//! - Narrowing candidates by the session's device filter and known bridges
//! - Interactive selection via dialoguer
//! - Remembering selected USB devices in configuration
//! - Non-interactive mode for CI/CD

use {
    crate::{CliError, config::Config},
    anyhow::Result,
    console::style,
    dialoguer::{Confirm, Error as DialoguerError, Select, theme::ColorfulTheme},
    fwflash::{DetectedPort, DeviceFilter, PortRequester, device::detect_ports},
    log::{debug, error, info},
    std::{cmp::Ordering, io::IsTerminal},
};

/// Options for serial port selection.
#[derive(Debug, Clone, Default)]
pub struct SerialOptions {
    /// Explicit port specified via CLI.
    pub port: Option<String>,
    /// List all ports (including unknown types).
    pub list_all_ports: bool,
    /// Non-interactive mode (fail if multiple ports).
    pub non_interactive: bool,
    /// Force confirmation even for single recognized port.
    pub confirm_port: bool,
}

/// Result of port selection including whether it was a known device.
#[derive(Debug, Clone)]
pub struct SelectedPort {
    /// The selected port info.
    pub port: DetectedPort,
    /// Whether this port matched a known/configured device.
    pub is_known: bool,
}

/// [`PortRequester`] backed by the CLI's selection rules.
///
/// The library only understands "a port" or "cancelled", so any other
/// selection failure is kept here for the command to report with its
/// original exit-code class.
pub struct CliRequester<'a> {
    options: SerialOptions,
    config: &'a Config,
    selected: Option<SelectedPort>,
    failure: Option<anyhow::Error>,
}

impl<'a> CliRequester<'a> {
    pub fn new(options: SerialOptions, config: &'a Config) -> Self {
        Self {
            options,
            config,
            selected: None,
            failure: None,
        }
    }

    /// The port handed to the session, if any.
    pub fn selected(&self) -> Option<&SelectedPort> {
        self.selected.as_ref()
    }

    /// Selection error other than a plain cancellation.
    pub fn take_failure(&mut self) -> Option<anyhow::Error> {
        self.failure.take()
    }
}

impl PortRequester for CliRequester<'_> {
    fn request_port(&mut self, filter: &DeviceFilter) -> fwflash::Result<DetectedPort> {
        match select_serial_port(&self.options, self.config, filter) {
            Ok(selected) => {
                let port = selected.port.clone();
                self.selected = Some(selected);
                Ok(port)
            },
            Err(e) => {
                if !matches!(e.downcast_ref::<CliError>(), Some(CliError::Cancelled(_))) {
                    self.failure = Some(e);
                }
                Err(fwflash::Error::NoDeviceSelected)
            },
        }
    }
}

fn usage_err(message: &str) -> anyhow::Error {
    CliError::Usage(message.to_string()).into()
}

fn select_non_interactive_port(
    selection_ports: Vec<DetectedPort>,
    config: &Config,
) -> Result<SelectedPort> {
    // Exactly one candidate is a valid auto-selection; anything else is a
    // setup problem the caller has to fix.
    let mut ports = selection_ports.into_iter();
    match (ports.next(), ports.next()) {
        (Some(port), None) => Ok(SelectedPort {
            is_known: is_known_device(&port, config),
            port,
        }),
        (Some(_), Some(_)) => Err(usage_err(
            "Found multiple serial ports; specify one with --port in non-interactive mode",
        )),
        (None, _) => Err(usage_err("No matching serial ports available")),
    }
}

/// Ports offered for selection: those passing the filter or remembered in
/// the config, or every port when `--list-all-ports` is given. A port behind
/// a recognized bridge from another vendor is not a candidate.
fn candidate_ports(
    ports: Vec<DetectedPort>,
    filter: &DeviceFilter,
    config: &Config,
    list_all: bool,
) -> Vec<DetectedPort> {
    if list_all {
        return ports;
    }
    ports
        .into_iter()
        .filter(|p| filter.matches(p) || is_remembered_device(p, config))
        .collect()
}

/// Select a serial port interactively or automatically.
pub fn select_serial_port(
    options: &SerialOptions,
    config: &Config,
    filter: &DeviceFilter,
) -> Result<SelectedPort> {
    if let Some(port_name) = &options.port {
        return Ok(find_port_by_name(port_name));
    }

    if let Some(port_name) = &config.port.connection.serial {
        debug!("Using port from config: {port_name}");
        return Ok(find_port_by_name(port_name));
    }

    let ports = detect_ports();
    if ports.is_empty() {
        return Err(usage_err("No serial ports found"));
    }

    let selection_ports = candidate_ports(ports, filter, config, options.list_all_ports);

    if options.non_interactive {
        return select_non_interactive_port(selection_ports, config);
    }

    match selection_ports.len().cmp(&1) {
        Ordering::Greater => {
            ensure_interactive_terminal()?;
            select_port_interactive(selection_ports, config)
        },
        Ordering::Equal => {
            let mut ports = selection_ports;
            let port = ports.remove(0);
            let is_known = is_known_device(&port, config);

            if is_known && !options.confirm_port {
                info!("Auto-selected port: {} [{}]", port.name, port.device.name());
                Ok(SelectedPort { port, is_known })
            } else {
                ensure_interactive_terminal()?;
                confirm_single_port(port)
            }
        },
        Ordering::Less => Err(usage_err("No matching serial ports available")),
    }
}

fn ensure_interactive_terminal() -> Result<()> {
    if std::io::stdin().is_terminal() && std::io::stderr().is_terminal() {
        Ok(())
    } else {
        Err(usage_err(
            "Port selection needs an interactive terminal; use --port",
        ))
    }
}

fn map_prompt_error(err: DialoguerError) -> anyhow::Error {
    match err {
        DialoguerError::IO(io_err) => {
            if io_err.kind() == std::io::ErrorKind::Interrupted {
                CliError::Cancelled("Port selection cancelled".to_string()).into()
            } else {
                usage_err("Port selection prompt failed")
            }
        },
    }
}

/// Find a port by name.
fn find_port_by_name(name: &str) -> SelectedPort {
    let ports = detect_ports();

    // Exact match first, then case-insensitive (Windows)
    if let Some(port) = ports
        .iter()
        .find(|p| p.name == name)
        .or_else(|| ports.iter().find(|p| p.name.eq_ignore_ascii_case(name)))
    {
        return SelectedPort {
            port: port.clone(),
            is_known: port.device.is_known(),
        };
    }

    // Not enumerated, but the user asked for it explicitly
    SelectedPort {
        port: DetectedPort::named(name),
        is_known: false,
    }
}

/// Check if a port matches a known device (from config or built-in list).
fn is_known_device(port: &DetectedPort, config: &Config) -> bool {
    port.device.is_known() || is_remembered_device(port, config)
}

/// Whether the port's USB ids were saved with `[[port.usb_device]]`.
fn is_remembered_device(port: &DetectedPort, config: &Config) -> bool {
    match (port.vid, port.pid) {
        (Some(vid), Some(pid)) => config.port.usb_device.iter().any(|d| d.matches(vid, pid)),
        _ => false,
    }
}

fn port_label(port: &DetectedPort, config: &Config) -> String {
    let name = if is_known_device(port, config) {
        style(&port.name).bold().to_string()
    } else {
        port.name.clone()
    };

    let device_info = if port.device.is_known() {
        format!(" [{}]", style(port.device.name()).yellow())
    } else if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        format!(" ({vid:04X}:{pid:04X})")
    } else {
        String::new()
    };

    let product = port
        .product
        .as_ref()
        .map(|p| format!(" - {}", style(p).dim()))
        .unwrap_or_default();

    format!("{name}{device_info}{product}")
}

/// Interactive port selection.
fn select_port_interactive(mut ports: Vec<DetectedPort>, config: &Config) -> Result<SelectedPort> {
    eprintln!(
        "{} Detected {} serial ports",
        style("ℹ").blue(),
        ports.len()
    );
    eprintln!("{}", style("Ports with a recognized USB bridge are shown in bold").dim());

    ports.sort_by_key(|p| !is_known_device(p, config));

    // Keep labels on one line in narrow terminals
    let max_item_width = (console::Term::stderr().size().1 as usize).saturating_sub(4);
    let port_names: Vec<String> = ports
        .iter()
        .map(|port| {
            console::truncate_str(&port_label(port, config), max_item_width, "\u{2026}")
                .into_owned()
        })
        .collect();

    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Select a serial port")
        .items(&port_names)
        .default(0)
        .interact_opt()
        .map_err(map_prompt_error)?;

    match selection {
        Some(index) => {
            let port = ports
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("Invalid port index: {index}"))?;
            let is_known = is_known_device(&port, config);
            Ok(SelectedPort { port, is_known })
        },
        None => Err(CliError::Cancelled("Port selection cancelled".to_string()).into()),
    }
}

/// Confirm use of a single unrecognized port.
fn confirm_single_port(port: DetectedPort) -> Result<SelectedPort> {
    let product_info = port
        .product
        .as_ref()
        .map(|p| format!(" - {p}"))
        .unwrap_or_default();

    let confirmed = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(format!("Use serial port {}{product_info}?", port.name))
        .default(true)
        .interact_opt()
        .map_err(map_prompt_error)?
        .unwrap_or(false);

    if confirmed {
        Ok(SelectedPort {
            port,
            is_known: false,
        })
    } else {
        Err(CliError::Cancelled("Port selection cancelled".to_string()).into())
    }
}

/// Ask user if they want to remember this port's USB device.
pub fn ask_remember_port(port: &DetectedPort, config: &mut Config) -> Result<()> {
    if let (Some(vid), Some(pid)) = (port.vid, port.pid) {
        if config.port.usb_device.iter().any(|d| d.matches(vid, pid)) {
            return Ok(());
        }

        let confirmed = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt("Remember this device for future sessions?")
            .default(false)
            .interact_opt()
            .map_err(map_prompt_error)?
            .unwrap_or(false);

        if confirmed {
            if let Err(e) = config.remember_usb_device(vid, pid) {
                error!("Failed to save port configuration: {e}");
            }
        }
    }

    Ok(())
}
