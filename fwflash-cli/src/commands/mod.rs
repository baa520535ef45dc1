//! Command implementations.
//!
//! Each subcommand is implemented in its own module; the helpers here are
//! shared by the commands that talk to a device or a firmware server.

pub(crate) mod flash;
pub(crate) mod info;
pub(crate) mod ports;
pub(crate) mod progress;
pub(crate) mod reset;

use {
    crate::{Cli, CliError, SourceArgs, config::Config, serial::{CliRequester, ask_remember_port}},
    anyhow::{Context, Result},
    console::style,
    fwflash::{
        BuiltinLoader, ContentProvider, DeviceSession, DirProvider, HttpProvider, SessionOptions,
    },
};

/// Resolve the firmware source: `--dir`, then `--url`/`FWFLASH_URL`, then
/// `[flash] url` from the config file.
pub(crate) fn firmware_provider(
    source: &SourceArgs,
    config: &Config,
) -> Result<Box<dyn ContentProvider>> {
    if let Some(dir) = &source.dir {
        if !dir.is_dir() {
            return Err(CliError::Usage(format!(
                "Firmware directory {} does not exist",
                dir.display()
            ))
            .into());
        }
        return Ok(Box::new(DirProvider::new(dir)));
    }

    let url = source
        .url
        .as_ref()
        .or(config.flash.url.as_ref())
        .ok_or_else(|| {
            CliError::Usage(
                "No firmware source: pass --url or --dir, or set [flash] url in fwflash.toml"
                    .to_string(),
            )
        })?;
    let provider = HttpProvider::new(url.as_str())
        .with_context(|| format!("Cannot create HTTP client for {url}"))?;
    Ok(Box::new(provider))
}

/// Open a device session on the port picked by the CLI's selection rules.
pub(crate) fn connect_session(cli: &Cli, config: &mut Config) -> Result<DeviceSession> {
    let options = SessionOptions::default()
        .with_filter(config.device_filter())
        .with_baud(cli.baud(config));

    let mut session = DeviceSession::new();
    let selected = {
        let mut requester = CliRequester::new(cli.serial_options(), config);
        if let Err(err) = session.connect(&BuiltinLoader, &mut requester, &options) {
            if let Some(failure) = requester.take_failure() {
                return Err(failure);
            }
            return Err(match err {
                fwflash::Error::NoDeviceSelected => {
                    CliError::Cancelled("Port selection cancelled".to_string()).into()
                },
                other => anyhow::Error::from(other).context("Failed to connect to device"),
            });
        }
        requester.selected().cloned()
    };

    if !cli.quiet {
        eprintln!(
            "{} Connected to {} ({})",
            style("✓").green(),
            style(session.chip_description().unwrap_or("unknown chip")).bold(),
            session.mac_address().unwrap_or("unknown MAC")
        );
    }

    if let Some(selected) = selected {
        if !selected.is_known && !cli.non_interactive {
            ask_remember_port(&selected.port, config)?;
        }
    }

    Ok(session)
}
