//! fwflash CLI - Command-line tool for flashing firmware from a firmware server.
//!
//! ## Features
//!
//! - Fetch bootloader, partition table, boot selector and application from an
//!   HTTP server or a local directory
//! - Flash, spot-check and reset in one command
//! - Interactive serial port selection
//! - Environment variable and config file support

use {
    anyhow::Result,
    clap::{Parser, Subcommand},
    env_logger::Env,
    log::debug,
    std::{
        env,
        path::PathBuf,
        process::ExitCode,
        sync::atomic::{AtomicBool, Ordering},
    },
};

mod commands;
mod config;
mod serial;

use config::Config;
use serial::SerialOptions;

/// Whether stderr is a terminal (set once at startup).
static STDERR_IS_TTY: AtomicBool = AtomicBool::new(true);

/// Check if emoji/animations should be used (TTY and colors enabled).
fn use_fancy_output() -> bool {
    STDERR_IS_TTY.load(Ordering::Relaxed) && console::colors_enabled_stderr()
}

/// Errors classified for the process exit code.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Bad invocation or setup; exit code 2.
    #[error("{0}")]
    Usage(String),
    /// The user backed out; exit code 130.
    #[error("{0}")]
    Cancelled(String),
}

/// fwflash - Fetch, flash, verify and reset serial-attached microcontrollers.
///
/// Environment variables:
///   FWFLASH_PORT              - Default serial port
///   FWFLASH_BAUD              - Default baud rate (default: 921600)
///   FWFLASH_URL               - Firmware server base URL
///   FWFLASH_OFFSET            - Application flash offset (default: 0x10000)
///   FWFLASH_NON_INTERACTIVE   - Non-interactive mode (disable prompts)
#[derive(Parser)]
#[command(name = "fwflash")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
#[allow(clippy::struct_excessive_bools)]
pub(crate) struct Cli {
    /// Serial port to use (auto-detected if not specified).
    #[arg(short, long, global = true, env = "FWFLASH_PORT")]
    port: Option<String>,

    /// Baud rate for data transfer [default: 921600].
    #[arg(short, long, global = true, env = "FWFLASH_BAUD")]
    baud: Option<u32>,

    /// Verbose output level (-v, -vv for increasing detail).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet mode (suppress non-essential output).
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Non-interactive mode (fail instead of prompting).
    #[arg(long, global = true, env = "FWFLASH_NON_INTERACTIVE")]
    non_interactive: bool,

    /// Confirm port selection even for auto-detected ports.
    #[arg(long, global = true)]
    confirm_port: bool,

    /// List all available ports (including unknown types).
    #[arg(long, global = true)]
    list_all_ports: bool,

    /// Path to a configuration file.
    #[arg(long = "config", global = true, value_name = "PATH")]
    config_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    pub(crate) fn serial_options(&self) -> SerialOptions {
        SerialOptions {
            port: self.port.clone(),
            list_all_ports: self.list_all_ports,
            non_interactive: self.non_interactive,
            confirm_port: self.confirm_port,
        }
    }

    pub(crate) fn baud(&self, config: &Config) -> u32 {
        self.baud
            .or(config.port.connection.baud)
            .unwrap_or(fwflash::DEFAULT_BAUD)
    }
}

/// Where firmware is fetched from.
#[derive(clap::Args, Debug, Clone, Default)]
pub(crate) struct SourceArgs {
    /// Firmware server base URL.
    #[arg(long, env = "FWFLASH_URL", conflicts_with = "dir")]
    url: Option<String>,

    /// Local directory holding firmware.bin, bootloader.bin, partitions.bin,
    /// boot_app0.bin and info.json.
    #[arg(long, value_name = "PATH")]
    dir: Option<PathBuf>,
}

/// Available commands.
#[derive(Subcommand)]
enum Commands {
    /// Download, flash, spot-check and reset.
    Flash {
        #[command(flatten)]
        source: SourceArgs,

        /// Application flash offset.
        #[arg(long, env = "FWFLASH_OFFSET", value_parser = parse_offset)]
        offset: Option<u32>,

        /// Skip the read-back spot check.
        #[arg(long)]
        skip_verify: bool,
    },

    /// Show the firmware server's image metadata.
    Info {
        #[command(flatten)]
        source: SourceArgs,

        /// Output information as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// List available serial ports.
    ListPorts {
        /// Output port list as JSON to stdout.
        #[arg(long)]
        json: bool,
    },

    /// Reset the device into its application.
    Reset,
}

fn parse_offset(s: &str) -> Result<u32, String> {
    fwflash::firmware::parse_offset(s)
}

/// Exit code for a failed command.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        return match cli_err {
            CliError::Usage(_) => 2,
            CliError::Cancelled(_) => 130,
        };
    }
    match err.downcast_ref::<fwflash::Error>() {
        Some(e) if e.is_cancellation() => 130,
        _ => 1,
    }
}

fn main() -> ExitCode {
    let stderr_is_tty = console::Term::stderr().is_term();
    STDERR_IS_TTY.store(stderr_is_tty, Ordering::Relaxed);

    if env::var("NO_COLOR").is_ok() || !stderr_is_tty {
        console::set_colors_enabled(false);
        console::set_colors_enabled_stderr(false);
    }

    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format_target(cli.verbose >= 2)
        .format_timestamp(if cli.verbose >= 2 {
            Some(env_logger::TimestampPrecision::Millis)
        } else {
            None
        })
        .init();

    debug!(
        "fwflash v{} (verbose level: {})",
        env!("CARGO_PKG_VERSION"),
        cli.verbose
    );

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = exit_code_for(&err);
            if code == 130 {
                eprintln!("{}", console::style(format!("{err:#}")).yellow());
            } else {
                eprintln!("{} {err:#}", console::style("Error:").red().bold());
            }
            ExitCode::from(code)
        },
    }
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = if let Some(ref path) = cli.config_path {
        Config::load_from_path(path)
    } else {
        Config::load()
    };

    match &cli.command {
        Commands::Flash {
            source,
            offset,
            skip_verify,
        } => commands::flash::cmd_flash(cli, &mut config, source, *offset, *skip_verify),
        Commands::Info { source, json } => commands::info::cmd_info(&config, source, *json),
        Commands::ListPorts { json } => commands::ports::cmd_list_ports(*json),
        Commands::Reset => commands::reset::cmd_reset(cli, &mut config),
    }
}
