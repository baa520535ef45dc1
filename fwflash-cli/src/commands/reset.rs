//! Reset command implementation.

use {
    super::connect_session,
    crate::{Cli, config::Config},
    anyhow::{Context, Result},
    console::style,
    fwflash::{FlashOptions, FlashOrchestrator},
};

/// Pulse DTR/RTS to boot the device into its application.
pub(crate) fn cmd_reset(cli: &Cli, config: &mut Config) -> Result<()> {
    let mut session = connect_session(cli, config)?;

    if !cli.quiet {
        eprintln!("{} Resetting device...", style("🔄").cyan());
    }
    let result = FlashOrchestrator::new(FlashOptions::default()).reset(&mut session);
    session.disconnect();
    result.context("Reset failed")?;

    if !cli.quiet {
        eprintln!("{} Device reset", style("✓").green());
    }
    Ok(())
}
