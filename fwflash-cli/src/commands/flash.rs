//! Flash command implementation.

use {
    super::{connect_session, firmware_provider, progress::ProgressSink},
    crate::{Cli, SourceArgs, config::Config},
    anyhow::{Context, Result, anyhow},
    console::style,
    fwflash::{DEFAULT_APP_OFFSET, FlashOptions, FlashOrchestrator, Verification},
};

/// Flash command implementation.
pub(crate) fn cmd_flash(
    cli: &Cli,
    config: &mut Config,
    source: &SourceArgs,
    offset: Option<u32>,
    skip_verify: bool,
) -> Result<()> {
    let provider = firmware_provider(source, config)?;
    let offset = offset.or(config.flash.offset).unwrap_or(DEFAULT_APP_OFFSET);
    let verify = !(skip_verify || config.flash.skip_verify);

    if !cli.quiet {
        eprintln!(
            "{} Firmware from {} (application at 0x{offset:X})",
            style("📦").cyan(),
            provider.describe()
        );
        eprintln!("{} Waiting for device...", style("⏳").yellow());
    }

    let mut session = connect_session(cli, config)?;

    let flasher = FlashOrchestrator::new(
        FlashOptions::default()
            .with_app_offset(offset)
            .with_verify(verify),
    );
    let sink = ProgressSink::new(cli.quiet);
    let result = flasher.flash(&mut session, provider.as_ref(), &sink);
    sink.finish();
    session.disconnect();

    let report = result
        .context("Flashing failed")?
        .ok_or_else(|| anyhow!("Device disconnected before flashing"))?;

    if !cli.quiet {
        match &report.verification {
            Verification::Verified(digest) => eprintln!(
                "{} Spot check passed (MD5 {digest})",
                style("✓").green()
            ),
            Verification::Mismatch { expected, actual } => eprintln!(
                "{} Spot check failed: expected MD5 {expected}, read {actual}",
                style("⚠").yellow()
            ),
            Verification::ReadError(e) => eprintln!(
                "{} Spot check could not read back flash: {e}",
                style("⚠").yellow()
            ),
            Verification::Skipped => {},
        }
        eprintln!(
            "\n{} Flashed {} bytes in {} segments, device reset",
            style("🎉").green().bold(),
            report.total_bytes,
            report.addresses.len()
        );
    }

    Ok(())
}
