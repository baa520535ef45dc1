//! Firmware info command implementation.

use {
    super::firmware_provider,
    crate::{SourceArgs, config::Config},
    anyhow::{Context, Result},
    console::style,
    fwflash::{FirmwareInfo, fetch_info},
};

/// Fetch and print `<base>/info`.
pub(crate) fn cmd_info(config: &Config, source: &SourceArgs, json: bool) -> Result<()> {
    let provider = firmware_provider(source, config)?;
    let info = fetch_info(provider.as_ref())
        .with_context(|| format!("Failed to read firmware info from {}", provider.describe()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    print_info(&info);
    Ok(())
}

fn print_info(info: &FirmwareInfo) {
    println!("{}", style("Firmware").bold().underlined());
    println!("  {:<10} {}", style("File").dim(), info.filename);
    println!("  {:<10} {} bytes", style("Size").dim(), info.size);
    println!("  {:<10} {}", style("Chip").dim(), info.chip);
    println!("  {:<10} 0x{:X}", style("Offset").dim(), info.offset);
}
