//! Configuration display.

use crate::cli::icons::arrow;
use docintake::Config;

/// Print the effective configuration as TOML.
pub fn cmd_config_show(config: &Config) -> anyhow::Result<()> {
    match &config.source_path {
        Some(path) => eprintln!("{} Loaded from {}", arrow(), path.display()),
        None => eprintln!("{} No config file found, showing defaults", arrow()),
    }
    let rendered = config.to_toml().map_err(|e| anyhow::anyhow!(e))?;
    println!("{}", rendered);
    Ok(())
}
