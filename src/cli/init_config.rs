use cordon::config::{default_store_path, CordonConfig};
use std::path::{Path, PathBuf};

/// Write a commented default config file
pub fn execute(
    config_path: &Path,
    store_path: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() && !force {
        return Err(format!(
            "Config file already exists at {} (use --force to overwrite)",
            config_path.display()
        )
        .into());
    }

    let store_path = store_path
        .map(PathBuf::from)
        .unwrap_or_else(default_store_path);

    CordonConfig::create_default(config_path, &store_path)?;
    println!("Created: {}", config_path.display());
    println!("Store: {}", store_path.display());
    println!();
    println!("Add a [[community]] table with a mute_grant to enable full enforcement.");
    Ok(())
}
