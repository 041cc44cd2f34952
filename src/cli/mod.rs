use clap::{Parser, Subcommand};
use cordon::config::{default_config_path, CordonConfig};
use std::path::PathBuf;

pub mod init_config;
pub mod list;
pub mod show;
pub mod status;
pub mod version;

#[derive(Parser)]
#[command(name = "cordon")]
#[command(author = "Cordon Project")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Operator CLI for the Cordon conflict enforcement engine", long_about = None)]
pub struct Cli {
    /// Path to config file (default: ~/.local/share/cordon/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Write a commented default config file
    InitConfig {
        /// Path for the conflict store snapshot (optional, uses default if not specified)
        #[arg(long)]
        store_path: Option<String>,

        /// Overwrite an existing config file
        #[arg(long)]
        force: bool,
    },

    /// List active conflicts involving a party
    List {
        /// Party id
        #[arg(long)]
        party: u64,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show one conflict in detail
    Show {
        /// Pair key, e.g. 123:456 (either order)
        #[arg(long)]
        pair: String,
    },

    /// Summarize the persisted store
    Status,

    /// Display version information
    Version,
}

impl Cli {
    pub fn config_path(&self) -> PathBuf {
        self.config
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(default_config_path)
    }

    /// Log level from the config file, if one can be read.
    pub fn log_level(&self) -> Option<String> {
        let path = self.config_path();
        if !path.exists() {
            return None;
        }
        CordonConfig::load(&path).ok().map(|c| c.logging.level)
    }
}

/// Load the config a read command works against.
pub(crate) fn load_config(path: &std::path::Path) -> Result<CordonConfig, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!(
            "No config file at {} (run `cordon init-config` first)",
            path.display()
        )
        .into());
    }
    Ok(CordonConfig::load(path)?)
}

pub async fn execute(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = cli.config_path();
    match cli.command {
        Commands::InitConfig { store_path, force } => {
            init_config::execute(&config_path, store_path, force)
        }
        Commands::List { party, json } => list::execute(&config_path, party, json),
        Commands::Show { pair } => show::execute(&config_path, &pair),
        Commands::Status => status::execute(&config_path),
        Commands::Version => {
            version::execute();
            Ok(())
        }
    }
}
