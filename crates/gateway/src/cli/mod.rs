pub mod bindings;
pub mod config;

use clap::{Parser, Subcommand};

/// Tether: conversation bindings for a multi-channel agent gateway.
#[derive(Debug, Parser)]
#[command(name = "tether", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the binding core: reconcile, sweep, wait for shutdown (default
    /// when no subcommand is given).
    Serve,
    /// Inspect persisted conversation bindings.
    #[command(subcommand)]
    Bindings(BindingsCommand),
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum BindingsCommand {
    /// List the persisted thread bindings of configured accounts.
    List {
        /// Only this channel (e.g. "discord").
        #[arg(long)]
        channel: Option<String>,
        /// Only this account id.
        #[arg(long)]
        account: Option<String>,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `TETHER_CONFIG` (or
/// `config.toml` by default).  A missing file yields the defaults.
/// Returns the parsed [`Config`] and the path that was used.
///
/// [`Config`]: tether_domain::config::Config
pub fn load_config() -> anyhow::Result<(tether_domain::config::Config, String)> {
    let config_path = std::env::var("TETHER_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        tether_domain::config::Config::default()
    };

    Ok((config, config_path))
}
