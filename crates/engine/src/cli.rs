//! Command-line surface: serve (default), config validation, version.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use ciris_domain::config::Config;
use ciris_domain::{Error, Result};

#[derive(Parser)]
#[command(name = "ciris", about = "CIRIS — ethically-gated agent runtime")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long, global = true, default_value = "ciris.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the engine (default).
    Serve,
    /// Configuration tooling.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the configuration and report issues.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Load the configuration file (missing file = defaults) and apply the
/// environment overlay.
pub fn load_config(path: &std::path::Path) -> Result<Config> {
    let mut config: Config = match std::fs::read_to_string(path) {
        Ok(text) => {
            toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            Config::default()
        }
        Err(e) => return Err(e.into()),
    };
    config.runtime.overlay_env();
    if let Ok(dir) = std::env::var("CIRIS_DATA_DIR") {
        if !dir.is_empty() {
            config.storage.data_dir = PathBuf::from(dir);
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = load_config(std::path::Path::new("/nonexistent/ciris.toml")).unwrap();
        assert_eq!(config.server.port, 3280);
    }

    #[test]
    fn file_is_parsed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ciris.toml");
        std::fs::write(&path, "[server]\nport = 9999\n").unwrap();
        let config = load_config(&path).unwrap();
        assert_eq!(config.server.port, 9999);
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ciris.toml");
        std::fs::write(&path, "server = nonsense").unwrap();
        assert!(matches!(load_config(&path), Err(Error::Config(_))));
    }
}
