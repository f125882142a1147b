//! CLI argument definitions for the Confab application.
//!
//! Uses `clap` with derive macros for ergonomic argument parsing.
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use confab_core::config::ConfabConfig;

/// Confab: a streaming chat client with artifacts, attachments and voice input.
#[derive(Parser, Debug)]
#[command(name = "confab", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Data directory for the SQLite database and API token.
    #[arg(short = 'd', long = "data-dir", global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Serve the sessions and messages HTTP API.
    Serve {
        /// API server port.
        #[arg(short = 'p', long = "port")]
        port: Option<u16>,
    },
    /// Chat interactively in the terminal.
    Chat {
        /// Resume an existing session by id.
        #[arg(short = 's', long = "session")]
        session: Option<String>,

        /// Model id (gpt-*, claude-*, or a local model name).
        #[arg(short = 'm', long = "model")]
        model: Option<String>,

        /// Persist through a running `confab serve` at this URL instead of
        /// the local database.
        #[arg(long = "remote")]
        remote: Option<String>,

        /// Answer with the built-in scripted model; no network access.
        #[arg(long = "offline")]
        offline: bool,
    },
    /// List sessions in the local database, newest first.
    Sessions,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > CONFAB_CONFIG env var > platform default (~/.confab/config.toml).
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("CONFAB_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Apply CLI flags and environment variables on top of the file config.
    pub fn apply_overrides(&self, config: &mut ConfabConfig) {
        if let Some(ref dir) = self.data_dir {
            config.general.data_dir = dir.to_string_lossy().to_string();
        }
        if let Some(ref level) = self.log_level {
            config.general.log_level = level.clone();
        }

        config.general.port = self.resolve_port(config.general.port);

        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            if !key.trim().is_empty() {
                config.model.openai_api_key = Some(key);
            }
        }
        if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
            if !key.trim().is_empty() {
                config.model.anthropic_api_key = Some(key);
            }
        }

        if let Command::Chat {
            model: Some(ref model),
            ..
        } = self.command
        {
            config.model.model = model.clone();
        }
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > CONFAB_PORT env var > config file value > 3040.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        if let Command::Serve { port: Some(p) } = self.command {
            return p;
        }
        if let Ok(val) = std::env::var("CONFAB_PORT") {
            if let Ok(p) = val.parse::<u16>() {
                return p;
            }
        }
        if config_port != 0 {
            return config_port;
        }
        3040
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/").or_else(|| path.strip_prefix("~\\")) {
        if let Some(home) = home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

fn home_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    let var = "USERPROFILE";
    #[cfg(not(target_os = "windows"))]
    let var = "HOME";
    std::env::var(var).ok().map(PathBuf::from)
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    match home_dir() {
        Some(home) => home.join(".confab").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_chat_flags() {
        let args = CliArgs::try_parse_from([
            "confab", "chat", "--offline", "-m", "llama3", "-s", "abc",
        ])
        .unwrap();
        assert_eq!(
            args.command,
            Command::Chat {
                session: Some("abc".into()),
                model: Some("llama3".into()),
                remote: None,
                offline: true,
            }
        );
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from(["confab", "serve", "-p", "4000", "-l", "debug"]).unwrap();
        assert_eq!(args.command, Command::Serve { port: Some(4000) });
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert_eq!(args.resolve_port(3040), 4000);
    }

    #[test]
    fn test_overrides_apply_model_and_data_dir() {
        let args = CliArgs::try_parse_from([
            "confab", "-d", "/tmp/confab", "chat", "-m", "claude-3-haiku",
        ])
        .unwrap();
        let mut config = ConfabConfig::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.general.data_dir, "/tmp/confab");
        assert_eq!(config.model.model, "claude-3-haiku");
    }

    #[test]
    fn test_expand_home_leaves_plain_paths() {
        assert_eq!(expand_home("/var/data"), PathBuf::from("/var/data"));
        assert_eq!(expand_home("relative"), PathBuf::from("relative"));
    }

    #[test]
    fn test_subcommand_required() {
        assert!(CliArgs::try_parse_from(["confab"]).is_err());
    }
}
