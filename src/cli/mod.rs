//! CLI command definitions for identity-cascade.
//!
//! The main entry point is the [`Cli`] struct; `main.rs` dispatches on its
//! subcommands.

use crate::aggregate::ConfigContext;
use crate::target::ConfigTarget;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Inspect and edit layered identity configuration
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration directory (overrides IDENTITY_CASCADE_DIR)
    #[arg(short, long, global = true)]
    pub config_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective value of an option
    Get {
        domain: String,
        key: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Set an option on the identity for the given scope (global if none)
    Set {
        domain: String,
        key: String,
        value: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// Remove an option from the identity for the given scope
    Unset {
        domain: String,
        key: String,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// List effective options, optionally for one domain
    List {
        domain: Option<String>,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
        #[command(flatten)]
        scope: ScopeArgs,
    },

    /// List known identities in precedence order
    Identities,

    /// Watch identity files and report reloads until interrupted
    Watch,
}

/// Where to look from, or which identity to write to.
#[derive(Args, Debug, Clone, Default)]
pub struct ScopeArgs {
    #[arg(long)]
    pub protocol: Option<String>,
    #[arg(long)]
    pub ircd: Option<String>,
    #[arg(long)]
    pub network: Option<String>,
    #[arg(long)]
    pub server: Option<String>,
    /// Channel name; requires --network
    #[arg(long)]
    pub channel: Option<String>,
}

impl ScopeArgs {
    /// The lookup context described by the flags.
    pub fn context(&self) -> ConfigContext {
        let value = |v: &Option<String>| v.clone().unwrap_or_default();
        ConfigContext {
            protocol: value(&self.protocol),
            ircd: value(&self.ircd),
            network: value(&self.network),
            server: value(&self.server),
            channel: self.channel.clone(),
        }
    }

    /// The most specific target named by the flags; `None` means global.
    pub fn target(&self) -> Result<Option<ConfigTarget>, String> {
        if let Some(channel) = &self.channel {
            let network = self
                .network
                .as_ref()
                .ok_or_else(|| "--channel requires --network".to_string())?;
            return Ok(Some(ConfigTarget::channel(
                format!("{}@{}", channel, network).to_lowercase(),
            )));
        }

        let target = if let Some(server) = &self.server {
            ConfigTarget::server(server.to_lowercase())
        } else if let Some(network) = &self.network {
            ConfigTarget::network(network.to_lowercase())
        } else if let Some(ircd) = &self.ircd {
            ConfigTarget::ircd(ircd.to_lowercase())
        } else if let Some(protocol) = &self.protocol {
            ConfigTarget::protocol(protocol.to_lowercase())
        } else {
            return Ok(None);
        };
        Ok(Some(target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_get_with_scope() {
        let cli = Cli::parse_from([
            "identity-cascade",
            "get",
            "ui",
            "colour",
            "--network",
            "freenode",
            "--channel",
            "#rust",
        ]);
        let Command::Get { domain, key, scope } = cli.command else {
            panic!("expected get");
        };
        assert_eq!((domain.as_str(), key.as_str()), ("ui", "colour"));
        assert_eq!(scope.context().channel.as_deref(), Some("#rust"));
        assert_eq!(
            scope.target().unwrap(),
            Some(ConfigTarget::channel("#rust@freenode"))
        );
    }

    #[test]
    fn test_target_specificity() {
        let scope = ScopeArgs {
            network: Some("Net".into()),
            server: Some("Srv".into()),
            ..Default::default()
        };
        assert_eq!(scope.target().unwrap(), Some(ConfigTarget::server("srv")));
        assert_eq!(ScopeArgs::default().target().unwrap(), None);
    }

    #[test]
    fn test_channel_requires_network() {
        let scope = ScopeArgs {
            channel: Some("#x".into()),
            ..Default::default()
        };
        assert!(scope.target().is_err());
    }
}
