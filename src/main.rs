//! identity-cascade command-line tool
//!
//! Reads the layered identity store from the config directory and lets the
//! user query, edit and watch it.

use anyhow::{Context, Result, bail};
use clap::Parser;
use identity_cascade::aggregate::AggregateConfig;
use identity_cascade::cli::{Cli, Command, ScopeArgs};
use identity_cascade::identity::{IDENTITY_DOMAIN, Identity};
use identity_cascade::logging::{self, LogTarget};
use identity_cascade::provider::ReadOnlyConfigProvider;
use identity_cascade::registry::IdentityRegistry;
use identity_cascade::settings::SettingsLoader;
use identity_cascade::validator::Validator;
use identity_cascade::watcher::start_identity_watcher;
use serde_json::{Map, Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(&LogTarget::parse(&cli.log), cli.verbose)?;

    let loader = match &cli.config_dir {
        Some(dir) => {
            let mut loader = SettingsLoader::load_from(dir.clone())?;
            loader.apply_overrides(|name| std::env::var(name).ok());
            loader
        }
        None => SettingsLoader::load()?,
    };
    debug!(config_dir = %loader.config_dir().display(), "Using config directory");

    let registry = IdentityRegistry::new(loader.identity_paths());
    registry.load_all();

    match cli.command {
        Command::Get { domain, key, scope } => run_get(&registry, &scope, &domain, &key)?,
        Command::Set {
            domain,
            key,
            value,
            scope,
        } => run_set(&registry, &scope, &domain, &key, Some(&value))?,
        Command::Unset { domain, key, scope } => {
            run_set(&registry, &scope, &domain, &key, None)?
        }
        Command::List {
            domain,
            json,
            scope,
        } => run_list(&registry, &scope, domain.as_deref(), json)?,
        Command::Identities => run_identities(&registry),
        Command::Watch => {
            let config = loader.watcher_config();
            if !config.watch_identities && !config.watch_global {
                bail!("file watching is disabled in {}", loader.config_dir().display());
            }
            run_watch(registry.clone(), config).await?;
        }
    }

    let saved = registry.save_all();
    if saved > 0 {
        debug!(saved, "Saved dirty identities");
    }
    Ok(())
}

fn aggregate_for(registry: &IdentityRegistry, scope: &ScopeArgs) -> Arc<AggregateConfig> {
    registry.aggregate(scope.context())
}

fn run_get(registry: &IdentityRegistry, scope: &ScopeArgs, domain: &str, key: &str) -> Result<()> {
    let config = aggregate_for(registry, scope);
    let Some(value) = config.option_string(domain, key, false, &Validator::Permissive, &[]) else {
        bail!("{}.{} is not set", domain, key);
    };

    match config.scope_of(domain, key) {
        Some(source) => println!("{}  ({})", value, source.target()),
        None => println!("{}", value),
    }
    Ok(())
}

/// Write `value` to the identity for the most specific scope given, or
/// remove the key when `value` is `None`.
fn run_set(
    registry: &IdentityRegistry,
    scope: &ScopeArgs,
    domain: &str,
    key: &str,
    value: Option<&str>,
) -> Result<()> {
    let target = scope.target().map_err(anyhow::Error::msg)?;
    let identity = match target {
        Some(target) => registry.scoped_identity(target),
        None => registry
            .global_identity()
            .context("no global identity is loaded")?,
    };

    match value {
        Some(value) => identity.set_option(domain, key, value),
        None => identity.unset_option(domain, key),
    }

    if identity.is_dirty() && !identity.save() {
        bail!("failed to save {}", describe(&identity));
    }
    info!(identity = %identity, domain, key, "Updated option");
    Ok(())
}

fn run_list(
    registry: &IdentityRegistry,
    scope: &ScopeArgs,
    domain: Option<&str>,
    as_json: bool,
) -> Result<()> {
    let config = aggregate_for(registry, scope);
    let domains: Vec<String> = match domain {
        Some(domain) => vec![domain.to_string()],
        None => config
            .domains()
            .into_iter()
            .filter(|domain| domain != IDENTITY_DOMAIN)
            .collect(),
    };

    let mut listing: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
    for domain in &domains {
        let options: BTreeMap<String, String> = config.options(domain).into_iter().collect();
        if !options.is_empty() {
            listing.insert(domain.clone(), options);
        }
    }

    if as_json {
        let mut root = Map::new();
        for (domain, options) in &listing {
            root.insert(domain.clone(), json!(options));
        }
        println!("{}", serde_json::to_string_pretty(&Value::Object(root))?);
        return Ok(());
    }

    for (domain, options) in &listing {
        println!("[{}]", domain);
        for (key, value) in options {
            let source = config
                .scope_of(domain, key)
                .map(|identity| identity.name())
                .unwrap_or_default();
            println!("  {} = {}  ({})", key, value, source);
        }
    }
    Ok(())
}

fn run_identities(registry: &IdentityRegistry) {
    let mut identities = registry.identities();
    identities.sort_by(|a, b| a.target().precedence_cmp(&b.target()));
    for identity in identities {
        println!("{}", describe(&identity));
    }
}

fn describe(identity: &Identity) -> String {
    let target = identity.target();
    let location = identity
        .path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "<built-in>".to_string());
    format!(
        "{} [{}, order {}] {}",
        identity.name(),
        target,
        target.order(),
        location
    )
}

async fn run_watch(
    registry: Arc<IdentityRegistry>,
    config: identity_cascade::watcher::WatcherConfig,
) -> Result<()> {
    let mut handle = start_identity_watcher(registry, config)?;
    eprintln!("Watching for identity changes, press Ctrl-C to stop");

    loop {
        tokio::select! {
            event = handle.wait_for_change() => match event {
                Some(event) => println!("{:?}", event),
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
