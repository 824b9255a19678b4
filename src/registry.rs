//! The set of known identities.
//!
//! [`IdentityRegistry`] loads identities from the embedded defaults, the
//! user's identities directory and the global config file, hands out
//! [`AggregateConfig`] views, and keeps those views up to date as identities
//! are added and removed. It is an ordinary value shared through an `Arc`;
//! nothing about it is process-global.

use crate::aggregate::{AggregateConfig, ConfigContext, sort_sources};
use crate::identity::{IDENTITY_DOMAIN, Identity, PROFILE_DOMAIN};
use crate::provider::{lock, read, write};
use crate::store::IdentityFile;
use crate::target::ConfigTarget;
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use tracing::{debug, info, warn};

/// Embedded identities shipped with the crate, lowest precedence.
const DEFAULT_IDENTITIES: &[(&str, &str)] =
    &[("defaults.yaml", include_str!("../defaults/defaults.yaml"))];

/// Read-only identity describing this build. Never consulted when deciding
/// what a global identity needs to persist.
const VERSION_IDENTITY: &str = include_str!("../defaults/version.yaml");

const IDENTITY_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Where persisted identities live. Either location may be absent, in which
/// case the corresponding identities are kept in memory only.
#[derive(Debug, Clone, Default)]
pub struct IdentityPaths {
    pub identities_dir: Option<PathBuf>,
    pub global_config: Option<PathBuf>,
}

impl IdentityPaths {
    /// `<config_dir>/identities` and `<config_dir>/global.yaml`.
    pub fn under(config_dir: &Path) -> Self {
        Self {
            identities_dir: Some(config_dir.join("identities")),
            global_config: Some(config_dir.join("global.yaml")),
        }
    }
}

/// Outcome of [`IdentityRegistry::handle_file_changed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileChange {
    /// A known identity was re-read; `changes` keys differed.
    Reloaded { changes: usize },
    /// A new identity file was loaded.
    Added,
    /// A known identity's file disappeared.
    Removed,
    /// The path is not an identity file.
    Ignored,
    /// A new file could not be loaded.
    Failed(String),
}

pub struct IdentityRegistry {
    paths: IdentityPaths,
    identities: ArcSwap<Vec<Arc<Identity>>>,
    write_lock: Mutex<()>,
    sequence: AtomicU64,
    aggregates: Mutex<Vec<Weak<AggregateConfig>>>,
    global_config: OnceLock<Arc<AggregateConfig>>,
    global_identity: RwLock<Option<Arc<Identity>>>,
    version_identity: RwLock<Option<Arc<Identity>>>,
    this: Weak<IdentityRegistry>,
}

impl IdentityRegistry {
    pub fn new(paths: IdentityPaths) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            paths,
            identities: ArcSwap::from_pointee(Vec::new()),
            write_lock: Mutex::new(()),
            sequence: AtomicU64::new(0),
            aggregates: Mutex::new(Vec::new()),
            global_config: OnceLock::new(),
            global_identity: RwLock::new(None),
            version_identity: RwLock::new(None),
            this: this.clone(),
        })
    }

    /// A registry that never touches the filesystem.
    pub fn in_memory() -> Arc<Self> {
        Self::new(IdentityPaths::default())
    }

    pub fn paths(&self) -> &IdentityPaths {
        &self.paths
    }

    /// Load defaults, user identities and the global config, then make sure
    /// at least one profile exists.
    pub fn load_all(&self) {
        self.load_defaults();
        self.load_user();
        self.load_global_config();

        if self.profiles().is_empty() {
            self.create_default_profile();
        }
    }

    /// Load the embedded default and version identities.
    pub fn load_defaults(&self) {
        for (name, text) in DEFAULT_IDENTITIES {
            match Identity::from_yaml(text, false) {
                Ok(identity) => self.add_identity(Arc::new(identity)),
                Err(e) => warn!(name, error = %e, "Unable to load default identity"),
            }
        }

        match Identity::from_yaml(VERSION_IDENTITY, false) {
            Ok(identity) => self.set_version_identity(Arc::new(identity)),
            Err(e) => warn!(error = %e, "Unable to load version identity"),
        }
    }

    /// Load every identity file below the identities directory. Files that
    /// fail to load are logged and skipped. Returns the number loaded.
    pub fn load_user(&self) -> usize {
        let Some(dir) = self.paths.identities_dir.as_deref() else {
            return 0;
        };
        if let Err(e) = std::fs::create_dir_all(dir) {
            warn!(dir = %dir.display(), error = %e, "Unable to create identities directory");
            return 0;
        }

        let mut files = Vec::new();
        collect_identity_files(dir, &mut files);
        files.sort();

        let mut loaded = 0;
        for path in files {
            if self.identity_for_path(&path).is_some() {
                continue;
            }
            match Identity::load(&path, false) {
                Ok(identity) => {
                    self.add_identity(Arc::new(identity));
                    loaded += 1;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Unable to load identity, skipping")
                }
            }
        }

        info!(dir = %dir.display(), loaded, "Loaded user identities");
        loaded
    }

    /// Load (creating if missing) the global config file.
    pub fn load_global_config(&self) -> Option<Arc<Identity>> {
        let identity = match self.paths.global_config.as_deref() {
            Some(path) => {
                if !path.exists()
                    && let Err(e) = IdentityFile::new().write(path)
                {
                    warn!(path = %path.display(), error = %e, "Unable to create global config");
                    return None;
                }
                match Identity::load(path, true) {
                    Ok(identity) => identity,
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Unable to load global config");
                        return None;
                    }
                }
            }
            None => Identity::create("Global config", ConfigTarget::global(), None),
        };

        identity.set_option(IDENTITY_DOMAIN, "name", "Global config");
        let identity = Arc::new(identity);
        *write(&self.global_identity) = Some(identity.clone());
        self.add_identity(identity.clone());
        Some(identity)
    }

    fn create_default_profile(&self) {
        let nickname = std::env::var("USER")
            .or_else(|_| std::env::var("USERNAME"))
            .unwrap_or_else(|_| "user".to_string())
            .replace(' ', "_");

        let path = self
            .paths
            .identities_dir
            .as_deref()
            .map(|dir| self.unique_path(dir, "Default Profile"));
        let profile = Identity::create("Default Profile", ConfigTarget::custom("profile"), path);
        profile.set_option(PROFILE_DOMAIN, "nicknames", &nickname);
        profile.set_option(PROFILE_DOMAIN, "realname", &nickname);
        profile.save();

        info!(nickname = %nickname, "Created default profile");
        self.add_identity(Arc::new(profile));
    }

    /// Register an identity and offer it to every live aggregate.
    pub fn add_identity(&self, identity: Arc<Identity>) {
        // Aggregates created after the store already include the identity.
        let aggregates = {
            let _guard = lock(&self.write_lock);
            let current = self.identities.load_full();
            if current.iter().any(|i| Arc::ptr_eq(i, &identity)) {
                return;
            }
            let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            identity.attach(self.this.clone(), sequence);

            let mut next = current.as_ref().clone();
            next.push(identity.clone());
            self.identities.store(Arc::new(next));
            self.live_aggregates()
        };

        debug!(identity = %identity, target = %identity.target(), "Added identity");
        for aggregate in aggregates {
            aggregate.add_identity(&identity);
        }
    }

    /// Forget an identity and withdraw it from every aggregate.
    pub fn remove_identity(&self, identity: &Identity) {
        let aggregates = {
            let _guard = lock(&self.write_lock);
            let current = self.identities.load_full();
            let next: Vec<Arc<Identity>> = current
                .iter()
                .filter(|i| !std::ptr::eq(Arc::as_ptr(i), identity))
                .cloned()
                .collect();
            if next.len() == current.len() {
                return;
            }
            self.identities.store(Arc::new(next));
            self.live_aggregates()
        };

        debug!(identity = %identity, "Removed identity");
        for aggregate in aggregates {
            aggregate.remove_identity(identity);
        }
        identity.detach();
    }

    pub fn identities(&self) -> Vec<Arc<Identity>> {
        self.identities.load_full().as_ref().clone()
    }

    pub fn profiles(&self) -> Vec<Arc<Identity>> {
        self.identities
            .load()
            .iter()
            .filter(|i| i.is_profile())
            .cloned()
            .collect()
    }

    /// The identity targeting exactly `target`, comparing data
    /// case-insensitively.
    pub fn find_identity(&self, target: &ConfigTarget) -> Option<Arc<Identity>> {
        self.identities
            .load()
            .iter()
            .find(|i| {
                let t = i.target();
                t.kind() == target.kind() && t.data().eq_ignore_ascii_case(target.data())
            })
            .cloned()
    }

    pub fn set_version_identity(&self, identity: Arc<Identity>) {
        *write(&self.version_identity) = Some(identity.clone());
        self.add_identity(identity);
    }

    pub fn version_identity(&self) -> Option<Arc<Identity>> {
        read(&self.version_identity).clone()
    }

    /// The writable global identity, once loaded.
    pub fn global_identity(&self) -> Option<Arc<Identity>> {
        read(&self.global_identity).clone()
    }

    /// A new aggregate view for `context`, kept in sync with the registry
    /// for as long as the caller holds it.
    pub fn aggregate(&self, context: ConfigContext) -> Arc<AggregateConfig> {
        let _guard = lock(&self.write_lock);
        let aggregate = AggregateConfig::new(self.this.clone(), context, &self.identities());
        let mut aggregates = lock(&self.aggregates);
        aggregates.retain(|a| a.strong_count() > 0);
        aggregates.push(Arc::downgrade(&aggregate));
        aggregate
    }

    /// The shared aggregate over global identities only.
    pub fn global_config(&self) -> Arc<AggregateConfig> {
        self.global_config
            .get_or_init(|| self.aggregate(ConfigContext::global()))
            .clone()
    }

    /// Global-context identities in precedence order, minus `excluded` and
    /// optionally the version identity.
    pub fn global_cascade_excluding(
        &self,
        excluded: &[&Identity],
        exclude_version: bool,
    ) -> Vec<Arc<Identity>> {
        let context = ConfigContext::global();
        let version = if exclude_version {
            self.version_identity()
        } else {
            None
        };

        let mut sources: Vec<Arc<Identity>> = self
            .identities
            .load()
            .iter()
            .filter(|i| context.applies_to(&i.target()))
            .filter(|i| !excluded.iter().any(|e| std::ptr::eq(Arc::as_ptr(i), *e)))
            .filter(|i| !version.as_ref().is_some_and(|v| Arc::ptr_eq(i, v)))
            .cloned()
            .collect();
        sort_sources(&mut sources);
        sources
    }

    /// Find or create the identity for `channel` on `network`.
    pub fn channel_identity(&self, network: &str, channel: &str) -> Arc<Identity> {
        self.scoped_identity(ConfigTarget::channel(
            format!("{}@{}", channel, network).to_lowercase(),
        ))
    }

    /// Find or create the identity for `network`.
    pub fn network_identity(&self, network: &str) -> Arc<Identity> {
        self.scoped_identity(ConfigTarget::network(network.to_lowercase()))
    }

    /// Find or create the identity for `server`.
    pub fn server_identity(&self, server: &str) -> Arc<Identity> {
        self.scoped_identity(ConfigTarget::server(server.to_lowercase()))
    }

    /// Find or create the identity for `ircd`.
    pub fn ircd_identity(&self, ircd: &str) -> Arc<Identity> {
        self.scoped_identity(ConfigTarget::ircd(ircd.to_lowercase()))
    }

    /// Find or create the identity for `protocol`.
    pub fn protocol_identity(&self, protocol: &str) -> Arc<Identity> {
        self.scoped_identity(ConfigTarget::protocol(protocol.to_lowercase()))
    }

    /// Find the identity for `target`, creating and saving a new one if none
    /// exists yet.
    pub fn scoped_identity(&self, target: ConfigTarget) -> Arc<Identity> {
        if let Some(found) = self.find_identity(&target) {
            return found;
        }

        let name = target.data().to_string();
        let path = self
            .paths
            .identities_dir
            .as_deref()
            .map(|dir| self.unique_path(dir, &name));
        let identity = Identity::create(&name, target, path);
        identity.save();

        let identity = Arc::new(identity);
        self.add_identity(identity.clone());
        identity
    }

    /// A file name in `dir` derived from `name` that no file or identity
    /// uses yet.
    fn unique_path(&self, dir: &Path, name: &str) -> PathBuf {
        let base = sanitise_file_name(name);
        let mut candidate = dir.join(format!("{}.yaml", base));
        let mut n = 1;
        while candidate.exists() || self.identity_for_path(&candidate).is_some() {
            n += 1;
            candidate = dir.join(format!("{}-{}.yaml", base, n));
        }
        candidate
    }

    /// Save every dirty identity. Returns the number written.
    pub fn save_all(&self) -> usize {
        self.identities().iter().filter(|i| i.save()).count()
    }

    pub fn identity_for_path(&self, path: &Path) -> Option<Arc<Identity>> {
        let wanted = normalise(path);
        self.identities
            .load()
            .iter()
            .find(|i| i.is_file(path) || i.path().is_some_and(|p| normalise(p) == wanted))
            .cloned()
    }

    /// React to an external change of `path`.
    pub fn handle_file_changed(&self, path: &Path) -> FileChange {
        if let Some(identity) = self.identity_for_path(path) {
            if path.exists() {
                return FileChange::Reloaded {
                    changes: identity.reload().len(),
                };
            }

            let is_global = self
                .global_identity()
                .is_some_and(|g| Arc::ptr_eq(&g, &identity));
            if is_global {
                return FileChange::Ignored;
            }
            info!(path = %path.display(), "Identity file removed");
            self.remove_identity(&identity);
            return FileChange::Removed;
        }

        if !path.is_file() || !self.is_identities_path(path) {
            return FileChange::Ignored;
        }

        match Identity::load(path, false) {
            Ok(identity) => {
                info!(path = %path.display(), "Loaded new identity");
                self.add_identity(Arc::new(identity));
                FileChange::Added
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to load new identity");
                FileChange::Failed(e.to_string())
            }
        }
    }

    /// Whether `path` looks like an identity file inside the identities
    /// directory.
    pub fn is_identities_path(&self, path: &Path) -> bool {
        let Some(dir) = self.paths.identities_dir.as_deref() else {
            return false;
        };
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        has_identity_extension(path) && normalise(path).starts_with(dir)
    }

    /// Called by an identity whose order changed.
    pub(crate) fn identity_reordered(&self) {
        let aggregates = {
            let _guard = lock(&self.write_lock);
            let mut next = self.identities.load_full().as_ref().clone();
            sort_sources(&mut next);
            self.identities.store(Arc::new(next));
            self.live_aggregates()
        };
        for aggregate in aggregates {
            aggregate.resort();
        }
    }

    fn live_aggregates(&self) -> Vec<Arc<AggregateConfig>> {
        let mut aggregates = lock(&self.aggregates);
        aggregates.retain(|a| a.strong_count() > 0);
        aggregates.iter().filter_map(Weak::upgrade).collect()
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("paths", &self.paths)
            .field("identities", &self.identities.load().len())
            .finish()
    }
}

fn has_identity_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| IDENTITY_EXTENSIONS.contains(&e))
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

fn collect_identity_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "Unable to read identities directory");
            return;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if is_hidden(&path) {
            continue;
        }
        if path.is_dir() {
            collect_identity_files(&path, out);
        } else if has_identity_extension(&path) {
            out.push(path);
        }
    }
}

/// Canonical parent joined with the file name, so a path can be compared
/// even after the file itself is gone.
fn normalise(path: &Path) -> PathBuf {
    match (
        path.parent().and_then(|dir| dir.canonicalize().ok()),
        path.file_name(),
    ) {
        (Some(dir), Some(name)) => dir.join(name),
        _ => path.to_path_buf(),
    }
}

fn sanitise_file_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        "identity".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ReadOnlyConfigProvider;
    use crate::target::TargetKind;
    use tempfile::TempDir;

    #[test]
    fn test_sanitise_file_name() {
        assert_eq!(sanitise_file_name("#rust@freenode"), "_rust@freenode");
        assert_eq!(sanitise_file_name("a/b c"), "a_b_c");
        assert_eq!(sanitise_file_name(".."), "identity");
    }

    #[test]
    fn test_defaults_are_embedded() {
        let registry = IdentityRegistry::in_memory();
        registry.load_defaults();
        let global = registry.global_config();
        assert_eq!(global.get_option("general", "quitmessage"), Some("Leaving".to_string()));
        assert!(registry.version_identity().is_some());
    }

    #[test]
    fn test_in_memory_global_identity() {
        let registry = IdentityRegistry::in_memory();
        registry.load_all();
        let global = registry.global_identity().unwrap();
        assert_eq!(global.name(), "Global config");
        assert_eq!(global.target().kind(), TargetKind::Global);
        assert_eq!(registry.profiles().len(), 1);
    }

    #[test]
    fn test_scoped_identity_is_reused() {
        let registry = IdentityRegistry::in_memory();
        let a = registry.channel_identity("FreeNode", "#Rust");
        let b = registry.channel_identity("freenode", "#rust");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.target(), ConfigTarget::channel("#rust@freenode"));
    }

    #[test]
    fn test_scoped_identity_files_are_unique() {
        let dir = TempDir::new().unwrap();
        let registry = IdentityRegistry::new(IdentityPaths::under(dir.path()));
        let a = registry.network_identity("net");
        let b = registry.server_identity("net");
        assert_ne!(a.path(), b.path());
        assert!(a.path().unwrap().exists());
        assert!(b.path().unwrap().exists());
    }

    #[test]
    fn test_load_user_skips_broken_files() {
        let dir = TempDir::new().unwrap();
        let paths = IdentityPaths::under(dir.path());
        let identities = paths.identities_dir.clone().unwrap();
        std::fs::create_dir_all(&identities).unwrap();
        std::fs::write(identities.join("good.yaml"), "identity:\n  name: good\n  network: n\n")
            .unwrap();
        std::fs::write(identities.join("broken.yaml"), "identity: [").unwrap();
        std::fs::write(identities.join("nameless.yaml"), "identity:\n  network: n\n").unwrap();
        std::fs::write(identities.join("notes.txt"), "not an identity").unwrap();

        let registry = IdentityRegistry::new(paths);
        assert_eq!(registry.load_user(), 1);
        assert_eq!(registry.identities().len(), 1);
    }

    #[test]
    fn test_handle_file_changed_loads_and_removes() {
        let dir = TempDir::new().unwrap();
        let paths = IdentityPaths::under(dir.path());
        let identities = paths.identities_dir.clone().unwrap();
        std::fs::create_dir_all(&identities).unwrap();
        let registry = IdentityRegistry::new(paths);

        let path = identities.join("new.yaml");
        std::fs::write(&path, "identity:\n  name: new\n  network: n\nui:\n  a: 1\n").unwrap();
        assert_eq!(registry.handle_file_changed(&path), FileChange::Added);

        std::fs::write(&path, "identity:\n  name: new\n  network: n\nui:\n  a: 2\n").unwrap();
        assert_eq!(
            registry.handle_file_changed(&path),
            FileChange::Reloaded { changes: 1 }
        );

        std::fs::remove_file(&path).unwrap();
        assert_eq!(registry.handle_file_changed(&path), FileChange::Removed);
        assert!(registry.identities().is_empty());

        let outside = dir.path().join("elsewhere.yaml");
        std::fs::write(&outside, "identity:\n  name: x\n  network: n\n").unwrap();
        assert_eq!(registry.handle_file_changed(&outside), FileChange::Ignored);
    }
}
