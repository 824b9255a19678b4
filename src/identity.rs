//! File-backed identities.
//!
//! An [`Identity`] is one configuration source: a set of domains loaded from
//! a YAML file (or embedded text), a [`ConfigTarget`] saying what it applies
//! to, and a dirty flag tracking unsaved changes. Mutations take the
//! identity's own lock; listeners are always notified after it is released.

use crate::aggregate::resolve;
use crate::error::{ConfigError, Result};
use crate::provider::{
    ConfigChangeListener, ListenerId, ListenerList, ReadOnlyConfigProvider, lock, read, write,
};
use crate::registry::IdentityRegistry;
use crate::store::{IdentityFile, TEMP_DOMAIN};
use crate::target::{ConfigTarget, TargetKind};
use crate::validator::Validator;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use tracing::{debug, error, info, warn};

pub const IDENTITY_DOMAIN: &str = "identity";
pub const PROFILE_DOMAIN: &str = "profile";

const UNNAMED: &str = "Unnamed";

struct IdentityState {
    file: IdentityFile,
    dirty: bool,
}

/// A named, scoped configuration source.
pub struct Identity {
    target: RwLock<ConfigTarget>,
    path: Option<PathBuf>,
    state: Mutex<IdentityState>,
    listeners: ListenerList,
    registry: RwLock<Weak<IdentityRegistry>>,
    sequence: AtomicU64,
}

impl Identity {
    /// Load the identity stored at `path`.
    ///
    /// With `force_default`, a file without a name or an explicit target is
    /// treated as the global configuration.
    pub fn load(path: &Path, force_default: bool) -> Result<Self> {
        let file = IdentityFile::read(path)?;
        Self::from_file(file, Some(path.to_path_buf()), force_default)
    }

    /// Build a read-only identity from YAML text.
    pub fn from_yaml(text: &str, force_default: bool) -> Result<Self> {
        Self::from_file(IdentityFile::parse(text, None)?, None, force_default)
    }

    /// Build a read-only identity from a reader.
    pub fn from_reader(mut reader: impl Read, force_default: bool) -> Result<Self> {
        let mut text = String::new();
        reader.read_to_string(&mut text)?;
        Self::from_yaml(&text, force_default)
    }

    /// Wrap already parsed contents with an explicit target.
    pub fn new(file: IdentityFile, target: ConfigTarget, path: Option<PathBuf>) -> Self {
        Self {
            target: RwLock::new(target),
            path,
            state: Mutex::new(IdentityState { file, dirty: false }),
            listeners: ListenerList::new(),
            registry: RwLock::new(Weak::new()),
            sequence: AtomicU64::new(0),
        }
    }

    /// A fresh identity for `target`, with its name and target written into
    /// the `identity` domain. It starts dirty so the first save creates the
    /// file.
    pub fn create(name: &str, target: ConfigTarget, path: Option<PathBuf>) -> Self {
        let mut file = IdentityFile::new();
        file.insert(IDENTITY_DOMAIN, "name", name);
        match target.kind() {
            TargetKind::Custom => {
                file.insert(IDENTITY_DOMAIN, "type", target.data());
            }
            kind if kind.is_dataless() => {
                file.insert(IDENTITY_DOMAIN, kind.name(), "true");
            }
            kind => {
                file.insert(IDENTITY_DOMAIN, kind.name(), target.data());
            }
        }
        if target.order() != crate::target::DEFAULT_ORDER {
            file.insert(IDENTITY_DOMAIN, "order", target.order().to_string());
        }

        let identity = Self::new(file, target, path);
        lock(&identity.state).dirty = true;
        identity
    }

    fn from_file(mut file: IdentityFile, path: Option<PathBuf>, force_default: bool) -> Result<Self> {
        if !force_default && !has_value(&file, IDENTITY_DOMAIN, "name") {
            return Err(ConfigError::invalid_identity("no name specified"));
        }

        let migrated = migrate_profile(&mut file);
        let target = target_from_file(&file, force_default)?;
        let identity = Self::new(file, target, path);
        if migrated {
            lock(&identity.state).dirty = true;
        }
        Ok(identity)
    }

    pub fn name(&self) -> String {
        lock(&self.state)
            .file
            .get(IDENTITY_DOMAIN, "name")
            .unwrap_or(UNNAMED)
            .to_string()
    }

    pub fn target(&self) -> ConfigTarget {
        read(&self.target).clone()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Whether this identity is backed by `path`.
    pub fn is_file(&self, path: &Path) -> bool {
        self.path.as_deref() == Some(path)
    }

    pub fn is_dirty(&self) -> bool {
        lock(&self.state).dirty
    }

    /// A profile is an identity describing who the user is on IRC.
    pub fn is_profile(&self) -> bool {
        let state = lock(&self.state);
        is_profile_file(&state.file)
    }

    /// Change the order, persisting it as `identity.order`.
    pub fn set_order(&self, order: i32) {
        write(&self.target).set_order(order);
        self.set_option(IDENTITY_DOMAIN, "order", &order.to_string());
        if let Some(registry) = self.registry() {
            registry.identity_reordered();
        }
    }

    /// Every `(domain, key)` currently stored.
    pub fn keys(&self) -> Vec<(String, String)> {
        let state = lock(&self.state);
        state
            .file
            .domains()
            .iter()
            .flat_map(|(domain, keys)| keys.keys().map(move |k| (domain.clone(), k.clone())))
            .collect()
    }

    pub fn set_option(&self, domain: &str, key: &str, value: &str) {
        let inherited = if self.target().kind() == TargetKind::Global {
            self.inherited_value(domain, key, false)
        } else {
            None
        };

        let changed = {
            let mut state = lock(&self.state);
            let old = state.file.get(domain, key).map(str::to_string);

            if inherited.as_deref() == Some(value) {
                debug!(domain, key, value, "Value matches inherited default, dropping override");
                if old.is_some() {
                    state.file.remove(domain, key);
                    state.dirty = true;
                    true
                } else {
                    false
                }
            } else if old.as_deref() != Some(value) {
                debug!(domain, key, value, "Setting option");
                state.file.insert(domain, key, value);
                state.dirty = true;
                true
            } else {
                false
            }
        };

        if changed {
            self.listeners.fire(domain, key);
        }
    }

    pub fn set_option_int(&self, domain: &str, key: &str, value: i64) {
        self.set_option(domain, key, &value.to_string());
    }

    pub fn set_option_bool(&self, domain: &str, key: &str, value: bool) {
        self.set_option(domain, key, &value.to_string());
    }

    pub fn set_option_list(&self, domain: &str, key: &str, values: &[impl AsRef<str>]) {
        let joined = values
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n");
        self.set_option(domain, key, &joined);
    }

    pub fn unset_option(&self, domain: &str, key: &str) {
        let removed = {
            let mut state = lock(&self.state);
            let removed = state.file.remove(domain, key).is_some();
            if removed {
                debug!(domain, key, "Unsetting option");
                state.dirty = true;
            }
            removed
        };

        if removed {
            self.listeners.fire(domain, key);
        }
    }

    /// Write pending changes. Returns whether a write happened.
    pub fn save(&self) -> bool {
        let Some(path) = self.path.as_deref() else {
            return false;
        };
        if !self.is_dirty() {
            return false;
        }

        if self.target().kind() == TargetKind::Global {
            self.strip_inherited();
        }

        let mut state = lock(&self.state);
        if !state.dirty {
            return false;
        }
        info!(identity = %self.describe(&state.file), path = %path.display(), "Saving identity");
        state.file.clear_domain(TEMP_DOMAIN);

        match state.file.write(path) {
            Ok(()) => {
                state.dirty = false;
                true
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "Unable to save identity");
                false
            }
        }
    }

    /// Re-read the backing file and notify listeners of every difference.
    ///
    /// Returns the `(domain, key)` pairs that changed. Identities with
    /// unsaved changes are left alone.
    pub fn reload(&self) -> Vec<(String, String)> {
        let Some(path) = self.path.as_deref() else {
            return Vec::new();
        };
        if self.is_dirty() {
            debug!(path = %path.display(), "Identity has unsaved changes, not reloading");
            return Vec::new();
        }

        let fresh = match IdentityFile::read(path) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Unable to reload identity");
                return Vec::new();
            }
        };

        let changes = {
            let mut state = lock(&self.state);
            if state.dirty {
                return Vec::new();
            }
            let changes = diff(&state.file, &fresh);
            state.file = fresh;
            changes
        };

        if !changes.is_empty() {
            info!(path = %path.display(), changes = changes.len(), "Reloaded identity");
        }
        for (domain, key) in &changes {
            self.listeners.fire(domain, key);
        }
        changes
    }

    /// Delete the backing file and detach from the registry.
    pub fn delete(&self) -> Result<()> {
        if let Some(path) = &self.path
            && path.exists()
        {
            std::fs::remove_file(path)?;
        }
        if let Some(registry) = self.registry() {
            registry.remove_identity(self);
        }
        Ok(())
    }

    pub fn add_listener(&self, listener: Weak<dyn ConfigChangeListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub(crate) fn attach(&self, registry: Weak<IdentityRegistry>, sequence: u64) {
        *write(&self.registry) = registry;
        self.sequence.store(sequence, Ordering::SeqCst);
    }

    pub(crate) fn detach(&self) {
        *write(&self.registry) = Weak::new();
    }

    /// Registration order within the registry; later identities win ties.
    pub(crate) fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    fn registry(&self) -> Option<Arc<IdentityRegistry>> {
        read(&self.registry).upgrade()
    }

    /// The value the global cascade would give without this identity.
    fn inherited_value(&self, domain: &str, key: &str, exclude_version: bool) -> Option<String> {
        let registry = self.registry()?;
        let sources = registry.global_cascade_excluding(&[self], exclude_version);
        inherited_in(&sources, domain, key)
    }

    /// Drop every stored value that the rest of the global cascade already
    /// provides.
    fn strip_inherited(&self) {
        let Some(registry) = self.registry() else {
            return;
        };
        let sources = registry.global_cascade_excluding(&[self], true);
        let snapshot = lock(&self.state).file.clone();

        let mut inherited = Vec::new();
        for (domain, keys) in snapshot.domains() {
            for (key, value) in keys {
                if inherited_in(&sources, domain, key).as_ref() == Some(value) {
                    inherited.push((domain.as_str(), key.as_str()));
                }
            }
        }

        if inherited.is_empty() {
            return;
        }

        let mut state = lock(&self.state);
        for (domain, key) in inherited {
            if state.file.get(domain, key) == snapshot.get(domain, key) {
                debug!(domain, key, "Removing superfluous setting");
                state.file.remove(domain, key);
            }
        }
    }

    fn describe(&self, file: &IdentityFile) -> String {
        file.get(IDENTITY_DOMAIN, "name").unwrap_or(UNNAMED).to_string()
    }
}

/// The value `sources` give for `(domain, key)`, provided they hold a
/// usable string there (non-empty and not disabled).
fn inherited_in(sources: &[Arc<Identity>], domain: &str, key: &str) -> Option<String> {
    let usable = Validator::All(vec![Validator::NotDisabled, Validator::NonEmpty]);
    resolve(sources, domain, key, &usable)?;
    resolve(sources, domain, key, &Validator::Permissive)
}

impl ReadOnlyConfigProvider for Identity {
    fn option(&self, domain: &str, key: &str, validator: &Validator) -> Option<String> {
        let state = lock(&self.state);
        state
            .file
            .get(domain, key)
            .filter(|v| validator.accepts(v))
            .map(str::to_string)
    }

    fn options(&self, domain: &str) -> HashMap<String, String> {
        let state = lock(&self.state);
        state
            .file
            .domain(domain)
            .map(|keys| keys.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn domains(&self) -> BTreeSet<String> {
        lock(&self.state).file.domains().keys().cloned().collect()
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("name", &self.name())
            .field("target", &self.target())
            .field("path", &self.path)
            .finish()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

fn has_value(file: &IdentityFile, domain: &str, key: &str) -> bool {
    Validator::All(vec![Validator::NotDisabled, Validator::NonEmpty])
        .accepts(file.get(domain, key).unwrap_or(""))
}

fn is_profile_file(file: &IdentityFile) -> bool {
    (has_value(file, PROFILE_DOMAIN, "nicknames") || has_value(file, PROFILE_DOMAIN, "nickname"))
        && has_value(file, PROFILE_DOMAIN, "realname")
}

fn target_from_file(file: &IdentityFile, force_default: bool) -> Result<ConfigTarget> {
    let value = |key: &str| {
        has_value(file, IDENTITY_DOMAIN, key)
            .then(|| file.get(IDENTITY_DOMAIN, key).unwrap_or_default().to_string())
    };

    let mut target = if let Some(ircd) = value("ircd") {
        ConfigTarget::ircd(ircd)
    } else if let Some(protocol) = value("protocol") {
        ConfigTarget::protocol(protocol)
    } else if let Some(network) = value("network") {
        ConfigTarget::network(network)
    } else if let Some(server) = value("server") {
        ConfigTarget::server(server)
    } else if let Some(channel) = value("channel") {
        ConfigTarget::channel(channel)
    } else if value("globaldefault").is_some() {
        ConfigTarget::global_default()
    } else if value("theme").is_some() {
        ConfigTarget::theme()
    } else if value("global").is_some() || (force_default && !is_profile_file(file)) {
        ConfigTarget::global()
    } else if is_profile_file(file) {
        ConfigTarget::custom("profile")
    } else if let Some(subtype) = value("type") {
        ConfigTarget::custom(subtype)
    } else {
        return Err(ConfigError::invalid_identity("no target and no profile"));
    };

    if let Some(order) = value("order") {
        match order.trim().parse() {
            Ok(order) => target.set_order(order),
            Err(_) => warn!(order = %order, "Ignoring non-numeric identity order"),
        }
    }

    Ok(target)
}

/// Fold the legacy `nickname` and `altnicks` keys into `nicknames`.
fn migrate_profile(file: &mut IdentityFile) -> bool {
    let Some(nickname) = file.get(PROFILE_DOMAIN, "nickname").map(str::to_string) else {
        return false;
    };

    let mut nicknames = vec![nickname];
    if let Some(altnicks) = file.get(PROFILE_DOMAIN, "altnicks") {
        nicknames.extend(altnicks.split('\n').filter(|n| !n.is_empty()).map(str::to_string));
    }

    file.insert(PROFILE_DOMAIN, "nicknames", nicknames.join("\n"));
    file.remove(PROFILE_DOMAIN, "nickname");
    file.remove(PROFILE_DOMAIN, "altnicks");
    true
}

/// Every `(domain, key)` added, changed or removed between two files.
fn diff(old: &IdentityFile, new: &IdentityFile) -> Vec<(String, String)> {
    let mut changes = BTreeSet::new();

    for (domain, keys) in new.domains() {
        for (key, value) in keys {
            if old.get(domain, key) != Some(value.as_str()) {
                changes.insert((domain.clone(), key.clone()));
            }
        }
    }
    for (domain, keys) in old.domains() {
        for key in keys.keys() {
            if !new.contains(domain, key) {
                changes.insert((domain.clone(), key.clone()));
            }
        }
    }

    changes.into_iter().collect()
}
