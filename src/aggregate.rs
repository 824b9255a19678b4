//! Context-scoped views over the registry.
//!
//! An [`AggregateConfig`] answers lookups for one [`ConfigContext`] by
//! walking the applicable identities from most to least specific. The sorted
//! identity list lives in an [`ArcSwap`] so readers never block; writers
//! (migration, identities coming and going) serialise on the context lock and
//! publish a new snapshot.

use crate::identity::Identity;
use crate::provider::{
    ConfigChangeListener, ListenerId, ReadOnlyConfigProvider, lock,
};
use crate::registry::IdentityRegistry;
use crate::target::{ConfigTarget, TargetKind};
use crate::validator::Validator;
use arc_swap::ArcSwap;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};
use tracing::debug;

/// Where an aggregate is looking from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigContext {
    pub protocol: String,
    pub ircd: String,
    pub network: String,
    pub server: String,
    pub channel: Option<String>,
}

impl ConfigContext {
    /// Only global identities apply.
    pub fn global() -> Self {
        Self::default()
    }

    pub fn new(
        protocol: impl Into<String>,
        ircd: impl Into<String>,
        network: impl Into<String>,
        server: impl Into<String>,
    ) -> Self {
        Self {
            protocol: protocol.into(),
            ircd: ircd.into(),
            network: network.into(),
            server: server.into(),
            channel: None,
        }
    }

    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Whether identities targeting `target` take part in this context.
    pub fn applies_to(&self, target: &ConfigTarget) -> bool {
        let data = target.data();
        match target.kind() {
            TargetKind::Global | TargetKind::GlobalDefault | TargetKind::Theme => true,
            TargetKind::Protocol => data.eq_ignore_ascii_case(&self.protocol),
            TargetKind::Ircd => data.eq_ignore_ascii_case(&self.ircd),
            TargetKind::Network => data.eq_ignore_ascii_case(&self.network),
            TargetKind::Server => data.eq_ignore_ascii_case(&self.server),
            TargetKind::Channel => self
                .channel
                .as_ref()
                .is_some_and(|c| data.eq_ignore_ascii_case(&format!("{}@{}", c, self.network))),
            TargetKind::Custom => false,
        }
    }
}

/// First value for `(domain, key)` in `sources` accepted by `validator`.
pub(crate) fn resolve(
    sources: &[Arc<Identity>],
    domain: &str,
    key: &str,
    validator: &Validator,
) -> Option<String> {
    sources
        .iter()
        .find_map(|source| source.option(domain, key, validator))
}

/// The identity that supplies `(domain, key)` in `sources`.
fn scope_in(sources: &[Arc<Identity>], domain: &str, key: &str) -> Option<Arc<Identity>> {
    sources
        .iter()
        .find(|source| source.has_option(domain, key, &Validator::Permissive))
        .cloned()
}

/// Sort by precedence; among equals the later registered identity wins.
pub(crate) fn sort_sources(sources: &mut [Arc<Identity>]) {
    sources.sort_by(|a, b| {
        a.target()
            .precedence_cmp(&b.target())
            .then_with(|| b.sequence().cmp(&a.sequence()))
    });
}

/// Keys whose effective scope in `sources` is one of `subset`.
fn keys_scoped_by(sources: &[Arc<Identity>], subset: &[Arc<Identity>]) -> Vec<(String, String)> {
    subset
        .iter()
        .flat_map(|identity| {
            identity.keys().into_iter().filter(move |(domain, key)| {
                scope_in(sources, domain, key).is_some_and(|scope| Arc::ptr_eq(&scope, identity))
            })
        })
        .collect()
}

fn contains(sources: &[Arc<Identity>], identity: &Identity) -> bool {
    sources.iter().any(|s| std::ptr::eq(Arc::as_ptr(s), identity))
}

type KeyedListeners = HashMap<String, Vec<(ListenerId, Arc<dyn ConfigChangeListener>)>>;

/// A merged, precedence-ordered view of every identity applicable to a
/// context.
pub struct AggregateConfig {
    context: Mutex<ConfigContext>,
    sources: ArcSwap<Vec<Arc<Identity>>>,
    /// Our listener registration on each source, keyed by identity address.
    subscriptions: Mutex<HashMap<usize, (Weak<Identity>, ListenerId)>>,
    listeners: Mutex<KeyedListeners>,
    registry: Weak<IdentityRegistry>,
    this: Weak<AggregateConfig>,
}

impl AggregateConfig {
    pub(crate) fn new(
        registry: Weak<IdentityRegistry>,
        context: ConfigContext,
        candidates: &[Arc<Identity>],
    ) -> Arc<Self> {
        let mut sources: Vec<Arc<Identity>> = candidates
            .iter()
            .filter(|identity| context.applies_to(&identity.target()))
            .cloned()
            .collect();
        sort_sources(&mut sources);

        let aggregate = Arc::new_cyclic(|this| Self {
            context: Mutex::new(context),
            sources: ArcSwap::from_pointee(Vec::new()),
            subscriptions: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            registry,
            this: this.clone(),
        });

        for identity in &sources {
            aggregate.subscribe(identity);
        }
        aggregate.sources.store(Arc::new(sources));
        aggregate
    }

    pub fn context(&self) -> ConfigContext {
        lock(&self.context).clone()
    }

    /// The applicable identities, most specific first.
    pub fn sources(&self) -> Vec<Arc<Identity>> {
        self.sources.load_full().as_ref().clone()
    }

    /// The identity the effective value of `(domain, key)` comes from.
    pub fn scope_of(&self, domain: &str, key: &str) -> Option<Arc<Identity>> {
        scope_in(&self.sources.load(), domain, key)
    }

    /// Switch to a new context and notify listeners of every key whose
    /// effective scope changed.
    pub fn migrate(
        &self,
        protocol: &str,
        ircd: &str,
        network: &str,
        server: &str,
        channel: Option<&str>,
    ) {
        let mut context = ConfigContext::new(protocol, ircd, network, server);
        context.channel = channel.map(str::to_string);

        let changed = {
            let mut current_context = lock(&self.context);
            *current_context = context.clone();

            let current = self.sources.load_full();
            let candidates = match self.registry.upgrade() {
                Some(registry) => registry.identities(),
                None => current.as_ref().clone(),
            };

            let mut next: Vec<Arc<Identity>> = candidates
                .into_iter()
                .filter(|identity| context.applies_to(&identity.target()))
                .collect();
            sort_sources(&mut next);

            let removed: Vec<Arc<Identity>> = current
                .iter()
                .filter(|identity| !contains(&next, identity))
                .cloned()
                .collect();
            let added: Vec<Arc<Identity>> = next
                .iter()
                .filter(|identity| !contains(&current, identity))
                .cloned()
                .collect();

            let mut changed: BTreeSet<(String, String)> =
                keys_scoped_by(&current, &removed).into_iter().collect();
            changed.extend(keys_scoped_by(&next, &added));

            for identity in &removed {
                self.unsubscribe(identity);
            }
            for identity in &added {
                self.subscribe(identity);
            }
            debug!(
                network,
                server,
                added = added.len(),
                removed = removed.len(),
                "Migrated aggregate config"
            );
            self.sources.store(Arc::new(next));
            changed
        };

        self.fire_all(changed);
    }

    /// Consider a newly registered identity.
    pub(crate) fn add_identity(&self, identity: &Arc<Identity>) {
        let changed = {
            let context = lock(&self.context);
            let current = self.sources.load_full();
            if !context.applies_to(&identity.target()) || contains(&current, identity) {
                return;
            }

            let mut next = current.as_ref().clone();
            next.push(identity.clone());
            sort_sources(&mut next);
            self.subscribe(identity);
            let changed = keys_scoped_by(&next, std::slice::from_ref(identity));
            self.sources.store(Arc::new(next));
            changed
        };

        self.fire_all(changed);
    }

    /// Drop an identity that left the registry.
    pub(crate) fn remove_identity(&self, identity: &Identity) {
        let changed = {
            let _context = lock(&self.context);
            let current = self.sources.load_full();
            let Some(removed) = current
                .iter()
                .find(|s| std::ptr::eq(Arc::as_ptr(s), identity))
                .cloned()
            else {
                return;
            };

            let changed = keys_scoped_by(&current, std::slice::from_ref(&removed));
            let next: Vec<Arc<Identity>> = current
                .iter()
                .filter(|s| !Arc::ptr_eq(s, &removed))
                .cloned()
                .collect();
            self.unsubscribe(&removed);
            self.sources.store(Arc::new(next));
            changed
        };

        self.fire_all(changed);
    }

    /// Re-sort after an identity's order changed.
    pub(crate) fn resort(&self) {
        let _context = lock(&self.context);
        let mut next = self.sources.load_full().as_ref().clone();
        sort_sources(&mut next);
        self.sources.store(Arc::new(next));
    }

    /// Listen for changes to every key of `domain`, or to one key.
    pub fn add_change_listener(
        &self,
        domain: &str,
        key: Option<&str>,
        listener: Arc<dyn ConfigChangeListener>,
    ) -> ListenerId {
        let id = ListenerId::next();
        let topic = match key {
            Some(key) => format!("{}.{}", domain, key),
            None => domain.to_string(),
        };
        lock(&self.listeners)
            .entry(topic)
            .or_default()
            .push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let mut found = false;
        listeners.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|(entry, _)| *entry != id);
            found |= entries.len() != before;
            !entries.is_empty()
        });
        found
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).values().map(Vec::len).sum()
    }

    fn subscribe(&self, identity: &Arc<Identity>) {
        let listener: Weak<dyn ConfigChangeListener> = self.this.clone();
        let id = identity.add_listener(listener);
        lock(&self.subscriptions).insert(
            Arc::as_ptr(identity) as usize,
            (Arc::downgrade(identity), id),
        );
    }

    fn unsubscribe(&self, identity: &Arc<Identity>) {
        if let Some((_, id)) = lock(&self.subscriptions).remove(&(Arc::as_ptr(identity) as usize)) {
            identity.remove_listener(id);
        }
    }

    fn fire_all(&self, changed: impl IntoIterator<Item = (String, String)>) {
        for (domain, key) in changed {
            self.config_changed(&domain, &key);
        }
    }
}

impl ConfigChangeListener for AggregateConfig {
    fn config_changed(&self, domain: &str, key: &str) {
        let targets: Vec<Arc<dyn ConfigChangeListener>> = {
            let mut listeners = lock(&self.listeners);
            listeners.retain(|_, entries| {
                entries.retain(|(_, listener)| listener.is_alive());
                !entries.is_empty()
            });
            [domain.to_string(), format!("{}.{}", domain, key)]
                .iter()
                .filter_map(|topic| listeners.get(topic))
                .flatten()
                .map(|(_, listener)| listener.clone())
                .collect()
        };

        for target in targets {
            target.config_changed(domain, key);
        }
    }
}

impl ReadOnlyConfigProvider for AggregateConfig {
    fn option(&self, domain: &str, key: &str, validator: &Validator) -> Option<String> {
        resolve(&self.sources.load(), domain, key, validator)
    }

    fn options(&self, domain: &str) -> HashMap<String, String> {
        let sources = self.sources.load();
        let mut merged = HashMap::new();
        for source in sources.iter().rev() {
            merged.extend(source.options(domain));
        }
        merged
    }

    fn domains(&self) -> BTreeSet<String> {
        self.sources
            .load()
            .iter()
            .flat_map(|source| source.domains())
            .collect()
    }
}

impl Drop for AggregateConfig {
    fn drop(&mut self) {
        let subscriptions = std::mem::take(
            self.subscriptions
                .get_mut()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for (identity, id) in subscriptions.into_values() {
            if let Some(identity) = identity.upgrade() {
                identity.remove_listener(id);
            }
        }
    }
}
