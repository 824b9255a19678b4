//! Declarative bindings between configuration keys and object members.
//!
//! A [`BindingTable`] lists, for one type, which option feeds which member.
//! [`ConfigBinder::bind`] registers listeners on an [`AggregateConfig`] so
//! every bound member is refreshed whenever its option (or one of its
//! fallbacks) changes, until [`ConfigBinder::unbind`] is called.
//!
//! ```ignore
//! struct Window {
//!     colour: Mutex<String>,
//! }
//!
//! let mut table = BindingTable::new();
//! table
//!     .bind_field("backgroundcolour", |w: &Window| &w.colour)
//!     .domain("ui")
//!     .fallback("ui", "foregroundcolour");
//!
//! binder.bind(&window, &table)?;
//! ```

use crate::aggregate::AggregateConfig;
use crate::error::{ConfigError, Result};
use crate::provider::{ConfigChangeListener, ListenerId, lock};
use crate::retriever::{ConfigValue, FromConfigValue, ValueType, convert, retrieve};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

type Apply<T> = Arc<dyn Fn(&T, Option<ConfigValue>) -> bool + Send + Sync>;

/// One row of a [`BindingTable`].
pub struct Binding<T> {
    key: String,
    domain: Option<String>,
    fallbacks: Vec<(String, String)>,
    required: bool,
    apply_initially: bool,
    value_type: ValueType,
    apply: Apply<T>,
}

impl<T> Clone for Binding<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            domain: self.domain.clone(),
            fallbacks: self.fallbacks.clone(),
            required: self.required,
            apply_initially: self.apply_initially,
            value_type: self.value_type,
            apply: self.apply.clone(),
        }
    }
}

impl<T> Binding<T> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }
}

/// Refines the binding just added to a table.
pub struct BindingBuilder<'a, T> {
    binding: &'a mut Binding<T>,
}

impl<T> BindingBuilder<'_, T> {
    pub fn domain(self, domain: impl Into<String>) -> Self {
        self.binding.domain = Some(domain.into());
        self
    }

    /// Consulted, in the order added, when the primary option has no usable
    /// value.
    pub fn fallback(self, domain: impl Into<String>, key: impl Into<String>) -> Self {
        self.binding.fallbacks.push((domain.into(), key.into()));
        self
    }

    /// When true, a disabled (`false:`) value on the last fallback is skipped
    /// in favour of a less specific source. When false it leaves the member
    /// unset.
    pub fn required(self, required: bool) -> Self {
        self.binding.required = required;
        self
    }

    /// Whether [`ConfigBinder::bind`] sets the member straight away.
    pub fn apply_initially(self, apply: bool) -> Self {
        self.binding.apply_initially = apply;
        self
    }
}

/// The bindings declared for a type.
pub struct BindingTable<T> {
    bindings: Vec<Binding<T>>,
}

impl<T> Default for BindingTable<T> {
    fn default() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }
}

impl<T: Send + Sync + 'static> BindingTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `key` to a setter.
    pub fn bind<V, F>(&mut self, key: impl Into<String>, setter: F) -> BindingBuilder<'_, T>
    where
        V: FromConfigValue,
        F: Fn(&T, V) + Send + Sync + 'static,
    {
        let apply: Apply<T> = Arc::new(move |instance: &T, value: Option<ConfigValue>| {
            match convert::<V>(value) {
                Some(value) => {
                    setter(instance, value);
                    true
                }
                None => false,
            }
        });
        self.push(key.into(), V::VALUE_TYPE, apply)
    }

    /// Bind `key` straight into a `Mutex` field.
    pub fn bind_field<V, F>(&mut self, key: impl Into<String>, field: F) -> BindingBuilder<'_, T>
    where
        V: FromConfigValue,
        F: Fn(&T) -> &Mutex<V> + Send + Sync + 'static,
    {
        self.bind(key, move |instance: &T, value: V| {
            *lock(field(instance)) = value;
        })
    }

    fn push(&mut self, key: String, value_type: ValueType, apply: Apply<T>) -> BindingBuilder<'_, T> {
        let index = self.bindings.len();
        self.bindings.push(Binding {
            key,
            domain: None,
            fallbacks: Vec::new(),
            required: true,
            apply_initially: true,
            value_type,
            apply,
        });
        BindingBuilder {
            binding: &mut self.bindings[index],
        }
    }

    pub fn bindings(&self) -> &[Binding<T>] {
        &self.bindings
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Listener registered on the aggregate for one bound member.
struct BoundMember<T> {
    instance: Weak<T>,
    config: Weak<AggregateConfig>,
    domain: String,
    binding: Binding<T>,
}

impl<T: Send + Sync + 'static> BoundMember<T> {
    fn refresh(&self, instance: &T, config: &AggregateConfig) {
        let fallbacks: Vec<(&str, &str)> = self
            .binding
            .fallbacks
            .iter()
            .map(|(d, k)| (d.as_str(), k.as_str()))
            .collect();
        let value = retrieve(
            config,
            self.binding.value_type,
            &self.domain,
            &self.binding.key,
            self.binding.required,
            &fallbacks,
        );

        let missing = value.is_none();
        if !(self.binding.apply)(instance, value) {
            if missing {
                debug!(
                    domain = %self.domain,
                    key = %self.binding.key,
                    "No value for bound member, leaving unchanged"
                );
            } else {
                warn!(
                    domain = %self.domain,
                    key = %self.binding.key,
                    value_type = ?self.binding.value_type,
                    "Unable to convert value for bound member, leaving unchanged"
                );
            }
        }
    }
}

impl<T: Send + Sync + 'static> ConfigChangeListener for BoundMember<T> {
    fn config_changed(&self, _domain: &str, _key: &str) {
        let (Some(instance), Some(config)) = (self.instance.upgrade(), self.config.upgrade()) else {
            return;
        };
        self.refresh(&instance, &config);
    }

    fn is_alive(&self) -> bool {
        self.instance.strong_count() > 0
    }
}

/// Listener registrations for one bound instance. Holding the weak handle
/// keeps the allocation, and so the address used as its key, reserved.
struct BoundInstance {
    instance: Weak<dyn Any + Send + Sync>,
    listeners: Vec<ListenerId>,
}

impl BoundInstance {
    fn is_alive(&self) -> bool {
        self.instance.strong_count() > 0
    }
}

/// Registers and removes bindings against one aggregate.
///
/// Clones made with [`ConfigBinder::with_default_domain`] share the
/// aggregate and the record of bound instances.
#[derive(Clone)]
pub struct ConfigBinder {
    config: Arc<AggregateConfig>,
    default_domain: Option<String>,
    bound: Arc<Mutex<HashMap<usize, BoundInstance>>>,
}

impl ConfigBinder {
    pub fn new(config: Arc<AggregateConfig>) -> Self {
        Self {
            config,
            default_domain: None,
            bound: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A binder that uses `domain` for bindings that do not name one.
    pub fn with_default_domain(&self, domain: impl Into<String>) -> Self {
        Self {
            config: self.config.clone(),
            default_domain: Some(domain.into()),
            bound: self.bound.clone(),
        }
    }

    pub fn config(&self) -> &Arc<AggregateConfig> {
        &self.config
    }

    /// Bind every row of `table` to `instance`.
    ///
    /// Fails without registering anything if a row has no domain and the
    /// binder has no default.
    pub fn bind<T>(&self, instance: &Arc<T>, table: &BindingTable<T>) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        let resolved = table
            .bindings
            .iter()
            .map(|binding| {
                binding
                    .domain
                    .clone()
                    .or_else(|| self.default_domain.clone())
                    .map(|domain| (binding, domain))
                    .ok_or_else(|| {
                        ConfigError::configuration(format!(
                            "no domain specified for binding of key '{}'",
                            binding.key
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut ids = Vec::new();
        let mut initial = Vec::new();
        for (binding, domain) in resolved {
            let member = Arc::new(BoundMember {
                instance: Arc::downgrade(instance),
                config: Arc::downgrade(&self.config),
                domain: domain.clone(),
                binding: binding.clone(),
            });

            ids.push(self.config.add_change_listener(
                &domain,
                Some(binding.key.as_str()),
                member.clone(),
            ));
            for (fallback_domain, fallback_key) in &binding.fallbacks {
                ids.push(self.config.add_change_listener(
                    fallback_domain,
                    Some(fallback_key.as_str()),
                    member.clone(),
                ));
            }

            if binding.apply_initially {
                initial.push(member);
            }
        }

        debug!(listeners = ids.len(), "Bound instance");
        let stale = {
            let mut bound = lock(&self.bound);
            let stale = prune_dead(&mut bound);
            let weak: Weak<T> = Arc::downgrade(instance);
            let weak: Weak<dyn Any + Send + Sync> = weak;
            bound
                .entry(instance_key(instance))
                .or_insert_with(|| BoundInstance {
                    instance: weak,
                    listeners: Vec::new(),
                })
                .listeners
                .extend(ids);
            stale
        };
        for id in stale {
            self.config.remove_listener(id);
        }

        for member in initial {
            member.refresh(instance, &self.config);
        }
        Ok(())
    }

    /// Remove every listener registered for `instance`. Returns how many
    /// were removed; unbinding twice is harmless.
    pub fn unbind<T>(&self, instance: &Arc<T>) -> usize {
        let ids = lock(&self.bound)
            .remove(&instance_key(instance))
            .map(|bound| bound.listeners)
            .unwrap_or_default();
        ids.into_iter()
            .filter(|id| self.config.remove_listener(*id))
            .count()
    }

    pub fn is_bound<T>(&self, instance: &Arc<T>) -> bool {
        lock(&self.bound)
            .get(&instance_key(instance))
            .is_some_and(BoundInstance::is_alive)
    }
}

/// Forget instances that have been dropped, returning their listeners.
fn prune_dead(bound: &mut HashMap<usize, BoundInstance>) -> Vec<ListenerId> {
    let mut stale = Vec::new();
    bound.retain(|_, entry| {
        if entry.is_alive() {
            true
        } else {
            stale.append(&mut entry.listeners);
            false
        }
    });
    stale
}

fn instance_key<T>(instance: &Arc<T>) -> usize {
    Arc::as_ptr(instance) as *const () as usize
}
