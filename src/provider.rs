//! The read API shared by single identities and aggregate views, plus the
//! change-listener plumbing both of them use.

use crate::validator::{ENABLED_PREFIX, Validator, is_disabled};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

/// A `(domain, key)` pair consulted after the primary pair.
pub type Fallback<'a> = (&'a str, &'a str);

/// Receives `(domain, key)` after an option changed.
///
/// Called on the thread that made the change, after every internal lock has
/// been released.
pub trait ConfigChangeListener: Send + Sync {
    fn config_changed(&self, domain: &str, key: &str);

    /// Listeners that report false are dropped by the aggregate holding them
    /// the next time it delivers a change.
    fn is_alive(&self) -> bool {
        true
    }
}

impl<F> ConfigChangeListener for F
where
    F: Fn(&str, &str) + Send + Sync,
{
    fn config_changed(&self, domain: &str, key: &str) {
        self(domain, key)
    }
}

/// Handle returned when registering a listener, used to remove it again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ListenerId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// Weakly held listeners.
///
/// A listener whose owner has been dropped is skipped on delivery and pruned
/// the next time the list is touched.
#[derive(Default)]
pub struct ListenerList {
    entries: Mutex<Vec<(ListenerId, Weak<dyn ConfigChangeListener>)>>,
}

impl ListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, listener: Weak<dyn ConfigChangeListener>) -> ListenerId {
        let id = ListenerId::next();
        let mut entries = lock(&self.entries);
        entries.retain(|(_, l)| l.strong_count() > 0);
        entries.push((id, listener));
        id
    }

    /// Returns `false` if the id is unknown or its listener is already gone.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut entries = lock(&self.entries);
        let alive = entries
            .iter()
            .any(|(entry, l)| *entry == id && l.strong_count() > 0);
        entries.retain(|(entry, l)| *entry != id && l.strong_count() > 0);
        alive
    }

    /// Live listeners, in registration order.
    pub fn snapshot(&self) -> Vec<Arc<dyn ConfigChangeListener>> {
        let mut entries = lock(&self.entries);
        entries.retain(|(_, l)| l.strong_count() > 0);
        entries.iter().filter_map(|(_, l)| l.upgrade()).collect()
    }

    /// Deliver a change to every live listener. Must not be called with an
    /// owner lock held.
    pub fn fire(&self, domain: &str, key: &str) {
        for listener in self.snapshot() {
            listener.config_changed(domain, key);
        }
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only access to `domain -> key -> value` settings.
///
/// Implementors only supply raw lookups; the prefix handling, fallback
/// chains and typed conversions are shared.
pub trait ReadOnlyConfigProvider: Send + Sync {
    /// The raw stored value, if present and accepted by `validator`.
    fn option(&self, domain: &str, key: &str, validator: &Validator) -> Option<String>;

    fn has_option(&self, domain: &str, key: &str, validator: &Validator) -> bool {
        self.option(domain, key, validator).is_some()
    }

    /// Every key of `domain` with its effective value.
    fn options(&self, domain: &str) -> HashMap<String, String>;

    fn domains(&self) -> BTreeSet<String>;

    /// The raw value with no validation or prefix handling.
    fn get_option(&self, domain: &str, key: &str) -> Option<String> {
        self.option(domain, key, &Validator::Permissive)
    }

    /// Resolve `(domain, key)`, then each fallback pair in turn.
    ///
    /// A pair whose effective value is `false:` moves resolution on to the
    /// next fallback. On the last pair, `required` additionally skips
    /// disabled values in more specific sources so a less specific enabled
    /// value can win; without it a disabled last pair gives `None`.
    /// A leading `true:` is stripped from the result.
    fn option_string(
        &self,
        domain: &str,
        key: &str,
        required: bool,
        validator: &Validator,
        fallbacks: &[Fallback<'_>],
    ) -> Option<String> {
        let last_validator = if required {
            validator.clone().not_disabled()
        } else {
            validator.clone()
        };

        let steps = fallbacks.len() + 1;
        for (index, (d, k)) in std::iter::once((domain, key))
            .chain(fallbacks.iter().copied())
            .enumerate()
        {
            let step_validator = if index + 1 == steps {
                &last_validator
            } else {
                validator
            };
            match self.option(d, k, step_validator) {
                None => continue,
                Some(value) if is_disabled(&value) => continue,
                Some(value) => {
                    return Some(match value.strip_prefix(ENABLED_PREFIX) {
                        Some(rest) => rest.to_string(),
                        None => value,
                    });
                }
            }
        }
        None
    }

    fn get_option_string(
        &self,
        domain: &str,
        key: &str,
        fallbacks: &[Fallback<'_>],
    ) -> Option<String> {
        self.option_string(domain, key, true, &Validator::Permissive, fallbacks)
    }

    fn get_option_bool(&self, domain: &str, key: &str, fallbacks: &[Fallback<'_>]) -> Option<bool> {
        self.get_option_string(domain, key, fallbacks)
            .map(|v| parse_bool(&v))
    }

    fn get_option_char(&self, domain: &str, key: &str, fallbacks: &[Fallback<'_>]) -> Option<char> {
        self.option_string(domain, key, true, &Validator::NonEmpty, fallbacks)
            .and_then(|v| first_char(&v))
    }

    fn get_option_int(&self, domain: &str, key: &str, fallbacks: &[Fallback<'_>]) -> Option<i64> {
        self.option_string(domain, key, true, &Validator::int(), fallbacks)
            .and_then(|v| parse_int(&v))
    }

    /// Newline separated list; absent options give an empty list.
    fn get_option_list(&self, domain: &str, key: &str, trim_empty: bool) -> Vec<String> {
        self.get_option_string(domain, key, &[])
            .map(|v| split_list(&v, trim_empty))
            .unwrap_or_default()
    }

    /// Present, non-empty and not disabled.
    fn has_option_string(&self, domain: &str, key: &str) -> bool {
        self.has_option(
            domain,
            key,
            &Validator::All(vec![Validator::NotDisabled, Validator::NonEmpty]),
        )
    }

    fn has_option_int(&self, domain: &str, key: &str) -> bool {
        self.has_option(
            domain,
            key,
            &Validator::All(vec![
                Validator::NotDisabled,
                Validator::NonEmpty,
                Validator::int(),
            ]),
        )
    }

    fn has_option_bool(&self, domain: &str, key: &str) -> bool {
        self.has_option(domain, key, &Validator::Permissive)
    }

    fn has_option_char(&self, domain: &str, key: &str) -> bool {
        self.has_option_string(domain, key)
    }
}

pub(crate) fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

pub(crate) fn first_char(value: &str) -> Option<char> {
    value.chars().next()
}

pub(crate) fn parse_int(value: &str) -> Option<i64> {
    value.trim().parse().ok()
}

pub(crate) fn split_list(value: &str, trim_empty: bool) -> Vec<String> {
    value
        .split('\n')
        .filter(|item| !trim_empty || !item.is_empty())
        .map(str::to_string)
        .collect()
}
