//! Integration tests for context-scoped lookups.
//!
//! Covers precedence between scopes, ordering within a scope, fallback
//! chains and change notification as identities come and go.

use identity_cascade::{
    ConfigChangeListener, ConfigContext, ConfigTarget, Identity, IdentityRegistry,
    ReadOnlyConfigProvider, Validator,
};
use std::sync::{Arc, Mutex};

fn identity(name: &str, target: ConfigTarget, entries: &[(&str, &str, &str)]) -> Arc<Identity> {
    let identity = Identity::create(name, target, None);
    for (domain, key, value) in entries {
        identity.set_option(domain, key, value);
    }
    Arc::new(identity)
}

fn freenode_context() -> ConfigContext {
    ConfigContext::new("irc", "hyperion", "freenode", "irc.freenode.net").with_channel("#rust")
}

/// Records every notification an aggregate delivers.
fn recorder() -> (Arc<dyn ConfigChangeListener>, Arc<Mutex<Vec<(String, String)>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let listener: Arc<dyn ConfigChangeListener> = Arc::new(move |domain: &str, key: &str| {
        sink.lock().unwrap().push((domain.to_string(), key.to_string()));
    });
    (listener, seen)
}

#[test]
fn test_most_specific_scope_wins() {
    let registry = IdentityRegistry::in_memory();
    registry.load_defaults();
    registry.add_identity(identity(
        "Global",
        ConfigTarget::global(),
        &[("ui", "backgroundcolour", "5")],
    ));
    registry.add_identity(identity(
        "freenode",
        ConfigTarget::network("freenode"),
        &[("ui", "backgroundcolour", "7")],
    ));
    registry.add_identity(identity(
        "#rust",
        ConfigTarget::channel("#rust@freenode"),
        &[("ui", "backgroundcolour", "9")],
    ));

    let channel = registry.aggregate(freenode_context());
    assert_eq!(channel.get_option("ui", "backgroundcolour").as_deref(), Some("9"));
    assert_eq!(
        channel.scope_of("ui", "backgroundcolour").map(|i| i.name()),
        Some("#rust".to_string())
    );
    // Not overridden anywhere but the defaults.
    assert_eq!(channel.get_option("ui", "foregroundcolour").as_deref(), Some("1"));

    let network = registry.aggregate(ConfigContext::new(
        "irc",
        "hyperion",
        "freenode",
        "irc.freenode.net",
    ));
    assert_eq!(network.get_option("ui", "backgroundcolour").as_deref(), Some("7"));

    let elsewhere = registry.aggregate(ConfigContext::new("irc", "unreal", "quakenet", "x"));
    assert_eq!(elsewhere.get_option("ui", "backgroundcolour").as_deref(), Some("5"));
}

#[test]
fn test_lower_order_wins_within_a_scope() {
    let registry = IdentityRegistry::in_memory();
    registry.add_identity(identity(
        "low",
        ConfigTarget::network("freenode").with_order(100),
        &[("general", "quitmessage", "low")],
    ));
    registry.add_identity(identity(
        "high",
        ConfigTarget::network("freenode").with_order(200),
        &[("general", "quitmessage", "high")],
    ));

    let config = registry.aggregate(freenode_context());
    assert_eq!(config.get_option("general", "quitmessage").as_deref(), Some("low"));
}

#[test]
fn test_later_identity_wins_a_tie() {
    let registry = IdentityRegistry::in_memory();
    registry.add_identity(identity(
        "first",
        ConfigTarget::network("freenode"),
        &[("general", "quitmessage", "first")],
    ));
    registry.add_identity(identity(
        "second",
        ConfigTarget::network("freenode"),
        &[("general", "quitmessage", "second")],
    ));

    let config = registry.aggregate(freenode_context());
    assert_eq!(config.get_option("general", "quitmessage").as_deref(), Some("second"));
}

#[test]
fn test_reorder_changes_winner() {
    let registry = IdentityRegistry::in_memory();
    let a = identity(
        "a",
        ConfigTarget::network("freenode").with_order(100),
        &[("general", "quitmessage", "a")],
    );
    let b = identity(
        "b",
        ConfigTarget::network("freenode").with_order(200),
        &[("general", "quitmessage", "b")],
    );
    registry.add_identity(a.clone());
    registry.add_identity(b.clone());

    let config = registry.aggregate(freenode_context());
    assert_eq!(config.get_option("general", "quitmessage").as_deref(), Some("a"));

    b.set_order(10);
    assert_eq!(config.get_option("general", "quitmessage").as_deref(), Some("b"));
    assert_eq!(b.target().order(), 10);
    assert_eq!(b.get_option("identity", "order").as_deref(), Some("10"));
}

#[test]
fn test_disabled_value_falls_through_when_required() {
    let registry = IdentityRegistry::in_memory();
    registry.add_identity(identity(
        "Global",
        ConfigTarget::global(),
        &[("ui", "inputbackgroundcolour", "4")],
    ));
    registry.add_identity(identity(
        "freenode",
        ConfigTarget::network("freenode"),
        &[("ui", "inputbackgroundcolour", "false:3"), ("ui", "backgroundcolour", "6")],
    ));

    let config = registry.aggregate(freenode_context());

    // The network value is disabled, so the global one shows through.
    assert_eq!(
        config.get_option_string("ui", "inputbackgroundcolour", &[]).as_deref(),
        Some("4")
    );

    // Without a fallback, an optional lookup reports the disabled value as unset.
    assert_eq!(
        config.option_string("ui", "inputbackgroundcolour", false, &Validator::Permissive, &[]),
        None
    );
}

#[test]
fn test_disabled_primary_moves_to_the_fallback() {
    let registry = IdentityRegistry::in_memory();
    registry.add_identity(identity(
        "Global",
        ConfigTarget::global(),
        &[("ui", "a", "red"), ("ui", "b", "blue")],
    ));
    registry.add_identity(identity(
        "freenode",
        ConfigTarget::network("freenode"),
        &[("ui", "a", "false:x")],
    ));

    let config = registry.aggregate(freenode_context());
    assert_eq!(
        config.get_option_string("ui", "a", &[("ui", "b")]).as_deref(),
        Some("blue")
    );
    assert_eq!(
        config
            .option_string("ui", "a", false, &Validator::Permissive, &[("ui", "b")])
            .as_deref(),
        Some("blue")
    );
}

#[test]
fn test_fallback_chain() {
    let registry = IdentityRegistry::in_memory();
    registry.add_identity(identity(
        "Global",
        ConfigTarget::global(),
        &[
            ("ui", "nicklistforegroundcolour", "false:"),
            ("ui", "foregroundcolour", "true:12"),
        ],
    ));
    let config = registry.aggregate(ConfigContext::global());

    let fallbacks = [("ui", "nicklistforegroundcolour"), ("ui", "foregroundcolour")];
    assert_eq!(
        config.get_option_string("ui", "missing", &fallbacks).as_deref(),
        Some("12")
    );
    assert_eq!(config.get_option_int("ui", "missing", &fallbacks), Some(12));
    assert_eq!(config.get_option_string("ui", "missing", &[]), None);
}

#[test]
fn test_listeners_hear_identity_changes() {
    let registry = IdentityRegistry::in_memory();
    let global = identity("Global", ConfigTarget::global(), &[("ui", "colour", "red")]);
    registry.add_identity(global.clone());

    let config = registry.aggregate(freenode_context());
    let (domain_listener, domain_seen) = recorder();
    let (key_listener, key_seen) = recorder();
    config.add_change_listener("ui", None, domain_listener);
    let key_id = config.add_change_listener("ui", Some("colour"), key_listener);

    global.set_option("ui", "colour", "blue");
    global.set_option("ui", "width", "3");
    assert_eq!(domain_seen.lock().unwrap().len(), 2);
    assert_eq!(
        *key_seen.lock().unwrap(),
        vec![("ui".to_string(), "colour".to_string())]
    );

    // A new, more specific identity changes the effective value.
    registry.add_identity(identity(
        "freenode",
        ConfigTarget::network("freenode"),
        &[("ui", "colour", "green")],
    ));
    assert_eq!(config.get_option("ui", "colour").as_deref(), Some("green"));
    assert_eq!(key_seen.lock().unwrap().len(), 2);

    assert!(config.remove_listener(key_id));
    assert!(!config.remove_listener(key_id));
    global.set_option("ui", "colour", "black");
    assert_eq!(key_seen.lock().unwrap().len(), 2);
}

#[test]
fn test_identities_for_other_contexts_stay_silent() {
    let registry = IdentityRegistry::in_memory();
    let config = registry.aggregate(freenode_context());
    let (listener, seen) = recorder();
    config.add_change_listener("ui", None, listener);

    let other = identity(
        "quakenet",
        ConfigTarget::network("quakenet"),
        &[("ui", "colour", "x")],
    );
    registry.add_identity(other.clone());
    other.set_option("ui", "colour", "y");

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(config.get_option("ui", "colour"), None);
}

#[test]
fn test_migrate_reports_keys_whose_scope_changed() {
    let registry = IdentityRegistry::in_memory();
    registry.add_identity(identity(
        "Global",
        ConfigTarget::global(),
        &[("ui", "colour", "global")],
    ));
    registry.add_identity(identity(
        "freenode",
        ConfigTarget::network("freenode"),
        &[("ui", "colour", "freenode"), ("ui", "font", "mono")],
    ));
    registry.add_identity(identity(
        "quakenet",
        ConfigTarget::network("quakenet"),
        &[("ui", "colour", "quakenet")],
    ));

    let config = registry.aggregate(freenode_context());
    let (listener, seen) = recorder();
    config.add_change_listener("ui", None, listener);

    config.migrate("irc", "hyperion", "quakenet", "irc.quakenet.org", None);
    assert_eq!(config.get_option("ui", "colour").as_deref(), Some("quakenet"));
    assert_eq!(config.get_option("ui", "font"), None);
    assert_eq!(config.context().network, "quakenet");

    let mut seen = seen.lock().unwrap().clone();
    seen.sort();
    seen.dedup();
    assert_eq!(
        seen,
        vec![
            ("ui".to_string(), "colour".to_string()),
            ("ui".to_string(), "font".to_string()),
        ]
    );
}

#[test]
fn test_removed_identity_leaves_the_cascade() {
    let registry = IdentityRegistry::in_memory();
    let network = identity(
        "freenode",
        ConfigTarget::network("freenode"),
        &[("ui", "colour", "green")],
    );
    registry.add_identity(network.clone());
    let config = registry.aggregate(freenode_context());
    let (listener, seen) = recorder();
    config.add_change_listener("ui", Some("colour"), listener);

    registry.remove_identity(&network);
    assert_eq!(config.get_option("ui", "colour"), None);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert!(registry.find_identity(&ConfigTarget::network("freenode")).is_none());
}

#[test]
fn test_merged_options_prefer_specific_values() {
    let registry = IdentityRegistry::in_memory();
    registry.add_identity(identity(
        "Global",
        ConfigTarget::global(),
        &[("ui", "colour", "red"), ("ui", "font", "serif")],
    ));
    registry.add_identity(identity(
        "freenode",
        ConfigTarget::network("freenode"),
        &[("ui", "colour", "green")],
    ));

    let config = registry.aggregate(freenode_context());
    let options = config.options("ui");
    assert_eq!(options.get("colour").map(String::as_str), Some("green"));
    assert_eq!(options.get("font").map(String::as_str), Some("serif"));
    assert!(config.domains().contains("ui"));
}
