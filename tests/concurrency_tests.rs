//! Integration tests for lookups, notifications and bindings used from
//! several threads at once.

use identity_cascade::{
    BindingTable, ConfigBinder, ConfigChangeListener, ConfigContext, ConfigTarget, Identity,
    IdentityRegistry, ReadOnlyConfigProvider,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

fn network(name: &str, entries: &[(&str, &str, &str)]) -> Arc<Identity> {
    let identity = Identity::create(name, ConfigTarget::network(name), None);
    for (domain, key, value) in entries {
        identity.set_option(domain, key, value);
    }
    Arc::new(identity)
}

fn context(network: &str) -> ConfigContext {
    ConfigContext::new("irc", "", network, "")
}

/// Run `work` on its own thread and report whether it finished in time.
fn finishes<F>(work: F) -> bool
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        work();
        let _ = tx.send(());
    });
    rx.recv_timeout(Duration::from_secs(10)).is_ok()
}

#[test]
fn test_listener_can_write_to_the_identity_that_notified_it() {
    let registry = IdentityRegistry::in_memory();
    let freenode = network("freenode", &[]);
    registry.add_identity(freenode.clone());
    let config = registry.aggregate(context("freenode"));

    let target = freenode.clone();
    let listener: Arc<dyn ConfigChangeListener> = Arc::new(move |_domain: &str, key: &str| {
        if key == "nickname" {
            target.set_option("general", "lastnick", "seen");
        }
    });
    config.add_change_listener("general", None, listener);

    let writer = freenode.clone();
    assert!(finishes(move || writer.set_option("general", "nickname", "ferris")));
    assert_eq!(config.get_option("general", "lastnick").as_deref(), Some("seen"));
    assert_eq!(freenode.get_option("general", "nickname").as_deref(), Some("ferris"));
}

#[test]
fn test_readers_see_whole_snapshots_during_changes() {
    let registry = IdentityRegistry::in_memory();
    registry.add_identity(network("freenode", &[("ui", "backgroundcolour", "7")]));
    registry.add_identity(network("quakenet", &[("ui", "backgroundcolour", "12")]));
    let config = registry.aggregate(context("freenode"));

    let stop = Arc::new(AtomicBool::new(false));
    let start = Arc::new(Barrier::new(4));
    let readers: Vec<_> = (0..3)
        .map(|_| {
            let config = config.clone();
            let stop = stop.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                let mut reads = 0usize;
                loop {
                    let value = config.get_option("ui", "backgroundcolour");
                    assert!(
                        matches!(value.as_deref(), Some("7" | "12" | "9")),
                        "unexpected value {:?}",
                        value
                    );
                    reads += 1;
                    if stop.load(Ordering::SeqCst) {
                        break reads;
                    }
                }
            })
        })
        .collect();

    start.wait();
    for round in 0..200 {
        let network = if round % 2 == 0 { "quakenet" } else { "freenode" };
        config.migrate("irc", "", network, "", None);
    }
    let channel = Identity::create("#rust", ConfigTarget::channel("#rust@freenode"), None);
    channel.set_option("ui", "backgroundcolour", "9");
    config.migrate("irc", "", "freenode", "", Some("#rust"));
    registry.add_identity(Arc::new(channel));
    stop.store(true, Ordering::SeqCst);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(config.get_option("ui", "backgroundcolour").as_deref(), Some("9"));
}

#[test]
fn test_aggregates_created_while_identities_arrive_see_all_of_them() {
    const IDENTITIES: usize = 50;

    let registry = IdentityRegistry::in_memory();
    let start = Arc::new(Barrier::new(2));

    let adder = {
        let registry = registry.clone();
        let start = start.clone();
        thread::spawn(move || {
            start.wait();
            for i in 0..IDENTITIES {
                let identity = Identity::create(
                    &format!("freenode {}", i),
                    ConfigTarget::network("freenode").with_order(i as i32),
                    None,
                );
                identity.set_option("general", &format!("key{}", i), "set");
                registry.add_identity(Arc::new(identity));
            }
        })
    };

    start.wait();
    let mut aggregates = Vec::new();
    for _ in 0..IDENTITIES * 2 {
        aggregates.push(registry.aggregate(context("freenode")));
    }
    adder.join().unwrap();

    for config in &aggregates {
        assert_eq!(config.sources().len(), IDENTITIES);
        for i in 0..IDENTITIES {
            assert_eq!(
                config.get_option("general", &format!("key{}", i)).as_deref(),
                Some("set")
            );
        }
    }
}

#[derive(Default)]
struct StatusBar {
    colour: Mutex<String>,
    source: Mutex<Option<String>>,
}

#[derive(Default)]
struct NickList {
    colour: Mutex<String>,
}

#[test]
fn test_setters_can_call_back_into_binder_and_config() {
    let registry = IdentityRegistry::in_memory();
    let freenode = network("freenode", &[("ui", "backgroundcolour", "7")]);
    registry.add_identity(freenode.clone());
    let config = registry.aggregate(context("freenode"));
    let binder = ConfigBinder::new(config.clone()).with_default_domain("ui");

    let nicklist = Arc::new(NickList::default());
    let mut nick_table = BindingTable::new();
    nick_table.bind_field("backgroundcolour", |n: &NickList| &n.colour);
    let nick_table = Arc::new(nick_table);

    let mut bar_table = BindingTable::new();
    {
        let binder = binder.clone();
        let nicklist = nicklist.clone();
        let nick_table = nick_table.clone();
        bar_table.bind("backgroundcolour", move |bar: &StatusBar, colour: String| {
            *bar.colour.lock().unwrap() = colour;
            let scope = binder
                .config()
                .scope_of("ui", "backgroundcolour")
                .map(|identity| identity.name());
            *bar.source.lock().unwrap() = scope;
            if !binder.is_bound(&nicklist) {
                binder.bind(&nicklist, &*nick_table).unwrap();
            }
        });
    }

    let bar = Arc::new(StatusBar::default());
    {
        let binder = binder.clone();
        let bar = bar.clone();
        assert!(finishes(move || binder.bind(&bar, &bar_table).unwrap()));
    }
    assert_eq!(*bar.colour.lock().unwrap(), "7");
    assert_eq!(*bar.source.lock().unwrap(), Some("freenode".to_string()));
    assert!(binder.is_bound(&nicklist));
    assert_eq!(*nicklist.colour.lock().unwrap(), "7");

    let writer = freenode.clone();
    assert!(finishes(move || writer.set_option("ui", "backgroundcolour", "3")));
    assert_eq!(*bar.colour.lock().unwrap(), "3");
    assert_eq!(*nicklist.colour.lock().unwrap(), "3");
}
