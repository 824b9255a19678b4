//! Layering of settings documents.
//!
//! Each layer is a partial settings document. Sections merge field by field,
//! any other value in a higher layer replaces the lower one, and a `null`
//! leaves the lower value in place.

use serde_json::Value;

/// Apply `layer` on top of `target` in place.
///
/// ```
/// use identity_cascade::settings::merge::merge_into;
/// use serde_json::json;
///
/// let mut settings = json!({"watcher": {"enabled": true, "debounce_ms": 500}});
/// merge_into(&mut settings, json!({"watcher": {"debounce_ms": 100}}));
/// assert_eq!(settings, json!({"watcher": {"enabled": true, "debounce_ms": 100}}));
/// ```
pub fn merge_into(target: &mut Value, layer: Value) {
    match (target, layer) {
        (_, Value::Null) => {}
        (Value::Object(section), Value::Object(fields)) => {
            for (name, value) in fields {
                merge_into(section.entry(name).or_insert(Value::Null), value);
            }
        }
        (target, layer) => *target = layer,
    }
}

/// Collapse layers given lowest precedence first.
pub fn merge_layers(layers: impl IntoIterator<Item = Value>) -> Value {
    let mut merged = Value::Null;
    for layer in layers {
        merge_into(&mut merged, layer);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use serde_json::json;
    use std::path::PathBuf;

    fn defaults() -> Value {
        serde_json::to_value(Settings::default()).unwrap()
    }

    fn settings(layers: Vec<Value>) -> Settings {
        serde_json::from_value(merge_layers(layers)).unwrap()
    }

    #[test]
    fn test_file_overrides_one_path() {
        let file: Value = serde_yaml::from_str("paths:\n  identities_dir: /srv/identities\n").unwrap();
        let merged = settings(vec![defaults(), file]);

        assert_eq!(merged.paths.identities_dir, PathBuf::from("/srv/identities"));
        assert_eq!(merged.paths.global_config, PathBuf::from("global.yaml"));
        assert!(merged.watcher.enabled);
        assert_eq!(merged.watcher.debounce_ms, 500);
    }

    #[test]
    fn test_empty_watcher_section_keeps_defaults() {
        // `watcher:` with nothing under it parses as null.
        let file: Value = serde_yaml::from_str("watcher:\n").unwrap();
        let merged = settings(vec![defaults(), file]);

        assert!(merged.watcher.enabled);
        assert_eq!(merged.watcher.debounce_ms, 500);
    }

    #[test]
    fn test_disabling_the_watcher_keeps_its_debounce() {
        let merged = settings(vec![
            defaults(),
            json!({"watcher": {"enabled": false}}),
        ]);
        assert!(!merged.watcher.enabled);
        assert_eq!(merged.watcher.debounce_ms, 500);
    }

    #[test]
    fn test_environment_layer_wins_over_file() {
        let file: Value =
            serde_yaml::from_str("watcher:\n  debounce_ms: 250\npaths:\n  global_config: main.yaml\n")
                .unwrap();
        let env = json!({"watcher": {"debounce_ms": 20}});
        let merged = settings(vec![defaults(), Value::Null, file, env]);

        assert_eq!(merged.watcher.debounce_ms, 20);
        assert_eq!(merged.paths.global_config, PathBuf::from("main.yaml"));
        assert_eq!(merged.paths.identities_dir, PathBuf::from("identities"));
    }
}
