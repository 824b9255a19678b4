//! On-disk representation of an identity.
//!
//! An identity file is a YAML mapping of domain names to mappings of keys to
//! scalar values:
//!
//! ```yaml
//! identity:
//!   name: Freenode settings
//!   network: freenode
//!   order: 5000
//! ui:
//!   backgroundcolour: "2"
//! ```
//!
//! Every scalar is read back as a string, so hand-written `order: 5000` and
//! `order: "5000"` are equivalent. The scratch `temp` domain is never written.

use crate::error::{ConfigError, Result};
use chrono::Utc;
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::Path;

/// Domain that is cleared before every write.
pub const TEMP_DOMAIN: &str = "temp";

/// Settings of one domain.
pub type KeyMap = BTreeMap<String, String>;
/// All domains of one identity.
pub type DomainMap = BTreeMap<String, KeyMap>;

/// The parsed contents of an identity file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityFile {
    domains: DomainMap,
}

impl IdentityFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_domains(domains: DomainMap) -> Self {
        Self { domains }
    }

    /// Read and parse the file at `path`.
    pub fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, Some(path))
    }

    /// Parse identity YAML. `path` is only used for error messages.
    pub fn parse(text: &str, path: Option<&Path>) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }

        let root: Value = serde_yaml::from_str(text)
            .map_err(|e| ConfigError::invalid_file(path, e.to_string()))?;

        let mapping = match root {
            Value::Null => return Ok(Self::new()),
            Value::Mapping(m) => m,
            _ => {
                return Err(ConfigError::invalid_file(
                    path,
                    "top level must be a mapping of domains",
                ));
            }
        };

        let mut domains = DomainMap::new();
        for (domain, keys) in mapping {
            let domain = scalar_to_string(&domain).ok_or_else(|| {
                ConfigError::invalid_file(path, "domain names must be scalars")
            })?;

            let keys = match keys {
                Value::Null => KeyMap::new(),
                Value::Mapping(m) => {
                    let mut out = KeyMap::new();
                    for (key, value) in m {
                        let key = scalar_to_string(&key).ok_or_else(|| {
                            ConfigError::invalid_file(
                                path,
                                format!("non-scalar key in domain '{}'", domain),
                            )
                        })?;
                        let value = scalar_to_string(&value).ok_or_else(|| {
                            ConfigError::invalid_file(
                                path,
                                format!("value of {}.{} must be a scalar", domain, key),
                            )
                        })?;
                        out.insert(key, value);
                    }
                    out
                }
                _ => {
                    return Err(ConfigError::invalid_file(
                        path,
                        format!("domain '{}' must be a mapping of keys", domain),
                    ));
                }
            };

            domains.insert(domain, keys);
        }

        Ok(Self { domains })
    }

    /// Serialize to YAML with a header comment.
    pub fn to_yaml_string(&self) -> Result<String> {
        let persisted: BTreeMap<&String, &KeyMap> = self
            .domains
            .iter()
            .filter(|(name, keys)| name.as_str() != TEMP_DOMAIN && !keys.is_empty())
            .collect();

        let body = if persisted.is_empty() {
            String::new()
        } else {
            serde_yaml::to_string(&persisted).map_err(std::io::Error::other)?
        };

        Ok(format!(
            "# identity-cascade configuration file\n# Written on: {}\n{}",
            Utc::now().to_rfc3339(),
            body
        ))
    }

    /// Write to `path`, creating the parent directory if needed.
    pub fn write(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml_string()?)?;
        Ok(())
    }

    pub fn domains(&self) -> &DomainMap {
        &self.domains
    }

    pub fn domain(&self, domain: &str) -> Option<&KeyMap> {
        self.domains.get(domain)
    }

    pub fn has_domain(&self, domain: &str) -> bool {
        self.domains.contains_key(domain)
    }

    pub fn get(&self, domain: &str, key: &str) -> Option<&str> {
        self.domains
            .get(domain)
            .and_then(|keys| keys.get(key))
            .map(String::as_str)
    }

    pub fn contains(&self, domain: &str, key: &str) -> bool {
        self.get(domain, key).is_some()
    }

    /// Store a value, returning the previous one.
    pub fn insert(&mut self, domain: &str, key: &str, value: impl Into<String>) -> Option<String> {
        self.domains
            .entry(domain.to_string())
            .or_default()
            .insert(key.to_string(), value.into())
    }

    /// Remove a value, dropping the domain once it is empty.
    pub fn remove(&mut self, domain: &str, key: &str) -> Option<String> {
        let keys = self.domains.get_mut(domain)?;
        let old = keys.remove(key);
        if keys.is_empty() {
            self.domains.remove(domain);
        }
        old
    }

    pub fn clear_domain(&mut self, domain: &str) {
        self.domains.remove(domain);
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => Some(String::new()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_scalars_as_strings() {
        let file = IdentityFile::parse(
            "identity:\n  name: Test\n  order: 5000\nunit:\n  test: true\n",
            None,
        )
        .unwrap();
        assert_eq!(file.get("identity", "name"), Some("Test"));
        assert_eq!(file.get("identity", "order"), Some("5000"));
        assert_eq!(file.get("unit", "test"), Some("true"));
        assert_eq!(file.get("unit", "missing"), None);
    }

    #[test]
    fn test_empty_document() {
        assert!(IdentityFile::parse("", None).unwrap().domains().is_empty());
        assert!(IdentityFile::parse("# only a comment\n", None)
            .unwrap()
            .domains()
            .is_empty());
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let err = IdentityFile::parse("identity: [unclosed", None).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfigFile { .. }));
    }

    #[test]
    fn test_rejects_wrong_shapes() {
        assert!(IdentityFile::parse("- a\n- b\n", None).is_err());
        assert!(IdentityFile::parse("ui: plain\n", None).is_err());
        assert!(IdentityFile::parse("ui:\n  colours: [1, 2]\n", None).is_err());
    }

    #[test]
    fn test_remove_drops_empty_domain() {
        let mut file = IdentityFile::new();
        file.insert("ui", "a", "1");
        assert_eq!(file.remove("ui", "a"), Some("1".to_string()));
        assert!(!file.has_domain("ui"));
        assert_eq!(file.remove("ui", "a"), None);
    }

    #[test]
    fn test_write_skips_temp_domain_and_preserves_values() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("ident.yaml");

        let mut file = IdentityFile::new();
        file.insert("identity", "name", "Writer");
        file.insert("ui", "flag", "true");
        file.insert("profile", "nicknames", "one\ntwo");
        file.insert(TEMP_DOMAIN, "scratch", "x");
        file.write(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("# identity-cascade configuration file"));

        let loaded = IdentityFile::read(&path).unwrap();
        assert_eq!(loaded.get("ui", "flag"), Some("true"));
        assert_eq!(loaded.get("profile", "nicknames"), Some("one\ntwo"));
        assert!(!loaded.has_domain(TEMP_DOMAIN));
    }
}
