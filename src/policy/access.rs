//! API key resolution and script permission checks.
//!
//! This module enforces access policies based on:
//! - Key membership (the presented key must be in the keyring)
//! - Allow-lists (an explicit set of script ids, or every defined script)

use crate::policy::catalog::ScriptCatalog;
use crate::ScriptwardenError;
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One configured API key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyEntry {
    /// The opaque key string clients present.
    pub key: String,

    /// Display label echoed back as `actor.label`.
    #[serde(default = "default_label")]
    pub label: String,

    /// Script ids this key may fetch. Empty means every defined script.
    #[serde(default)]
    pub allowed_scripts: Vec<String>,
}

fn default_label() -> String {
    "User".to_string()
}

/// Scripts a key is allowed to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionSet {
    /// Every script currently defined in the catalog.
    All,
    /// Exactly these ids, in allow-list order.
    Only(IndexSet<String>),
}

impl PermissionSet {
    /// Build an explicit permission set.
    pub fn only<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Only(ids.into_iter().map(Into::into).collect())
    }

    /// Whether `script_id` may be requested under this set.
    ///
    /// Enabled state is deliberately not consulted; a disabled script is a
    /// separate failure reported after the permission check.
    pub fn is_permitted(&self, script_id: &str, catalog: &ScriptCatalog) -> bool {
        match self {
            Self::All => catalog.contains(script_id),
            Self::Only(ids) => ids.contains(script_id),
        }
    }
}

/// Result of a successful key lookup.
#[derive(Debug, Clone, Copy)]
pub struct ResolvedKey<'a> {
    /// Label for the key holder.
    pub label: &'a str,
    /// Scripts the key may fetch.
    pub permissions: &'a PermissionSet,
}

#[derive(Debug, Clone)]
struct KeyGrant {
    label: String,
    permissions: PermissionSet,
}

/// Immutable API key table.
#[derive(Debug, Clone, Default)]
pub struct Keyring {
    keys: HashMap<String, KeyGrant>,
}

impl Keyring {
    /// Build a keyring, checking every allow-list against the catalog.
    ///
    /// # Errors
    /// * `ConfigError` - Empty or duplicate key, or an allow-list naming an undefined script
    pub fn new(entries: Vec<ApiKeyEntry>, catalog: &ScriptCatalog) -> Result<Self, ScriptwardenError> {
        let mut keys = HashMap::with_capacity(entries.len());

        for entry in entries {
            let key = entry.key.trim().to_string();
            if key.is_empty() {
                return Err(ScriptwardenError::ConfigError(
                    "api key cannot be empty".to_string(),
                ));
            }

            if let Some(unknown) = entry
                .allowed_scripts
                .iter()
                .find(|id| !catalog.contains(id))
            {
                return Err(ScriptwardenError::ConfigError(format!(
                    "api key '{}' allows undefined script '{}'",
                    entry.label, unknown
                )));
            }

            let permissions = if entry.allowed_scripts.is_empty() {
                PermissionSet::All
            } else {
                PermissionSet::only(entry.allowed_scripts)
            };

            let grant = KeyGrant {
                label: entry.label,
                permissions,
            };
            if keys.insert(key, grant).is_some() {
                return Err(ScriptwardenError::ConfigError(
                    "duplicate api key in keyring".to_string(),
                ));
            }
        }

        Ok(Self { keys })
    }

    /// Resolve a presented key. Surrounding whitespace is ignored.
    pub fn resolve(&self, api_key: &str) -> Option<ResolvedKey<'_>> {
        self.keys.get(api_key.trim()).map(|grant| ResolvedKey {
            label: &grant.label,
            permissions: &grant.permissions,
        })
    }

    /// Number of configured keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Whether no keys are configured.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Check that a resolved key may fetch `script_id`.
///
/// # Returns
/// * `Ok(())` - Access granted
/// * `Err(ScriptNotPermitted)` - Id is outside the key's permission set
pub fn check_access(
    key: &ResolvedKey<'_>,
    script_id: &str,
    catalog: &ScriptCatalog,
) -> Result<(), ScriptwardenError> {
    if !key.permissions.is_permitted(script_id, catalog) {
        return Err(ScriptwardenError::ScriptNotPermitted);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::catalog::fixtures::catalog;

    fn entry(key: &str, allowed: &[&str]) -> ApiKeyEntry {
        ApiKeyEntry {
            key: key.to_string(),
            label: "Tester".to_string(),
            allowed_scripts: allowed.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn keyring() -> Keyring {
        Keyring::new(
            vec![
                entry("demo-dev-key", &["lunarity", "doorEsp"]),
                entry("only-a", &["lunarity"]),
                entry("all-key", &[]),
            ],
            &catalog(),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_known_key() {
        let ring = keyring();
        let resolved = ring.resolve("demo-dev-key").unwrap();
        assert_eq!(resolved.label, "Tester");
        assert_eq!(
            resolved.permissions,
            &PermissionSet::only(["lunarity", "doorEsp"])
        );
    }

    #[test]
    fn test_resolve_trims_whitespace() {
        assert!(keyring().resolve("  demo-dev-key\n").is_some());
    }

    #[test]
    fn test_resolve_unknown_key() {
        assert!(keyring().resolve("nope").is_none());
        assert!(keyring().resolve("").is_none());
    }

    #[test]
    fn test_allow_list_grants_listed_and_forbids_others() {
        let ring = keyring();
        let cat = catalog();
        let key = ring.resolve("only-a").unwrap();
        assert!(check_access(&key, "lunarity", &cat).is_ok());
        assert!(matches!(
            check_access(&key, "doorEsp", &cat),
            Err(ScriptwardenError::ScriptNotPermitted)
        ));
    }

    #[test]
    fn test_empty_allow_list_grants_every_defined_script() {
        let ring = keyring();
        let cat = catalog();
        let key = ring.resolve("all-key").unwrap();
        assert_eq!(key.permissions, &PermissionSet::All);
        for d in cat.iter() {
            assert!(check_access(&key, &d.id, &cat).is_ok());
        }
        assert!(matches!(
            check_access(&key, "unknown", &cat),
            Err(ScriptwardenError::ScriptNotPermitted)
        ));
    }

    #[test]
    fn test_undefined_script_in_allow_list_rejected() {
        let result = Keyring::new(vec![entry("k", &["ghost"])], &catalog());
        assert!(matches!(result, Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let result = Keyring::new(vec![entry("k", &[]), entry(" k ", &[])], &catalog());
        assert!(matches!(result, Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_empty_key_rejected() {
        let result = Keyring::new(vec![entry("   ", &[])], &catalog());
        assert!(matches!(result, Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_entry_label_default() {
        let e: ApiKeyEntry = toml::from_str("key = \"abc\"").unwrap();
        assert_eq!(e.label, "User");
        assert!(e.allowed_scripts.is_empty());
    }
}
