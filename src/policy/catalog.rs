//! Script catalog: the immutable table of gated scripts.

use crate::policy::access::PermissionSet;
use crate::ScriptwardenError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Static description of one gated script.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScriptDescriptor {
    /// Stable identifier clients request (e.g. `"doorEsp"`).
    pub id: String,

    /// Key of the script body in storage (e.g. `"DoorESP.lua"`).
    pub storage_key: String,

    /// Human-readable name.
    pub label: String,

    /// Short description shown in the loader menu.
    #[serde(default)]
    pub description: String,

    /// Version string shown to clients.
    #[serde(default = "default_version")]
    pub version: String,

    /// Disabled scripts are hidden from menus and refuse grants.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_enabled() -> bool {
    true
}

/// Public view of a script, as listed in menus and grant metadata.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ScriptSummary {
    /// Script identifier.
    pub id: String,
    /// Human-readable name.
    pub label: String,
    /// Short description.
    pub description: String,
    /// Version string.
    pub version: String,
}

impl From<&ScriptDescriptor> for ScriptSummary {
    fn from(d: &ScriptDescriptor) -> Self {
        Self {
            id: d.id.clone(),
            label: d.label.clone(),
            description: d.description.clone(),
            version: d.version.clone(),
        }
    }
}

/// All scripts known to this process, in definition order.
#[derive(Debug, Clone, Default)]
pub struct ScriptCatalog {
    scripts: IndexMap<String, ScriptDescriptor>,
}

impl ScriptCatalog {
    /// Build a catalog, rejecting duplicate ids.
    pub fn new(descriptors: Vec<ScriptDescriptor>) -> Result<Self, ScriptwardenError> {
        let mut scripts = IndexMap::with_capacity(descriptors.len());
        for descriptor in descriptors {
            if descriptor.id.trim().is_empty() {
                return Err(ScriptwardenError::ConfigError(
                    "script id cannot be empty".to_string(),
                ));
            }
            if scripts.contains_key(&descriptor.id) {
                return Err(ScriptwardenError::ConfigError(format!(
                    "duplicate script id: {}",
                    descriptor.id
                )));
            }
            scripts.insert(descriptor.id.clone(), descriptor);
        }
        Ok(Self { scripts })
    }

    /// Look up a script by id.
    pub fn get(&self, id: &str) -> Option<&ScriptDescriptor> {
        self.scripts.get(id)
    }

    /// Whether the id is defined (enabled or not).
    pub fn contains(&self, id: &str) -> bool {
        self.scripts.contains_key(id)
    }

    /// Iterate over all scripts in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &ScriptDescriptor> {
        self.scripts.values()
    }

    /// Number of defined scripts.
    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    /// Whether no scripts are defined.
    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    /// The menu a key holder sees: permitted, defined and enabled scripts.
    ///
    /// Explicit allow-lists keep their own order; `All` follows the catalog.
    pub fn menu(&self, permissions: &PermissionSet) -> Vec<ScriptSummary> {
        match permissions {
            PermissionSet::All => self
                .iter()
                .filter(|d| d.enabled)
                .map(ScriptSummary::from)
                .collect(),
            PermissionSet::Only(ids) => ids
                .iter()
                .filter_map(|id| self.get(id))
                .filter(|d| d.enabled)
                .map(ScriptSummary::from)
                .collect(),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_catalog_rejects_duplicates() {
        let result = ScriptCatalog::new(vec![
            descriptor("a", "a.lua", true),
            descriptor("a", "b.lua", true),
        ]);
        assert!(matches!(result, Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_catalog_rejects_empty_id() {
        let result = ScriptCatalog::new(vec![descriptor(" ", "a.lua", true)]);
        assert!(matches!(result, Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_menu_all_skips_disabled_and_keeps_order() {
        let menu = catalog().menu(&PermissionSet::All);
        let ids: Vec<_> = menu.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["lunarity", "doorEsp"]);
    }

    #[test]
    fn test_menu_only_follows_allow_list_order() {
        let permissions = PermissionSet::only(["doorEsp", "ghost", "lunarity", "teleport"]);
        let menu = catalog().menu(&permissions);
        let ids: Vec<_> = menu.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["doorEsp", "lunarity"]);
    }

    #[test]
    fn test_summary_from_descriptor() {
        let summary = ScriptSummary::from(&descriptor("doorEsp", "DoorESP.lua", true));
        assert_eq!(summary.id, "doorEsp");
        assert_eq!(summary.label, "doorEsp label");
        assert_eq!(summary.version, "1.0.0");
    }

    #[test]
    fn test_descriptor_defaults_from_toml() {
        let d: ScriptDescriptor =
            toml::from_str("id = \"x\"\nstorage_key = \"x.lua\"\nlabel = \"X\"").unwrap();
        assert!(d.enabled);
        assert_eq!(d.version, "1.0.0");
        assert_eq!(d.description, "");
    }
}
