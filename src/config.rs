//! Scriptwarden configuration.
//!
//! Loaded once at start from a TOML file, overlaid with `SCRIPTWARDEN_*`
//! environment variables, validated, and then never mutated.

use crate::policy::access::{ApiKeyEntry, Keyring};
use crate::policy::catalog::{ScriptCatalog, ScriptDescriptor};
use crate::ScriptwardenError;
use indexmap::IndexMap;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default XOR key shared with deployed loaders.
pub const DEFAULT_OBFUSCATION_KEY: &str = "LunarityXOR2025!SecretKey";

/// Minimum signing secret length, in bytes.
pub const MIN_SECRET_LEN: usize = 16;

/// Environment variable names.
pub mod env {
    /// `"true"` (any case) engages the kill switch.
    pub const KILL_SWITCH: &str = "SCRIPTWARDEN_KILL_SWITCH";
    /// HMAC signing secret.
    pub const SIGNING_SECRET: &str = "SCRIPTWARDEN_SIGNING_SECRET";
    /// Audit webhook URL. Empty disables the webhook.
    pub const WEBHOOK_URL: &str = "SCRIPTWARDEN_WEBHOOK_URL";
    /// Listen address.
    pub const BIND: &str = "SCRIPTWARDEN_BIND";
}

const RESERVED_PATHS: &[&str] = &["/", "/loader", "/authorize", "/validate", "/health"];

/// Top-level configuration.
#[derive(Clone, Deserialize)]
pub struct ScriptwardenConfig {
    /// Reject every authorization and validation.
    #[serde(default)]
    pub kill_switch: bool,

    /// HMAC key for signed session tokens.
    /// SECURITY: Prefer supplying this through the environment.
    #[serde(default)]
    pub signing_secret: String,

    /// XOR key for request bodies and, optionally, script bodies.
    #[serde(default = "default_obfuscation_key")]
    pub obfuscation_key: String,

    /// Return script bodies obfuscated in grants.
    #[serde(default)]
    pub obfuscate_scripts: bool,

    /// HTTP surface settings.
    #[serde(default)]
    pub server: ServerSettings,

    /// Session token settings.
    #[serde(default)]
    pub token: TokenSettings,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageSettings,

    /// Audit settings.
    #[serde(default)]
    pub audit: AuditSettings,

    /// Gated scripts, in menu order.
    #[serde(default)]
    pub scripts: Vec<ScriptDescriptor>,

    /// API keys.
    #[serde(default)]
    pub api_keys: Vec<ApiKeyEntry>,
}

impl std::fmt::Debug for ScriptwardenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptwardenConfig")
            .field("kill_switch", &self.kill_switch)
            .field("signing_secret", &"<redacted>")
            .field("obfuscate_scripts", &self.obfuscate_scripts)
            .field("server", &self.server)
            .field("token", &self.token)
            .field("storage", &self.storage)
            .field("audit", &self.audit)
            .field("scripts", &self.scripts.len())
            .field("api_keys", &self.api_keys.len())
            .finish()
    }
}

impl Default for ScriptwardenConfig {
    fn default() -> Self {
        Self {
            kill_switch: false,
            signing_secret: String::new(),
            obfuscation_key: default_obfuscation_key(),
            obfuscate_scripts: false,
            server: ServerSettings::default(),
            token: TokenSettings::default(),
            storage: StorageSettings::default(),
            audit: AuditSettings::default(),
            scripts: Vec::new(),
            api_keys: Vec::new(),
        }
    }
}

/// `[server]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSettings {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Storage key of the loader served at `/` and `/loader`.
    #[serde(default = "default_loader_key")]
    pub loader_key: String,

    /// When set, `/authorize` and `/validate` only accept this User-Agent.
    #[serde(default)]
    pub required_user_agent: Option<String>,

    /// Extra text resources: request path to storage key.
    #[serde(default)]
    pub public_modules: IndexMap<String, String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            loader_key: default_loader_key(),
            required_user_agent: None,
            public_modules: IndexMap::new(),
        }
    }
}

/// Which token implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStrategyKind {
    /// Self-contained HMAC-signed tokens.
    #[default]
    Signed,
    /// Random tokens with a storage record.
    Stored,
}

/// When `/validate` replaces the presented token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationPolicy {
    /// Every successful validation rotates.
    #[default]
    Always,
    /// Callers may send `refresh: false` to extend instead.
    Optional,
}

/// `[token]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenSettings {
    /// Token implementation.
    #[serde(default)]
    pub strategy: TokenStrategyKind,

    /// Rotation policy.
    #[serde(default)]
    pub rotation: RotationPolicy,

    /// Lifetime of tokens issued by `/authorize`.
    #[serde(default = "default_ttl")]
    pub grant_ttl_secs: u64,

    /// Lifetime of tokens issued by `/validate`.
    #[serde(default = "default_ttl")]
    pub session_ttl_secs: u64,

    /// Lifetime granted by a non-rotating validation.
    #[serde(default = "default_extension_ttl")]
    pub extension_ttl_secs: u64,
}

impl TokenSettings {
    /// Grant lifetime.
    pub fn grant_ttl(&self) -> Duration {
        Duration::from_secs(self.grant_ttl_secs)
    }

    /// Rotated session lifetime.
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Extension lifetime.
    pub fn extension_ttl(&self) -> Duration {
        Duration::from_secs(self.extension_ttl_secs)
    }
}

impl Default for TokenSettings {
    fn default() -> Self {
        Self {
            strategy: TokenStrategyKind::default(),
            rotation: RotationPolicy::default(),
            grant_ttl_secs: default_ttl(),
            session_ttl_secs: default_ttl(),
            extension_ttl_secs: default_extension_ttl(),
        }
    }
}

/// Storage backend choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Files on disk.
    #[default]
    File,
    /// Process memory.
    Memory,
}

/// `[storage]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageSettings {
    /// Backend.
    #[serde(default)]
    pub backend: StorageBackend,

    /// Root directory for the file backend. Defaults to the user data dir.
    #[serde(default)]
    pub dir: Option<PathBuf>,

    /// Seconds between sweeps that drop expired token records and markers.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl StorageSettings {
    /// Sweep interval as a `Duration`.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            dir: None,
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// `[audit]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct AuditSettings {
    /// Webhook receiving audit embeds.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Emit `validate_success` events.
    #[serde(default)]
    pub log_validations: bool,

    /// Webhook request timeout.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl AuditSettings {
    /// Webhook request timeout.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            webhook_url: None,
            log_validations: false,
            timeout_secs: default_timeout(),
        }
    }
}

fn default_obfuscation_key() -> String {
    DEFAULT_OBFUSCATION_KEY.to_string()
}

fn default_bind() -> String {
    "0.0.0.0:8787".to_string()
}

fn default_loader_key() -> String {
    "loader.lua".to_string()
}

fn default_ttl() -> u64 {
    600
}

fn default_extension_ttl() -> u64 {
    120
}

fn default_timeout() -> u64 {
    10
}

fn default_sweep_interval() -> u64 {
    300
}

impl ScriptwardenConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, ScriptwardenError> {
        toml::from_str(s).map_err(|e| ScriptwardenError::ConfigError(format!("Invalid TOML: {}", e)))
    }

    /// Read `path`, apply the process environment overlay, and validate.
    pub fn load(path: &Path) -> Result<Self, ScriptwardenError> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Read `path`, overlay values from `lookup`, and validate.
    pub fn load_with_env<F>(path: &Path, lookup: F) -> Result<Self, ScriptwardenError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = std::fs::read_to_string(path).map_err(|e| {
            ScriptwardenError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env_from(lookup);
        config.validate()?;
        Ok(config)
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|name| std::env::var(name).ok());
    }

    /// Overlay values from `lookup`.
    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(env::KILL_SWITCH) {
            self.kill_switch = value.trim().eq_ignore_ascii_case("true");
        }
        if let Some(value) = lookup(env::SIGNING_SECRET) {
            self.signing_secret = value;
        }
        if let Some(value) = lookup(env::WEBHOOK_URL) {
            let value = value.trim();
            self.audit.webhook_url = (!value.is_empty()).then(|| value.to_string());
        }
        if let Some(value) = lookup(env::BIND) {
            self.server.bind = value.trim().to_string();
        }
    }

    /// Validate configuration for obvious errors.
    pub fn validate(&self) -> Result<(), ScriptwardenError> {
        if self.token.strategy == TokenStrategyKind::Signed
            && self.signing_secret.len() < MIN_SECRET_LEN
        {
            return Err(ScriptwardenError::ConfigError(format!(
                "signing_secret must be at least {} bytes for the signed token strategy, got {}",
                MIN_SECRET_LEN,
                self.signing_secret.len()
            )));
        }

        for (name, value) in [
            ("token.grant_ttl_secs", self.token.grant_ttl_secs),
            ("token.session_ttl_secs", self.token.session_ttl_secs),
            ("token.extension_ttl_secs", self.token.extension_ttl_secs),
            ("audit.timeout_secs", self.audit.timeout_secs),
            ("storage.sweep_interval_secs", self.storage.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(ScriptwardenError::ConfigError(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        self.bind_addr()?;

        if self.server.loader_key.trim().is_empty() {
            return Err(ScriptwardenError::ConfigError(
                "server.loader_key cannot be empty".to_string(),
            ));
        }

        for (path, key) in &self.server.public_modules {
            if !path.starts_with('/')
                || RESERVED_PATHS.contains(&path.as_str())
                || path.contains(['{', '}', '*', ':'])
            {
                return Err(ScriptwardenError::ConfigError(format!(
                    "server.public_modules path '{}' must be a literal path starting with '/' that does not shadow a built-in route",
                    path
                )));
            }
            if key.trim().is_empty() {
                return Err(ScriptwardenError::ConfigError(format!(
                    "server.public_modules '{}' has an empty storage key",
                    path
                )));
            }
        }

        if let Some(url) = &self.audit.webhook_url {
            if !(url.starts_with("https://") || url.starts_with("http://")) {
                return Err(ScriptwardenError::ConfigError(
                    "audit.webhook_url must be an http(s) URL".to_string(),
                ));
            }
        }

        let catalog = self.catalog()?;
        self.keyring(&catalog)?;
        Ok(())
    }

    /// Parsed listen address.
    pub fn bind_addr(&self) -> Result<SocketAddr, ScriptwardenError> {
        self.server.bind.parse().map_err(|e| {
            ScriptwardenError::ConfigError(format!("Invalid bind address '{}': {}", self.server.bind, e))
        })
    }

    /// Build the script catalog.
    pub fn catalog(&self) -> Result<ScriptCatalog, ScriptwardenError> {
        ScriptCatalog::new(self.scripts.clone())
    }

    /// Build the keyring against `catalog`.
    pub fn keyring(&self, catalog: &ScriptCatalog) -> Result<Keyring, ScriptwardenError> {
        Keyring::new(self.api_keys.clone(), catalog)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
signing_secret = "0123456789abcdef0123"

[server]
bind = "127.0.0.1:9000"
required_user_agent = "LunarityLoader/1.0"
public_modules = { "/ui" = "LunarityUI.lua", "/LunarityUI" = "LunarityUI.lua" }

[token]
strategy = "stored"
rotation = "optional"
grant_ttl_secs = 300

[storage]
backend = "memory"

[audit]
log_validations = true

[[scripts]]
id = "lunarity"
storage_key = "lunarity.lua"
label = "Lunarity · IFrames"
description = "Advanced combat enhancer"

[[scripts]]
id = "teleport"
storage_key = "Teleport.lua"
label = "Teleport · Advanced"
enabled = false

[[api_keys]]
key = "demo-dev-key"
label = "Developer"
allowed_scripts = ["lunarity"]

[[api_keys]]
key = "open-key"
"#;

    fn valid_config() -> ScriptwardenConfig {
        ScriptwardenConfig {
            signing_secret: "0123456789abcdef".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_sample() {
        let config = ScriptwardenConfig::from_toml_str(SAMPLE).unwrap();
        assert!(!config.kill_switch);
        assert_eq!(config.obfuscation_key, DEFAULT_OBFUSCATION_KEY);
        assert_eq!(config.server.loader_key, "loader.lua");
        assert_eq!(config.server.public_modules.len(), 2);
        assert_eq!(config.token.strategy, TokenStrategyKind::Stored);
        assert_eq!(config.token.rotation, RotationPolicy::Optional);
        assert_eq!(config.token.grant_ttl(), Duration::from_secs(300));
        assert_eq!(config.token.session_ttl_secs, 600);
        assert_eq!(config.token.extension_ttl_secs, 120);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert!(config.audit.log_validations);
        assert_eq!(config.audit.timeout_secs, 10);
        assert_eq!(config.scripts[0].version, "1.0.0");
        assert!(!config.scripts[1].enabled);
        assert_eq!(config.api_keys[1].label, "User");
        assert!(config.api_keys[1].allowed_scripts.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn test_defaults() {
        let config = ScriptwardenConfig::from_toml_str("").unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8787");
        assert_eq!(config.token.strategy, TokenStrategyKind::Signed);
        assert_eq!(config.token.rotation, RotationPolicy::Always);
        assert_eq!(config.storage.backend, StorageBackend::File);
        assert!(config.storage.dir.is_none());
        assert!(config.audit.webhook_url.is_none());
    }

    #[test]
    fn test_unknown_strategy_rejected() {
        let result = ScriptwardenConfig::from_toml_str("[token]\nstrategy = \"jwt\"\n");
        assert!(matches!(result, Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_env_overlay() {
        let vars: HashMap<&str, &str> = [
            (env::KILL_SWITCH, "TRUE"),
            (env::SIGNING_SECRET, "from-the-environment"),
            (env::WEBHOOK_URL, "https://hooks.example.test/a"),
            (env::BIND, "127.0.0.1:1234"),
        ]
        .into_iter()
        .collect();

        let mut config = valid_config();
        config.apply_env_from(|name| vars.get(name).map(|v| v.to_string()));

        assert!(config.kill_switch);
        assert_eq!(config.signing_secret, "from-the-environment");
        assert_eq!(
            config.audit.webhook_url.as_deref(),
            Some("https://hooks.example.test/a")
        );
        assert_eq!(config.bind_addr().unwrap().port(), 1234);
    }

    #[test]
    fn test_env_kill_switch_other_values_disable() {
        let mut config = valid_config();
        config.kill_switch = true;
        config.apply_env_from(|name| (name == env::KILL_SWITCH).then(|| "yes".to_string()));
        assert!(!config.kill_switch);
    }

    #[test]
    fn test_env_empty_webhook_disables() {
        let mut config = valid_config();
        config.audit.webhook_url = Some("https://hooks.example.test/a".to_string());
        config.apply_env_from(|name| (name == env::WEBHOOK_URL).then(String::new));
        assert!(config.audit.webhook_url.is_none());
    }

    #[test]
    fn test_validate_short_secret() {
        let mut config = valid_config();
        config.signing_secret = "short".to_string();
        assert!(matches!(config.validate(), Err(ScriptwardenError::ConfigError(_))));

        // Stored tokens don't sign anything.
        config.token.strategy = TokenStrategyKind::Stored;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_ttl() {
        let mut config = valid_config();
        config.token.extension_ttl_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("extension_ttl_secs"));
    }

    #[test]
    fn test_validate_bad_bind() {
        let mut config = valid_config();
        config.server.bind = "not-an-address".to_string();
        assert!(matches!(config.validate(), Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_validate_module_shadowing_route() {
        let mut config = valid_config();
        config
            .server
            .public_modules
            .insert("/health".to_string(), "x.lua".to_string());
        assert!(matches!(config.validate(), Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_validate_module_path_with_captures() {
        let mut config = valid_config();
        config
            .server
            .public_modules
            .insert("/{name}".to_string(), "x.lua".to_string());
        assert!(matches!(config.validate(), Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_validate_undefined_allowed_script() {
        let mut config = ScriptwardenConfig::from_toml_str(SAMPLE).unwrap();
        config.api_keys[0].allowed_scripts.push("ghost".to_string());
        assert!(matches!(config.validate(), Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_validate_duplicate_script() {
        let mut config = ScriptwardenConfig::from_toml_str(SAMPLE).unwrap();
        let dup = config.scripts[0].clone();
        config.scripts.push(dup);
        assert!(matches!(config.validate(), Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_validate_webhook_scheme() {
        let mut config = valid_config();
        config.audit.webhook_url = Some("ftp://nope".to_string());
        assert!(matches!(config.validate(), Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_debug_redacts_secret() {
        let config = valid_config();
        let printed = format!("{:?}", config);
        assert!(!printed.contains("0123456789abcdef"));
        assert!(printed.contains("<redacted>"));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("scriptwarden.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = ScriptwardenConfig::load_with_env(&path, |_| None).unwrap();
        assert_eq!(config.scripts.len(), 2);
        assert!(!config.kill_switch);
        assert_eq!(config.server.bind, "127.0.0.1:9000");

        let vars: HashMap<&str, &str> = [(env::KILL_SWITCH, "TRUE")].into_iter().collect();
        let config =
            ScriptwardenConfig::load_with_env(&path, |name| vars.get(name).map(|v| v.to_string())).unwrap();
        assert!(config.kill_switch);

        let missing = ScriptwardenConfig::load_with_env(&dir.path().join("absent.toml"), |_| None);
        assert!(matches!(missing, Err(ScriptwardenError::ConfigError(_))));
    }

    #[test]
    fn test_example_config_parses() {
        let mut config =
            ScriptwardenConfig::from_toml_str(include_str!("../config/scriptwarden.example.toml")).unwrap();
        assert!(config.validate().is_err());

        config.signing_secret = "example-secret-0123456789".to_string();
        config.validate().unwrap();
        assert_eq!(config.server.public_modules.len(), 2);
        assert_eq!(config.catalog().unwrap().len(), 6);
        assert_eq!(config.storage.sweep_interval_secs, 300);
    }

    #[test]
    fn test_validate_zero_sweep_interval() {
        let mut config = valid_config();
        config.storage.sweep_interval_secs = 0;
        assert!(matches!(config.validate(), Err(ScriptwardenError::ConfigError(_))));
    }
}
