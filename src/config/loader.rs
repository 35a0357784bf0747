//! Configuration Loader
//!
//! Layers built-in defaults, an optional TOML file and `MIGRATE__` environment
//! variables into a validated [`MigrationConfig`].

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use tracing::{debug, info};

use super::MigrationConfig;
use crate::error::Result;

/// Default configuration file, looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "migration.toml";

/// Prefix of environment overrides, e.g. `MIGRATE__SCAN__PAGE_SIZE=500`
pub const ENV_PREFIX: &str = "MIGRATE";

const ENV_SEPARATOR: &str = "__";

/// Loaded, validated configuration plus where it came from
#[derive(Debug)]
pub struct ConfigManager {
    config: MigrationConfig,
    environment: String,
    config_file: Option<PathBuf>,
}

impl ConfigManager {
    /// Load from `migration.toml` (if present) and the process environment
    pub fn load() -> Result<Arc<ConfigManager>> {
        Self::load_from_file(None)
    }

    /// Load from an explicit TOML file, which must then exist
    pub fn load_from_file(path: Option<&Path>) -> Result<Arc<ConfigManager>> {
        Self::load_with_env(path, None)
    }

    /// Load with an explicit set of environment variables instead of the
    /// process environment
    ///
    /// Keys are full variable names, e.g. `MIGRATE__ENGINE__CONCURRENCY`.
    pub fn load_with_env(
        path: Option<&Path>,
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let (file, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        let config_file = file.exists().then(|| file.clone());

        debug!(
            environment = %environment,
            file = %file.display(),
            required,
            "Loading migration configuration"
        );

        let defaults = Config::try_from(&MigrationConfig::default())?;
        let env_source = Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true)
            .source(env_vars);

        let config: MigrationConfig = Config::builder()
            .add_source(defaults)
            .add_source(
                File::from(file.as_path())
                    .format(FileFormat::Toml)
                    .required(required),
            )
            .add_source(env_source)
            .build()?
            .try_deserialize()?;

        config.validate()?;

        let sanitized = Self::sanitize_config_for_logging(&config);
        debug!(
            "Configuration loaded successfully: {}",
            serde_json::to_string_pretty(&sanitized)
                .unwrap_or_else(|_| "[serialization error]".to_string())
        );
        info!(
            environment = %environment,
            page_size = config.scan.page_size,
            concurrency = config.engine.concurrency,
            ledger_file = %config.engine.ledger_file.display(),
            "🔧 CONFIG: Migration configuration loaded"
        );

        Ok(Arc::new(ConfigManager {
            config,
            environment,
            config_file,
        }))
    }

    /// Wrap an already-built configuration after validating it
    pub fn from_config(config: MigrationConfig) -> Result<Arc<ConfigManager>> {
        config.validate()?;
        Ok(Arc::new(ConfigManager {
            config,
            environment: Self::detect_environment(),
            config_file: None,
        }))
    }

    pub fn config(&self) -> &MigrationConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    /// The TOML file that contributed to this configuration, if any
    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    /// Configuration as JSON with credentials-related fields masked
    pub fn debug_config(&self) -> serde_json::Value {
        Self::sanitize_config_for_logging(&self.config)
    }

    fn detect_environment() -> String {
        env::var("MIGRATE_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn sanitize_config_for_logging(config: &MigrationConfig) -> serde_json::Value {
        let mut config_json = serde_json::to_value(config).unwrap_or(serde_json::Value::Null);
        let sensitive_patterns = ["profile", "endpoint", "secret", "token", "credential", "password"];
        Self::sanitize_json_recursive(&mut config_json, &sensitive_patterns);
        config_json
    }

    fn sanitize_json_recursive(value: &mut serde_json::Value, sensitive_patterns: &[&str]) {
        match value {
            serde_json::Value::Object(map) => {
                for (key, val) in map.iter_mut() {
                    let key_lower = key.to_lowercase();
                    let is_sensitive = sensitive_patterns
                        .iter()
                        .any(|pattern| key_lower.contains(pattern));

                    if !is_sensitive {
                        Self::sanitize_json_recursive(val, sensitive_patterns);
                        continue;
                    }
                    match val {
                        serde_json::Value::Null => {}
                        serde_json::Value::String(s) if s.is_empty() => {
                            *val = serde_json::Value::String("[EMPTY]".to_string());
                        }
                        serde_json::Value::String(s) => {
                            let chars: Vec<char> = s.chars().collect();
                            let masked = if chars.len() > 4 {
                                let head: String = chars[..2].iter().collect();
                                let tail: String = chars[chars.len() - 2..].iter().collect();
                                format!("{head}***{tail}")
                            } else {
                                "***".to_string()
                            };
                            *val = serde_json::Value::String(format!("[MASKED: {masked}]"));
                        }
                        _ => *val = serde_json::Value::String("[MASKED]".to_string()),
                    }
                }
            }
            serde_json::Value::Array(arr) => {
                for item in arr.iter_mut() {
                    Self::sanitize_json_recursive(item, sensitive_patterns);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::DecodePolicy;
    use crate::error::MigrationError;

    fn env(pairs: &[(&str, &str)]) -> Option<HashMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn test_file_then_environment_layering() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration.toml");
        std::fs::write(
            &path,
            r#"
[scan]
page_size = 250
decode_policy = "abort"

[engine]
concurrency = 5
"#,
        )
        .unwrap();

        let manager = ConfigManager::load_with_env(
            Some(&path),
            env(&[("MIGRATE__ENGINE__CONCURRENCY", "8")]),
        )
        .unwrap();
        let config = manager.config();
        assert_eq!(config.scan.page_size, 250);
        assert_eq!(config.scan.decode_policy, DecodePolicy::Abort);
        assert_eq!(config.engine.concurrency, 8);
        assert_eq!(config.mutation.payload_attribute, "data");
        assert_eq!(manager.config_file(), Some(path.as_path()));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ConfigManager::load_with_env(Some(&dir.path().join("absent.toml")), env(&[]));
        assert!(matches!(result, Err(MigrationError::Configuration { .. })));
    }

    #[test]
    fn test_invalid_override_fails_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("migration.toml");
        std::fs::write(&path, "[engine]\nconcurrency = 0\n").unwrap();
        let result = ConfigManager::load_with_env(Some(&path), env(&[]));
        assert!(matches!(result, Err(MigrationError::Configuration { .. })));
    }

    #[test]
    fn test_debug_config_masks_profile_and_endpoint() {
        let mut config = MigrationConfig::default();
        config.store.profile = Some("registry-admin".to_string());
        config.store.endpoint = Some("http://localhost:8000".to_string());
        let manager = ConfigManager::from_config(config).unwrap();

        let view = manager.debug_config();
        assert_eq!(view["store"]["profile"], "[MASKED: re***in]");
        assert!(view["store"]["endpoint"].as_str().unwrap().starts_with("[MASKED"));
        assert_eq!(view["store"]["region"], serde_json::Value::Null);
        assert_eq!(view["scan"]["page_size"], 700);
    }
}
