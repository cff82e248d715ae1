//! Studio configuration loaded from TOML.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use visionary_contracts::models::{ModelRegistry, PRO_IMAGE_MODEL, STANDARD_IMAGE_MODEL};
use visionary_contracts::vault::VAULT_SLOT_NAME;

pub const CONFIG_ENV: &str = "VISIONARY_CONFIG";
pub const API_BASE_ENV: &str = "GEMINI_API_BASE";
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const MIN_RETRY_MULTIPLIER: f64 = 1.5;
pub const MAX_RETRY_MULTIPLIER: f64 = 4.0;
pub const MAX_BASE_DELAY_MS: u64 = 30_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudioConfig {
    pub backend: BackendConfig,
    pub models: ModelsConfig,
    pub retry: RetryConfig,
    pub cooldown: CooldownConfig,
    pub vault: VaultConfig,
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub api_base: String,
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub standard: String,
    pub pro: String,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            standard: STANDARD_IMAGE_MODEL.to_string(),
            pro: PRO_IMAGE_MODEL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
}

impl RetryConfig {
    pub fn clamped(mut self) -> Self {
        self.max_attempts = self.max_attempts.clamp(1, 8);
        self.base_delay_ms = self.base_delay_ms.clamp(1, MAX_BASE_DELAY_MS);
        self.multiplier = if self.multiplier.is_nan() {
            RetryConfig::default().multiplier
        } else {
            self.multiplier.clamp(MIN_RETRY_MULTIPLIER, MAX_RETRY_MULTIPLIER)
        };
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2000,
            multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CooldownConfig {
    pub default_seconds: u64,
    pub honor_retry_hint: bool,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            default_seconds: 60,
            honor_retry_hint: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub path: Option<PathBuf>,
    pub max_bytes: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalConfig {
    pub path: Option<PathBuf>,
}

impl StudioConfig {
    /// Loads `explicit`, else `$VISIONARY_CONFIG`, else the per-user config file.
    /// A missing file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => Self::config_path(),
        };
        let mut config = match path {
            Some(path) if path.exists() => Self::load_from(&path)?,
            Some(path) if explicit.is_some() => {
                anyhow::bail!("config file not found: {}", path.display())
            }
            _ => Self::default(),
        };
        config.apply_env();
        Ok(config.normalized())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let config: StudioConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config {}", path.display()))?;
        tracing::debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn config_path() -> Option<PathBuf> {
        if let Some(value) = non_empty_env(CONFIG_ENV) {
            return Some(PathBuf::from(value));
        }
        dirs::config_dir().map(|dir| dir.join("visionary").join("config.toml"))
    }

    fn apply_env(&mut self) {
        if let Some(base) = non_empty_env(API_BASE_ENV) {
            self.backend.api_base = base;
        }
    }

    /// Clamps out-of-range values instead of rejecting the file.
    pub fn normalized(mut self) -> Self {
        self.backend.api_base = self.backend.api_base.trim().trim_end_matches('/').to_string();
        if self.backend.api_base.is_empty() {
            self.backend.api_base = DEFAULT_API_BASE.to_string();
        }
        self.backend.request_timeout_secs = self.backend.request_timeout_secs.clamp(5, 600);
        self.retry = self.retry.clamped();
        self.cooldown.default_seconds = self.cooldown.default_seconds.max(1);
        if self.models.standard.trim().is_empty() {
            self.models.standard = STANDARD_IMAGE_MODEL.to_string();
        }
        if self.models.pro.trim().is_empty() {
            self.models.pro = PRO_IMAGE_MODEL.to_string();
        }
        self
    }

    pub fn vault_path(&self) -> PathBuf {
        if let Some(path) = self.vault.path.as_ref() {
            return path.clone();
        }
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("visionary")
            .join(format!("{VAULT_SLOT_NAME}.json"))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.backend.request_timeout_secs)
    }

    pub fn model_registry(&self) -> ModelRegistry {
        ModelRegistry::new(&self.models.standard, &self.models.pro)
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "")?;
        let config = StudioConfig::load_from(&path)?.normalized();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.base_delay_ms, 2000);
        assert_eq!(config.cooldown.default_seconds, 60);
        assert!(config.cooldown.honor_retry_hint);
        assert_eq!(config.models.pro, PRO_IMAGE_MODEL);
        assert_eq!(config.backend.request_timeout_secs, 90);
        Ok(())
    }

    #[test]
    fn partial_file_overrides_and_clamps() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[backend]
api_base = "http://localhost:8080/v1beta/"

[retry]
max_attempts = 40
multiplier = 0.5

[vault]
path = "/tmp/vault.json"
max_bytes = 1024
"#,
        )?;
        let config = StudioConfig::load_from(&path)?.normalized();
        assert_eq!(config.backend.api_base, "http://localhost:8080/v1beta");
        assert_eq!(config.retry.max_attempts, 8);
        assert_eq!(config.retry.multiplier, MIN_RETRY_MULTIPLIER);
        assert_eq!(config.vault_path(), PathBuf::from("/tmp/vault.json"));
        assert_eq!(config.vault.max_bytes, Some(1024));
        Ok(())
    }

    #[test]
    fn runaway_retry_values_are_bounded() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(
            &path,
            "[retry]\nmax_attempts = 8\nbase_delay_ms = 900000000\nmultiplier = 1e12\n",
        )?;
        let config = StudioConfig::load_from(&path)?.normalized();
        assert_eq!(config.retry.base_delay_ms, MAX_BASE_DELAY_MS);
        assert_eq!(config.retry.multiplier, MAX_RETRY_MULTIPLIER);

        let nan = RetryConfig {
            multiplier: f64::NAN,
            ..RetryConfig::default()
        }
        .clamped();
        assert_eq!(nan.multiplier, 2.0);
        Ok(())
    }

    #[test]
    fn explicit_missing_file_is_an_error() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = temp.path().join("nope.toml");
        assert!(StudioConfig::load(Some(missing.as_path())).is_err());
        Ok(())
    }

    #[test]
    fn invalid_toml_reports_path() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.toml");
        std::fs::write(&path, "[retry\nmax_attempts = ")?;
        let err = StudioConfig::load_from(&path)
            .err()
            .map(|err| err.to_string())
            .unwrap_or_default();
        assert!(err.contains("invalid config"));
        Ok(())
    }

    #[test]
    fn registry_uses_configured_models() {
        let mut config = StudioConfig::default();
        config.models.standard = "flash-next".to_string();
        let registry = config.model_registry();
        assert_eq!(
            registry.model_name(visionary_contracts::artifact::ModelTier::Standard),
            "flash-next"
        );
    }
}
