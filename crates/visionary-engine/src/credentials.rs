//! Credential sources and the gate in front of credentialed tiers.

use std::sync::{Arc, Mutex};

use visionary_contracts::artifact::ModelTier;

use crate::config::non_empty_env;
use crate::error::CredentialMissing;

pub const CREDENTIAL_ENV_KEYS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "API_KEY"];

/// Where the API key comes from. Reads must be cheap; they happen per attempt.
pub trait CredentialSource: Send + Sync {
    fn credential(&self) -> Option<String>;

    /// Asks the host to let the user pick or enter a credential. Returns once the
    /// picker has closed, whatever the user did.
    fn open_selection(&self) -> anyhow::Result<()>;
}

/// Reads the first non-empty of `GEMINI_API_KEY`, `GOOGLE_API_KEY`, `API_KEY`.
/// There is no picker.
#[derive(Debug, Clone, Default)]
pub struct EnvCredentialSource;

impl CredentialSource for EnvCredentialSource {
    fn credential(&self) -> Option<String> {
        CREDENTIAL_ENV_KEYS.iter().find_map(|key| non_empty_env(key))
    }

    fn open_selection(&self) -> anyhow::Result<()> {
        tracing::debug!("no credential picker available; set GEMINI_API_KEY");
        Ok(())
    }
}

/// In-memory credential. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentialSource {
    key: Arc<Mutex<Option<String>>>,
}

impl StaticCredentialSource {
    pub fn new(key: Option<String>) -> Self {
        Self {
            key: Arc::new(Mutex::new(key)),
        }
    }

    pub fn set(&self, key: Option<String>) {
        if let Ok(mut guard) = self.key.lock() {
            *guard = key
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
        }
    }
}

impl CredentialSource for StaticCredentialSource {
    fn credential(&self) -> Option<String> {
        self.key.lock().ok().and_then(|guard| guard.clone())
    }

    fn open_selection(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Clone)]
pub struct CredentialGate {
    source: Arc<dyn CredentialSource>,
}

impl CredentialGate {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self { source }
    }

    pub fn has_usable_credential(&self, tier: ModelTier) -> bool {
        let present = self.source.credential().is_some();
        if !present {
            tracing::debug!(tier = %tier, "no credential present");
        }
        present
    }

    /// Opens the host picker, then re-reads the source.
    pub fn request_credential_selection(&self) -> Result<(), CredentialMissing> {
        if let Err(err) = self.source.open_selection() {
            tracing::warn!(error = %err, "credential picker failed");
        }
        if self.source.credential().is_some() {
            Ok(())
        } else {
            Err(CredentialMissing)
        }
    }

    pub fn credential(&self) -> Option<String> {
        self.source.credential()
    }
}
