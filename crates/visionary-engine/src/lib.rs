pub mod backend;
pub mod cancel;
pub mod config;
pub mod credentials;
pub mod error;
pub mod interpreter;
pub mod invoker;
pub mod orchestrator;
pub mod request;

use std::sync::Arc;

use anyhow::Result;
use visionary_contracts::vault::{ArtifactVault, FileSlot};

pub use backend::{Backend, BackendKind, DryrunBackend, GeminiBackend};
pub use cancel::CancelToken;
pub use config::StudioConfig;
pub use credentials::{CredentialGate, CredentialSource, EnvCredentialSource};
pub use error::{FailureClassification, GenerateError, Recovery};
pub use orchestrator::{GenerationOutcome, Orchestrator};
pub use request::UserInput;

/// Builds the backend named by `kind`.
pub fn build_backend(kind: BackendKind, config: &StudioConfig) -> Arc<dyn Backend> {
    match kind {
        BackendKind::Gemini => Arc::new(GeminiBackend::from_config(config)),
        BackendKind::Dryrun => Arc::new(DryrunBackend),
    }
}

/// Opens the file-backed vault described by `config` and loads it.
pub fn open_vault(config: &StudioConfig) -> Result<ArtifactVault> {
    let path = config.vault_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let slot = FileSlot::new(&path).with_max_bytes(config.vault.max_bytes);
    let vault = ArtifactVault::open(slot);
    tracing::debug!(path = %path.display(), artifacts = vault.len(), "vault opened");
    Ok(vault)
}
