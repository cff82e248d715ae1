//! Composes gate, builder, invoker and interpreter into one generation call.

use std::sync::{Arc, Mutex, MutexGuard};

use visionary_contracts::artifact::{Artifact, ModelTier};
use visionary_contracts::journal::{Journal, JournalEvent};
use visionary_contracts::models::ModelRegistry;
use visionary_contracts::vault::{ArtifactVault, PersistStatus};

use crate::backend::Backend;
use crate::cancel::{CancelToken, Sleeper};
use crate::config::{CooldownConfig, StudioConfig};
use crate::credentials::{CredentialGate, CredentialSource};
use crate::error::{FailureClassification, GenerateError, InvokerError, Recovery};
use crate::interpreter::interpret;
use crate::invoker::{BackendInvoker, RetryPolicy};
use crate::request::{GenerationRequest, UserInput};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutcome {
    pub artifact: Artifact,
    pub persist: PersistStatus,
}

pub struct Orchestrator {
    registry: ModelRegistry,
    gate: CredentialGate,
    invoker: BackendInvoker,
    cooldown: CooldownConfig,
    journal: Option<Journal>,
}

impl Orchestrator {
    pub fn new(
        backend: Arc<dyn Backend>,
        credentials: Arc<dyn CredentialSource>,
        config: &StudioConfig,
    ) -> Self {
        let gate = CredentialGate::new(credentials);
        let invoker = BackendInvoker::new(
            backend,
            gate.clone(),
            RetryPolicy::from_config(&config.retry),
        );
        Self {
            registry: config.model_registry(),
            gate,
            invoker,
            cooldown: config.cooldown.clone(),
            journal: None,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.invoker = self.invoker.with_sleeper(sleeper);
        self
    }

    pub fn with_journal(mut self, journal: Option<Journal>) -> Self {
        self.invoker = self.invoker.with_journal(journal.clone());
        self.journal = journal;
        self
    }

    pub fn gate(&self) -> &CredentialGate {
        &self.gate
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn backend_name(&self) -> &str {
        self.invoker.backend().name()
    }

    /// Runs one generation. Never touches a vault.
    pub fn generate(
        &self,
        input: UserInput,
        cancel: &CancelToken,
    ) -> Result<Artifact, GenerateError> {
        let request = GenerationRequest::build(input)?;
        let tier = request.model_tier;
        let backend_request = request.to_backend_request(&self.registry);
        tracing::info!(
            tier = %tier,
            model = %backend_request.model,
            ratio = %request.aspect_ratio,
            images = request.reference_images.len(),
            "generation started"
        );
        self.record(JournalEvent::GenerationStarted {
            tier,
            model: backend_request.model.clone(),
            aspect_ratio: request.aspect_ratio,
            image_size: request.image_size,
            images: request.reference_images.len(),
            seed: request.seed,
            backend: self.backend_name().to_string(),
        });

        if self.invoker.backend().requires_credential() && !self.gate.has_usable_credential(tier)
        {
            if self.gate.request_credential_selection().is_err() {
                return Err(self.fail(FailureClassification::CredentialMissing, tier));
            }
            tracing::info!("credential linked through picker");
        }

        let raw = match self.invoker.invoke(&backend_request, tier, cancel) {
            Ok(raw) => raw,
            Err(InvokerError::Cancelled) => {
                tracing::info!("generation cancelled");
                self.record(JournalEvent::GenerationCancelled { tier });
                return Err(GenerateError::Cancelled);
            }
            Err(err) => {
                let failure = err
                    .classify(tier)
                    .unwrap_or_else(|| FailureClassification::BackendError(err.to_string()));
                return Err(self.fail(failure, tier));
            }
        };
        if cancel.is_cancelled() {
            self.record(JournalEvent::GenerationCancelled { tier });
            return Err(GenerateError::Cancelled);
        }

        let image = interpret(&raw).map_err(|failure| self.fail(failure, tier))?;
        let artifact = Artifact::new(
            image.data_url(),
            request.label,
            tier,
            request.aspect_ratio,
            chrono::Utc::now().timestamp_millis(),
        );
        tracing::info!(id = %artifact.id, mime = %image.mime_type, "artifact created");
        self.record(JournalEvent::ArtifactCreated {
            artifact_id: artifact.id.clone(),
            tier,
            mime_type: image.mime_type.clone(),
            usage_metadata: raw.usage_metadata.clone(),
        });
        Ok(artifact)
    }

    /// Checks the submission gate, generates, then inserts on success or starts
    /// the cooldown on an exhausted rate limit. The vault lock is not held while
    /// the backend is working.
    pub fn generate_into(
        &self,
        vault: &Mutex<ArtifactVault>,
        input: UserInput,
        cancel: &CancelToken,
    ) -> Result<GenerationOutcome, GenerateError> {
        {
            let guard = lock_vault(vault);
            if !guard.can_submit() {
                return Err(GenerateError::CoolingDown {
                    remaining: guard.cooldown_remaining(),
                });
            }
        }

        match self.generate(input, cancel) {
            Ok(artifact) => {
                let persist = lock_vault(vault).insert(artifact.clone());
                if let Some(warning) = persist.warning() {
                    tracing::warn!(%warning, "artifact kept in memory only");
                }
                Ok(GenerationOutcome { artifact, persist })
            }
            Err(err) => {
                if let Recovery::Cooldown { seconds } = err.recovery() {
                    if !matches!(err, GenerateError::CoolingDown { .. }) {
                        lock_vault(vault).start_cooldown(seconds);
                        self.record(JournalEvent::CooldownStarted { seconds });
                    }
                }
                Err(err)
            }
        }
    }

    pub fn recovery_for(&self, failure: &FailureClassification) -> Recovery {
        match failure {
            FailureClassification::CredentialMissing
            | FailureClassification::CredentialRejected(_) => Recovery::SelectCredential,
            FailureClassification::RateLimited { retry_after } => Recovery::Cooldown {
                seconds: self.cooldown_seconds(*retry_after),
            },
            FailureClassification::ContentBlocked => Recovery::RevisePrompt,
            FailureClassification::BackendError(_) | FailureClassification::MalformedResponse => {
                Recovery::None
            }
        }
    }

    fn cooldown_seconds(&self, hint: Option<u64>) -> u64 {
        let seconds = match hint {
            Some(hint) if self.cooldown.honor_retry_hint => hint,
            _ => self.cooldown.default_seconds,
        };
        seconds.max(1)
    }

    fn fail(&self, failure: FailureClassification, tier: ModelTier) -> GenerateError {
        let recovery = self.recovery_for(&failure);
        if matches!(failure, FailureClassification::CredentialRejected(_)) {
            if let Err(err) = self.gate.request_credential_selection() {
                tracing::debug!(error = %err, "credential still missing after picker");
            }
        }
        match &failure {
            FailureClassification::BackendError(detail) => {
                tracing::error!(tier = %tier, detail = %detail, "generation failed")
            }
            other => tracing::warn!(tier = %tier, kind = other.kind(), "generation failed"),
        }
        self.record(JournalEvent::GenerationFailed {
            tier,
            kind: failure.kind().to_string(),
            message: failure.to_string(),
            recovery: recovery_label(recovery).to_string(),
            cooldown_seconds: match recovery {
                Recovery::Cooldown { seconds } => Some(seconds),
                _ => None,
            },
        });
        GenerateError::Failed { failure, recovery }
    }

    fn record(&self, event: JournalEvent) {
        if let Some(journal) = self.journal.as_ref() {
            journal.record(event);
        }
    }
}

fn recovery_label(recovery: Recovery) -> &'static str {
    match recovery {
        Recovery::SelectCredential => "select_credential",
        Recovery::Cooldown { .. } => "cooldown",
        Recovery::RevisePrompt => "revise_prompt",
        Recovery::None => "none",
    }
}

fn lock_vault(vault: &Mutex<ArtifactVault>) -> MutexGuard<'_, ArtifactVault> {
    vault.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use visionary_contracts::artifact::{AspectRatio, ReferenceImage, IMAGE_ONLY_ARTIFACT_LABEL};
    use visionary_contracts::vault::{MemorySlot, SortOrder};

    use super::*;
    use crate::backend::{Candidate, DryrunBackend, Part, RawResponse};
    use crate::credentials::StaticCredentialSource;
    use crate::error::{TransportError, ValidationError};
    use crate::invoker::tests::{rate_limited, RecordingSleeper, ScriptedBackend};

    fn image_response(data: &str) -> Result<RawResponse, TransportError> {
        Ok(RawResponse::with_candidates(vec![Candidate::new(
            vec![Part::text("Rendered."), Part::inline("image/png", data)],
            Some("STOP"),
        )]))
    }

    fn orchestrator(backend: Arc<ScriptedBackend>, key: Option<&str>) -> Orchestrator {
        Orchestrator::new(
            backend,
            Arc::new(StaticCredentialSource::new(key.map(str::to_string))),
            &StudioConfig::default(),
        )
        .with_sleeper(Arc::new(RecordingSleeper::default()))
    }

    fn prompt(text: &str) -> UserInput {
        UserInput {
            prompt: text.to_string(),
            ..UserInput::default()
        }
    }

    fn vault() -> Mutex<ArtifactVault> {
        Mutex::new(ArtifactVault::new(MemorySlot::new()))
    }

    #[test]
    fn empty_input_never_reaches_backend() {
        let backend = Arc::new(ScriptedBackend::new(vec![image_response("AAAA")]));
        let result = orchestrator(backend.clone(), Some("key"))
            .generate(prompt("  "), &CancelToken::new());
        assert_eq!(result, Err(GenerateError::Invalid(ValidationError::EmptyInput)));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn success_inserts_one_artifact_at_front() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new(vec![image_response("AAAA")]));
        let orchestrator = orchestrator(backend, Some("key"));
        let vault = vault();
        lock_vault(&vault).insert(Artifact::new(
            "data:image/png;base64,OLD",
            "older",
            ModelTier::Standard,
            AspectRatio::Square,
            0,
        ));

        let outcome = orchestrator.generate_into(&vault, prompt("A Red Fox"), &CancelToken::new())?;
        assert_eq!(outcome.persist, PersistStatus::Saved);
        assert_eq!(outcome.artifact.url, "data:image/png;base64,AAAA");
        assert_eq!(outcome.artifact.source_prompt, "A Red Fox");

        let guard = lock_vault(&vault);
        assert_eq!(guard.len(), 2);
        let newest = guard.query("", SortOrder::Newest);
        assert_eq!(newest.first().map(|a| a.id.clone()), Some(outcome.artifact.id));
        Ok(())
    }

    #[test]
    fn image_only_artifacts_get_transformation_label() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new(vec![image_response("AAAA")]));
        let input = UserInput {
            reference_images: vec![ReferenceImage::new("image/png", "REF")],
            ..UserInput::default()
        };
        let artifact = orchestrator(backend, Some("key")).generate(input, &CancelToken::new())?;
        assert_eq!(artifact.source_prompt, IMAGE_ONLY_ARTIFACT_LABEL);
        Ok(())
    }

    #[test]
    fn exhausted_rate_limit_starts_cooldown_and_gates_submission() {
        let backend = Arc::new(ScriptedBackend::new(vec![rate_limited()]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let orchestrator = orchestrator(backend.clone(), Some("key")).with_sleeper(sleeper.clone());
        let vault = vault();

        let err = orchestrator
            .generate_into(&vault, prompt("fox"), &CancelToken::new())
            .err();
        assert_eq!(
            err.as_ref().map(GenerateError::recovery),
            Some(Recovery::Cooldown { seconds: 60 })
        );
        assert_eq!(backend.calls(), 3);
        let delays = sleeper.delays();
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));

        assert!(!lock_vault(&vault).can_submit());
        let blocked = orchestrator.generate_into(&vault, prompt("fox"), &CancelToken::new());
        assert!(matches!(blocked, Err(GenerateError::CoolingDown { remaining: 60 })));
        assert_eq!(backend.calls(), 3);

        let mut guard = lock_vault(&vault);
        for _ in 0..59 {
            assert!(!guard.tick());
        }
        assert!(guard.tick());
        assert!(guard.can_submit());
    }

    #[test]
    fn retry_hint_sets_cooldown_length() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(TransportError::RateLimited {
            retry_after: Some(17),
            message: "slow down".to_string(),
        })]));
        let vault = vault();
        let err = orchestrator(backend, Some("key"))
            .generate_into(&vault, prompt("fox"), &CancelToken::new())
            .err();
        assert_eq!(
            err.map(|err| err.recovery()),
            Some(Recovery::Cooldown { seconds: 17 })
        );
        assert_eq!(lock_vault(&vault).cooldown_remaining(), 17);
    }

    #[test]
    fn content_block_suggests_revision() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(RawResponse::with_candidates(
            vec![Candidate::new(vec![], Some("SAFETY"))],
        ))]));
        let result = orchestrator(backend, Some("key")).generate(prompt("fox"), &CancelToken::new());
        assert_eq!(
            result,
            Err(GenerateError::Failed {
                failure: FailureClassification::ContentBlocked,
                recovery: Recovery::RevisePrompt,
            })
        );
    }

    struct CountingPicker {
        inner: StaticCredentialSource,
        opened: AtomicUsize,
        links: bool,
    }

    impl CredentialSource for CountingPicker {
        fn credential(&self) -> Option<String> {
            self.inner.credential()
        }

        fn open_selection(&self) -> anyhow::Result<()> {
            self.opened.fetch_add(1, Ordering::SeqCst);
            if self.links {
                self.inner.set(Some("picked".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn missing_credential_opens_picker_and_surfaces_failure() {
        let backend = Arc::new(ScriptedBackend::new(vec![image_response("AAAA")]));
        let picker = Arc::new(CountingPicker {
            inner: StaticCredentialSource::default(),
            opened: AtomicUsize::new(0),
            links: false,
        });
        let orchestrator = Orchestrator::new(backend.clone(), picker.clone(), &StudioConfig::default());
        let input = UserInput {
            prompt: "fox".to_string(),
            model_tier: ModelTier::Pro,
            ..UserInput::default()
        };
        let result = orchestrator.generate(input, &CancelToken::new());
        assert_eq!(
            result,
            Err(GenerateError::Failed {
                failure: FailureClassification::CredentialMissing,
                recovery: Recovery::SelectCredential,
            })
        );
        assert_eq!(backend.calls(), 0);
        assert_eq!(picker.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn picker_that_links_a_key_lets_generation_proceed() -> anyhow::Result<()> {
        let backend = Arc::new(ScriptedBackend::new(vec![image_response("AAAA")]));
        let picker = Arc::new(CountingPicker {
            inner: StaticCredentialSource::default(),
            opened: AtomicUsize::new(0),
            links: true,
        });
        let orchestrator = Orchestrator::new(backend.clone(), picker.clone(), &StudioConfig::default());
        orchestrator.generate(prompt("fox"), &CancelToken::new())?;
        assert_eq!(picker.opened.load(Ordering::SeqCst), 1);
        assert_eq!(backend.calls(), 1);
        Ok(())
    }

    #[test]
    fn rejected_credential_maps_to_select_credential() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(TransportError::Unauthorized {
            status: 403,
            message: "PERMISSION_DENIED".to_string(),
        })]));
        let input = UserInput {
            prompt: "fox".to_string(),
            model_tier: ModelTier::Pro,
            ..UserInput::default()
        };
        let result = orchestrator(backend, Some("key")).generate(input, &CancelToken::new());
        assert_eq!(
            result,
            Err(GenerateError::Failed {
                failure: FailureClassification::CredentialRejected(ModelTier::Pro),
                recovery: Recovery::SelectCredential,
            })
        );
    }

    #[test]
    fn cancellation_leaves_vault_and_cooldown_untouched() {
        let backend = Arc::new(ScriptedBackend::new(vec![rate_limited()]));
        let sleeper = Arc::new(RecordingSleeper {
            cancel_on_sleep: true,
            ..RecordingSleeper::default()
        });
        let orchestrator = orchestrator(backend, Some("key")).with_sleeper(sleeper);
        let vault = vault();
        let result = orchestrator.generate_into(&vault, prompt("fox"), &CancelToken::new());
        assert_eq!(result, Err(GenerateError::Cancelled));
        let guard = lock_vault(&vault);
        assert!(guard.is_empty());
        assert!(guard.can_submit());
    }

    #[test]
    fn lifecycle_is_journaled() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let orchestrator = Orchestrator::new(
            Arc::new(DryrunBackend),
            Arc::new(StaticCredentialSource::default()),
            &StudioConfig::default(),
        )
        .with_journal(Some(Journal::new(&path, "session-1")));
        orchestrator.generate(prompt("fox"), &CancelToken::new())?;

        let names: Vec<&str> = Journal::read(&path)?
            .iter()
            .map(|entry| entry.event.name())
            .collect();
        assert_eq!(names, vec!["generation_started", "artifact_created"]);
        Ok(())
    }

    #[test]
    fn exhausted_rate_limit_journals_failure_and_cooldown() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let backend = Arc::new(ScriptedBackend::new(vec![rate_limited()]));
        let orchestrator =
            orchestrator(backend, Some("key")).with_journal(Some(Journal::new(&path, "s")));
        let vault = vault();
        let result = orchestrator.generate_into(&vault, prompt("fox"), &CancelToken::new());
        assert!(result.is_err());

        let events: Vec<JournalEvent> = Journal::read(&path)?
            .into_iter()
            .map(|entry| entry.event)
            .collect();
        assert_eq!(events.len(), 5);
        assert!(matches!(
            &events[3],
            JournalEvent::GenerationFailed {
                recovery,
                cooldown_seconds: Some(60),
                ..
            } if recovery == "cooldown"
        ));
        assert_eq!(events[4], JournalEvent::CooldownStarted { seconds: 60 });
        Ok(())
    }
}
