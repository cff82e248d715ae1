use std::sync::Arc;
use std::time::Duration;

use visionary_contracts::artifact::ModelTier;
use visionary_contracts::journal::{Journal, JournalEvent};

use crate::backend::{Backend, RawResponse};
use crate::cancel::{run_cancellable, CancelToken, Interrupted, Sleeper, ThreadSleeper};
use crate::config::RetryConfig;
use crate::credentials::CredentialGate;
use crate::error::{InvokerError, TransportError};
use crate::request::BackendRequest;

const DEFAULT_POLL: Duration = Duration::from_millis(50);
/// Ceiling for a single backoff wait.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        let config = config.clone().clamped();
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
        }
    }

    /// Wait before attempt `next` (2-based): `base * multiplier^(next - 2)`,
    /// saturating at [`MAX_RETRY_DELAY`].
    pub fn delay_before(&self, next: u32) -> Duration {
        let exponent = next.saturating_sub(2).min(i32::MAX as u32) as i32;
        let seconds = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(seconds)
            .map(|delay| delay.min(MAX_RETRY_DELAY))
            .unwrap_or(MAX_RETRY_DELAY)
    }
}

/// Issues backend requests with bounded retry on rate limits.
pub struct BackendInvoker {
    backend: Arc<dyn Backend>,
    gate: CredentialGate,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    journal: Option<Journal>,
    poll: Duration,
}

impl BackendInvoker {
    pub fn new(backend: Arc<dyn Backend>, gate: CredentialGate, policy: RetryPolicy) -> Self {
        Self {
            backend,
            gate,
            policy,
            sleeper: Arc::new(ThreadSleeper),
            journal: None,
            poll: DEFAULT_POLL,
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_journal(mut self, journal: Option<Journal>) -> Self {
        self.journal = journal;
        self
    }

    pub fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn invoke(
        &self,
        request: &BackendRequest,
        tier: ModelTier,
        cancel: &CancelToken,
    ) -> Result<RawResponse, InvokerError> {
        let max_attempts = self.policy.max_attempts;
        let mut last_hint = None;
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(InvokerError::Cancelled);
            }
            let credential = self.gate.credential();
            if credential.is_none() && self.backend.requires_credential() {
                return Err(InvokerError::CredentialMissing);
            }

            let backend = Arc::clone(&self.backend);
            let owned_request = request.clone();
            let outcome = run_cancellable(cancel, self.poll, move || {
                backend.generate(&owned_request, credential.as_deref())
            });
            let err = match outcome {
                Ok(Ok(raw)) => {
                    tracing::debug!(attempt, backend = self.backend.name(), "backend responded");
                    return Ok(raw);
                }
                Ok(Err(err)) => err,
                Err(Interrupted::Cancelled) => return Err(InvokerError::Cancelled),
                Err(Interrupted::WorkerLost) => {
                    return Err(InvokerError::Transport(TransportError::other(
                        "backend worker exited without a response",
                    )))
                }
            };

            if !err.is_rate_limited() {
                tracing::warn!(attempt, error = %err, "backend request failed");
                return Err(InvokerError::Transport(err));
            }
            last_hint = err.retry_after().or(last_hint);
            if attempt == max_attempts {
                break;
            }

            let delay = self.policy.delay_before(attempt + 1);
            tracing::warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                tier = %tier,
                "rate limited; backing off"
            );
            self.record_rate_limited(attempt, delay, &err);
            if !self.sleeper.sleep(delay, cancel) {
                return Err(InvokerError::Cancelled);
            }
        }

        Err(InvokerError::RateLimitExhausted {
            attempts: max_attempts,
            retry_after: last_hint,
        })
    }

    fn record_rate_limited(&self, attempt: u32, delay: Duration, err: &TransportError) {
        if let Some(journal) = self.journal.as_ref() {
            journal.record(JournalEvent::AttemptRateLimited {
                attempt,
                delay_ms: delay.as_millis() as u64,
                retry_after: err.retry_after(),
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use visionary_contracts::models::ModelRegistry;

    use super::*;
    use crate::credentials::StaticCredentialSource;
    use crate::request::{GenerationRequest, UserInput};

    /// Replays scripted outcomes; the last one repeats.
    pub(crate) struct ScriptedBackend {
        pub script: Mutex<VecDeque<Result<RawResponse, TransportError>>>,
        pub calls: AtomicUsize,
        pub keyless: bool,
        pub credentials: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedBackend {
        pub(crate) fn new(script: Vec<Result<RawResponse, TransportError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                keyless: false,
                credentials: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub(crate) fn credentials(&self) -> Vec<Option<String>> {
            self.credentials
                .lock()
                .map(|seen| seen.clone())
                .unwrap_or_default()
        }
    }

    impl Backend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn requires_credential(&self) -> bool {
            !self.keyless
        }

        fn generate(
            &self,
            _request: &BackendRequest,
            credential: Option<&str>,
        ) -> Result<RawResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut seen) = self.credentials.lock() {
                seen.push(credential.map(str::to_string));
            }
            let mut script = self
                .script
                .lock()
                .map_err(|_| TransportError::other("script lock poisoned"))?;
            if script.len() > 1 {
                script
                    .pop_front()
                    .unwrap_or_else(|| Err(TransportError::other("script exhausted")))
            } else {
                script
                    .front()
                    .cloned()
                    .unwrap_or_else(|| Err(TransportError::other("script exhausted")))
            }
        }
    }

    /// Records requested delays and returns immediately.
    #[derive(Default)]
    pub(crate) struct RecordingSleeper {
        pub delays: Mutex<Vec<Duration>>,
        pub cancel_on_sleep: bool,
    }

    impl RecordingSleeper {
        pub(crate) fn delays(&self) -> Vec<Duration> {
            self.delays.lock().map(|rows| rows.clone()).unwrap_or_default()
        }
    }

    impl Sleeper for RecordingSleeper {
        fn sleep(&self, delay: Duration, cancel: &CancelToken) -> bool {
            if let Ok(mut rows) = self.delays.lock() {
                rows.push(delay);
            }
            if self.cancel_on_sleep {
                cancel.cancel();
                return false;
            }
            true
        }
    }

    pub(crate) fn rate_limited() -> Result<RawResponse, TransportError> {
        Err(TransportError::RateLimited {
            retry_after: None,
            message: "429 Too Many Requests".to_string(),
        })
    }

    fn request() -> BackendRequest {
        GenerationRequest::build(UserInput {
            prompt: "a fox".to_string(),
            ..UserInput::default()
        })
        .map(|request| request.to_backend_request(&ModelRegistry::default()))
        .unwrap_or_else(|err| panic!("request should build: {err}"))
    }

    fn invoker(
        backend: Arc<ScriptedBackend>,
        sleeper: Arc<RecordingSleeper>,
        key: Option<&str>,
    ) -> BackendInvoker {
        let gate = CredentialGate::new(Arc::new(StaticCredentialSource::new(
            key.map(str::to_string),
        )));
        BackendInvoker::new(backend, gate, RetryPolicy::default()).with_sleeper(sleeper)
    }

    #[test]
    fn delays_grow_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_before(2), Duration::from_secs(2));
        assert_eq!(policy.delay_before(3), Duration::from_secs(4));
        assert_eq!(policy.delay_before(4), Duration::from_secs(8));
    }

    #[test]
    fn oversized_policy_saturates_instead_of_panicking() {
        let policy = RetryPolicy {
            max_attempts: 8,
            base_delay: Duration::from_secs(2),
            multiplier: 1e12,
        };
        assert_eq!(policy.delay_before(8), MAX_RETRY_DELAY);
        assert_eq!(policy.delay_before(u32::MAX), MAX_RETRY_DELAY);

        let from_config = RetryPolicy::from_config(&RetryConfig {
            max_attempts: 8,
            base_delay_ms: 2000,
            multiplier: 1e12,
        });
        assert_eq!(from_config.multiplier, 4.0);
        let delays: Vec<Duration> = (2..=8).map(|next| from_config.delay_before(next)).collect();
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn rate_limits_retry_until_exhausted() {
        let backend = Arc::new(ScriptedBackend::new(vec![rate_limited()]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let result = invoker(backend.clone(), sleeper.clone(), Some("key")).invoke(
            &request(),
            ModelTier::Standard,
            &CancelToken::new(),
        );

        assert_eq!(
            result,
            Err(InvokerError::RateLimitExhausted {
                attempts: 3,
                retry_after: None
            })
        );
        assert_eq!(backend.calls(), 3);
        let delays = sleeper.delays();
        assert_eq!(delays.len(), 2);
        assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn success_after_rate_limit_returns_response() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            rate_limited(),
            Ok(RawResponse::default()),
        ]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let result = invoker(backend.clone(), sleeper, Some("key")).invoke(
            &request(),
            ModelTier::Standard,
            &CancelToken::new(),
        );
        assert_eq!(result, Ok(RawResponse::default()));
        assert_eq!(backend.calls(), 2);
    }

    /// Links a new key while the invoker is backing off.
    struct RelinkingSleeper {
        source: StaticCredentialSource,
        next_key: String,
    }

    impl Sleeper for RelinkingSleeper {
        fn sleep(&self, _delay: Duration, _cancel: &CancelToken) -> bool {
            self.source.set(Some(self.next_key.clone()));
            true
        }
    }

    #[test]
    fn key_linked_during_backoff_is_used_by_next_attempt() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            rate_limited(),
            Ok(RawResponse::default()),
        ]));
        let source = StaticCredentialSource::new(Some("old-key".to_string()));
        let sleeper = Arc::new(RelinkingSleeper {
            source: source.clone(),
            next_key: "new-key".to_string(),
        });
        let gate = CredentialGate::new(Arc::new(source));
        let result = BackendInvoker::new(backend.clone(), gate, RetryPolicy::default())
            .with_sleeper(sleeper)
            .invoke(&request(), ModelTier::Standard, &CancelToken::new());

        assert_eq!(result, Ok(RawResponse::default()));
        assert_eq!(
            backend.credentials(),
            vec![Some("old-key".to_string()), Some("new-key".to_string())]
        );
    }

    #[test]
    fn other_failures_are_not_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(TransportError::other(
            "connection reset",
        ))]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let result = invoker(backend.clone(), sleeper.clone(), Some("key")).invoke(
            &request(),
            ModelTier::Standard,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(InvokerError::Transport(_))));
        assert_eq!(backend.calls(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn server_error_with_429_in_body_is_not_retried() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(
            TransportError::from_http_status(500, "Internal error. Trace 7429113", None),
        )]));
        let sleeper = Arc::new(RecordingSleeper::default());
        let result = invoker(backend.clone(), sleeper.clone(), Some("key")).invoke(
            &request(),
            ModelTier::Standard,
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(InvokerError::Transport(_))));
        assert_eq!(backend.calls(), 1);
        assert!(sleeper.delays().is_empty());
    }

    #[test]
    fn retry_hint_is_carried_into_exhaustion() {
        let backend = Arc::new(ScriptedBackend::new(vec![Err(TransportError::RateLimited {
            retry_after: Some(31),
            message: String::new(),
        })]));
        let result = invoker(backend, Arc::new(RecordingSleeper::default()), Some("key")).invoke(
            &request(),
            ModelTier::Pro,
            &CancelToken::new(),
        );
        assert_eq!(
            result,
            Err(InvokerError::RateLimitExhausted {
                attempts: 3,
                retry_after: Some(31)
            })
        );
    }

    #[test]
    fn cancel_during_backoff_stops_retrying() {
        let backend = Arc::new(ScriptedBackend::new(vec![rate_limited()]));
        let sleeper = Arc::new(RecordingSleeper {
            cancel_on_sleep: true,
            ..RecordingSleeper::default()
        });
        let result = invoker(backend.clone(), sleeper, Some("key")).invoke(
            &request(),
            ModelTier::Standard,
            &CancelToken::new(),
        );
        assert_eq!(result, Err(InvokerError::Cancelled));
        assert_eq!(backend.calls(), 1);
    }

    #[test]
    fn missing_credential_short_circuits() {
        let backend = Arc::new(ScriptedBackend::new(vec![Ok(RawResponse::default())]));
        let result = invoker(backend.clone(), Arc::new(RecordingSleeper::default()), None)
            .invoke(&request(), ModelTier::Standard, &CancelToken::new());
        assert_eq!(result, Err(InvokerError::CredentialMissing));
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn keyless_backends_run_without_credential() {
        let mut scripted = ScriptedBackend::new(vec![Ok(RawResponse::default())]);
        scripted.keyless = true;
        let backend = Arc::new(scripted);
        let result = invoker(backend, Arc::new(RecordingSleeper::default()), None).invoke(
            &request(),
            ModelTier::Standard,
            &CancelToken::new(),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn rate_limit_attempts_are_journaled() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let backend = Arc::new(ScriptedBackend::new(vec![rate_limited()]));
        let invoker = invoker(backend, Arc::new(RecordingSleeper::default()), Some("key"))
            .with_journal(Some(Journal::new(&path, "session")));
        let _ = invoker.invoke(&request(), ModelTier::Standard, &CancelToken::new());

        let events: Vec<JournalEvent> = Journal::read(&path)?
            .into_iter()
            .map(|entry| entry.event)
            .collect();
        assert_eq!(
            events,
            vec![
                JournalEvent::AttemptRateLimited {
                    attempt: 1,
                    delay_ms: 2000,
                    retry_after: None,
                },
                JournalEvent::AttemptRateLimited {
                    attempt: 2,
                    delay_ms: 4000,
                    retry_after: None,
                },
            ]
        );
        Ok(())
    }
}
