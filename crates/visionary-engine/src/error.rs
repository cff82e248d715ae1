//! Typed failures for the generation pipeline.

use thiserror::Error;
use visionary_contracts::artifact::ModelTier;

/// Rejected before anything reaches the backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Describe your vision or attach a reference image.")]
    EmptyInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no usable credential is available")]
pub struct CredentialMissing;

/// Why a generation attempt did not yield an artifact. Derived per attempt and
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureClassification {
    #[error("Project connection required. Please link your API key.")]
    CredentialMissing,
    #[error("The linked API key cannot use the {0} tier. Link a different key or switch tiers.")]
    CredentialRejected(ModelTier),
    #[error("Rate limit hit. Cooling down engines...")]
    RateLimited { retry_after: Option<u64> },
    #[error("The request was blocked by provider-side safety filters. Try a different prompt.")]
    ContentBlocked,
    #[error("Rendering failed: {0}")]
    BackendError(String),
    #[error("Empty response from engine.")]
    MalformedResponse,
}

impl FailureClassification {
    pub fn kind(&self) -> &'static str {
        match self {
            FailureClassification::CredentialMissing => "credential_missing",
            FailureClassification::CredentialRejected(_) => "credential_rejected",
            FailureClassification::RateLimited { .. } => "rate_limited",
            FailureClassification::ContentBlocked => "content_blocked",
            FailureClassification::BackendError(_) => "backend_error",
            FailureClassification::MalformedResponse => "malformed_response",
        }
    }
}

/// What the caller should do after a surfaced failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The host picker has already been opened; resubmission is allowed at once.
    SelectCredential,
    Cooldown { seconds: u64 },
    RevisePrompt,
    None,
}

/// Transport-level failure reported by a [`crate::backend::Backend`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<u64>,
        message: String,
    },
    #[error("unauthorized ({status}): {message}")]
    Unauthorized { status: u16, message: String },
    #[error("{message}")]
    Other { status: Option<u16>, message: String },
}

impl TransportError {
    /// Classifies an HTTP failure by status code, falling back to status markers in
    /// the body.
    pub fn from_http_status(status: u16, body: &str, retry_after: Option<u64>) -> Self {
        let message = truncate_text(body.trim(), 512);
        if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
            return TransportError::RateLimited {
                retry_after,
                message,
            };
        }
        if matches!(status, 401 | 403)
            || body.contains("PERMISSION_DENIED")
            || body.contains("API_KEY_INVALID")
        {
            return TransportError::Unauthorized { status, message };
        }
        TransportError::Other {
            status: Some(status),
            message: format!("request failed ({status}): {message}"),
        }
    }

    pub fn other(message: impl Into<String>) -> Self {
        TransportError::Other {
            status: None,
            message: message.into(),
        }
    }

    /// True for explicit rate limits, a 429 status, or a named rate-limit marker in
    /// the text. Bare digits in the text never count.
    pub fn is_rate_limited(&self) -> bool {
        match self {
            TransportError::RateLimited { .. } => true,
            TransportError::Unauthorized { .. } => false,
            TransportError::Other { status, message } => {
                *status == Some(429) || has_rate_limit_marker(message)
            }
        }
    }

    pub fn retry_after(&self) -> Option<u64> {
        match self {
            TransportError::RateLimited { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn has_rate_limit_marker(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    text.contains("RESOURCE_EXHAUSTED")
        || lowered.contains("rate limit")
        || lowered.contains("quota exceeded")
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokerError {
    #[error("rate limit persisted after {attempts} attempts")]
    RateLimitExhausted {
        attempts: u32,
        retry_after: Option<u64>,
    },
    #[error(transparent)]
    Transport(TransportError),
    #[error("no usable credential is available")]
    CredentialMissing,
    #[error("request cancelled")]
    Cancelled,
}

impl InvokerError {
    pub fn classify(&self, tier: ModelTier) -> Option<FailureClassification> {
        match self {
            InvokerError::RateLimitExhausted { retry_after, .. } => {
                Some(FailureClassification::RateLimited {
                    retry_after: *retry_after,
                })
            }
            InvokerError::Transport(TransportError::Unauthorized { .. }) => {
                Some(FailureClassification::CredentialRejected(tier))
            }
            InvokerError::Transport(err) => {
                Some(FailureClassification::BackendError(err.to_string()))
            }
            InvokerError::CredentialMissing => Some(FailureClassification::CredentialMissing),
            InvokerError::Cancelled => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerateError {
    #[error(transparent)]
    Invalid(#[from] ValidationError),
    #[error("{failure}")]
    Failed {
        failure: FailureClassification,
        recovery: Recovery,
    },
    /// Not a failure; the caller stopped waiting.
    #[error("generation cancelled")]
    Cancelled,
    /// Only returned by the vault-aware entry point while a cooldown runs.
    #[error("Cooling down. Try again in {remaining}s.")]
    CoolingDown { remaining: u64 },
}

impl GenerateError {
    pub fn recovery(&self) -> Recovery {
        match self {
            GenerateError::Failed { recovery, .. } => *recovery,
            GenerateError::CoolingDown { remaining } => Recovery::Cooldown {
                seconds: *remaining,
            },
            _ => Recovery::None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, GenerateError::Cancelled)
    }
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
