use visionary_contracts::artifact::to_data_url;

use crate::backend::RawResponse;
use crate::error::FailureClassification;

/// Completion and block reasons that mean the content filter stopped the output.
pub const SAFETY_REASONS: &[&str] = &[
    "SAFETY",
    "IMAGE_SAFETY",
    "PROHIBITED_CONTENT",
    "BLOCKLIST",
    "SPII",
];

const DEFAULT_MIME: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    pub fn data_url(&self) -> String {
        to_data_url(&self.mime_type, &self.data)
    }
}

fn is_safety_reason(reason: &str) -> bool {
    SAFETY_REASONS.contains(&reason.trim().to_ascii_uppercase().as_str())
}

/// Extracts the first inline image, scanning candidates and their parts in
/// order. Inline data wins over any stated completion reason.
pub fn interpret(raw: &RawResponse) -> Result<InlineImage, FailureClassification> {
    let candidates = raw.candidates.as_deref().unwrap_or_default();
    if candidates.is_empty() {
        let blocked = raw
            .prompt_feedback
            .as_ref()
            .and_then(|feedback| feedback.block_reason.as_deref())
            .map(is_safety_reason)
            .unwrap_or(false);
        return Err(if blocked {
            FailureClassification::ContentBlocked
        } else {
            FailureClassification::MalformedResponse
        });
    }

    let found = candidates
        .iter()
        .filter_map(|candidate| candidate.content.as_ref())
        .flat_map(|content| content.parts.iter())
        .filter_map(|part| part.inline_data.as_ref())
        .find(|inline| !inline.data.trim().is_empty());
    if let Some(inline) = found {
        let mime_type = inline
            .mime_type
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_MIME)
            .to_string();
        return Ok(InlineImage {
            mime_type,
            data: inline.data.trim().to_string(),
        });
    }

    let reasons: Vec<&str> = candidates
        .iter()
        .filter_map(|candidate| candidate.finish_reason.as_deref())
        .collect();
    if reasons.iter().any(|reason| is_safety_reason(reason)) {
        return Err(FailureClassification::ContentBlocked);
    }
    Err(FailureClassification::BackendError(
        reasons
            .first()
            .map(|reason| format!("stopped with status {reason}"))
            .unwrap_or_else(|| "stopped without producing output".to_string()),
    ))
}
