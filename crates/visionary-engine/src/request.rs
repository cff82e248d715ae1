//! Turns user intent into a validated request and a backend-agnostic descriptor.

use serde::Serialize;
use visionary_contracts::artifact::{
    AspectRatio, ImageSize, ModelTier, ReferenceImage, IMAGE_ONLY_ARTIFACT_LABEL,
};
use visionary_contracts::models::{ModelRegistry, CAP_IMAGE_SIZE, CAP_SEARCH_TOOL};

use crate::error::ValidationError;

/// Prompt sent to the backend when only reference images were supplied.
pub const IMAGE_ONLY_GUIDANCE: &str =
    "Transform the provided reference images into a new composition.";

pub const SAFETY_CATEGORIES: &[&str] = &[
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
    "HARM_CATEGORY_CIVIC_INTEGRITY",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserInput {
    pub prompt: String,
    pub aspect_ratio: AspectRatio,
    pub model_tier: ModelTier,
    pub image_size: Option<ImageSize>,
    pub reference_images: Vec<ReferenceImage>,
    pub seed: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Text sent to the backend.
    pub prompt: String,
    /// Text stored on the resulting artifact.
    pub label: String,
    pub aspect_ratio: AspectRatio,
    pub model_tier: ModelTier,
    pub image_size: Option<ImageSize>,
    pub reference_images: Vec<ReferenceImage>,
    pub seed: Option<i64>,
}

impl GenerationRequest {
    pub fn build(input: UserInput) -> Result<Self, ValidationError> {
        let prompt = input.prompt.trim().to_string();
        if prompt.is_empty() && input.reference_images.is_empty() {
            return Err(ValidationError::EmptyInput);
        }
        let (prompt, label) = if prompt.is_empty() {
            (
                IMAGE_ONLY_GUIDANCE.to_string(),
                IMAGE_ONLY_ARTIFACT_LABEL.to_string(),
            )
        } else {
            (prompt.clone(), prompt)
        };
        let image_size = match input.model_tier {
            ModelTier::Pro => input.image_size,
            ModelTier::Standard => None,
        };
        Ok(Self {
            prompt,
            label,
            aspect_ratio: input.aspect_ratio,
            model_tier: input.model_tier,
            image_size,
            reference_images: input.reference_images,
            seed: input.seed,
        })
    }

    pub fn to_backend_request(&self, registry: &ModelRegistry) -> BackendRequest {
        let mut parts: Vec<ContentPart> = self
            .reference_images
            .iter()
            .map(|image| ContentPart::InlineData {
                mime_type: image.mime_type.clone(),
                data: image.data.clone(),
            })
            .collect();
        parts.push(ContentPart::Text(self.prompt.clone()));

        let tier = self.model_tier;
        let image_size = self
            .image_size
            .filter(|_| registry.supports(tier, CAP_IMAGE_SIZE));
        let mut tools = Vec::new();
        if registry.supports(tier, CAP_SEARCH_TOOL) {
            tools.push(Tool::GoogleSearch);
        }

        BackendRequest {
            model: registry.model_name(tier).to_string(),
            parts,
            config: GenerationConfig {
                aspect_ratio: self.aspect_ratio,
                image_size,
                seed: self.seed,
                safety_settings: SAFETY_CATEGORIES
                    .iter()
                    .map(|category| SafetySetting {
                        category: (*category).to_string(),
                        threshold: "BLOCK_NONE".to_string(),
                    })
                    .collect(),
                tools,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ContentPart {
    Text(String),
    InlineData { mime_type: String, data: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetySetting {
    pub category: String,
    pub threshold: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Tool {
    GoogleSearch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationConfig {
    pub aspect_ratio: AspectRatio,
    pub image_size: Option<ImageSize>,
    pub seed: Option<i64>,
    pub safety_settings: Vec<SafetySetting>,
    pub tools: Vec<Tool>,
}

/// What every backend receives, independent of wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendRequest {
    pub model: String,
    pub parts: Vec<ContentPart>,
    pub config: GenerationConfig,
}

impl BackendRequest {
    /// Text of the trailing text part.
    pub fn prompt(&self) -> &str {
        self.parts
            .iter()
            .rev()
            .find_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::InlineData { .. } => None,
            })
            .unwrap_or_default()
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, ContentPart::InlineData { .. }))
            .count()
    }
}
