use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Label stored on artifacts produced from reference images alone.
pub const IMAGE_ONLY_ARTIFACT_LABEL: &str = "Visual Transformation";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "3:4")]
    Portrait,
    #[serde(rename = "4:3")]
    Landscape,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "16:9")]
    Wide,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Portrait,
        AspectRatio::Landscape,
        AspectRatio::Tall,
        AspectRatio::Wide,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Portrait => "3:4",
            AspectRatio::Landscape => "4:3",
            AspectRatio::Tall => "9:16",
            AspectRatio::Wide => "16:9",
        }
    }

    /// Width and height terms of the ratio, e.g. `(16, 9)`.
    pub fn terms(&self) -> (u32, u32) {
        match self {
            AspectRatio::Square => (1, 1),
            AspectRatio::Portrait => (3, 4),
            AspectRatio::Landscape => (4, 3),
            AspectRatio::Tall => (9, 16),
            AspectRatio::Wide => (16, 9),
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        let found = match normalized.as_str() {
            "square" => Some(AspectRatio::Square),
            "portrait" => Some(AspectRatio::Portrait),
            "landscape" => Some(AspectRatio::Landscape),
            "tall" => Some(AspectRatio::Tall),
            "wide" => Some(AspectRatio::Wide),
            other => AspectRatio::ALL
                .into_iter()
                .find(|ratio| ratio.as_str() == other),
        };
        found.ok_or_else(|| {
            format!(
                "unsupported aspect ratio '{raw}' (expected one of {})",
                AspectRatio::ALL.map(|ratio| ratio.as_str()).join(", ")
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    #[default]
    #[serde(alias = "gemini-2.5-flash-image", alias = "flash")]
    Standard,
    #[serde(alias = "gemini-3-pro-image-preview")]
    Pro,
}

impl ModelTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelTier::Standard => "standard",
            ModelTier::Pro => "pro",
        }
    }
}

impl fmt::Display for ModelTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelTier {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standard" | "flash" => Ok(ModelTier::Standard),
            "pro" | "ultra" => Ok(ModelTier::Pro),
            _ => Err(format!("unsupported tier '{raw}' (expected standard or pro)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImageSize {
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::OneK => "1K",
            ImageSize::TwoK => "2K",
            ImageSize::FourK => "4K",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "1K" => Ok(ImageSize::OneK),
            "2K" => Ok(ImageSize::TwoK),
            "4K" => Ok(ImageSize::FourK),
            _ => Err(format!("unsupported image size '{raw}' (expected 1K, 2K or 4K)")),
        }
    }
}

/// A reference image staged for submission. `data` is the base64 payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceImage {
    pub id: String,
    pub mime_type: String,
    pub data: String,
}

impl ReferenceImage {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }

    pub fn from_bytes(mime_type: impl Into<String>, bytes: &[u8]) -> Self {
        Self::new(mime_type, BASE64.encode(bytes))
    }

    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        let Some(mime_type) = mime_for_path(path) else {
            bail!("unsupported reference image type: {}", path.display());
        };
        let bytes =
            std::fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
        Ok(Self::from_bytes(mime_type, &bytes))
    }

    pub fn from_data_url(url: &str) -> Option<Self> {
        let (mime_type, data) = split_data_url(url)?;
        Some(Self::new(mime_type, data))
    }

    /// Stages a previous result as input for a new generation.
    pub fn from_artifact(artifact: &Artifact) -> Option<Self> {
        Self::from_data_url(&artifact.url)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub url: String,
    #[serde(rename = "prompt")]
    pub source_prompt: String,
    #[serde(rename = "model")]
    pub model_tier: ModelTier,
    #[serde(rename = "timestamp")]
    pub created_at: i64,
    #[serde(rename = "aspectRatio")]
    pub aspect_ratio: AspectRatio,
}

impl Artifact {
    pub fn new(
        url: impl Into<String>,
        source_prompt: impl Into<String>,
        model_tier: ModelTier,
        aspect_ratio: AspectRatio,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url: url.into(),
            source_prompt: source_prompt.into(),
            model_tier,
            created_at,
            aspect_ratio,
        }
    }

    pub fn created_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.created_at)
    }

    pub fn mime_type(&self) -> Option<&str> {
        split_data_url(&self.url).map(|(mime, _)| mime)
    }

    pub fn decode_image(&self) -> anyhow::Result<Vec<u8>> {
        let Some((_, data)) = split_data_url(&self.url) else {
            bail!("artifact {} does not hold inline image data", self.id);
        };
        BASE64
            .decode(data.as_bytes())
            .with_context(|| format!("artifact {} image base64 decode failed", self.id))
    }
}

/// Reference images waiting for the next submission, in the order the user added them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PendingUploads {
    images: Vec<ReferenceImage>,
}

impl PendingUploads {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, image: ReferenceImage) -> &ReferenceImage {
        self.images.push(image);
        &self.images[self.images.len() - 1]
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.images.len();
        self.images.retain(|image| image.id != id);
        self.images.len() != before
    }

    pub fn purge(&mut self) {
        self.images.clear();
    }

    pub fn images(&self) -> &[ReferenceImage] {
        &self.images
    }

    pub fn snapshot(&self) -> Vec<ReferenceImage> {
        self.images.clone()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

pub fn to_data_url(mime_type: &str, base64_data: &str) -> String {
    format!("data:{mime_type};base64,{base64_data}")
}

/// Splits `data:<mime>;base64,<payload>` into its MIME type and payload.
pub fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64")?;
    if mime.is_empty() || payload.is_empty() {
        return None;
    }
    Some((mime, payload))
}

pub fn mime_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        _ => None,
    }
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    let lowered = mime_type.to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    if lowered.contains("gif") {
        return "gif";
    }
    "png"
}
