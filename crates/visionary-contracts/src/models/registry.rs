use indexmap::IndexMap;

use crate::artifact::ModelTier;

pub const STANDARD_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const PRO_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";

pub const CAP_IMAGE_SIZE: &str = "image_size";
pub const CAP_SEARCH_TOOL: &str = "search_tool";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Maps each tier to the backend model that serves it.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<ModelTier, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(STANDARD_IMAGE_MODEL, PRO_IMAGE_MODEL)
    }
}

impl ModelRegistry {
    pub fn new(standard: &str, pro: &str) -> Self {
        let mut models = IndexMap::new();
        let mut insert = |tier: ModelTier, name: &str, capabilities: &[&str]| {
            models.insert(
                tier,
                ModelSpec {
                    name: name.to_string(),
                    capabilities: capabilities
                        .iter()
                        .map(|item| (*item).to_string())
                        .collect(),
                },
            );
        };
        insert(ModelTier::Standard, standard, &[]);
        insert(ModelTier::Pro, pro, &[CAP_IMAGE_SIZE, CAP_SEARCH_TOOL]);
        Self { models }
    }

    pub fn for_tier(&self, tier: ModelTier) -> Option<&ModelSpec> {
        self.models.get(&tier)
    }

    /// Model identifier for `tier`, falling back to the built-in default.
    pub fn model_name(&self, tier: ModelTier) -> &str {
        match self.for_tier(tier) {
            Some(spec) => spec.name.as_str(),
            None => match tier {
                ModelTier::Standard => STANDARD_IMAGE_MODEL,
                ModelTier::Pro => PRO_IMAGE_MODEL,
            },
        }
    }

    pub fn supports(&self, tier: ModelTier, capability: &str) -> bool {
        self.for_tier(tier)
            .map(|spec| spec.supports(capability))
            .unwrap_or(false)
    }
}
