mod registry;

pub use registry::{
    ModelRegistry, ModelSpec, CAP_IMAGE_SIZE, CAP_SEARCH_TOOL, PRO_IMAGE_MODEL,
    STANDARD_IMAGE_MODEL,
};
