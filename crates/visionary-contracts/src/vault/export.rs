use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde_json::{Map, Value};

use crate::artifact::{extension_for_mime, Artifact};

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedArtifact {
    pub image_path: PathBuf,
    pub receipt_path: PathBuf,
}

/// Writes `Visionary_<id>.<ext>` and a sibling JSON receipt into `out_dir`.
pub fn export_artifact(
    artifact: &Artifact,
    out_dir: &Path,
    generation: Option<&Map<String, Value>>,
) -> anyhow::Result<ExportedArtifact> {
    if !is_safe_file_id(&artifact.id) {
        bail!("artifact id {:?} cannot be used as a file name", artifact.id);
    }
    let bytes = artifact.decode_image()?;
    let ext = extension_for_mime(artifact.mime_type().unwrap_or("image/png"));
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("failed creating {}", out_dir.display()))?;

    let stem = format!("Visionary_{}", artifact.id);
    let image_path = out_dir.join(format!("{stem}.{ext}"));
    let receipt_path = out_dir.join(format!("{stem}.json"));
    std::fs::write(&image_path, &bytes)
        .with_context(|| format!("failed writing {}", image_path.display()))?;

    let empty = Map::new();
    let payload = build_receipt(
        artifact,
        &image_path,
        &receipt_path,
        generation.unwrap_or(&empty),
    );
    write_receipt(&receipt_path, &payload)?;
    tracing::info!(id = %artifact.id, path = %image_path.display(), "artifact exported");

    Ok(ExportedArtifact {
        image_path,
        receipt_path,
    })
}

/// Ids end up in file names, so only ASCII letters, digits, `-` and `_` pass.
fn is_safe_file_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 128
        && id
            .bytes()
            .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_'))
}

pub fn build_receipt(
    artifact: &Artifact,
    image_path: &Path,
    receipt_path: &Path,
    generation: &Map<String, Value>,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert(
        "artifact".to_string(),
        sanitize_payload(&serde_json::to_value(artifact).unwrap_or(Value::Null)),
    );
    root.insert(
        "exported_at".to_string(),
        Value::String(chrono::Utc::now().to_rfc3339()),
    );

    let mut paths = Map::new();
    paths.insert(
        "image_path".to_string(),
        Value::String(image_path.to_string_lossy().to_string()),
    );
    paths.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("paths".to_string(), Value::Object(paths));
    root.insert(
        "generation".to_string(),
        sanitize_payload(&Value::Object(generation.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) | Value::Number(_) => value.clone(),
        Value::String(text) if text.starts_with("data:") => {
            Value::String("<omitted>".to_string())
        }
        Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(lowered.as_str(), "data" | "inlinedata" | "inline_data") {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}
