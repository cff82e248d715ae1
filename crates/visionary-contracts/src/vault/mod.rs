mod cooldown;
mod export;
mod slot;

use std::path::Path;
use std::str::FromStr;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::artifact::Artifact;

pub use cooldown::Cooldown;
pub use export::{build_receipt, export_artifact, write_receipt, ExportedArtifact};
pub use slot::{FileSlot, MemorySlot, SlotWriteError, VaultSlot, VAULT_SLOT_NAME};

pub const CAPACITY_WARNING: &str = "Vault capacity reached. Please remove old artifacts.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Newest => "newest",
            SortOrder::Oldest => "oldest",
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "newest" | "new" | "desc" => Ok(SortOrder::Newest),
            "oldest" | "old" | "asc" => Ok(SortOrder::Oldest),
            _ => Err(format!("unsupported sort order '{raw}' (expected newest or oldest)")),
        }
    }
}

/// Outcome of the persistence write that follows every mutation. The in-memory
/// collection is authoritative whatever this says.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistStatus {
    Saved,
    Unchanged,
    CapacityExceeded(String),
    Failed(String),
}

impl PersistStatus {
    /// Message to show the user when durability is at risk.
    pub fn warning(&self) -> Option<String> {
        match self {
            PersistStatus::Saved | PersistStatus::Unchanged => None,
            PersistStatus::CapacityExceeded(_) => Some(CAPACITY_WARNING.to_string()),
            PersistStatus::Failed(detail) => Some(format!("Vault could not be saved: {detail}")),
        }
    }
}

/// Persisted gallery of generated artifacts plus the submission cooldown.
///
/// Canonical storage order is newest-insert-first. Display order is always
/// derived through [`ArtifactVault::query`].
pub struct ArtifactVault {
    slot: Box<dyn VaultSlot>,
    artifacts: IndexMap<String, Artifact>,
    cooldown: Cooldown,
}

impl ArtifactVault {
    /// Creates a vault over `slot` without reading it.
    pub fn new(slot: impl VaultSlot + 'static) -> Self {
        Self {
            slot: Box::new(slot),
            artifacts: IndexMap::new(),
            cooldown: Cooldown::new(),
        }
    }

    /// Creates a vault and restores whatever the slot holds.
    pub fn open(slot: impl VaultSlot + 'static) -> Self {
        let mut vault = Self::new(slot);
        vault.load();
        vault
    }

    /// Restores persisted artifacts. Slot content that is not a JSON list is
    /// discarded and the vault starts empty.
    pub fn load(&mut self) -> Vec<Artifact> {
        self.artifacts.clear();
        let Some(raw) = self.slot.read() else {
            return Vec::new();
        };

        let rows = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Array(rows)) => rows,
            Ok(_) | Err(_) => {
                tracing::warn!(slot = self.slot.name(), "discarding unreadable vault slot");
                self.slot.clear();
                return Vec::new();
            }
        };

        let mut skipped = 0usize;
        for row in rows {
            match serde_json::from_value::<Artifact>(row) {
                Ok(artifact) => {
                    if !self.artifacts.contains_key(&artifact.id) {
                        self.artifacts.insert(artifact.id.clone(), artifact);
                    }
                }
                Err(_) => skipped += 1,
            }
        }
        if skipped > 0 {
            tracing::warn!(skipped, "skipped undecodable vault records");
        }
        tracing::debug!(count = self.artifacts.len(), "vault loaded");
        self.artifacts.values().cloned().collect()
    }

    /// Prepends `artifact`; an existing artifact with the same id is replaced and
    /// moved to the front.
    pub fn insert(&mut self, artifact: Artifact) -> PersistStatus {
        self.artifacts.shift_insert(0, artifact.id.clone(), artifact);
        self.persist()
    }

    pub fn remove(&mut self, id: &str) -> PersistStatus {
        if self.artifacts.shift_remove(id).is_none() {
            return PersistStatus::Unchanged;
        }
        self.persist()
    }

    pub fn get(&self, id: &str) -> Option<&Artifact> {
        self.artifacts.get(id)
    }

    /// Artifacts in canonical (newest-insert-first) order.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.values()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    /// Filters by case-insensitive prompt substring (ignored when blank) and
    /// orders by creation time. Equal timestamps keep canonical order.
    pub fn query(&self, search_text: &str, order: SortOrder) -> Vec<Artifact> {
        let needle = search_text.trim().to_lowercase();
        let mut rows: Vec<&Artifact> = self
            .artifacts
            .values()
            .filter(|artifact| {
                needle.is_empty() || artifact.source_prompt.to_lowercase().contains(&needle)
            })
            .collect();
        match order {
            SortOrder::Newest => rows.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
            SortOrder::Oldest => rows.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
        }
        rows.into_iter().cloned().collect()
    }

    pub fn export(&self, id: &str, out_dir: &Path) -> anyhow::Result<ExportedArtifact> {
        let Some(artifact) = self.get(id) else {
            anyhow::bail!("artifact '{id}' not found in vault");
        };
        export_artifact(artifact, out_dir, None)
    }

    pub fn start_cooldown(&mut self, seconds: u64) {
        self.cooldown.start(seconds);
    }

    /// One scheduler tick. Returns `true` when the cooldown just ended.
    pub fn tick(&mut self) -> bool {
        self.cooldown.tick()
    }

    pub fn cooldown_remaining(&self) -> u64 {
        self.cooldown.remaining()
    }

    pub fn can_submit(&self) -> bool {
        !self.cooldown.is_active()
    }

    fn persist(&mut self) -> PersistStatus {
        let snapshot: Vec<&Artifact> = self.artifacts.values().collect();
        let payload = match serde_json::to_string(&snapshot) {
            Ok(payload) => payload,
            Err(err) => return PersistStatus::Failed(err.to_string()),
        };
        match self.slot.write(&payload) {
            Ok(()) => PersistStatus::Saved,
            Err(SlotWriteError::Capacity { needed, limit }) => {
                tracing::warn!(
                    slot = self.slot.name(),
                    needed,
                    limit,
                    "vault slot capacity reached"
                );
                PersistStatus::CapacityExceeded(format!(
                    "{needed} bytes needed, limit {limit}"
                ))
            }
            Err(SlotWriteError::Io(err)) => {
                tracing::warn!(
                    slot = self.slot.name(),
                    error = %err,
                    "vault slot write failed"
                );
                PersistStatus::Failed(err.to_string())
            }
        }
    }
}

/// Listing row used by front ends that show the vault as a table.
pub fn artifact_summary(artifact: &Artifact) -> Map<String, Value> {
    let mut row = Map::new();
    row.insert("id".to_string(), Value::String(artifact.id.clone()));
    row.insert(
        "prompt".to_string(),
        Value::String(artifact.source_prompt.clone()),
    );
    row.insert(
        "model".to_string(),
        Value::String(artifact.model_tier.as_str().to_string()),
    );
    row.insert(
        "aspect_ratio".to_string(),
        Value::String(artifact.aspect_ratio.as_str().to_string()),
    );
    row.insert(
        "created_at".to_string(),
        artifact
            .created_at_utc()
            .map(|ts| Value::String(ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)))
            .unwrap_or(Value::Null),
    );
    row
}
