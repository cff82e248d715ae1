//! Generation journal: one JSON line per lifecycle event.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::artifact::{AspectRatio, ImageSize, ModelTier};

/// What happened during a generation. Serialized with its snake_case name under
/// `type`, the fields inline beside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JournalEvent {
    GenerationStarted {
        tier: ModelTier,
        model: String,
        aspect_ratio: AspectRatio,
        #[serde(default)]
        image_size: Option<ImageSize>,
        images: usize,
        #[serde(default)]
        seed: Option<i64>,
        backend: String,
    },
    AttemptRateLimited {
        attempt: u32,
        delay_ms: u64,
        #[serde(default)]
        retry_after: Option<u64>,
    },
    ArtifactCreated {
        artifact_id: String,
        tier: ModelTier,
        mime_type: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage_metadata: Option<Value>,
    },
    GenerationFailed {
        tier: ModelTier,
        kind: String,
        message: String,
        recovery: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cooldown_seconds: Option<u64>,
    },
    GenerationCancelled {
        tier: ModelTier,
    },
    CooldownStarted {
        seconds: u64,
    },
}

impl JournalEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JournalEvent::GenerationStarted { .. } => "generation_started",
            JournalEvent::AttemptRateLimited { .. } => "attempt_rate_limited",
            JournalEvent::ArtifactCreated { .. } => "artifact_created",
            JournalEvent::GenerationFailed { .. } => "generation_failed",
            JournalEvent::GenerationCancelled { .. } => "generation_cancelled",
            JournalEvent::CooldownStarted { .. } => "cooldown_started",
        }
    }
}

/// A journal line as written to disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// RFC 3339, UTC, microsecond precision.
    pub ts: String,
    pub session_id: String,
    #[serde(flatten)]
    pub event: JournalEvent,
}

/// Append-only journal shared by every component of one session. Clones write to
/// the same file and are serialized by a shared lock.
#[derive(Debug, Clone)]
pub struct Journal {
    inner: Arc<JournalInner>,
}

#[derive(Debug)]
struct JournalInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl Journal {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(JournalInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn append(&self, event: JournalEvent) -> Result<JournalEntry> {
        let entry = JournalEntry {
            ts: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            session_id: self.inner.session_id.clone(),
            event,
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("journal lock poisoned"))?;
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .with_context(|| format!("append to {}", self.inner.path.display()))?;
        Ok(entry)
    }

    /// Appends, logging instead of returning a failure. A broken journal never
    /// fails a generation.
    pub fn record(&self, event: JournalEvent) {
        let name = event.name();
        if let Err(err) = self.append(event) {
            tracing::warn!(event = name, error = %err, "journal write failed");
        }
    }

    /// Reads every entry back. Lines that do not parse are skipped.
    pub fn read(path: &Path) -> Result<Vec<JournalEntry>> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line?;
            match serde_json::from_str::<JournalEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => tracing::debug!(error = %err, "skipping journal line"),
            }
        }
        Ok(entries)
    }
}
