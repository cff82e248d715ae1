use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use anyhow::Result;
use visionary_contracts::artifact::{
    AspectRatio, ImageSize, ModelTier, PendingUploads, ReferenceImage,
};
use visionary_contracts::studio::{parse_intent, studio_help_lines, StudioIntent};
use visionary_contracts::vault::{export_artifact, ArtifactVault, PersistStatus, SortOrder};
use visionary_engine::{CancelToken, Orchestrator, UserInput};

use crate::{describe_error, format_artifact_line, lock_vault, resolve_artifact_id};

/// The token of the render in flight, if any. Ctrl-C cancels it.
pub(crate) type CurrentRender = Arc<Mutex<Option<CancelToken>>>;

pub(crate) enum Flow {
    Continue,
    Quit,
}

pub(crate) struct StudioSession {
    orchestrator: Orchestrator,
    vault: Arc<Mutex<ArtifactVault>>,
    uploads: PendingUploads,
    tier: ModelTier,
    ratio: AspectRatio,
    size: Option<ImageSize>,
    seed: Option<i64>,
    search: String,
    sort: SortOrder,
    out_dir: Option<PathBuf>,
    current: CurrentRender,
}

impl StudioSession {
    pub(crate) fn new(
        orchestrator: Orchestrator,
        vault: Arc<Mutex<ArtifactVault>>,
        out_dir: Option<PathBuf>,
        current: CurrentRender,
    ) -> Self {
        Self {
            orchestrator,
            vault,
            uploads: PendingUploads::new(),
            tier: ModelTier::Standard,
            ratio: AspectRatio::Square,
            size: None,
            seed: None,
            search: String::new(),
            sort: SortOrder::Newest,
            out_dir,
            current,
        }
    }

    /// Reads lines until EOF or `/quit`. `read_line` follows `BufRead::read_line`.
    pub(crate) fn run<R, W>(&mut self, mut read_line: R, out: &mut W) -> Result<()>
    where
        R: FnMut(&mut String) -> io::Result<usize>,
        W: Write,
    {
        writeln!(out, "Visionary studio. Type /help for commands.")?;
        let mut line = String::new();
        loop {
            write!(out, "> ")?;
            out.flush()?;
            line.clear();
            let read = match read_line(&mut line) {
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            if read == 0 {
                break;
            }
            if let Flow::Quit = self.handle(parse_intent(&line), out)? {
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn handle<W: Write>(&mut self, intent: StudioIntent, out: &mut W) -> Result<Flow> {
        match intent {
            StudioIntent::Noop => {}
            StudioIntent::Generate { prompt } => self.generate(prompt, out)?,
            StudioIntent::SetTier(tier) => {
                self.tier = tier;
                writeln!(out, "Tier set to {tier}.")?;
            }
            StudioIntent::SetRatio(ratio) => {
                self.ratio = ratio;
                writeln!(out, "Aspect ratio set to {ratio}.")?;
            }
            StudioIntent::SetSize(size) => {
                self.size = size;
                match size {
                    Some(size) if self.tier == ModelTier::Pro => {
                        writeln!(out, "Output size set to {size}.")?
                    }
                    Some(size) => writeln!(
                        out,
                        "Output size set to {size} (applies to the pro tier only)."
                    )?,
                    None => writeln!(out, "Output size cleared.")?,
                }
            }
            StudioIntent::SetSeed(seed) => {
                self.seed = seed;
                match seed {
                    Some(seed) => writeln!(out, "Seed fixed at {seed}.")?,
                    None => writeln!(out, "Seed cleared.")?,
                }
            }
            StudioIntent::Attach { paths } => {
                for path in paths {
                    match ReferenceImage::from_path(Path::new(&path)) {
                        Ok(image) => {
                            let staged = self.uploads.add(image);
                            writeln!(
                                out,
                                "Staged {} ({}) from {path}",
                                short_id(&staged.id),
                                staged.mime_type
                            )?;
                        }
                        Err(err) => writeln!(out, "Attach failed: {err:#}")?,
                    }
                }
            }
            StudioIntent::Detach { id } => {
                let staged_ids = self.uploads.images().iter().map(|image| image.id.as_str());
                let found = resolve_prefix(staged_ids, &id);
                match found {
                    Some(id) if self.uploads.remove(&id) => {
                        writeln!(out, "Dropped staged image {}.", short_id(&id))?
                    }
                    _ => writeln!(out, "No staged image matches '{id}'.")?,
                }
            }
            StudioIntent::Purge => {
                let count = self.uploads.len();
                self.uploads.purge();
                writeln!(out, "Dropped {count} staged image(s).")?;
            }
            StudioIntent::Evolve { id } => {
                let staged = {
                    let vault = lock_vault(&self.vault);
                    resolve_artifact_id(&vault, &id)
                        .and_then(|id| vault.get(&id).and_then(ReferenceImage::from_artifact))
                };
                match staged {
                    Some(image) => {
                        writeln!(out, "Staged artifact {} as a reference.", short_id(&id))?;
                        self.uploads.add(image);
                    }
                    None => writeln!(out, "No artifact matches '{id}'.")?,
                }
            }
            StudioIntent::Search { text } => {
                self.search = text;
                self.print_history(out)?;
            }
            StudioIntent::Sort(order) => {
                self.sort = order;
                self.print_history(out)?;
            }
            StudioIntent::History => self.print_history(out)?,
            StudioIntent::Remove { id } => {
                let mut vault = lock_vault(&self.vault);
                match resolve_artifact_id(&vault, &id) {
                    Some(id) => {
                        let status = vault.remove(&id);
                        writeln!(out, "Removed {}.", short_id(&id))?;
                        write_persist_warning(&status, out)?;
                    }
                    None => writeln!(out, "No artifact matches '{id}'.")?,
                }
            }
            StudioIntent::Export { id, dir } => {
                let dir = dir
                    .map(PathBuf::from)
                    .or_else(|| self.out_dir.clone())
                    .unwrap_or_else(|| PathBuf::from("."));
                let vault = lock_vault(&self.vault);
                let exported = resolve_artifact_id(&vault, &id)
                    .ok_or_else(|| anyhow::anyhow!("no artifact matches '{id}'"))
                    .and_then(|id| vault.export(&id, &dir));
                match exported {
                    Ok(exported) => {
                        writeln!(out, "Exported {}", exported.image_path.display())?
                    }
                    Err(err) => writeln!(out, "Export failed: {err:#}")?,
                }
            }
            StudioIntent::Link => match self.orchestrator.gate().request_credential_selection() {
                Ok(()) => writeln!(out, "API key linked.")?,
                Err(err) => writeln!(out, "Still unlinked: {err}.")?,
            },
            StudioIntent::Status => self.print_status(out)?,
            StudioIntent::Help => {
                writeln!(out, "Type a prompt to render it, or:")?;
                for line in studio_help_lines() {
                    writeln!(out, "  {line}")?;
                }
            }
            StudioIntent::Quit => return Ok(Flow::Quit),
            StudioIntent::Invalid { command, message } => {
                writeln!(out, "/{command}: {message}")?
            }
            StudioIntent::Unknown { command, .. } => {
                writeln!(out, "Unknown command /{command}. Try /help.")?
            }
        }
        Ok(Flow::Continue)
    }

    fn generate<W: Write>(&mut self, prompt: String, out: &mut W) -> Result<()> {
        let input = UserInput {
            prompt,
            aspect_ratio: self.ratio,
            model_tier: self.tier,
            image_size: self.size,
            reference_images: self.uploads.snapshot(),
            seed: self.seed,
        };
        let cancel = CancelToken::new();
        set_current(&self.current, Some(cancel.clone()));
        writeln!(
            out,
            "Rendering on {} ({})... Ctrl-C cancels.",
            self.orchestrator.registry().model_name(self.tier),
            self.ratio
        )?;
        out.flush()?;
        let result = self.orchestrator.generate_into(&self.vault, input, &cancel);
        set_current(&self.current, None);

        match result {
            Ok(outcome) => {
                self.uploads.purge();
                writeln!(out, "Created {}", format_artifact_line(&outcome.artifact))?;
                write_persist_warning(&outcome.persist, out)?;
                if let Some(dir) = self.out_dir.as_ref() {
                    match export_artifact(&outcome.artifact, dir, None) {
                        Ok(exported) => writeln!(out, "Saved {}", exported.image_path.display())?,
                        Err(err) => writeln!(out, "Auto-save failed: {err:#}")?,
                    }
                }
            }
            Err(err) => writeln!(out, "{}", describe_error(&err))?,
        }
        Ok(())
    }

    fn print_history<W: Write>(&self, out: &mut W) -> Result<()> {
        let rows = lock_vault(&self.vault).query(&self.search, self.sort);
        if rows.is_empty() {
            if self.search.trim().is_empty() {
                writeln!(out, "The vault is empty.")?;
            } else {
                writeln!(out, "Nothing in the vault matches '{}'.", self.search.trim())?;
            }
            return Ok(());
        }
        for artifact in &rows {
            writeln!(out, "{}", format_artifact_line(artifact))?;
        }
        Ok(())
    }

    fn print_status<W: Write>(&self, out: &mut W) -> Result<()> {
        let (count, remaining) = {
            let vault = lock_vault(&self.vault);
            (vault.len(), vault.cooldown_remaining())
        };
        writeln!(out, "backend:   {}", self.orchestrator.backend_name())?;
        writeln!(
            out,
            "tier:      {} ({})",
            self.tier,
            self.orchestrator.registry().model_name(self.tier)
        )?;
        writeln!(out, "ratio:     {}", self.ratio)?;
        writeln!(
            out,
            "size:      {}",
            self.size.map(|size| size.as_str()).unwrap_or("auto")
        )?;
        writeln!(
            out,
            "seed:      {}",
            self.seed.map(|seed| seed.to_string()).unwrap_or_else(|| "random".to_string())
        )?;
        writeln!(out, "staged:    {}", self.uploads.len())?;
        writeln!(out, "vault:     {count} artifact(s)")?;
        let linked = self.orchestrator.gate().has_usable_credential(self.tier);
        writeln!(out, "api key:   {}", if linked { "linked" } else { "missing" })?;
        if remaining > 0 {
            writeln!(out, "cooldown:  {remaining}s")?;
        }
        Ok(())
    }
}

fn set_current(current: &CurrentRender, token: Option<CancelToken>) {
    let mut guard: MutexGuard<'_, Option<CancelToken>> =
        current.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = token;
}

fn write_persist_warning<W: Write>(status: &PersistStatus, out: &mut W) -> Result<()> {
    if let Some(warning) = status.warning() {
        writeln!(out, "Warning: {warning}")?;
    }
    Ok(())
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

/// Exact match first, then a unique prefix.
pub(crate) fn resolve_prefix<'a>(
    ids: impl Iterator<Item = &'a str>,
    needle: &str,
) -> Option<String> {
    let needle = needle.trim();
    if needle.is_empty() {
        return None;
    }
    let mut matches = Vec::new();
    for id in ids {
        if id == needle {
            return Some(id.to_string());
        }
        if id.starts_with(needle) {
            matches.push(id);
        }
    }
    match matches.as_slice() {
        [only] => Some((*only).to_string()),
        _ => None,
    }
}

/// Ticks the vault cooldown once per `period` until stopped.
pub(crate) struct CooldownTicker {
    stop: CancelToken,
    handle: Option<thread::JoinHandle<()>>,
}

impl CooldownTicker {
    pub(crate) fn spawn(vault: Arc<Mutex<ArtifactVault>>, period: Duration) -> Self {
        let stop = CancelToken::new();
        let signal = stop.clone();
        let handle = thread::Builder::new()
            .name("visionary-cooldown".to_string())
            .spawn(move || {
                while !signal.wait_timeout(period) {
                    if lock_vault(&vault).tick() {
                        tracing::info!("cooldown finished");
                        eprintln!("\nCooldown finished. Ready for the next render.");
                    }
                }
            });
        let handle = match handle {
            Ok(handle) => Some(handle),
            Err(err) => {
                tracing::warn!(error = %err, "cooldown ticker did not start");
                None
            }
        };
        Self { stop, handle }
    }

    pub(crate) fn stop(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
