mod studio;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde_json::{json, Map, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use visionary_contracts::artifact::{AspectRatio, Artifact, ImageSize, ModelTier, ReferenceImage};
use visionary_contracts::journal::Journal;
use visionary_contracts::vault::{
    artifact_summary, export_artifact, ArtifactVault, PersistStatus, SortOrder,
};
use visionary_engine::credentials::{
    CredentialSource, EnvCredentialSource, StaticCredentialSource,
};
use visionary_engine::{
    build_backend, open_vault, BackendKind, CancelToken, GenerateError, Orchestrator, Recovery,
    StudioConfig, UserInput,
};

use crate::studio::{resolve_prefix, short_id, CooldownTicker, CurrentRender, StudioSession};

#[derive(Debug, Parser)]
#[command(name = "visionary", version, about = "Gemini image studio with a local artifact vault")]
struct Cli {
    /// Config file (defaults to $VISIONARY_CONFIG, then the per-user config).
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Render one image, store it in the vault and save it to disk.
    Generate(GenerateArgs),
    /// Interactive session.
    Studio(StudioArgs),
    #[command(subcommand)]
    Vault(VaultCommand),
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Args)]
struct GenerateArgs {
    #[arg(long)]
    prompt: Option<String>,
    /// Reference image; repeat for several. Order is kept.
    #[arg(long = "image")]
    images: Vec<PathBuf>,
    #[arg(long, default_value = "1:1")]
    ratio: AspectRatio,
    #[arg(long, default_value = "standard")]
    tier: ModelTier,
    #[arg(long)]
    size: Option<ImageSize>,
    #[arg(long)]
    seed: Option<i64>,
    #[arg(long, default_value = ".")]
    out: PathBuf,
    #[arg(long, default_value = "gemini")]
    backend: BackendKind,
}

#[derive(Debug, Args)]
struct StudioArgs {
    #[arg(long, default_value = "gemini")]
    backend: BackendKind,
    /// Save every new artifact here as it is created.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum VaultCommand {
    List {
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value = "newest")]
        sort: SortOrder,
        /// One JSON object per artifact instead of a table.
        #[arg(long)]
        json: bool,
    },
    Remove {
        id: String,
    },
    Export {
        id: String,
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommand {
    /// Print the config file location.
    Path,
}

const TICK: Duration = Duration::from_secs(1);

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("visionary error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose { "visionary=debug" } else { "visionary=info" };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .try_init();
}

fn run(cli: Cli) -> Result<i32> {
    if let Command::Config(ConfigCommand::Path) = cli.command {
        let path = cli.config.or_else(StudioConfig::config_path);
        match path {
            Some(path) => println!("{}", path.display()),
            None => println!("(no config directory on this platform)"),
        }
        return Ok(0);
    }

    let config = StudioConfig::load(cli.config.as_deref())?;
    match cli.command {
        Command::Generate(args) => run_generate(&config, args),
        Command::Studio(args) => run_studio(&config, args),
        Command::Vault(command) => run_vault(&config, command),
        Command::Config(_) => Ok(0),
    }
}

fn run_generate(config: &StudioConfig, args: GenerateArgs) -> Result<i32> {
    let mut reference_images = Vec::with_capacity(args.images.len());
    for path in &args.images {
        reference_images.push(ReferenceImage::from_path(path)?);
    }
    let input = UserInput {
        prompt: args.prompt.unwrap_or_default(),
        aspect_ratio: args.ratio,
        model_tier: args.tier,
        image_size: args.size,
        reference_images,
        seed: args.seed,
    };

    let orchestrator = build_orchestrator(config, args.backend);
    let metadata = generation_metadata(&orchestrator, &input);
    let vault = Mutex::new(open_vault(config)?);
    let current = CurrentRender::default();
    install_interrupt_handler(Arc::clone(&current))?;

    let cancel = CancelToken::new();
    set_render(&current, Some(cancel.clone()));
    let result = orchestrator.generate_into(&vault, input, &cancel);
    set_render(&current, None);

    match result {
        Ok(outcome) => {
            if let Some(warning) = outcome.persist.warning() {
                eprintln!("Warning: {warning}");
            }
            let exported = export_artifact(&outcome.artifact, &args.out, Some(&metadata))?;
            println!("{}", format_artifact_line(&outcome.artifact));
            println!("{}", exported.image_path.display());
            Ok(0)
        }
        Err(err) => {
            eprintln!("{}", describe_error(&err));
            Ok(exit_code(&err))
        }
    }
}

fn run_studio(config: &StudioConfig, args: StudioArgs) -> Result<i32> {
    let orchestrator = build_orchestrator(config, args.backend);
    let vault = Arc::new(Mutex::new(open_vault(config)?));
    let current = CurrentRender::default();
    install_interrupt_handler(Arc::clone(&current))?;

    let ticker = CooldownTicker::spawn(Arc::clone(&vault), TICK);
    let mut session = StudioSession::new(orchestrator, vault, args.out, current);
    let result = session.run(|buf| io::stdin().read_line(buf), &mut io::stdout());
    ticker.stop();
    result.map(|_| 0)
}

fn run_vault(config: &StudioConfig, command: VaultCommand) -> Result<i32> {
    let mut vault = open_vault(config)?;
    match command {
        VaultCommand::List { search, sort, json } => {
            let rows = vault.query(&search, sort);
            let stdout = io::stdout();
            let mut out = stdout.lock();
            for artifact in &rows {
                if json {
                    writeln!(out, "{}", Value::Object(artifact_summary(artifact)))?;
                } else {
                    writeln!(out, "{}", format_artifact_line(artifact))?;
                }
            }
            if rows.is_empty() && !json {
                writeln!(out, "The vault is empty.")?;
            }
            Ok(0)
        }
        VaultCommand::Remove { id } => {
            let Some(id) = resolve_artifact_id(&vault, &id) else {
                eprintln!("No artifact matches '{id}'.");
                return Ok(1);
            };
            let status = vault.remove(&id);
            println!("Removed {id}");
            Ok(report_persist(&status))
        }
        VaultCommand::Export { id, out } => {
            let resolved = resolve_artifact_id(&vault, &id)
                .with_context(|| format!("no artifact matches '{id}'"))?;
            let exported = vault.export(&resolved, &out)?;
            println!("{}", exported.image_path.display());
            println!("{}", exported.receipt_path.display());
            Ok(0)
        }
    }
}

fn build_orchestrator(config: &StudioConfig, kind: BackendKind) -> Orchestrator {
    let backend = build_backend(kind, config);
    let journal = config
        .journal
        .path
        .as_ref()
        .map(|path| Journal::new(path, uuid::Uuid::new_v4().to_string()));
    Orchestrator::new(backend, Arc::new(TerminalCredentialSource::default()), config)
        .with_journal(journal)
}

fn generation_metadata(orchestrator: &Orchestrator, input: &UserInput) -> Map<String, Value> {
    let tier = input.model_tier;
    let mut metadata = Map::new();
    metadata.insert("backend".to_string(), json!(orchestrator.backend_name()));
    metadata.insert("tier".to_string(), json!(tier.as_str()));
    metadata.insert(
        "model".to_string(),
        json!(orchestrator.registry().model_name(tier)),
    );
    metadata.insert("aspect_ratio".to_string(), json!(input.aspect_ratio.as_str()));
    metadata.insert(
        "image_size".to_string(),
        json!(input.image_size.map(|size| size.as_str())),
    );
    metadata.insert("seed".to_string(), json!(input.seed));
    metadata.insert(
        "reference_images".to_string(),
        json!(input.reference_images.len()),
    );
    metadata
}

fn install_interrupt_handler(current: CurrentRender) -> Result<()> {
    ctrlc::set_handler(move || {
        let token = current
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().cloned());
        match token {
            Some(token) => {
                token.cancel();
                eprintln!("\nCancelling the current render...");
            }
            None => eprintln!("\nNothing is rendering. Use /quit to leave."),
        }
    })
    .context("failed installing Ctrl-C handler")
}

fn set_render(current: &CurrentRender, token: Option<CancelToken>) {
    *current.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = token;
}

/// Environment first, then a key pasted at the terminal when the picker opens.
#[derive(Default)]
struct TerminalCredentialSource {
    env: EnvCredentialSource,
    pasted: StaticCredentialSource,
}

impl CredentialSource for TerminalCredentialSource {
    fn credential(&self) -> Option<String> {
        self.env.credential().or_else(|| self.pasted.credential())
    }

    fn open_selection(&self) -> Result<()> {
        eprint!("Paste a Gemini API key (blank to skip): ");
        io::stderr().flush()?;
        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .context("failed reading API key")?;
        let key = line.trim();
        if key.is_empty() {
            eprintln!("No key entered.");
        } else {
            self.pasted.set(Some(key.to_string()));
            eprintln!("API key linked for this session.");
        }
        Ok(())
    }
}

pub(crate) fn lock_vault(vault: &Mutex<ArtifactVault>) -> MutexGuard<'_, ArtifactVault> {
    vault.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn resolve_artifact_id(vault: &ArtifactVault, needle: &str) -> Option<String> {
    resolve_prefix(vault.artifacts().map(|artifact| artifact.id.as_str()), needle)
}

pub(crate) fn format_artifact_line(artifact: &Artifact) -> String {
    let created = artifact
        .created_at_utc()
        .map(|ts| ts.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{}  {}  {:<8} {:<5} {}",
        short_id(&artifact.id),
        created,
        artifact.model_tier.as_str(),
        artifact.aspect_ratio.as_str(),
        clip(&artifact.source_prompt, 72)
    )
}

fn clip(text: &str, max_chars: usize) -> String {
    let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if single_line.chars().count() <= max_chars {
        return single_line;
    }
    let kept: String = single_line.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{kept}…")
}

pub(crate) fn describe_error(err: &GenerateError) -> String {
    match err {
        GenerateError::Failed { failure, recovery } => match recovery {
            Recovery::SelectCredential => {
                format!("{failure} Use /link or set GEMINI_API_KEY, then try again.")
            }
            Recovery::Cooldown { seconds } => {
                format!("{failure} Submissions resume in {seconds}s.")
            }
            Recovery::RevisePrompt | Recovery::None => failure.to_string(),
        },
        GenerateError::Cancelled => "Render cancelled.".to_string(),
        other => other.to_string(),
    }
}

fn exit_code(err: &GenerateError) -> i32 {
    match err {
        GenerateError::Invalid(_) => 2,
        GenerateError::Cancelled => 130,
        GenerateError::Failed { .. } | GenerateError::CoolingDown { .. } => 1,
    }
}

fn report_persist(status: &PersistStatus) -> i32 {
    match status.warning() {
        Some(warning) => {
            eprintln!("Warning: {warning}");
            1
        }
        None => 0,
    }
}
