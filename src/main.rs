//! corch CLI entrypoint.
//!
//! This is the main entrypoint for the corch command-line tool.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use construct_orchestrator::cli::{Cli, Commands, OutputFormat, OutputFormatter, StateCommands};
use construct_orchestrator::config::{
    ConfigParser, ConfigValidator, EnvironmentDescription, find_description_file,
};
use construct_orchestrator::error::{OrchestratorError, Result, StateError};
use construct_orchestrator::orchestrator::{
    CommandEvaluator, DryRun, Orchestrator, ProgressEvent, ProgressReporter, RunSummary,
};
use construct_orchestrator::planner::DeploymentPlan;
use construct_orchestrator::stack::CommandStackEngine;
use construct_orchestrator::state::{
    EnvironmentState, LocalStateStore, RunCommand, StateManager, StateStore, with_state_lock,
};

use clap::Parser;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Directory created next to the description when `--state-dir` is absent.
const DEFAULT_STATE_DIR: &str = ".corch";

/// How long to wait for the last progress lines after a run.
const RENDERER_DRAIN: Duration = Duration::from_secs(2);

/// Sample description written by `corch init`.
const DESCRIPTION_TEMPLATE: &str = r#"# Environment description for corch.
schemaVersion: 1
appUrn: "urn:acme:shop:dev:web"
environment: dev
defaultRegion: us-east-1

constructs:
  "urn:acme:shop:dev:web:construct/klotho.aws.Postgres:db":
    inputs:
      engineVersion:
        value: "16"
        status: resolved

  "urn:acme:shop:dev:web:construct/klotho.aws.Container:api":
    dependsOn:
      - "urn:acme:shop:dev:web:construct/klotho.aws.Postgres:db"
    inputs:
      databaseUrl:
        status: pending
        dependsOn: "urn:acme:shop:dev:web:construct/klotho.aws.Postgres:db"
"#;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format == OutputFormat::Json);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system.
fn init_logging(verbose: bool, json: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);

    match &cli.command {
        Commands::Init { path, force } => cmd_init(path, *force),
        Commands::Validate { warnings } => cmd_validate(&cli, *warnings, &formatter),
        Commands::Plan => cmd_plan(&cli, &formatter).await,
        Commands::Up { dry_run, yes } => {
            cmd_up(&cli, dry_run.unwrap_or_default(), *yes, &formatter).await
        }
        Commands::Down { dry_run, yes } => cmd_down(&cli, *dry_run, *yes, &formatter).await,
        Commands::State { command } => cmd_state(&cli, command, &formatter).await,
    }
}

/// Write a sample description.
fn cmd_init(path: &Path, force: bool) -> Result<()> {
    info!("Initializing environment description in: {}", path.display());

    let description_path = path.join("corch.yaml");
    let gitignore_path = path.join(".gitignore");

    if !force && description_path.exists() {
        eprintln!("Description already exists: {}", description_path.display());
        eprintln!("Use --force to overwrite.");
        return Ok(());
    }

    std::fs::create_dir_all(path)?;
    std::fs::write(&description_path, DESCRIPTION_TEMPLATE)?;
    eprintln!("Created: {}", description_path.display());

    let ignore_entry = format!("{DEFAULT_STATE_DIR}/");
    if gitignore_path.exists() {
        let existing = std::fs::read_to_string(&gitignore_path)?;
        if !existing.lines().any(|l| l.trim() == ignore_entry) {
            let mut file = std::fs::OpenOptions::new()
                .append(true)
                .open(&gitignore_path)?;
            writeln!(file, "\n{ignore_entry}")?;
            eprintln!("Updated: {}", gitignore_path.display());
        }
    } else {
        std::fs::write(&gitignore_path, format!("{ignore_entry}\n.env\n"))?;
        eprintln!("Created: {}", gitignore_path.display());
    }

    eprintln!("\nNext steps:");
    eprintln!("  1. Declare your constructs in corch.yaml");
    eprintln!("  2. Run 'corch validate' to check the description");
    eprintln!("  3. Run 'corch plan' to see what will be deployed");
    eprintln!("  4. Run 'corch up' to deploy");

    Ok(())
}

/// Validate the description.
fn cmd_validate(cli: &Cli, show_warnings: bool, formatter: &OutputFormatter) -> Result<()> {
    let description_file = resolve_description_path(cli.config.as_ref())?;
    info!("Validating description: {}", description_file.display());

    let description = ConfigParser::new().load_with_env(&description_file)?;
    let result = ConfigValidator::new().validate(&description)?;

    println!(
        "{}",
        formatter.format_validation(&result, description.constructs.len(), show_warnings)
    );
    Ok(())
}

/// Show the plan for the next `up`.
async fn cmd_plan(cli: &Cli, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    let state = workspace.load_state().await?;

    let plan = DeploymentPlan::preview(&workspace.description, &state)?;
    println!("{}", formatter.format_plan(&plan));
    Ok(())
}

/// Bring the environment in line with the description.
async fn cmd_up(
    cli: &Cli,
    dry_run: DryRun,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    let state = workspace.load_state().await?;

    let plan = DeploymentPlan::preview(&workspace.description, &state)?;
    if plan.is_empty() && plan.dropped.is_empty() {
        if formatter.is_json() {
            println!("{}", formatter.format_plan(&plan));
        } else {
            eprintln!("No changes to apply.");
        }
        return Ok(());
    }

    if !dry_run.is_dry() && !formatter.is_json() {
        eprintln!("{}", formatter.format_plan(&plan));
        if !auto_approve && !confirm("Do you want to apply this plan?")? {
            eprintln!("Up cancelled.");
            return Ok(());
        }
    }

    let description = workspace.description.clone();
    let summary = workspace
        .run(cli, RunCommand::Up, dry_run.is_dry(), state, formatter, move |orchestrator| {
            Box::pin(async move { orchestrator.up(&description, dry_run).await })
        })
        .await?;

    println!("{}", formatter.format_summary(&summary));
    Ok(())
}

/// Tear the environment down.
async fn cmd_down(
    cli: &Cli,
    dry_run: bool,
    auto_approve: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    let state = workspace.store.load().await?.ok_or_else(|| {
        OrchestratorError::State(StateError::NotFound {
            path: workspace.store.state_path().to_path_buf(),
        })
    })?;

    if !dry_run && !auto_approve {
        eprintln!(
            "This will destroy {} constructs in {}.",
            state.constructs.len(),
            state.app_urn
        );
        if !confirm("Do you want to continue?")? {
            eprintln!("Down cancelled.");
            return Ok(());
        }
    }

    let summary = workspace
        .run(cli, RunCommand::Down, dry_run, state, formatter, move |orchestrator| {
            Box::pin(async move { orchestrator.down(dry_run).await })
        })
        .await?;

    println!("{}", formatter.format_summary(&summary));
    Ok(())
}

/// Manage the state file.
async fn cmd_state(cli: &Cli, command: &StateCommands, formatter: &OutputFormatter) -> Result<()> {
    let workspace = Workspace::load(cli)?;
    let store = &workspace.store;

    match command {
        StateCommands::Show => {
            if let Some(state) = store.load().await? {
                let lock = store.get_lock_info().await?;
                println!("{}", formatter.format_state(&state, lock.as_ref()));
            } else {
                eprintln!("No state found at {}.", store.location());
            }
        }
        StateCommands::Unlock { lock_id, force } => {
            if *force {
                if let Some(lock) = store.force_unlock().await? {
                    eprintln!("State forcefully unlocked (was held by {}).", lock.holder);
                } else {
                    eprintln!("State is not locked.");
                }
            } else if let Some(id) = lock_id {
                store.release_lock(id).await?;
                eprintln!("State unlocked.");
            } else {
                eprintln!("Please provide --lock-id or use --force");
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Everything a command needs about the environment it works on.
struct Workspace {
    description: EnvironmentDescription,
    state_dir: PathBuf,
    store: Arc<LocalStateStore>,
}

impl Workspace {
    /// Loads and validates the description and opens its state store.
    fn load(cli: &Cli) -> Result<Self> {
        let description_file = resolve_description_path(cli.config.as_ref())?;
        debug!("Loading description from: {}", description_file.display());

        let description = ConfigParser::new().load_with_env(&description_file)?;
        let result = ConfigValidator::new().validate(&description)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }

        let state_dir = cli.state_dir.clone().unwrap_or_else(|| {
            description_file
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(DEFAULT_STATE_DIR)
        });
        let store = Arc::new(LocalStateStore::with_state_path(
            description.state_path(&state_dir),
        ));

        Ok(Self {
            description,
            state_dir,
            store,
        })
    }

    /// Loads the saved state, or an empty document for a first run.
    async fn load_state(&self) -> Result<EnvironmentState> {
        let description = &self.description;
        Ok(self.store.load().await?.unwrap_or_else(|| {
            EnvironmentState::new(
                description.schema_version,
                description.app_urn.clone(),
                description.environment.clone(),
                description.default_region.clone(),
            )
        }))
    }

    /// Runs `body` against a fully wired orchestrator.
    ///
    /// Holds the state lock for the duration of a real run, renders progress
    /// events and cancels the run on Ctrl-C.
    async fn run<F>(
        &self,
        cli: &Cli,
        command: RunCommand,
        dry_run: bool,
        state: EnvironmentState,
        formatter: &OutputFormatter,
        body: F,
    ) -> Result<RunSummary>
    where
        F: FnOnce(
            Arc<Orchestrator>,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<RunSummary>> + Send>>,
    {
        let (progress, events) = ProgressReporter::channel();
        let renderer = spawn_renderer(events, OutputFormatter::new(cli.output));
        let cancel = CancellationToken::new();
        let mut hooks = ShutdownHooks::default();
        hooks.register(|| warn!("Interrupted, stopping the stack engine"));
        hooks.register({
            let cancel = cancel.clone();
            move || cancel.cancel()
        });
        let interrupt = spawn_interrupt_handler(hooks);

        let store: Arc<dyn StateStore> = self.store.clone();
        let orchestrator = Arc::new(
            Orchestrator::new(
                Arc::new(StateManager::new(store, state)),
                Arc::new(CommandStackEngine::with_default_home(&cli.engine)?),
                Arc::new(CommandEvaluator::new(cli.generator.as_deref())),
                self.description.output_dir(&self.state_dir),
            )
            .with_concurrency(cli.concurrency)
            .with_progress(progress)
            .with_cancel(&cancel),
        );

        let work = body(orchestrator);
        let result = if dry_run {
            work.await
        } else {
            let store: Arc<dyn StateStore> = self.store.clone();
            with_state_lock(store, &command.to_string(), work).await
        };

        interrupt.abort();
        // The renderer ends once every reporter clone is dropped.
        let _ = tokio::time::timeout(RENDERER_DRAIN, renderer).await;

        if let Err(e) = &result
            && !dry_run
            && !formatter.is_json()
            && !matches!(e, OrchestratorError::State(StateError::LockedByOther { .. }))
        {
            eprintln!("State saved to {}", self.store.location());
        }
        result
    }
}

/// Resolves the description file path.
fn resolve_description_path(path: Option<&PathBuf>) -> Result<PathBuf> {
    path.map_or_else(|| find_description_file("."), |path| Ok(path.clone()))
}

/// Asks a yes/no question on stderr.
fn confirm(question: &str) -> Result<bool> {
    eprint!("{question} [y/N]: ");
    std::io::stderr().flush()?;

    let mut input = String::new();
    std::io::stdin().read_line(&mut input)?;
    Ok(input.trim().eq_ignore_ascii_case("y"))
}

/// Prints progress events until the channel closes.
fn spawn_renderer(
    mut events: tokio::sync::mpsc::UnboundedReceiver<ProgressEvent>,
    formatter: OutputFormatter,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = formatter.format_event(&event) {
                eprintln!("{line}");
            }
        }
    })
}

/// Callbacks run once, in registration order, when the process is interrupted.
#[derive(Default)]
struct ShutdownHooks {
    hooks: Vec<Box<dyn FnOnce() + Send>>,
}

impl ShutdownHooks {
    fn register(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.hooks.push(Box::new(hook));
    }

    fn run(self) {
        for hook in self.hooks {
            hook();
        }
    }
}

/// Runs the shutdown hooks on the first Ctrl-C.
fn spawn_interrupt_handler(hooks: ShutdownHooks) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => hooks.run(),
            Err(e) => debug!("Cannot listen for Ctrl-C: {e}"),
        }
    })
}
