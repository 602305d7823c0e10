mod cli;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Commands};
use ef_av::{synthesize, BuildOutcome, ToolRegistry};
use ef_core::config::Config;
use ef_jobs::{InitialiseReport, JsonLibraryStore, Phase, PhaseState};
use encodeforge::App;
use tokio_util::sync::CancellationToken;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise --verbose opens up the job and encoder crates.
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "encodeforge=trace,ef_jobs=trace,ef_av=debug".to_string()
        } else {
            "info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();
    let library_path = cli.library.as_deref();

    match cli.command {
        Commands::Args {
            file,
            preset,
            output,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(print_arguments(
                config_path,
                library_path,
                &file,
                &preset,
                output.as_deref(),
            ))
        }
        Commands::Run { job } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run_job(config_path, library_path, &job))
        }
        Commands::Jobs { test } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(list_jobs(config_path, library_path, test))
        }
        Commands::CheckTools => check_tools(config_path),
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref(), library_path)
        }
        Commands::Version => {
            println!("encodeforge {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn open_app(config_path: Option<&Path>, library_path: Option<&Path>) -> Result<App> {
    let config = Config::load_or_default(config_path);
    for warning in config.validate() {
        tracing::warn!("{warning}");
    }
    App::open(config, library_path).context("failed to start encodeforge")
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            token.cancel();
        }
    });
}

async fn print_arguments(
    config_path: Option<&Path>,
    library_path: Option<&Path>,
    file: &Path,
    preset_name: &str,
    output: Option<&Path>,
) -> Result<()> {
    if !file.exists() {
        anyhow::bail!("File does not exist: {}", file.display());
    }

    let app = open_app(config_path, library_path)?;
    let preset = app
        .library
        .presets()
        .into_iter()
        .find(|p| p.name == preset_name)
        .with_context(|| format!("preset '{preset_name}' not found in library"))?;
    preset
        .validate()
        .with_context(|| format!("preset '{preset_name}' is invalid"))?;

    let ctx = app.manager.context();
    tracing::info!("Probing {}", file.display());
    let info = ctx.prober.probe(file, "").await?;

    let extension = match preset.container.as_deref().filter(|c| !c.trim().is_empty()) {
        Some(container) => Some(ctx.runner.container_extension(container).await?),
        None => None,
    };
    let sample_extension = extension
        .clone()
        .or_else(|| file.extension().map(|e| e.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "mkv".to_string());

    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let session = ctx.tuner().session(file, info.duration, &sample_extension);
    let arguments = match synthesize(&preset, &info, &session, &cancel).await? {
        BuildOutcome::Built(arguments) => arguments,
        BuildOutcome::Cancelled => anyhow::bail!("Cancelled"),
    };

    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_output(file, extension.as_deref()));
    for (i, pass) in arguments.render(file, &output).iter().enumerate() {
        if arguments.is_two_pass() {
            println!("# pass {}", i + 1);
        }
        println!("ffmpeg {pass}");
    }
    Ok(())
}

/// `<stem>.encoded.<ext>` next to the source.
fn default_output(file: &Path, extension: Option<&str>) -> PathBuf {
    let stem = file
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let ext = extension
        .map(str::to_string)
        .or_else(|| file.extension().map(|e| e.to_string_lossy().into_owned()))
        .unwrap_or_else(|| "mkv".to_string());
    file.with_file_name(format!("{stem}.encoded.{ext}"))
}

async fn run_job(config_path: Option<&Path>, library_path: Option<&Path>, name: &str) -> Result<()> {
    let app = open_app(config_path, library_path)?;
    let manager = app.manager.clone();
    manager.load_jobs().await?;
    let job = manager
        .job(name)
        .with_context(|| format!("job '{name}' not found in library"))?;

    job.set_auto_run(true);
    let background = match manager.initialise_job(&job).await {
        InitialiseReport::Initialised { background } => background,
        InitialiseReport::Failed(e) => {
            return Err(e).with_context(|| format!("job '{name}' failed to initialise"))
        }
        InitialiseReport::Cancelled => anyhow::bail!("Initialisation of '{name}' was cancelled"),
        InitialiseReport::Skipped => anyhow::bail!("Job '{name}' is already initialising"),
    };
    println!("Job '{name}': {} work items", job.work_item_count());

    tokio::pin!(background);
    tokio::select! {
        result = &mut background => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, cancelling job");
            manager.cancel_job(&job);
            background.await?;
        }
    }

    for item in job.work_items() {
        let mark = if item.success { "✓" } else { "✗" };
        println!("{mark} {} -> {}", item.source_path.display(), item.destination.display());
    }

    match job.phase_state(Phase::Process) {
        PhaseState::Succeeded => {
            println!("Job '{name}' finished");
            Ok(())
        }
        state => {
            if let Some(entry) = job.log().entries().last() {
                eprintln!("{}", entry.message);
            }
            anyhow::bail!("Job '{name}' did not complete (process {state})")
        }
    }
}

async fn list_jobs(config_path: Option<&Path>, library_path: Option<&Path>, test: bool) -> Result<()> {
    let app = open_app(config_path, library_path)?;
    let manager = &app.manager;
    manager.load_jobs().await?;

    if test {
        let initialised = manager.initialise_all().await;
        tracing::info!("{initialised} jobs initialised");
    }

    let jobs = manager.jobs();
    if jobs.is_empty() {
        println!("No jobs in {}", app.library.path().display());
        return Ok(());
    }
    for job in jobs {
        println!("{}", job.name());
        println!("  Filter: {}", job.filter_name());
        println!("  Preset: {}", job.preset_name());
        match job.destination() {
            Some(dest) => println!("  Destination: {}", dest.display()),
            None => println!("  Destination: next to source"),
        }
        println!("  Auto import: {}", job.auto_import());
        println!("  Auto run: {}", job.auto_run());
        if test {
            println!("  Work items: {}", job.work_item_count());
        }
        for (phase, state) in job.condition().snapshot() {
            println!("    {phase}: {state}");
        }
    }
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Install ffmpeg to encode.");
    }
    Ok(())
}

fn validate_config(path: Option<&Path>, library_path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let config = Config::load(p)?;
            println!("✓ Configuration is valid");
            config
        }
        None => {
            println!("No config file specified, using defaults");
            Config::default()
        }
    };
    println!("  Auto-tune mode: {:?}", config.auto_tune.mode);
    println!("  Similarity threshold: {}", config.auto_tune.threshold);
    println!("  Sample length: {}s", config.auto_tune.sample_length().as_secs());
    for warning in config.validate() {
        println!("  ⚠ {warning}");
    }

    let library_path = library_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| config.jobs.library_path.clone());
    println!("\nValidating library: {}", library_path.display());
    let library = JsonLibraryStore::open(&library_path)?.library();
    println!(
        "  Jobs: {}, presets: {}, filters: {}",
        library.jobs.len(),
        library.presets.len(),
        library.filters.len()
    );
    let warnings = library.validate();
    if warnings.is_empty() {
        println!("✓ Library is valid");
    }
    for warning in warnings {
        println!("  ⚠ {warning}");
    }
    Ok(())
}
