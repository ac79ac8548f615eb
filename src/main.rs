use anyhow::{Context, Result, bail};
use clap::Parser;
use echodb::command::GeneratorRegistry;
use echodb::config::AppConfig;
use echodb::context::AppContext;
use echodb::core::{Scheduler, Selection};
use echodb::logging::{self, LogConfig};
use echodb::remote::{Connector, LocalConnector, SshConnector};
use echodb::shutdown;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser)]
#[command(name = "echodb", version)]
#[command(about = "Back up databases over SSH", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, default_value = "./config.yaml")]
    config: PathBuf,

    /// Comma separated database ids to back up
    #[arg(long, conflicts_with = "all")]
    db: Option<String>,

    /// Back up every configured database
    #[arg(long)]
    all: bool,

    /// Log file used when `settings.logging` is enabled
    #[arg(long, alias = "file-log", default_value = "echodb.log")]
    log_file: PathBuf,

    /// Run remote commands on this machine instead of over SSH
    #[arg(long)]
    simulation: bool,

    #[arg(long)]
    json: bool,

    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = logging::init(LogConfig {
        json: cli.json,
        verbose: cli.verbose,
        file: config.settings.logging.then(|| cli.log_file.clone()),
    });

    match run(&cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, config: AppConfig) -> Result<()> {
    let selection = match (&cli.db, cli.all) {
        (_, true) => Selection::All,
        (Some(list), false) => Selection::parse(list),
        (None, false) => bail!(
            "no databases selected: pass --db <ids> or --all (the interactive picker is not available)"
        ),
    };

    let connector: Arc<dyn Connector> = if cli.simulation || config.settings.simulation {
        let root = std::env::temp_dir().join("echodb-simulation");
        warn!(root = %root.display(), "Simulation mode: remote commands run locally");
        Arc::new(LocalConnector::new(root))
    } else {
        Arc::new(SshConnector::default())
    };

    let ctx = AppContext::new(config, GeneratorRegistry::with_defaults(), connector);

    shutdown::cancel_on_shutdown(ctx.cancel.clone())
        .context("Failed to install shutdown signal handlers")?;

    let report = Scheduler::new(ctx)
        .run(&selection)
        .await
        .context("Backup run failed")?;

    for outcome in &report.outcomes {
        info!(
            target = %outcome.target,
            path = %outcome.local_path.display(),
            bytes = outcome.bytes,
            archived = outcome.archived.len(),
            "Backup finished"
        );
    }
    info!(
        completed = report.outcomes.len(),
        valid = report.valid_targets,
        "All backups finished"
    );

    Ok(())
}
