use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use sheet_pipeline::config::PipelineConfig;
use sheet_pipeline::dispatch::{DirectDispatcher, QueueDispatcher, SpoolQueue};
use sheet_pipeline::event::EventPayload;
use sheet_pipeline::importer::Importer;
use sheet_pipeline::ledger::JsonFileLedger;
use sheet_pipeline::local::LocalWorkbooks;
use sheet_pipeline::object_store::LocalObjectStore;
use sheet_pipeline::observability::{CompositeObserver, FileObserver, PipelineObserver, TracingObserver};
use sheet_pipeline::registry::ClientRegistry;
use sheet_pipeline::scanner::Scanner;
use sheet_pipeline::warehouse::SqlScriptWarehouse;

type LocalImporter = Importer<LocalWorkbooks, LocalObjectStore, SqlScriptWarehouse>;

#[derive(Debug, Parser)]
#[command(name = "sheet-pipeline", version, about = "Detect changed order spreadsheets and load them into the warehouse")]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long, short, env = "SHEET_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run one scan cycle over the monitored folder.
    Scan {
        /// Import changed documents synchronously instead of queueing events.
        #[arg(long)]
        direct: bool,
    },
    /// Import the documents named in an event payload.
    Import {
        /// JSON or NDJSON event payload.
        #[arg(long)]
        event: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => {
            PipelineConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))?
        }
        None => PipelineConfig::default(),
    };
    config.apply_env_overrides(|key| std::env::var(key).ok());
    let observer = build_observer(&config);

    match cli.command {
        Command::Scan { direct } => scan(&config, observer, direct),
        Command::Import { event } => import(&config, observer, &event),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("sheet_pipeline=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sheet_pipeline=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_observer(config: &PipelineConfig) -> Arc<dyn PipelineObserver> {
    let tracing_observer: Arc<dyn PipelineObserver> = Arc::new(TracingObserver);
    let mut composite = CompositeObserver::new(vec![tracing_observer]);
    if let Some(path) = &config.event_log_path {
        composite.push(Arc::new(FileObserver::new(path)));
    }
    Arc::new(composite)
}

fn build_importer(config: &PipelineConfig, observer: Arc<dyn PipelineObserver>) -> Result<LocalImporter> {
    let registry = ClientRegistry::load(&config.registry_path)
        .with_context(|| format!("failed to load client registry {}", config.registry_path.display()))?;
    if config.strict_registry {
        registry.validate()?;
    }
    info!(clients = registry.len(), "loaded client registry");

    Ok(Importer::new(
        registry,
        config.import_settings(),
        LocalWorkbooks::new(config.folder_dir()),
        LocalObjectStore::new(&config.objects_dir),
        SqlScriptWarehouse::new(&config.sql_log_path),
    )
    .with_observer(observer))
}

fn scan(config: &PipelineConfig, observer: Arc<dyn PipelineObserver>, direct: bool) -> Result<()> {
    let source = LocalWorkbooks::new(config.folder_dir()).with_page_size(config.page_size);
    let mut ledger = JsonFileLedger::open(&config.ledger_path)
        .with_context(|| format!("failed to open ledger {}", config.ledger_path.display()))?;
    let scanner = Scanner::new(config.scan_options()).with_observer(observer.clone());

    if direct {
        let mut importer = build_importer(config, observer)?;
        let context = importer.prepare_context()?;
        let mut dispatcher = DirectDispatcher::new(&mut importer, context);
        let report = scanner.scan(&source, &mut ledger, &mut dispatcher)?;
        println!("{report}");
        println!("{}", dispatcher.into_summary());
    } else {
        let mut dispatcher = QueueDispatcher::new(SpoolQueue::new(&config.spool_path));
        let report = scanner.scan(&source, &mut ledger, &mut dispatcher)?;
        println!("{report}");
    }
    Ok(())
}

fn import(config: &PipelineConfig, observer: Arc<dyn PipelineObserver>, event: &Path) -> Result<()> {
    let payload = EventPayload::from_path(event)
        .with_context(|| format!("failed to read event payload {}", event.display()))?;
    let notifications = payload.notifications()?;
    info!(records = notifications.len(), "received import event");

    let mut importer = build_importer(config, observer)?;
    let summary = importer.run(&notifications)?;
    println!("{summary}");

    if summary.failed() > 0 {
        bail!("{} of {} imports failed", summary.failed(), summary.outcomes.len());
    }
    Ok(())
}
