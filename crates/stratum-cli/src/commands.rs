use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use stratum_core::{Message, Spec};
use stratum_engine::{Engine, ExecuteOptions, ExecuteReport, Registry};
use stratum_storage::{LocalStateStorage, S3StateStorage, StateStorage};

use crate::aws::build_aws_config;
use crate::cli::{ApplyArgs, Cli, Commands, DestroyArgs, PreviewArgs, StackArgs};
use crate::config::{self, StateBackend, StratumConfig};
use crate::render;

const MESSAGE_BUFFER: usize = 64;

/// Exit status when a plan was shown but not confirmed with `--yes`.
const NOT_CONFIRMED: u8 = 2;

pub async fn run(cli: Cli) -> eyre::Result<ExitCode> {
    let session = Session::open(cli.config.as_deref()).await?;
    match cli.command {
        Commands::Preview(args) => preview(&session, args).await,
        Commands::Apply(args) => apply(&session, args).await,
        Commands::Destroy(args) => destroy(&session, args).await,
        Commands::State(args) => state(&session, args).await,
    }
}

struct Session {
    engine: Engine,
    storage: Arc<dyn StateStorage>,
    config: StratumConfig,
}

impl Session {
    async fn open(config_path: Option<&Path>) -> eyre::Result<Self> {
        let config = config::load(config_path)?;
        let data_dir = config::data_dir()?;

        let backend = config.backend_or_default(&data_dir);
        let storage = open_storage(&backend).await;

        let mut registry = Registry::new();
        stratum_terraform::register(&mut registry, config.terraform_config(&data_dir));
        stratum_kubernetes::register(&mut registry, config.kubernetes_config());

        Ok(Self {
            engine: Engine::new(registry, Arc::clone(&storage)),
            storage,
            config,
        })
    }

    fn options(&self, stack: &str) -> ExecuteOptions {
        let mut opts = ExecuteOptions::new(stack).confirm_delete(self.config.confirm_delete);
        if let Some(limit) = self.config.max_concurrency {
            opts = opts.max_concurrency(limit);
        }
        if let Some(user) = operator() {
            opts = opts.operator(user);
        }
        opts
    }
}

async fn open_storage(backend: &StateBackend) -> Arc<dyn StateStorage> {
    match backend {
        StateBackend::Local { path } => {
            tracing::debug!(path = %path.display(), "using local state backend");
            Arc::new(LocalStateStorage::new(path))
        }
        StateBackend::S3 {
            bucket,
            prefix,
            region,
            credentials,
        } => {
            tracing::debug!(bucket = %bucket, region = %region, credentials = %credentials.describe(), "using S3 state backend");
            let sdk = build_aws_config(region, credentials).await;
            Arc::new(S3StateStorage::new(aws_sdk_s3::Client::new(&sdk), bucket, prefix))
        }
    }
}

fn operator() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|u| !u.is_empty())
}

async fn load_spec(path: &Path) -> eyre::Result<Spec> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| eyre::eyre!("failed to read spec at {}: {e}", path.display()))?;
    Ok(Spec::from_json(&bytes)?)
}

fn spawn_printer() -> (mpsc::Sender<Message>, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<Message>(MESSAGE_BUFFER);
    let handle = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            println!("{}", render::message_line(&msg));
        }
    });
    (tx, handle)
}

fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, cancelling run");
            child.cancel();
        }
    });
    token
}

fn print_plan(order: &stratum_core::ChangeOrder) {
    for line in render::plan_lines(order) {
        println!("{line}");
    }
}

fn finish(report: &ExecuteReport) -> ExitCode {
    println!("{}", render::summary_line(&report.summary));
    if report.cancelled {
        eprintln!("run {} was cancelled", report.run_id);
    }
    if report.summary.is_success() && !report.cancelled {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

async fn preview(session: &Session, args: PreviewArgs) -> eyre::Result<ExitCode> {
    let spec = load_spec(&args.spec.spec).await?;
    let opts = session.options(&args.stack.stack);

    let (tx, printer) = spawn_printer();
    let preview = session
        .engine
        .preview(&spec, &opts, tx, cancel_on_interrupt())
        .await?;
    printer.await?;

    print_plan(&preview.order);
    Ok(finish(&preview.report))
}

async fn apply(session: &Session, args: ApplyArgs) -> eyre::Result<ExitCode> {
    let spec = load_spec(&args.spec.spec).await?;
    let order = session.engine.plan(&spec, &args.stack.stack).await?;
    print_plan(&order);

    if !order.has_changes() {
        println!("No changes.");
        return Ok(ExitCode::SUCCESS);
    }
    if !args.yes && !args.dry_run {
        eprintln!("Nothing applied. Re-run with --yes to apply this plan.");
        return Ok(ExitCode::from(NOT_CONFIRMED));
    }

    let opts = session.options(&args.stack.stack).dry_run(args.dry_run);
    let (tx, printer) = spawn_printer();
    let report = session
        .engine
        .apply(&order, &opts, tx, cancel_on_interrupt())
        .await?;
    printer.await?;
    Ok(finish(&report))
}

async fn destroy(session: &Session, args: DestroyArgs) -> eyre::Result<ExitCode> {
    let order = session.engine.plan_destroy(&args.stack.stack).await?;
    print_plan(&order);

    if order.is_empty() {
        println!("Nothing to destroy.");
        return Ok(ExitCode::SUCCESS);
    }
    if !args.yes && !args.dry_run {
        eprintln!("Nothing destroyed. Re-run with --yes to destroy these resources.");
        return Ok(ExitCode::from(NOT_CONFIRMED));
    }

    let opts = session.options(&args.stack.stack).dry_run(args.dry_run);
    let (tx, printer) = spawn_printer();
    let report = session
        .engine
        .destroy(&order, &opts, tx, cancel_on_interrupt())
        .await?;
    printer.await?;
    Ok(finish(&report))
}

async fn state(session: &Session, args: StackArgs) -> eyre::Result<ExitCode> {
    let state = session.storage.get(&args.stack).await?;
    println!("{}", serde_json::to_string_pretty(&state)?);
    Ok(ExitCode::SUCCESS)
}
