use crate::cli::{Cli, Command, DeviceArgs};
use crate::error::{ErrorKind, Result};
use crate::service;
use capstore_archive::Context;
use capstore_archive::health::{Status, inspect_all};
use capstore_config::Config;
use capstore_storage::mount::{self, MountSpec, Ownership, Provisioned};
use exn::{OptionExt, ResultExt};
use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;

pub async fn run(cli: Cli) -> Result<ExitCode> {
    let config = Arc::new(Config::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?);
    match cli.command {
        Command::Run => service::run(cli.config, config).await.map(|()| ExitCode::SUCCESS),
        Command::Provision(args) => provision(&context(config, &args)?).await,
        Command::Validate(args) => validate(&context(config, &args)?).await,
        Command::Layout(args) => layout(&context(config, &args)?).await,
        Command::Archive(args) => {
            let ctx = context(config, &args)?;
            let cancel = cancel_on_signal();
            Ok(exit_code(service::archive_cycle(&ctx, &cancel).await == 0))
        },
        Command::Sweep(args) => {
            let ctx = context(config, &args)?;
            let cancel = cancel_on_signal();
            Ok(exit_code(service::sweep_cycle(&ctx, &cancel).await == 0))
        },
        Command::Health(args) => health(&context(config, &args)?).await,
        Command::Config => {
            let json = serde_json::to_string_pretty(&*config).or_raise(|| ErrorKind::Output)?;
            writeln!(std::io::stdout(), "{json}").or_raise(|| ErrorKind::Output)?;
            Ok(ExitCode::SUCCESS)
        },
    }
}

fn context(config: Arc<Config>, args: &DeviceArgs) -> Result<Context> {
    let ctx = Context::new(config);
    match &args.device {
        None => Ok(ctx),
        Some(id) => ctx.only(id).ok_or_raise(|| ErrorKind::UnknownDevice(id.clone())),
    }
}

fn exit_code(success: bool) -> ExitCode {
    if success { ExitCode::SUCCESS } else { ExitCode::FAILURE }
}

/// A token cancelled by the first Ctrl-C or SIGTERM, so one-shot cycles also
/// stop between files.
fn cancel_on_signal() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        service::shutdown_signal().await;
        trigger.cancel();
    });
    cancel
}

/// Mount every RAM tier, then build every cold layout. The first failure
/// aborts: a producer must never start against an unprovisioned device.
async fn provision(ctx: &Context) -> Result<ExitCode> {
    let service = &ctx.config().service;
    let owner = match &service.user {
        Some(user) => Ownership::resolve(user, service.group.as_deref()).or_raise(|| ErrorKind::Config)?,
        None => Ownership::current(),
    };
    for device in ctx.devices() {
        let spec = MountSpec {
            path: device.hot.root().to_path_buf(),
            size_mb: device.ram_size_mb,
            owner,
            mode: service.mode,
        };
        let outcome = mount::provision(&spec).await.or_raise(|| ErrorKind::Provision(device.id.clone()))?;
        let report = device.cold.ensure_layout().await.or_raise(|| ErrorKind::Layout(device.id.clone()))?;
        tracing::info!(
            device = %device.id,
            mounted = outcome == Provisioned::Mounted,
            cold_created = report.created,
            "Device provisioned"
        );
    }
    Ok(ExitCode::SUCCESS)
}

async fn validate(ctx: &Context) -> Result<ExitCode> {
    let mut healthy = true;
    for device in ctx.devices() {
        match mount::validate(device.hot.root()).await {
            Ok(()) => tracing::info!(device = %device.id, hot = %device.hot.root().display(), "RAM tier mounted"),
            Err(e) => {
                healthy = false;
                tracing::error!(device = %device.id, "{e:?}");
            },
        }
    }
    Ok(exit_code(healthy))
}

async fn layout(ctx: &Context) -> Result<ExitCode> {
    for device in ctx.devices() {
        let report = device.cold.ensure_layout().await.or_raise(|| ErrorKind::Layout(device.id.clone()))?;
        tracing::info!(device = %device.id, created = report.created, "Cold layout complete");
    }
    Ok(ExitCode::SUCCESS)
}

/// One JSON line per device on stdout; fails if any device is critical.
async fn health(ctx: &Context) -> Result<ExitCode> {
    let records = inspect_all(ctx, OffsetDateTime::now_utc()).await;
    let mut stdout = std::io::stdout().lock();
    for record in &records {
        let line = serde_json::to_string(record).or_raise(|| ErrorKind::Output)?;
        writeln!(stdout, "{line}").or_raise(|| ErrorKind::Output)?;
    }
    Ok(exit_code(records.iter().all(|r| r.status != Status::Critical)))
}
