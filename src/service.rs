//! Long-running supervisor.
//!
//! One task per component iterates over all devices internally. Each cycle
//! takes a single configuration snapshot from the watch channel and uses it
//! until the cycle ends; a SIGHUP publishes a new snapshot for the next one.

use crate::error::{ErrorKind, Result};
use capstore_archive::archive::{ArchiveEvent, archive};
use capstore_archive::health::{DeviceHealth, Status, inspect_all};
use capstore_archive::sweep::{SweepEvent, sweep};
use capstore_archive::{Context, error::Error as ArchiveError};
use capstore_config::Config;
use capstore_storage::mount;
use derive_more::Display;
use exn::ResultExt;
use futures::StreamExt;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::pin::pin;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::watch;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Validate every device and run until Ctrl-C or SIGTERM.
pub async fn run(path: Option<PathBuf>, config: Arc<Config>) -> Result<()> {
    startup(&Context::new(config.clone())).await?;

    let mut supervisor = Supervisor::new(path, config, CancellationToken::new());
    for component in Component::ALL {
        supervisor.spawn(component);
    }
    tracing::info!("Storage service started");

    let mut shutdown = pin!(shutdown_signal());
    loop {
        tokio::select! {
            () = &mut shutdown => break,
            Some(joined) = supervisor.tasks.join_next_with_id() => supervisor.restart(joined),
        }
    }
    tracing::info!("Shutting down; finishing in-flight files");
    supervisor.shutdown().await;
    tracing::info!("Storage service stopped");
    Ok(())
}

/// The long-running tasks of the service.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
enum Component {
    #[display("mover")]
    Mover,
    #[display("sweeper")]
    Sweeper,
    #[display("monitor")]
    Monitor,
    #[display("reload")]
    Reload,
}
impl Component {
    const ALL: [Component; 4] = [Self::Mover, Self::Sweeper, Self::Monitor, Self::Reload];
}

/// Owns the component tasks. A task only ends on its own after a panic or a
/// bug; it is logged and started again.
struct Supervisor {
    tasks: JoinSet<()>,
    running: HashMap<Id, Component>,
    path: Option<PathBuf>,
    sender: Arc<watch::Sender<Arc<Config>>>,
    cancel: CancellationToken,
}
impl Supervisor {
    fn new(path: Option<PathBuf>, config: Arc<Config>, cancel: CancellationToken) -> Self {
        let (sender, _) = watch::channel(config);
        Self { tasks: JoinSet::new(), running: HashMap::new(), path, sender: Arc::new(sender), cancel }
    }

    fn spawn(&mut self, component: Component) {
        let cancel = self.cancel.clone();
        let handle = match component {
            Component::Mover => self.tasks.spawn(mover(self.sender.subscribe(), cancel)),
            Component::Sweeper => self.tasks.spawn(sweeper(self.sender.subscribe(), cancel)),
            Component::Monitor => self.tasks.spawn(monitor(self.sender.subscribe(), cancel)),
            Component::Reload => self.tasks.spawn(reload(self.path.clone(), self.sender.clone(), cancel)),
        };
        self.running.insert(handle.id(), component);
    }

    fn restart(&mut self, joined: std::result::Result<(Id, ()), JoinError>) {
        let (id, panicked) = match &joined {
            Ok((id, ())) => (*id, None),
            Err(e) => (e.id(), Some(e)),
        };
        let Some(component) = self.running.remove(&id) else {
            return;
        };
        if self.cancel.is_cancelled() {
            return;
        }
        match panicked {
            Some(e) => tracing::error!(%component, error = %e, "Service task panicked; restarting"),
            None => tracing::error!(%component, "Service task exited early; restarting"),
        }
        self.spawn(component);
    }

    /// Cancel every task and wait for in-flight files to finish.
    async fn shutdown(mut self) {
        self.cancel.cancel();
        while let Some(joined) = self.tasks.join_next_with_id().await {
            if let Err(e) = joined {
                let component = self.running.get(&e.id()).copied();
                tracing::error!(component = ?component, error = %e, "Service task panicked");
            }
        }
    }
}

/// Fatal checks before any cycle runs: every hot tier must be a distinct
/// mount and every cold layout must be complete.
pub async fn startup(ctx: &Context) -> Result<()> {
    for device in ctx.devices() {
        mount::validate(device.hot.root()).await.or_raise(|| ErrorKind::HotTier(device.id.clone()))?;
        device.cold.ensure_layout().await.or_raise(|| ErrorKind::Layout(device.id.clone()))?;
        tracing::info!(
            device = %device.id,
            hot = %device.hot.root().display(),
            cold = %device.cold.root().display(),
            "Device ready"
        );
    }
    Ok(())
}

/// Run one archival cycle and log its events. Returns the number of errors.
pub async fn archive_cycle(ctx: &Context, cancel: &CancellationToken) -> usize {
    let mut failures = 0;
    let mut events = pin!(archive(ctx, cancel));
    while let Some(event) = events.next().await {
        match event {
            Ok(ArchiveEvent::Archived(archived)) => tracing::debug!(
                device = %archived.device,
                content = %archived.content,
                from = %archived.from.display(),
                to = %archived.relocation.destination().display(),
                "Archived file"
            ),
            Ok(ArchiveEvent::TooFresh { device, content, path, age, remaining }) => tracing::debug!(
                %device, %content, path = %path.display(), age_ms = age.as_millis() as u64, remaining,
                "Oldest candidate still being written; waiting"
            ),
            Ok(ArchiveEvent::Deferred { device, content, remaining }) => {
                tracing::warn!(%device, %content, remaining, "Device deadline reached; deferring to next cycle");
            },
            Ok(ArchiveEvent::Finished(summary)) if summary.archived > 0 || summary.failed > 0 => tracing::info!(
                device = %summary.device,
                archived = summary.archived,
                failed = summary.failed,
                deferred = summary.deferred,
                "Archive pass finished"
            ),
            Ok(ArchiveEvent::Finished(summary)) => tracing::trace!(device = %summary.device, "Nothing to archive"),
            Err(e) => {
                failures += 1;
                log_failure(&e);
            },
        }
    }
    failures
}

/// Run one sweep at the current time and log its events. Returns the number
/// of errors.
pub async fn sweep_cycle(ctx: &Context, cancel: &CancellationToken) -> usize {
    let mut failures = 0;
    let mut events = pin!(sweep(ctx, OffsetDateTime::now_utc(), cancel));
    while let Some(event) = events.next().await {
        match event {
            Ok(SweepEvent::BucketPurged { device, content, hour, removed }) if removed > 0 => {
                tracing::info!(%device, %content, %hour, removed, "Purged aged bucket");
            },
            Ok(SweepEvent::BucketPurged { .. }) => {},
            Ok(SweepEvent::Removed { device, content, path, reason }) => {
                tracing::info!(%device, %content, path = %path.display(), %reason, "Removed file");
            },
            Ok(SweepEvent::Finished(summary)) => tracing::debug!(
                device = %summary.device,
                purged_files = summary.purged_files,
                orphans = summary.orphans,
                expired = summary.expired,
                failed = summary.failed,
                "Sweep finished"
            ),
            Err(e) => {
                failures += 1;
                log_failure(&e);
            },
        }
    }
    failures
}

fn log_failure(err: &ArchiveError) {
    tracing::warn!(device = err.device(), retryable = err.is_retryable(), "{err:?}");
}

/// Log a health record as a structured event at a level matching its status.
pub fn log_health(health: &DeviceHealth) {
    let record = serde_json::to_string(health).unwrap_or_default();
    match health.status {
        Status::Ok => tracing::info!(target: "capstore::health", device = %health.device, status = %health.status, %record),
        Status::Degraded => {
            tracing::warn!(target: "capstore::health", device = %health.device, status = %health.status, %record);
        },
        Status::Critical => {
            tracing::error!(target: "capstore::health", device = %health.device, status = %health.status, %record);
        },
    }
}

/// `true` if cancelled before `duration` elapsed.
async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => true,
        () = tokio::time::sleep(duration) => false,
    }
}

async fn mover(config: watch::Receiver<Arc<Config>>, cancel: CancellationToken) {
    loop {
        let snapshot = config.borrow().clone();
        let interval = snapshot.archive.interval();
        archive_cycle(&Context::new(snapshot), &cancel).await;
        if sleep_or_cancel(interval, &cancel).await {
            break;
        }
    }
}

async fn sweeper(config: watch::Receiver<Arc<Config>>, cancel: CancellationToken) {
    loop {
        let snapshot = config.borrow().clone();
        let interval = snapshot.sweep.interval();
        sweep_cycle(&Context::new(snapshot), &cancel).await;
        if sleep_or_cancel(interval, &cancel).await {
            break;
        }
    }
}

async fn monitor(config: watch::Receiver<Arc<Config>>, cancel: CancellationToken) {
    loop {
        let snapshot = config.borrow().clone();
        let interval = snapshot.health.interval();
        for health in inspect_all(&Context::new(snapshot), OffsetDateTime::now_utc()).await {
            log_health(&health);
        }
        if sleep_or_cancel(interval, &cancel).await {
            break;
        }
    }
}

/// Re-read the configuration on every SIGHUP. Only ends once cancelled.
async fn reload(path: Option<PathBuf>, sender: Arc<watch::Sender<Arc<Config>>>, cancel: CancellationToken) {
    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGHUP; configuration reload disabled");
            cancel.cancelled().await;
            return;
        },
    };
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            received = hangup.recv() => if received.is_none() {
                cancel.cancelled().await;
                break;
            },
        }
        match apply_reload(path.as_deref(), &sender).await {
            Ok(()) => tracing::info!("Configuration reloaded"),
            Err(e) => tracing::error!("Configuration reload rejected; keeping previous configuration: {e:?}"),
        }
    }
}

/// Load the configuration again and publish it once every device passes the
/// same checks as at startup. On any failure the current snapshot stays.
pub async fn apply_reload(path: Option<&Path>, sender: &watch::Sender<Arc<Config>>) -> Result<()> {
    let config = Arc::new(Config::load(path).or_raise(|| ErrorKind::Config)?);
    startup(&Context::new(config.clone())).await?;
    sender.send_replace(config);
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM.
pub async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            },
            Err(e) => {
                tracing::warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        () = terminate => {},
    }
}
