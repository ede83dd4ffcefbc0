use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

use meshreg_registrar::Registrar;

use crate::api::{self, ApiState};
use crate::dispatcher::{Decision, Dispatcher, Notification};
use crate::error::{io_err, DaemonError};
use crate::queue::{Action, RetryPolicy, RetryQueue, WorkItem};
use crate::source;
use crate::store::InstanceStore;

pub const DEFAULT_LISTEN: &str = "0.0.0.0:8080";
pub const DEFAULT_RETRY_WORKERS: usize = 2;

#[derive(Debug, Clone)]
pub struct DaemonSettings {
    /// Directory watched for instance manifests.
    pub manifests: PathBuf,
    pub listen: SocketAddr,
    pub retry_workers: usize,
    pub retry_policy: RetryPolicy,
    pub log_json: bool,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(settings: DaemonSettings, registrar: Arc<Registrar>) -> Result<(), DaemonError> {
    init_tracing(settings.log_json);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(settings, registrar))
}

/// Run the daemon until ctrl-c or until any task stops.
pub async fn run(settings: DaemonSettings, registrar: Arc<Registrar>) -> Result<(), DaemonError> {
    let store = Arc::new(InstanceStore::new());
    let queue = Arc::new(RetryQueue::new(settings.retry_policy.clone()));
    let dispatcher = Arc::new(Dispatcher::new(registrar.clone(), queue.clone()));

    let listener = TcpListener::bind(settings.listen)
        .await
        .map_err(|e| io_err(settings.listen.to_string(), e))?;

    let (notify_tx, notify_rx) = mpsc::channel::<Notification>(256);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);

    tracing::info!(
        manifests = %settings.manifests.display(),
        listen = %settings.listen,
        retry_workers = settings.retry_workers,
        "meshreg daemon starting",
    );

    let source_handle = {
        let shutdown = shutdown_tx.clone();
        let root = settings.manifests.clone();
        tokio::spawn(async move {
            let result = source::source_task(root, notify_tx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let dispatch_handle = {
        let shutdown = shutdown_tx.clone();
        let store = store.clone();
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            let result = dispatch_task(store, dispatcher, notify_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let retry_handle = {
        let shutdown = shutdown_tx.clone();
        let store = store.clone();
        let dispatcher = dispatcher.clone();
        let queue = queue.clone();
        let workers = settings.retry_workers.max(1);
        tokio::spawn(async move {
            let result = retry_pool_task(workers, store, dispatcher, queue, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let api_handle = {
        let shutdown = shutdown_tx.clone();
        let state = ApiState {
            store: store.clone(),
            registrar: registrar.clone(),
            queue: queue.clone(),
        };
        tokio::spawn(async move {
            let result = api::api_task(listener, state, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Task(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (source_result, dispatch_result, retry_result, api_result, signal_result) = tokio::join!(
        source_handle,
        dispatch_handle,
        retry_handle,
        api_handle,
        signal_handle
    );

    handle_join("manifest_source", source_result)?;
    handle_join("dispatcher", dispatch_result)?;
    handle_join("retry_pool", retry_result)?;
    handle_join("status_api", api_result)?;
    handle_join("signal_handler", signal_result)?;
    tracing::info!(handles = registrar.len(), "meshreg daemon stopped");
    Ok(())
}

/// Fold each notification into the store, then dispatch it on the blocking
/// pool. Notifications are handled concurrently; dispatches still running at
/// shutdown are awaited.
async fn dispatch_task(
    store: Arc<InstanceStore>,
    dispatcher: Arc<Dispatcher>,
    mut notify_rx: mpsc::Receiver<Notification>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut inflight = JoinSet::new();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                log_dispatch_join(joined);
            }
            maybe = notify_rx.recv() => {
                let Some(notification) = maybe else { break };
                store.apply(&notification).await;
                let dispatcher = dispatcher.clone();
                inflight.spawn_blocking(move || dispatcher.handle(&notification));
            }
        }
    }
    while let Some(joined) = inflight.join_next().await {
        log_dispatch_join(joined);
    }
    Ok(())
}

fn log_dispatch_join(joined: Result<Decision, tokio::task::JoinError>) {
    match joined {
        Ok(decision) => tracing::debug!(decision = %decision, "notification dispatched"),
        Err(err) => tracing::error!(error = %err, "dispatch task join failure"),
    }
}

async fn retry_pool_task(
    workers: usize,
    store: Arc<InstanceStore>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<RetryQueue>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let store = store.clone();
            let dispatcher = dispatcher.clone();
            let queue = queue.clone();
            tokio::spawn(retry_worker(worker, store, dispatcher, queue))
        })
        .collect();

    let _ = shutdown_rx.recv().await;
    queue.shut_down();

    for (worker, handle) in handles.into_iter().enumerate() {
        handle_join(&format!("retry_worker_{worker}"), handle.await)?;
    }
    Ok(())
}

async fn retry_worker(
    worker: usize,
    store: Arc<InstanceStore>,
    dispatcher: Arc<Dispatcher>,
    queue: Arc<RetryQueue>,
) -> Result<(), DaemonError> {
    while let Some(item) = queue.get().await {
        let key = item.work_key();
        let Some(item) = resolve_retry(&store, item).await else {
            tracing::info!(worker, item = %key, "retry superseded, dropping");
            queue.forget(&key);
            queue.done(&key);
            continue;
        };

        let attempts = queue.num_requeues(&key);
        let replay = dispatcher.clone();
        let decision = tokio::task::spawn_blocking(move || replay.replay(&item))
            .await
            .map_err(|err| DaemonError::Task(format!("retry task join error: {err}")))?;
        tracing::info!(worker, item = %key, attempts, decision = %decision, "retry replayed");

        if !decision.is_requeued() {
            queue.forget(&key);
        }
        queue.done(&key);
    }
    Ok(())
}

/// Decide what a retry should act on, given the current store.
///
/// A Register retry uses the freshest snapshot and is dropped when the
/// instance is gone or no longer running. A Cancel retry is dropped when the
/// instance is back and running, since the Add path registered it again.
async fn resolve_retry(store: &InstanceStore, item: WorkItem) -> Option<WorkItem> {
    let current = store.get(&item.snapshot.key()).await;
    match item.action {
        Action::Register => match current {
            Some(latest) if latest.is_running() => Some(WorkItem::new(Action::Register, latest)),
            _ => None,
        },
        Action::Cancel => match current {
            Some(latest) if latest.is_running() => None,
            _ => Some(item),
        },
    }
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Task(format!("{task} task join failure: {err}"))),
    }
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = fmt().json().with_env_filter(filter).with_target(false).try_init();
    } else {
        let _ = fmt().with_env_filter(filter).with_target(false).try_init();
    }
}
