use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tracing::{error, info, warn};

use xfer_bridge_domain::{
    config::{ChainConfig, ConfigError, MonitorConfig, RetryConfig},
    model::{ChainId, Cursor, CursorError, TransitionError},
    services::{TelemetryError, METRIC_CHAIN_HEAD, METRIC_RPC_ERRORS},
    storage::{ChainEventStore, CursorStore, StorageError, WatchRegistry},
};
use xfer_bridge_storage::SeaOrmStorage;

use crate::{
    notify::{Notification, Notifier},
    reconcile::{advance_confirmations, expire_intents},
    retry::Transient,
    rpc::{ChainClient, ChainError, EvmRpcClient},
    scanner::{ChainScanner, ScanOutcome},
    settlement::{settle_due, SettlementError, SettlementGateway},
};

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("chain error: {0}")]
    Chain(#[from] ChainError),
    #[error("cursor error: {0}")]
    Cursor(#[from] CursorError),
    #[error("transition error: {0}")]
    Transition(#[from] TransitionError),
    #[error("settlement error: {0}")]
    Settlement(#[from] SettlementError),
    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error(
        "reorg on {chain} deeper than {max_depth} blocks (checked {checked} recent blocks without a common ancestor)"
    )]
    ReorgTooDeep {
        chain: ChainId,
        checked: u64,
        max_depth: u64,
    },
}

impl MonitorError {
    /// Errors that stop the chain task instead of pausing it.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::ReorgTooDeep { .. })
    }
}

impl Transient for MonitorError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Chain(err) => err.is_transient(),
            Self::Storage(err) => !err.is_conflict(),
            _ => false,
        }
    }
}

/// Everything a chain worker needs from persistence.
pub trait MonitorStore: WatchRegistry + ChainEventStore + CursorStore {}

impl<T> MonitorStore for T where T: WatchRegistry + ChainEventStore + CursorStore + ?Sized {}

/// What one pass of the worker loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub head: u64,
    pub scan: ScanOutcome,
    pub confirmed: usize,
    pub settled: usize,
    pub expired: usize,
}

/// Drives one chain: scanning, confirmations, settlement and expiry.
pub struct ChainWorker<S: ?Sized, C: ?Sized> {
    scanner: ChainScanner<S, C>,
    store: Arc<S>,
    client: Arc<C>,
    gateway: Arc<dyn SettlementGateway>,
    notifier: Arc<dyn Notifier>,
    retry: RetryConfig,
}

impl<S, C> ChainWorker<S, C>
where
    S: MonitorStore + ?Sized,
    C: ChainClient + ?Sized,
{
    pub fn new(
        config: ChainConfig,
        store: Arc<S>,
        client: Arc<C>,
        gateway: Arc<dyn SettlementGateway>,
        notifier: Arc<dyn Notifier>,
        retry: RetryConfig,
    ) -> Self {
        let scanner = ChainScanner::new(config, store.clone(), client.clone(), notifier.clone());
        Self {
            scanner,
            store,
            client,
            gateway,
            notifier,
            retry,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        self.scanner.config()
    }

    pub async fn load_cursor(&self) -> Result<Cursor, MonitorError> {
        self.scanner.load_cursor().await
    }

    /// One pass of the loop. `cursor` is kept equal to the committed cursor.
    pub async fn tick(
        &self,
        cursor: &mut Cursor,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<TickReport, MonitorError> {
        let config = self.scanner.config();
        let chain = &config.chain;
        let head = self.client.head_height().await?;
        gauge!(METRIC_CHAIN_HEAD, "chain" => chain.to_string()).set(head as f64);

        let scan = self.scanner.scan(cursor, head, shutdown).await?;
        let mut report = TickReport {
            head,
            scan,
            confirmed: 0,
            settled: 0,
            expired: 0,
        };
        if matches!(scan, ScanOutcome::Interrupted { .. }) {
            return Ok(report);
        }

        let now = Utc::now();
        report.confirmed =
            advance_confirmations(&*self.store, &*self.notifier, config, head, now).await?;
        report.settled = settle_due(
            &*self.store,
            &*self.gateway,
            &*self.notifier,
            chain,
            &self.retry,
            now,
        )
        .await?;
        report.expired = expire_intents(&*self.store, &*self.notifier, config, now).await?;
        Ok(report)
    }

    /// Runs until shutdown is signalled or a fatal error stops the chain.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), MonitorError> {
        let chain = self.scanner.config().chain.clone();
        let poll_interval = self.scanner.config().poll_interval;

        let mut cursor = loop {
            match self.scanner.load_cursor().await {
                Ok(cursor) => break cursor,
                Err(err) => {
                    warn!(%chain, ?err, "failed to load cursor");
                    if pause(&mut shutdown, self.retry.chain_pause).await {
                        return Ok(());
                    }
                }
            }
        };
        info!(%chain, next_height = cursor.next_height(), "chain worker started");

        let mut failing = false;
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.tick(&mut cursor, &shutdown).await {
                Ok(report) => {
                    if failing {
                        info!(%chain, "chain worker recovered");
                        self.notifier
                            .notify(Notification::alert(&chain, "monitoring resumed"));
                        failing = false;
                    }
                    // Keep catching up without sleeping while a full batch was committed.
                    let caught_up = !matches!(
                        report.scan,
                        ScanOutcome::Advanced { blocks } if blocks >= self.scanner.config().batch_size
                    );
                    if caught_up && pause(&mut shutdown, poll_interval).await {
                        break;
                    }
                }
                Err(err) if err.is_fatal() => {
                    error!(%chain, %err, "chain worker stopped");
                    return Err(err);
                }
                Err(err) => {
                    counter!(METRIC_RPC_ERRORS, "chain" => chain.to_string()).increment(1);
                    warn!(%chain, %err, transient = err.is_transient(), "chain tick failed, pausing");
                    if !failing {
                        self.notifier.notify(Notification::alert(
                            &chain,
                            format!("monitoring paused: {err}"),
                        ));
                        failing = true;
                    }
                    if pause(&mut shutdown, self.retry.chain_pause).await {
                        break;
                    }
                    match self.scanner.load_cursor().await {
                        Ok(reloaded) => cursor = reloaded,
                        Err(err) => warn!(%chain, ?err, "failed to reload cursor"),
                    }
                }
            }
        }

        info!(%chain, next_height = cursor.next_height(), "chain worker stopped");
        Ok(())
    }
}

/// Sleeps for `duration`; returns true when shutdown was requested first.
async fn pause(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    tokio::select! {
        _ = sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

/// Spawns one worker per configured chain and waits for all of them.
pub async fn run_monitor(
    config: MonitorConfig,
    storage: SeaOrmStorage,
    notifier: Arc<dyn Notifier>,
    gateway: Arc<dyn SettlementGateway>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), MonitorError> {
    let store = Arc::new(storage);
    let mut workers = Vec::new();
    for chain in config.chains() {
        let client = Arc::new(EvmRpcClient::new(chain, config.retry())?);
        info!(chain = %chain.chain, rpc = %chain.rpc_url, "spawning chain worker");
        workers.push(ChainWorker::new(
            chain.clone(),
            store.clone(),
            client,
            gateway.clone(),
            notifier.clone(),
            config.retry().clone(),
        ));
    }
    supervise(workers, shutdown).await
}

/// Runs every worker on its own task. A chain that stops on a fatal error
/// does not stop the others; the first such error is returned once all
/// workers have exited.
pub async fn supervise<S, C>(
    workers: Vec<ChainWorker<S, C>>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), MonitorError>
where
    S: MonitorStore + 'static,
    C: ChainClient + 'static,
{
    let mut tasks = JoinSet::new();
    for worker in workers {
        tasks.spawn(worker.run(shutdown.clone()));
    }

    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(%err, "chain worker exited with error");
                first_error.get_or_insert(err);
            }
            Err(err) => error!(?err, "chain worker task panicked"),
        }
    }
    first_error.map_or(Ok(()), Err)
}
