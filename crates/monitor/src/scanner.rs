use std::sync::Arc;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use xfer_bridge_domain::config::ChainConfig;
use xfer_bridge_domain::model::Cursor;
use xfer_bridge_domain::services::{
    METRIC_BLOCKS_SCANNED, METRIC_CURSOR_HEIGHT, METRIC_REORGS, METRIC_REORG_DEPTH,
};

use crate::notify::{Notification, Notifier};
use crate::pipeline::{plan_block, WatchSet};
use crate::reorg::{extends_cursor, find_fork_point, plan_rollback, ForkPoint};
use crate::rpc::ChainClient;
use crate::worker::{MonitorError, MonitorStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
    /// Nothing between the cursor and `head - safety_lag`.
    Idle,
    Advanced { blocks: u64 },
    RolledBack(ForkPoint),
    /// Shutdown was requested between two blocks.
    Interrupted { blocks: u64 },
}

/// Pulls blocks for one chain and commits them one at a time.
pub struct ChainScanner<S: ?Sized, C: ?Sized> {
    config: ChainConfig,
    store: Arc<S>,
    client: Arc<C>,
    notifier: Arc<dyn Notifier>,
}

impl<S, C> ChainScanner<S, C>
where
    S: MonitorStore + ?Sized,
    C: ChainClient + ?Sized,
{
    pub fn new(
        config: ChainConfig,
        store: Arc<S>,
        client: Arc<C>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            store,
            client,
            notifier,
        }
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// The committed cursor, or a fresh one at the configured start height.
    pub async fn load_cursor(&self) -> Result<Cursor, MonitorError> {
        let stored = self
            .store
            .load_cursor(&self.config.chain, self.config.cursor_history)
            .await?;
        Ok(stored.unwrap_or_else(|| {
            Cursor::starting_at(
                self.config.chain.clone(),
                self.config.start_height,
                self.config.cursor_history,
            )
        }))
    }

    async fn watch_set(&self) -> Result<WatchSet, MonitorError> {
        let mut watches = WatchSet::new(self.store.open_watches(&self.config.chain).await?);
        if self.config.aggregate_deposits {
            let awaiting: Vec<_> = watches.awaiting().map(|intent| intent.id.clone()).collect();
            for id in awaiting {
                let events = self.store.events_for_intent(&id, false).await?;
                watches.seed_partial(&id, &events);
            }
        }
        Ok(watches)
    }

    /// Scans at most one batch towards `head - safety_lag`. `cursor` always
    /// mirrors what has been committed.
    pub async fn scan(
        &self,
        cursor: &mut Cursor,
        head: u64,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<ScanOutcome, MonitorError> {
        let chain = &self.config.chain;
        let target = head.saturating_sub(self.config.safety_lag);
        let from = cursor.next_height();
        if from > target {
            return Ok(ScanOutcome::Idle);
        }
        let to = target.min(from + self.config.batch_size - 1);

        let mut watches = self.watch_set().await?;
        let blocks = self
            .client
            .blocks_in_range(from, to, &watches.addresses())
            .await?;
        debug!(%chain, from, to, fetched = blocks.len(), "fetched block range");

        let mut committed = 0;
        for block in blocks {
            if *shutdown.borrow() {
                return Ok(ScanOutcome::Interrupted { blocks: committed });
            }
            if !extends_cursor(cursor, &block) {
                warn!(
                    %chain,
                    height = block.height,
                    parent = %block.parent_hash,
                    "block does not extend the committed chain"
                );
                let fork = self.roll_back(cursor).await?;
                return Ok(ScanOutcome::RolledBack(fork));
            }

            let plan = plan_block(&self.config, cursor, &block, &mut watches, Utc::now())?;
            let events = plan.commit.events.len();
            let next_cursor = plan.commit.cursor.clone();
            self.store.commit_block(plan.commit).await?;
            *cursor = next_cursor;
            committed += 1;

            counter!(METRIC_BLOCKS_SCANNED, "chain" => chain.to_string()).increment(1);
            gauge!(METRIC_CURSOR_HEIGHT, "chain" => chain.to_string())
                .set(cursor.next_height() as f64);
            if events > 0 {
                info!(%chain, height = block.height, events, "committed block with matched transfers");
            }
            self.notifier.notify_all(plan.changes);
            for alert in plan.alerts {
                self.notifier.notify(Notification::alert(chain, alert));
            }
        }

        Ok(ScanOutcome::Advanced { blocks: committed })
    }

    async fn roll_back(&self, cursor: &mut Cursor) -> Result<ForkPoint, MonitorError> {
        let chain = &self.config.chain;
        let fork = match find_fork_point(&*self.client, cursor, self.config.max_reorg_depth).await
        {
            Ok(fork) => fork,
            Err(err @ MonitorError::ReorgTooDeep { .. }) => {
                self.notifier.notify(Notification::alert(
                    chain,
                    format!("{err}; scanning halted, manual intervention required"),
                ));
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let backed = self.store.intents_backed_from(chain, fork.height).await?;
        let plan = plan_rollback(cursor, fork, backed, Utc::now())?;
        let rewound = plan.rollback.cursor.clone();
        let invalidated = self.store.rollback(plan.rollback).await?;
        *cursor = rewound;

        warn!(
            %chain,
            fork_height = fork.height,
            depth = fork.depth,
            invalidated,
            "rolled back reorganized blocks"
        );
        counter!(METRIC_REORGS, "chain" => chain.to_string()).increment(1);
        histogram!(METRIC_REORG_DEPTH, "chain" => chain.to_string()).record(fork.depth as f64);
        gauge!(METRIC_CURSOR_HEIGHT, "chain" => chain.to_string())
            .set(cursor.next_height() as f64);

        self.notifier.notify_all(plan.changes);
        for alert in plan.alerts {
            self.notifier.notify(Notification::alert(chain, alert));
        }
        Ok(fork)
    }
}
