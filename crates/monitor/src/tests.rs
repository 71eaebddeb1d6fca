use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use xfer_bridge_domain::config::{ChainConfig, DatabaseConfig, RetryConfig};
use xfer_bridge_domain::model::{
    Address, Amount, AmountPolicy, Asset, Block, BlockHash, ChainId, IntentId, IntentState,
    NewTransferIntent, ObservedTransfer, TransferIntent, TxHash,
};
use xfer_bridge_domain::storage::{ChainEventStore, CursorStore, WatchRegistry};
use xfer_bridge_storage::SeaOrmStorage;

use crate::notify::{Notification, Notifier};
use crate::reorg::ForkPoint;
use crate::rpc::{ChainClient, ChainError, TransactionReceipt};
use crate::scanner::ScanOutcome;
use crate::settlement::{SettlementError, SettlementGateway, SettlementReceipt, SettlementRequest};
use crate::worker::{supervise, ChainWorker, MonitorError};

const USDC_1_5: u128 = 1_500_000;

fn chain() -> ChainId {
    ChainId::parse("ethereum").unwrap()
}

fn hash(height: u64, fork: u8) -> BlockHash {
    BlockHash::parse(&format!("0x{fork:02x}{height:062x}")).unwrap()
}

fn deposit_address() -> Address {
    Address::parse(&format!("0x{}", "ab".repeat(20))).unwrap()
}

fn usdc_transfer(tx: u64, amount: u128) -> ObservedTransfer {
    ObservedTransfer {
        tx_hash: TxHash::parse(&format!("0x{tx:064x}")).unwrap(),
        log_index: 0,
        from: None,
        to: deposit_address(),
        asset: Asset::parse("USDC").unwrap(),
        amount: Amount::new(amount),
        payload_ref: String::new(),
    }
}

/// In-memory chain whose blocks can be replaced to simulate reorgs.
struct FakeChain {
    blocks: Mutex<BTreeMap<u64, Block>>,
}

impl FakeChain {
    fn linear(from: u64, to: u64) -> Self {
        let chain = Self {
            blocks: Mutex::new(BTreeMap::new()),
        };
        chain.extend(from, to, 0);
        chain
    }

    /// Appends blocks tagged `fork`, each pointing at whatever precedes it.
    fn extend(&self, from: u64, to: u64, fork: u8) {
        let mut blocks = self.blocks.lock().unwrap();
        for height in from..=to {
            push_block(&mut blocks, height, fork, Vec::new());
        }
    }

    /// Grows the canonical branch up to `tip` with `transfer` already in
    /// block `at`, so a concurrently running scanner never sees `at` empty.
    fn extend_with(&self, tip: u64, at: u64, transfer: ObservedTransfer) {
        let mut blocks = self.blocks.lock().unwrap();
        let from = blocks.keys().next_back().map_or(0, |height| height + 1);
        for height in from..=tip {
            let transfers = if height == at {
                vec![transfer.clone()]
            } else {
                Vec::new()
            };
            push_block(&mut blocks, height, 0, transfers);
        }
    }

    /// Drops everything from `height` up and rebuilds it up to `tip` on
    /// branch `fork`.
    fn reorg(&self, height: u64, tip: u64, fork: u8) {
        self.blocks.lock().unwrap().retain(|h, _| *h < height);
        self.extend(height, tip, fork);
    }

    fn include(&self, height: u64, transfer: ObservedTransfer) {
        if let Some(block) = self.blocks.lock().unwrap().get_mut(&height) {
            block.transfers.push(transfer);
        }
    }
}

fn push_block(
    blocks: &mut BTreeMap<u64, Block>,
    height: u64,
    fork: u8,
    transfers: Vec<ObservedTransfer>,
) {
    let parent_hash = blocks
        .get(&(height - 1))
        .map(|parent| parent.hash.clone())
        .unwrap_or_else(|| hash(height - 1, 0));
    blocks.insert(
        height,
        Block {
            height,
            hash: hash(height, fork),
            parent_hash,
            transfers,
        },
    );
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn head_height(&self) -> Result<u64, ChainError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .keys()
            .next_back()
            .copied()
            .unwrap_or_default())
    }

    async fn blocks_in_range(
        &self,
        from: u64,
        to: u64,
        watched: &HashSet<Address>,
    ) -> Result<Vec<Block>, ChainError> {
        let blocks = self.blocks.lock().unwrap();
        Ok(blocks
            .range(from..=to)
            .map(|(_, block)| {
                let mut block = block.clone();
                block.transfers.retain(|t| watched.contains(&t.to));
                block
            })
            .collect())
    }

    async fn block_hash(&self, height: u64) -> Result<Option<BlockHash>, ChainError> {
        Ok(self
            .blocks
            .lock()
            .unwrap()
            .get(&height)
            .map(|block| block.hash.clone()))
    }

    async fn transaction_receipt(
        &self,
        _tx_hash: &TxHash,
    ) -> Result<Option<TransactionReceipt>, ChainError> {
        Ok(None)
    }
}

/// Gateway that pays out once per idempotency key, like a real PSP would.
#[derive(Default)]
struct FakeGateway {
    calls: Mutex<Vec<String>>,
    script: Mutex<VecDeque<Result<(), SettlementError>>>,
}

impl FakeGateway {
    fn scripted(outcomes: Vec<Result<(), SettlementError>>) -> Self {
        Self {
            calls: Mutex::default(),
            script: Mutex::new(outcomes.into()),
        }
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn payouts(&self) -> usize {
        self.calls().into_iter().collect::<HashSet<_>>().len()
    }
}

#[async_trait]
impl SettlementGateway for FakeGateway {
    async fn settle(
        &self,
        request: &SettlementRequest,
    ) -> Result<SettlementReceipt, SettlementError> {
        self.calls.lock().unwrap().push(request.reference.clone());
        let outcome = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
        outcome.map(|()| SettlementReceipt {
            gateway_reference: format!("payout-{}", request.reference),
        })
    }
}

#[derive(Default)]
struct RecordingNotifier(Mutex<Vec<Notification>>);

impl RecordingNotifier {
    fn alerts(&self) -> Vec<String> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter_map(|n| match n {
                Notification::Alert { message, .. } => Some(message.clone()),
                Notification::Transition(_) => None,
            })
            .collect()
    }

    fn transitions_to(&self, state: IntentState) -> usize {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|n| matches!(n, Notification::Transition(change) if change.to == state))
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.0.lock().unwrap().push(notification);
    }
}

struct Harness {
    store: Arc<SeaOrmStorage>,
    chain: Arc<FakeChain>,
    gateway: Arc<FakeGateway>,
    notifier: Arc<RecordingNotifier>,
    config: ChainConfig,
    retry: RetryConfig,
    shutdown: watch::Receiver<bool>,
    shutdown_tx: watch::Sender<bool>,
}

impl Harness {
    async fn new(fake: FakeChain, gateway: FakeGateway) -> Self {
        let store = SeaOrmStorage::connect_with(&DatabaseConfig {
            url: "sqlite::memory:".into(),
            max_connections: Some(1),
            sql_logging: false,
        })
        .await
        .expect("storage inits");
        let mut config = ChainConfig::with_defaults(chain(), "http://node", 95).unwrap();
        config.required_confirmations = 6;
        config.safety_lag = 0;
        config.max_reorg_depth = 10;
        config.cursor_history = 20;
        let retry = RetryConfig {
            settlement_base_delay: Duration::ZERO,
            settlement_max_delay: Duration::ZERO,
            ..RetryConfig::default()
        };
        let (tx, rx) = watch::channel(false);
        Self {
            store: Arc::new(store),
            chain: Arc::new(fake),
            gateway: Arc::new(gateway),
            notifier: Arc::new(RecordingNotifier::default()),
            config,
            retry,
            shutdown: rx,
            shutdown_tx: tx,
        }
    }

    fn worker(&self) -> ChainWorker<SeaOrmStorage, FakeChain> {
        ChainWorker::new(
            self.config.clone(),
            self.store.clone(),
            self.chain.clone(),
            self.gateway.clone(),
            self.notifier.clone(),
            self.retry.clone(),
        )
    }

    async fn register(&self, id: &str, amount: u128) -> TransferIntent {
        self.store
            .register_watch(NewTransferIntent {
                id: IntentId::parse(id).unwrap(),
                chain: chain(),
                deposit_address: deposit_address(),
                asset: Asset::parse("USDC").unwrap(),
                policy: AmountPolicy::Exact {
                    amount: Amount::new(amount),
                },
                expires_at: None,
            })
            .await
            .unwrap()
    }

    async fn intent(&self, id: &str) -> TransferIntent {
        self.store
            .find_intent(&IntentId::parse(id).unwrap())
            .await
            .unwrap()
            .expect("intent exists")
    }

    /// Loads the committed cursor and runs a single tick over it.
    async fn tick(&self) -> Result<crate::worker::TickReport, MonitorError> {
        let worker = self.worker();
        let mut cursor = worker.load_cursor().await?;
        worker.tick(&mut cursor, &self.shutdown).await
    }
}

#[tokio::test]
async fn exact_deposit_is_confirmed_and_settled_once() {
    let fake = FakeChain::linear(95, 106);
    fake.include(100, usdc_transfer(1, USDC_1_5));
    let h = Harness::new(fake, FakeGateway::default()).await;
    h.register("intent-1", USDC_1_5).await;

    let report = h.tick().await.unwrap();
    assert_eq!(report.head, 106);
    assert_eq!(report.scan, ScanOutcome::Advanced { blocks: 12 });
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.settled, 1);

    let intent = h.intent("intent-1").await;
    assert_eq!(intent.state, IntentState::Settled);
    assert_eq!(intent.deposit.as_ref().unwrap().block_height, 100);
    assert_eq!(h.gateway.calls().len(), 1);
    assert_eq!(
        h.gateway.calls()[0],
        intent.settlement.reference.clone().unwrap()
    );

    // A second pass over the same state pays nothing out.
    let report = h.tick().await.unwrap();
    assert_eq!(report.scan, ScanOutcome::Idle);
    assert_eq!(report.settled, 0);
    assert_eq!(h.gateway.calls().len(), 1);
    assert_eq!(h.notifier.transitions_to(IntentState::Settled), 1);
}

#[tokio::test]
async fn shallow_confirmation_waits_for_depth() {
    let fake = FakeChain::linear(95, 104);
    fake.include(100, usdc_transfer(1, USDC_1_5));
    let h = Harness::new(fake, FakeGateway::default()).await;
    h.register("intent-1", USDC_1_5).await;

    let report = h.tick().await.unwrap();
    assert_eq!(report.confirmed, 0);
    assert_eq!(h.intent("intent-1").await.state, IntentState::Confirming);

    h.chain.extend(105, 106, 0);
    let report = h.tick().await.unwrap();
    assert_eq!(report.confirmed, 1);
    assert_eq!(h.intent("intent-1").await.state, IntentState::Settled);
}

#[tokio::test]
async fn reorg_reverts_unconfirmed_deposit() {
    let fake = FakeChain::linear(95, 104);
    fake.include(100, usdc_transfer(1, USDC_1_5));
    let h = Harness::new(fake, FakeGateway::default()).await;
    h.register("intent-1", USDC_1_5).await;
    h.tick().await.unwrap();
    assert_eq!(h.intent("intent-1").await.state, IntentState::Confirming);

    // Blocks 100..=104 are replaced by a branch without the deposit.
    h.chain.reorg(100, 106, 1);
    let report = h.tick().await.unwrap();
    assert_eq!(
        report.scan,
        ScanOutcome::RolledBack(ForkPoint {
            height: 99,
            depth: 5
        })
    );

    let intent = h.intent("intent-1").await;
    assert_eq!(intent.state, IntentState::AwaitingDeposit);
    assert!(intent.deposit.is_none());
    assert_eq!(intent.revert_count, 1);

    let id = IntentId::parse("intent-1").unwrap();
    assert!(h.store.events_for_intent(&id, false).await.unwrap().is_empty());
    let all = h.store.events_for_intent(&id, true).await.unwrap();
    assert_eq!(all.len(), 1);
    assert!(!all[0].active);

    let cursor = h.store.load_cursor(&chain(), 20).await.unwrap().unwrap();
    assert_eq!(cursor.next_height(), 99);

    // Rescanning the new branch finds nothing and nothing was paid out.
    let report = h.tick().await.unwrap();
    assert_eq!(report.scan, ScanOutcome::Advanced { blocks: 8 });
    assert_eq!(h.intent("intent-1").await.state, IntentState::AwaitingDeposit);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn deposit_reincluded_after_reorg_is_matched_again() {
    let fake = FakeChain::linear(95, 102);
    fake.include(100, usdc_transfer(1, USDC_1_5));
    let h = Harness::new(fake, FakeGateway::default()).await;
    h.register("intent-1", USDC_1_5).await;
    h.tick().await.unwrap();

    h.chain.reorg(100, 103, 1);
    h.chain.include(102, usdc_transfer(1, USDC_1_5));
    h.tick().await.unwrap();
    assert_eq!(h.intent("intent-1").await.state, IntentState::AwaitingDeposit);

    h.tick().await.unwrap();
    let intent = h.intent("intent-1").await;
    assert_eq!(intent.state, IntentState::Confirming);
    assert_eq!(intent.deposit.as_ref().unwrap().block_height, 102);

    let id = IntentId::parse("intent-1").unwrap();
    assert_eq!(h.store.events_for_intent(&id, false).await.unwrap().len(), 1);
    assert_eq!(h.store.events_for_intent(&id, true).await.unwrap().len(), 2);
}

#[tokio::test]
async fn reorg_past_the_bound_halts_without_committing() {
    let fake = FakeChain::linear(95, 104);
    fake.include(100, usdc_transfer(1, USDC_1_5));
    let mut h = Harness::new(fake, FakeGateway::default()).await;
    h.config.max_reorg_depth = 3;
    h.register("intent-1", USDC_1_5).await;
    h.tick().await.unwrap();

    h.chain.reorg(100, 106, 1);
    let err = h.tick().await.unwrap_err();
    assert!(err.is_fatal());
    assert!(matches!(err, MonitorError::ReorgTooDeep { max_depth: 3, .. }));

    let cursor = h.store.load_cursor(&chain(), 20).await.unwrap().unwrap();
    assert_eq!(cursor.next_height(), 105);
    assert_eq!(h.intent("intent-1").await.state, IntentState::Confirming);
    assert!(h
        .notifier
        .alerts()
        .iter()
        .any(|alert| alert.contains("manual intervention")));
}

#[tokio::test]
async fn restart_resumes_from_committed_cursor() {
    let fake = FakeChain::linear(95, 103);
    fake.include(100, usdc_transfer(1, USDC_1_5));
    let h = Harness::new(fake, FakeGateway::default()).await;
    h.register("intent-1", USDC_1_5).await;

    let first = h.worker();
    let mut cursor = first.load_cursor().await.unwrap();
    first.tick(&mut cursor, &h.shutdown).await.unwrap();
    drop(first);

    h.chain.extend(104, 106, 0);
    let second = h.worker();
    let mut cursor = second.load_cursor().await.unwrap();
    assert_eq!(cursor.next_height(), 104);
    let report = second.tick(&mut cursor, &h.shutdown).await.unwrap();
    assert_eq!(report.scan, ScanOutcome::Advanced { blocks: 3 });

    let id = IntentId::parse("intent-1").unwrap();
    assert_eq!(h.store.events_for_intent(&id, true).await.unwrap().len(), 1);
    assert_eq!(h.intent("intent-1").await.state, IntentState::Settled);
    assert_eq!(h.gateway.payouts(), 1);
}

#[tokio::test]
async fn lost_gateway_response_is_replayed_with_the_same_key() {
    let fake = FakeChain::linear(95, 106);
    fake.include(100, usdc_transfer(1, USDC_1_5));
    // The first call lands at the gateway but its response is lost.
    let gateway = FakeGateway::scripted(vec![Err(SettlementError::Retryable(
        "request timed out".into(),
    ))]);
    let h = Harness::new(fake, gateway).await;
    h.register("intent-1", USDC_1_5).await;

    let report = h.tick().await.unwrap();
    assert_eq!(report.settled, 0);
    let intent = h.intent("intent-1").await;
    assert_eq!(intent.state, IntentState::Confirmed);
    assert_eq!(intent.settlement.attempts, 1);
    let reference = intent.settlement.reference.clone().unwrap();

    let report = h.tick().await.unwrap();
    assert_eq!(report.settled, 1);
    let calls = h.gateway.calls();
    assert_eq!(calls, vec![reference.clone(), reference]);
    assert_eq!(h.gateway.payouts(), 1);
    assert_eq!(h.intent("intent-1").await.state, IntentState::Settled);
}

#[tokio::test]
async fn settlement_key_survives_a_reorg_that_moves_the_deposit() {
    let fake = FakeChain::linear(95, 106);
    fake.include(100, usdc_transfer(1, USDC_1_5));
    let gateway = FakeGateway::scripted(vec![Err(SettlementError::Retryable(
        "request timed out".into(),
    ))]);
    let h = Harness::new(fake, gateway).await;
    h.register("intent-1", USDC_1_5).await;

    h.tick().await.unwrap();
    let intent = h.intent("intent-1").await;
    assert_eq!(intent.state, IntentState::Confirmed);
    let reference = intent.settlement.reference.clone().unwrap();

    // The same transfer is re-mined at another height and log position.
    h.chain.reorg(100, 110, 1);
    let mut moved = usdc_transfer(1, USDC_1_5);
    moved.log_index = 5;
    h.chain.include(103, moved);
    h.tick().await.unwrap();
    h.tick().await.unwrap();

    let intent = h.intent("intent-1").await;
    assert_eq!(intent.state, IntentState::Settled);
    let deposit = intent.deposit.as_ref().unwrap();
    assert_eq!((deposit.block_height, deposit.log_index), (103, 5));
    assert_eq!(intent.settlement.reference.as_deref(), Some(reference.as_str()));
    assert_eq!(h.gateway.calls(), vec![reference.clone(), reference]);
    assert_eq!(h.gateway.payouts(), 1);
}

#[tokio::test]
async fn reorg_under_a_pending_retry_reverts_the_confirmed_intent() {
    let fake = FakeChain::linear(95, 106);
    fake.include(100, usdc_transfer(1, USDC_1_5));
    let gateway = FakeGateway::scripted(vec![Err(SettlementError::Retryable(
        "gateway busy".into(),
    ))]);
    let h = Harness::new(fake, gateway).await;
    h.register("intent-1", USDC_1_5).await;

    h.tick().await.unwrap();
    let before = h.intent("intent-1").await;
    assert_eq!(before.state, IntentState::Confirmed);
    assert_eq!(before.settlement.attempts, 1);
    assert!(before.settlement.next_attempt_at.is_some());

    // The replacement branch drops the deposit entirely.
    h.chain.reorg(100, 108, 1);
    let report = h.tick().await.unwrap();
    assert_eq!(
        report.scan,
        ScanOutcome::RolledBack(ForkPoint {
            height: 99,
            depth: 7
        })
    );
    assert_eq!(report.settled, 0);

    let intent = h.intent("intent-1").await;
    assert_eq!(intent.state, IntentState::AwaitingDeposit);
    assert!(intent.deposit.is_none());
    assert_eq!(intent.revert_count, 1);
    assert_eq!(intent.settlement.attempts, 0);
    assert!(intent.settlement.next_attempt_at.is_none());
    assert_eq!(intent.settlement.reference, before.settlement.reference);
    assert!(h
        .notifier
        .alerts()
        .iter()
        .any(|alert| alert.contains("confirmed intent intent-1 lost its deposit")));
    assert_eq!(h.notifier.transitions_to(IntentState::Reverted), 1);

    // No payout is retried while nothing backs the intent.
    h.tick().await.unwrap();
    assert_eq!(h.gateway.calls().len(), 1);
    assert_eq!(h.intent("intent-1").await.state, IntentState::AwaitingDeposit);
}

#[tokio::test]
async fn deep_reorg_halts_one_chain_while_others_keep_settling() {
    let mut h = Harness::new(FakeChain::linear(95, 104), FakeGateway::default()).await;
    h.config.max_reorg_depth = 3;
    h.config.poll_interval = Duration::from_millis(10);
    h.tick().await.unwrap();
    h.chain.reorg(100, 106, 1);
    let halting = h.worker();

    let polygon = ChainId::parse("polygon").unwrap();
    let polygon_chain = Arc::new(FakeChain::linear(95, 106));
    let mut polygon_config = ChainConfig::with_defaults(polygon.clone(), "http://node", 95).unwrap();
    polygon_config.required_confirmations = 6;
    polygon_config.safety_lag = 0;
    polygon_config.max_reorg_depth = 10;
    polygon_config.cursor_history = 20;
    polygon_config.poll_interval = Duration::from_millis(10);
    let healthy = ChainWorker::new(
        polygon_config,
        h.store.clone(),
        polygon_chain.clone(),
        h.gateway.clone(),
        h.notifier.clone(),
        h.retry.clone(),
    );

    let supervisor = tokio::spawn(supervise(vec![halting, healthy], h.shutdown.clone()));

    let deadline = Instant::now() + Duration::from_secs(5);
    while !h
        .notifier
        .alerts()
        .iter()
        .any(|alert| alert.contains("manual intervention"))
    {
        assert!(Instant::now() < deadline, "ethereum never halted");
        sleep(Duration::from_millis(10)).await;
    }

    // A deposit that only arrives after the halt is still settled on polygon.
    let polygon_address = Address::parse(&format!("0x{}", "cd".repeat(20))).unwrap();
    h.store
        .register_watch(NewTransferIntent {
            id: IntentId::parse("polygon-1").unwrap(),
            chain: polygon.clone(),
            deposit_address: polygon_address.clone(),
            asset: Asset::parse("USDC").unwrap(),
            policy: AmountPolicy::Exact {
                amount: Amount::new(USDC_1_5),
            },
            expires_at: None,
        })
        .await
        .unwrap();
    let mut transfer = usdc_transfer(7, USDC_1_5);
    transfer.to = polygon_address;
    polygon_chain.extend_with(114, 108, transfer);

    while h.intent("polygon-1").await.state != IntentState::Settled {
        assert!(Instant::now() < deadline, "polygon stopped settling");
        sleep(Duration::from_millis(10)).await;
    }

    h.shutdown_tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), supervisor)
        .await
        .expect("workers stop on shutdown")
        .expect("supervisor task completes");
    assert!(matches!(
        result,
        Err(MonitorError::ReorgTooDeep { chain: ref halted, max_depth: 3, .. }) if *halted == chain()
    ));
    let cursor = h.store.load_cursor(&chain(), 20).await.unwrap().unwrap();
    assert_eq!(cursor.next_height(), 105);
    assert_eq!(h.gateway.payouts(), 1);
}

#[tokio::test]
async fn permanent_gateway_rejection_fails_and_alerts() {
    let fake = FakeChain::linear(95, 106);
    fake.include(100, usdc_transfer(1, USDC_1_5));
    let gateway =
        FakeGateway::scripted(vec![Err(SettlementError::Permanent("account closed".into()))]);
    let h = Harness::new(fake, gateway).await;
    h.register("intent-1", USDC_1_5).await;

    h.tick().await.unwrap();
    assert_eq!(h.intent("intent-1").await.state, IntentState::SettlementFailed);
    assert!(h
        .notifier
        .alerts()
        .iter()
        .any(|alert| alert.contains("account closed")));

    // Failed settlements are not retried automatically.
    h.tick().await.unwrap();
    assert_eq!(h.gateway.calls().len(), 1);
}

#[tokio::test]
async fn underpayment_leaves_intent_waiting() {
    let fake = FakeChain::linear(95, 106);
    fake.include(100, usdc_transfer(1, USDC_1_5 - 1));
    let h = Harness::new(fake, FakeGateway::default()).await;
    h.register("intent-1", USDC_1_5).await;

    h.tick().await.unwrap();
    assert_eq!(h.intent("intent-1").await.state, IntentState::AwaitingDeposit);
    assert!(h.gateway.calls().is_empty());
}

#[tokio::test]
async fn past_deadline_intent_expires() {
    let fake = FakeChain::linear(95, 96);
    let h = Harness::new(fake, FakeGateway::default()).await;
    h.store
        .register_watch(NewTransferIntent {
            id: IntentId::parse("late").unwrap(),
            chain: chain(),
            deposit_address: deposit_address(),
            asset: Asset::parse("USDC").unwrap(),
            policy: AmountPolicy::Any,
            expires_at: Some(Utc::now() - chrono::Duration::seconds(1)),
        })
        .await
        .unwrap();

    let report = h.tick().await.unwrap();
    assert_eq!(report.expired, 1);
    assert_eq!(h.intent("late").await.state, IntentState::Expired);
}

#[tokio::test]
async fn shutdown_interrupts_between_blocks() {
    let fake = FakeChain::linear(95, 106);
    let h = Harness::new(fake, FakeGateway::default()).await;
    h.shutdown_tx.send(true).unwrap();

    let report = h.tick().await.unwrap();
    assert_eq!(report.scan, ScanOutcome::Interrupted { blocks: 0 });
    let cursor = h.store.load_cursor(&chain(), 20).await.unwrap();
    assert!(cursor.is_none());
}
