//! Chain monitor: scans each configured chain for deposits to watched
//! addresses, tracks confirmations and reorgs, and pushes confirmed deposits
//! through the settlement gateway.

pub mod notify;
pub mod pipeline;
pub mod reconcile;
pub mod reorg;
pub mod retry;
pub mod rpc;
pub mod scanner;
pub mod settlement;
pub mod worker;

#[cfg(test)]
mod tests;

pub use notify::{ChannelNotifier, Notification, Notifier};
pub use rpc::{ChainClient, ChainError, EvmRpcClient};
pub use scanner::{ChainScanner, ScanOutcome};
pub use settlement::{HttpSettlementGateway, SettlementGateway};
pub use worker::{run_monitor, ChainWorker, MonitorError, MonitorStore, TickReport};
