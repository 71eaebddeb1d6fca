use std::sync::Arc;
use std::time::Duration;

use xfer_bridge_domain::config::AssetDecimals;
use xfer_bridge_domain::model::TransferIntent;
use xfer_bridge_domain::services::telemetry::TelemetryGuard;
use xfer_bridge_monitor::Notifier;
use xfer_bridge_storage::SeaOrmStorage;

#[derive(Clone)]
pub struct AppState {
    storage: SeaOrmStorage,
    telemetry: TelemetryGuard,
    notifier: Arc<dyn Notifier>,
    default_intent_ttl: Duration,
    asset_decimals: AssetDecimals,
}

impl AppState {
    pub fn new(
        storage: SeaOrmStorage,
        telemetry: TelemetryGuard,
        notifier: Arc<dyn Notifier>,
        default_intent_ttl: Duration,
        asset_decimals: AssetDecimals,
    ) -> Self {
        Self {
            storage,
            telemetry,
            notifier,
            default_intent_ttl,
            asset_decimals,
        }
    }

    pub fn storage(&self) -> &SeaOrmStorage {
        &self.storage
    }

    pub fn telemetry(&self) -> &TelemetryGuard {
        &self.telemetry
    }

    /// Operator-initiated transitions are announced like monitor ones.
    pub fn notifier(&self) -> &dyn Notifier {
        self.notifier.as_ref()
    }

    /// TTL applied when a registration does not carry `ttl_secs`.
    pub fn default_intent_ttl(&self) -> Duration {
        self.default_intent_ttl
    }

    pub fn asset_decimals(&self) -> &AssetDecimals {
        &self.asset_decimals
    }

    pub fn decimals_of(&self, intent: &TransferIntent) -> Option<u8> {
        self.asset_decimals.lookup(&intent.chain, &intent.asset)
    }
}
