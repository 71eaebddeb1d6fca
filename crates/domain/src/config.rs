//! Environment-driven configuration structures shared by all binaries.

use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::model::{Address, Amount, Asset, ChainId, FormatError};

/// Connection settings shared by both binaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: Option<u32>,
    pub sql_logging: bool,
}

impl DatabaseConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            url: get_required_var("DATABASE_URL")?,
            max_connections: parse_optional("DATABASE_MAX_CONNECTIONS")?,
            sql_logging: match get_optional_var("DATABASE_SQL_LOGGING") {
                Some(flag) => parse_bool("DATABASE_SQL_LOGGING", &flag)?,
                None => false,
            },
        })
    }
}

/// Decimals per `(chain, asset)`: the chain presets overlaid with explicit
/// `chain:SYMBOL:decimals` entries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AssetDecimals {
    overrides: Vec<(ChainId, Asset, u8)>,
}

impl AssetDecimals {
    pub fn parse(key: &str, raw: &str) -> Result<Self, ConfigError> {
        let mut decimals = Self::default();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let invalid = || ConfigError::Invalid {
                key: key.to_owned(),
                reason: format!("expected chain:SYMBOL:decimals, got `{entry}`"),
            };
            let parts: Vec<&str> = entry.split(':').collect();
            let [chain, symbol, value] = parts.as_slice() else {
                return Err(invalid());
            };
            let value = value.trim().parse().map_err(|_| invalid())?;
            decimals = decimals.with(ChainId::parse(chain)?, Asset::parse(symbol)?, value);
        }
        Ok(decimals)
    }

    pub fn with(mut self, chain: ChainId, asset: Asset, decimals: u8) -> Self {
        self.overrides.retain(|(c, a, _)| !(c == &chain && a == &asset));
        self.overrides.push((chain, asset, decimals));
        self
    }

    pub fn lookup(&self, chain: &ChainId, asset: &Asset) -> Option<u8> {
        self.overrides
            .iter()
            .find(|(c, a, _)| c == chain && a == asset)
            .map(|(_, _, decimals)| *decimals)
            .or_else(|| ChainPreset::for_chain(chain)?.decimals_of(asset))
    }
}

/// API-specific configuration (HTTP bind + shared database) so the HTTP
/// surface does not depend on monitor-only environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    database: DatabaseConfig,
    api_bind_address: String,
    api_unix_socket: Option<String>,
    internal_bind_address: Option<String>,
    internal_unix_socket: Option<String>,
    default_intent_ttl: Duration,
    asset_decimals: AssetDecimals,
    notifier: NotifierConfig,
}

impl ApiConfig {
    pub const DEFAULT_INTENT_TTL_SECS: u64 = 86_400;

    /// Loads only the environment variables required by the API binary.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let asset_decimals = match get_optional_var("API_ASSET_DECIMALS") {
            Some(raw) => AssetDecimals::parse("API_ASSET_DECIMALS", &raw)?,
            None => AssetDecimals::default(),
        };

        Ok(Self {
            database: DatabaseConfig::load_from_env()?,
            api_bind_address: get_required_var("API_BIND_ADDRESS")?,
            api_unix_socket: get_optional_var("API_UNIX_SOCKET"),
            internal_bind_address: get_optional_var("API_INTERNAL_BIND_ADDRESS"),
            internal_unix_socket: get_optional_var("API_INTERNAL_UNIX_SOCKET"),
            default_intent_ttl: Duration::from_secs(parse_or(
                "API_DEFAULT_INTENT_TTL_SECS",
                Self::DEFAULT_INTENT_TTL_SECS,
            )?),
            asset_decimals,
            notifier: NotifierConfig::load_from_env()?,
        })
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_unix_socket(&self) -> Option<&str> {
        self.api_unix_socket.as_deref()
    }

    pub fn internal_bind_address(&self) -> Option<&str> {
        self.internal_bind_address.as_deref()
    }

    pub fn internal_unix_socket(&self) -> Option<&str> {
        self.internal_unix_socket.as_deref()
    }

    pub fn has_internal_listener(&self) -> bool {
        self.internal_bind_address.is_some() || self.internal_unix_socket.is_some()
    }

    pub fn default_intent_ttl(&self) -> Duration {
        self.default_intent_ttl
    }

    pub fn asset_decimals(&self) -> &AssetDecimals {
        &self.asset_decimals
    }

    pub fn notifier(&self) -> &NotifierConfig {
        &self.notifier
    }
}

/// Built-in defaults for chains the bridge is known to operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainPreset {
    pub required_confirmations: u64,
    pub native_asset: &'static str,
    pub native_decimals: u8,
    /// `(symbol, contract, decimals)`
    pub tokens: &'static [(&'static str, &'static str, u8)],
    pub explorer_tx_prefix: &'static str,
}

impl ChainPreset {
    pub fn for_chain(chain: &ChainId) -> Option<ChainPreset> {
        let preset = match chain.as_str() {
            "ethereum" => ChainPreset {
                required_confirmations: 12,
                native_asset: "ETH",
                native_decimals: 18,
                tokens: &[("USDC", "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", 6)],
                explorer_tx_prefix: "https://etherscan.io/tx/",
            },
            "polygon" => ChainPreset {
                required_confirmations: 200,
                native_asset: "MATIC",
                native_decimals: 18,
                tokens: &[("USDC", "0x3c499c542cef5e3811e1192ce70d8cc03d5c3359", 6)],
                explorer_tx_prefix: "https://polygonscan.com/tx/",
            },
            "avalanche" => ChainPreset {
                required_confirmations: 20,
                native_asset: "AVAX",
                native_decimals: 18,
                tokens: &[("USDC", "0xb97ef9ef8734c71904d8002f8b6bc66dd9c48a6e", 6)],
                explorer_tx_prefix: "https://avascan.info/blockchain/c/tx/",
            },
            "base" => ChainPreset {
                required_confirmations: 20,
                native_asset: "ETH",
                native_decimals: 18,
                tokens: &[("USDC", "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913", 6)],
                explorer_tx_prefix: "https://basescan.org/tx/",
            },
            "bsc" => ChainPreset {
                required_confirmations: 20,
                native_asset: "BNB",
                native_decimals: 18,
                tokens: &[("USDC", "0x8ac76a51cc950d9822d68b83fe1ad97b32cd580d", 18)],
                explorer_tx_prefix: "https://bscscan.com/tx/",
            },
            _ => return None,
        };
        Some(preset)
    }

    /// Decimals of `asset` as the preset knows it.
    pub fn decimals_of(&self, asset: &Asset) -> Option<u8> {
        if asset.as_str() == self.native_asset {
            return Some(self.native_decimals);
        }
        self.tokens
            .iter()
            .find(|(symbol, _, _)| *symbol == asset.as_str())
            .map(|(_, _, decimals)| *decimals)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenContract {
    pub asset: Asset,
    pub contract: Address,
    pub decimals: u8,
}

/// Decimals assumed for EVM assets configured without an explicit value.
pub const DEFAULT_ASSET_DECIMALS: u8 = 18;

/// Policy knobs for one monitored chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain: ChainId,
    pub rpc_url: String,
    pub start_height: u64,
    pub required_confirmations: u64,
    /// Blocks behind head that are not scanned yet.
    pub safety_lag: u64,
    pub max_reorg_depth: u64,
    pub cursor_history: usize,
    pub batch_size: u64,
    pub poll_interval: Duration,
    pub native_asset: Asset,
    pub native_decimals: u8,
    pub tokens: Vec<TokenContract>,
    pub amount_tolerance: Amount,
    pub aggregate_deposits: bool,
    pub explorer_tx_prefix: Option<String>,
}

impl ChainConfig {
    pub const DEFAULT_CONFIRMATIONS: u64 = 12;
    pub const DEFAULT_SAFETY_LAG: u64 = 2;
    pub const DEFAULT_MAX_REORG_DEPTH: u64 = 64;
    pub const DEFAULT_BATCH_SIZE: u64 = 50;
    pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

    /// Preset-backed defaults; only the endpoint and start height are
    /// mandatory.
    pub fn with_defaults(
        chain: ChainId,
        rpc_url: impl Into<String>,
        start_height: u64,
    ) -> Result<Self, ConfigError> {
        let preset = ChainPreset::for_chain(&chain);
        let native_asset = Asset::parse(preset.map_or("ETH", |p| p.native_asset))?;
        let mut tokens = Vec::new();
        for (symbol, contract, decimals) in preset.map_or(&[][..], |p| p.tokens) {
            tokens.push(TokenContract {
                asset: Asset::parse(symbol)?,
                contract: Address::parse(contract)?,
                decimals: *decimals,
            });
        }

        Ok(Self {
            rpc_url: rpc_url.into(),
            start_height,
            required_confirmations: preset
                .map_or(Self::DEFAULT_CONFIRMATIONS, |p| p.required_confirmations),
            safety_lag: Self::DEFAULT_SAFETY_LAG,
            max_reorg_depth: Self::DEFAULT_MAX_REORG_DEPTH,
            cursor_history: (Self::DEFAULT_MAX_REORG_DEPTH * 2) as usize,
            batch_size: Self::DEFAULT_BATCH_SIZE,
            poll_interval: Self::DEFAULT_POLL_INTERVAL,
            native_asset,
            native_decimals: preset.map_or(DEFAULT_ASSET_DECIMALS, |p| p.native_decimals),
            tokens,
            amount_tolerance: Amount::ZERO,
            aggregate_deposits: false,
            explorer_tx_prefix: preset.map(|p| p.explorer_tx_prefix.to_owned()),
            chain,
        })
    }

    /// Reads `<SLUG>_*` overrides on top of the preset defaults.
    pub fn load_from_env(chain: ChainId) -> Result<Self, ConfigError> {
        let prefix = chain.env_prefix();
        let key = |suffix: &str| format!("{prefix}_{suffix}");

        let rpc_url = get_required_var(&key("RPC_URL"))?;
        let start_height = parse_required(&key("START_HEIGHT"))?;
        let mut config = Self::with_defaults(chain, rpc_url, start_height)?;

        config.required_confirmations =
            parse_or(&key("REQUIRED_CONFIRMATIONS"), config.required_confirmations)?;
        config.safety_lag = parse_or(&key("SAFETY_LAG"), config.safety_lag)?;
        config.max_reorg_depth = parse_or(&key("MAX_REORG_DEPTH"), config.max_reorg_depth)?;
        config.cursor_history = parse_or(
            &key("CURSOR_HISTORY"),
            (config.max_reorg_depth * 2) as usize,
        )?;
        config.batch_size = parse_or(&key("BATCH_SIZE"), config.batch_size)?;
        config.poll_interval = Duration::from_secs(parse_or(
            &key("POLL_INTERVAL_SECS"),
            config.poll_interval.as_secs(),
        )?);
        if let Some(native) = get_optional_var(&key("NATIVE_ASSET")) {
            config.native_asset = Asset::parse(&native)?;
        }
        config.native_decimals = parse_or(&key("NATIVE_DECIMALS"), config.native_decimals)?;
        if let Some(tokens) = get_optional_var(&key("TOKENS")) {
            config.tokens = parse_tokens(&key("TOKENS"), &tokens)?;
        }
        if let Some(tolerance) = get_optional_var(&key("AMOUNT_TOLERANCE")) {
            config.amount_tolerance = tolerance.parse()?;
        }
        if let Some(flag) = get_optional_var(&key("AGGREGATE_DEPOSITS")) {
            config.aggregate_deposits = parse_bool(&key("AGGREGATE_DEPOSITS"), &flag)?;
        }
        if let Some(prefix) = get_optional_var(&key("EXPLORER_TX_PREFIX")) {
            config.explorer_tx_prefix = Some(prefix);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.required_confirmations == 0 {
            return Err(self.invalid("required confirmations must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(self.invalid("batch size must be at least 1"));
        }
        if self.cursor_history as u64 <= self.max_reorg_depth {
            return Err(self.invalid(
                "cursor history must be deeper than the maximum reorg depth",
            ));
        }
        Ok(())
    }

    pub fn token_for_contract(&self, contract: &Address) -> Option<&Asset> {
        self.tokens
            .iter()
            .find(|token| &token.contract == contract)
            .map(|token| &token.asset)
    }

    pub fn decimals_of(&self, asset: &Asset) -> Option<u8> {
        if asset == &self.native_asset {
            return Some(self.native_decimals);
        }
        self.tokens
            .iter()
            .find(|token| &token.asset == asset)
            .map(|token| token.decimals)
    }

    pub fn explorer_link(&self, tx_hash: &str) -> Option<String> {
        self.explorer_tx_prefix
            .as_ref()
            .map(|prefix| format!("{prefix}{tx_hash}"))
    }

    fn invalid(&self, reason: &str) -> ConfigError {
        ConfigError::Invalid {
            key: self.chain.env_prefix(),
            reason: reason.to_owned(),
        }
    }
}

/// Timeouts and backoff bounds for external calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub rpc_attempts: u32,
    pub rpc_base_delay: Duration,
    pub rpc_timeout: Duration,
    pub chain_pause: Duration,
    pub settlement_base_delay: Duration,
    pub settlement_max_delay: Duration,
    pub settlement_timeout: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            rpc_attempts: 5,
            rpc_base_delay: Duration::from_millis(500),
            rpc_timeout: Duration::from_secs(10),
            chain_pause: Duration::from_secs(30),
            settlement_base_delay: Duration::from_secs(5),
            settlement_max_delay: Duration::from_secs(900),
            settlement_timeout: Duration::from_secs(15),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementConfig {
    pub url: String,
    pub auth_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct NotifierConfig {
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
    pub disabled: bool,
}

impl NotifierConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            telegram_bot_token: get_optional_var("TELEGRAM_BOT_TOKEN"),
            telegram_chat_id: get_optional_var("TELEGRAM_CHAT_ID"),
            disabled: match get_optional_var("DISABLE_NOTIFICATIONS") {
                Some(flag) => parse_bool("DISABLE_NOTIFICATIONS", &flag)?,
                None => false,
            },
        })
    }

    pub fn telegram(&self) -> Option<(&str, &str)> {
        if self.disabled {
            return None;
        }
        match (&self.telegram_bot_token, &self.telegram_chat_id) {
            (Some(token), Some(chat)) => Some((token.as_str(), chat.as_str())),
            _ => None,
        }
    }
}

/// Monitor configuration: one [`ChainConfig`] per entry of `MONITOR_CHAINS`
/// plus the collaborator endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    database: DatabaseConfig,
    chains: Vec<ChainConfig>,
    settlement: SettlementConfig,
    notifier: NotifierConfig,
    retry: RetryConfig,
}

impl MonitorConfig {
    /// Loads configuration by hydrating `.env` (if present) and reading the
    /// required process variables. Missing or malformed entries surface as
    /// `ConfigError` so binaries can respond gracefully.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let database = DatabaseConfig::load_from_env()?;
        let mut chains = Vec::new();
        for slug in get_required_var("MONITOR_CHAINS")?.split(',') {
            let slug = slug.trim();
            if slug.is_empty() {
                continue;
            }
            let chain = ChainId::parse(slug)?;
            if chains.iter().any(|c: &ChainConfig| c.chain == chain) {
                return Err(ConfigError::Invalid {
                    key: "MONITOR_CHAINS".to_owned(),
                    reason: format!("chain `{chain}` listed twice"),
                });
            }
            chains.push(ChainConfig::load_from_env(chain)?);
        }
        if chains.is_empty() {
            return Err(ConfigError::MissingVar {
                key: "MONITOR_CHAINS".to_owned(),
            });
        }

        let defaults = RetryConfig::default();
        let retry = RetryConfig {
            rpc_attempts: parse_or("RPC_RETRY_ATTEMPTS", defaults.rpc_attempts)?.max(1),
            rpc_base_delay: Duration::from_millis(parse_or(
                "RPC_RETRY_BASE_MILLIS",
                defaults.rpc_base_delay.as_millis() as u64,
            )?),
            rpc_timeout: Duration::from_secs(parse_or(
                "RPC_TIMEOUT_SECS",
                defaults.rpc_timeout.as_secs(),
            )?),
            chain_pause: Duration::from_secs(parse_or(
                "CHAIN_PAUSE_SECS",
                defaults.chain_pause.as_secs(),
            )?),
            settlement_base_delay: Duration::from_secs(parse_or(
                "SETTLEMENT_RETRY_BASE_SECS",
                defaults.settlement_base_delay.as_secs(),
            )?),
            settlement_max_delay: Duration::from_secs(parse_or(
                "SETTLEMENT_RETRY_MAX_SECS",
                defaults.settlement_max_delay.as_secs(),
            )?),
            settlement_timeout: Duration::from_secs(parse_or(
                "SETTLEMENT_TIMEOUT_SECS",
                defaults.settlement_timeout.as_secs(),
            )?),
        };

        let settlement = SettlementConfig {
            url: get_required_var("SETTLEMENT_URL")?,
            auth_token: get_optional_var("SETTLEMENT_AUTH_TOKEN"),
        };

        let notifier = NotifierConfig::load_from_env()?;

        Ok(Self {
            database,
            chains,
            settlement,
            notifier,
            retry,
        })
    }

    pub fn database(&self) -> &DatabaseConfig {
        &self.database
    }

    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    pub fn chains(&self) -> &[ChainConfig] {
        &self.chains
    }

    pub fn settlement(&self) -> &SettlementConfig {
        &self.settlement
    }

    pub fn notifier(&self) -> &NotifierConfig {
        &self.notifier
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}

fn get_required_var(key: &str) -> Result<String, ConfigError> {
    get_optional_var(key).ok_or_else(|| ConfigError::MissingVar {
        key: key.to_owned(),
    })
}

fn get_optional_var(key: &str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn parse_required<T: std::str::FromStr>(key: &str) -> Result<T, ConfigError> {
    let raw = get_required_var(key)?;
    raw.parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_owned(),
        value: raw,
    })
}

fn parse_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match get_optional_var(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidNumber {
            key: key.to_owned(),
            value: raw,
        }),
        None => Ok(default),
    }
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    get_optional_var(key)
        .map(|raw| {
            raw.parse().map_err(|_| ConfigError::InvalidNumber {
                key: key.to_owned(),
                value: raw,
            })
        })
        .transpose()
}

fn parse_bool(key: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key: key.to_owned(),
            reason: format!("unexpected boolean value `{value}`"),
        }),
    }
}

fn parse_tokens(key: &str, raw: &str) -> Result<Vec<TokenContract>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let invalid = || ConfigError::Invalid {
                key: key.to_owned(),
                reason: format!("expected SYMBOL:0xcontract[:decimals], got `{entry}`"),
            };
            let mut parts = entry.split(':');
            let (Some(symbol), Some(contract)) = (parts.next(), parts.next()) else {
                return Err(invalid());
            };
            let decimals = match parts.next() {
                Some(raw) => raw.trim().parse().map_err(|_| invalid())?,
                None => DEFAULT_ASSET_DECIMALS,
            };
            if parts.next().is_some() {
                return Err(invalid());
            }
            Ok(TokenContract {
                asset: Asset::parse(symbol)?,
                contract: Address::parse(contract)?,
                decimals,
            })
        })
        .collect()
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("XFER_BRIDGE_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: String },
    #[error("invalid number in `{key}`: `{value}`")]
    InvalidNumber { key: String, value: String },
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: String, reason: String },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}
